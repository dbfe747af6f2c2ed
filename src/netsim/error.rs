use thiserror::Error;

#[derive(Error, Debug)]
pub enum NetSimError {
    #[error("Failed to start delivery thread: {0}")]
    SchedulerStart(#[source] std::io::Error),

    #[error("Unknown property: {0}")]
    UnknownProperty(String),

    #[error("Invalid value {value:?} for property {name}: {reason}")]
    InvalidProperty {
        name: String,
        value: String,
        reason: String,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Config parse error: {0}")]
    Config(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type NetSimResult<T> = Result<T, NetSimError>;

/// Status returned by a downstream sink for a pushed buffer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FlowError {
    #[error("Downstream is flushing")]
    Flushing,

    #[error("End of stream")]
    Eos,

    #[error("Downstream not linked")]
    NotLinked,

    #[error("Downstream error: {0}")]
    Error(String),
}

pub type FlowResult = Result<(), FlowError>;

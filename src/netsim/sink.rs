use crate::netsim::error::FlowResult;
use crate::netsim::types::Buffer;

/// Downstream consumer of forwarded buffers.
///
/// Called from the arrival thread for immediate forwards and from the
/// delivery thread for delayed ones.
pub trait BufferSink: Send + Sync {
    fn push(&self, buffer: Buffer) -> FlowResult;
}

impl<F> BufferSink for F
where
    F: Fn(Buffer) -> FlowResult + Send + Sync,
{
    fn push(&self, buffer: Buffer) -> FlowResult {
        self(buffer)
    }
}

pub mod clock;
pub mod distribution;
pub mod error;
pub mod filter;
pub mod random;
pub mod scheduler;
pub mod sink;
pub mod token_bucket;
pub mod types;

pub use clock::{Clock, ManualClock, NoClock, SystemClock};
pub use distribution::{DelayDistribution, NormalDistributionState};
pub use error::{FlowError, FlowResult, NetSimError, NetSimResult};
pub use filter::NetSimFilter;
pub use random::RandomSource;
pub use scheduler::{ScheduledDelivery, SchedulerPhase};
pub use sink::BufferSink;
pub use token_bucket::TokenBucket;
pub use types::{Buffer, FilterConfig, FilterStats, Property};

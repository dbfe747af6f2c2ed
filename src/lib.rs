//! Network simulation filter
//!
//! A one-in/one-out traffic shaping element that probabilistically delays,
//! drops, duplicates and rate-limits buffers on their way downstream.

pub mod metrics;
pub mod netsim;

pub use netsim::{
    Buffer, BufferSink, Clock, DelayDistribution, FilterConfig, FilterStats, FlowError,
    FlowResult, ManualClock, NetSimError, NetSimFilter, NetSimResult, SystemClock,
};

//! In-process harness for driving a filter in integration tests

pub mod network_profile;
pub mod recording_sink;

pub use network_profile::NetworkProfile;
pub use recording_sink::{tagged_buffer, RecordingSink};

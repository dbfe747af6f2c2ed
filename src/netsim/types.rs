use crate::netsim::distribution::DelayDistribution;
use crate::netsim::error::{NetSimError, NetSimResult};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Opaque unit of data flowing through the filter.
///
/// Cloning only bumps the reference count of the payload, so a buffer can be
/// held by the filter and by any number of pending deliveries at once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Buffer {
    data: Bytes,
    pts: Option<Duration>,
}

impl Buffer {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            pts: None,
        }
    }

    /// Attach a presentation timestamp
    pub fn with_pts(mut self, pts: Duration) -> Self {
        self.pts = Some(pts);
        self
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn pts(&self) -> Option<Duration> {
        self.pts
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn size_in_bits(&self) -> u64 {
        self.data.len() as u64 * 8
    }
}

impl From<Vec<u8>> for Buffer {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}

impl From<&'static [u8]> for Buffer {
    fn from(data: &'static [u8]) -> Self {
        Self::new(Bytes::from_static(data))
    }
}

pub const DEFAULT_MIN_DELAY: i32 = 200;
pub const DEFAULT_MAX_DELAY: i32 = 400;
pub const DEFAULT_MAX_KBPS: i32 = -1;
pub const DEFAULT_MAX_BUCKET_SIZE: i32 = -1;

/// Filter configuration
///
/// Field names serialize in kebab-case so a JSON document uses the same keys
/// as the property interface (`min-delay`, `drop-probability`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct FilterConfig {
    /// Lower delay bound in milliseconds
    pub min_delay: i32,
    /// Upper delay bound in milliseconds
    pub max_delay: i32,
    pub delay_distribution: DelayDistribution,
    /// Chance (0.0 - 1.0) that a forwarded buffer is delayed
    pub delay_probability: f32,
    /// Chance (0.0 - 1.0) that a buffer is dropped
    pub drop_probability: f32,
    /// Chance (0.0 - 1.0) that a buffer is forwarded twice
    pub duplicate_probability: f32,
    /// Unconditionally drop the next N buffers
    pub drop_packets: u32,
    /// Throughput cap in kilobits per second (-1 = unlimited)
    pub max_kbps: i32,
    /// Token bucket size in kilobits (-1 = unlimited)
    pub max_bucket_size: i32,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_delay: DEFAULT_MIN_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            delay_distribution: DelayDistribution::Uniform,
            delay_probability: 0.0,
            drop_probability: 0.0,
            duplicate_probability: 0.0,
            drop_packets: 0,
            max_kbps: DEFAULT_MAX_KBPS,
            max_bucket_size: DEFAULT_MAX_BUCKET_SIZE,
        }
    }
}

impl FilterConfig {
    /// Pass-through: nothing is delayed, dropped or limited
    pub fn perfect() -> Self {
        Self::default()
    }

    /// Typical LAN link
    pub fn lan() -> Self {
        Self {
            min_delay: 0,
            max_delay: 2,
            delay_probability: 1.0,
            drop_probability: 0.001,
            ..Default::default()
        }
    }

    /// Typical WiFi link
    pub fn wifi() -> Self {
        Self {
            min_delay: 5,
            max_delay: 25,
            delay_distribution: DelayDistribution::Normal,
            delay_probability: 1.0,
            drop_probability: 0.02,
            ..Default::default()
        }
    }

    /// Degraded 4G/LTE link with a 10 Mbps cap
    pub fn mobile_4g() -> Self {
        Self {
            min_delay: 50,
            max_delay: 110,
            delay_distribution: DelayDistribution::Normal,
            delay_probability: 1.0,
            drop_probability: 0.05,
            duplicate_probability: 0.01,
            max_kbps: 10_000,
            max_bucket_size: 1_000,
            ..Default::default()
        }
    }

    /// Heavy loss, long jittery delays and a 1 Mbps cap
    pub fn disaster_scenario() -> Self {
        Self {
            min_delay: 200,
            max_delay: 400,
            delay_distribution: DelayDistribution::Uniform,
            delay_probability: 1.0,
            drop_probability: 0.20,
            duplicate_probability: 0.02,
            max_kbps: 1_000,
            max_bucket_size: 200,
            ..Default::default()
        }
    }

    /// Check values against the ranges accepted by the property interface.
    ///
    /// Inverted delay bounds are accepted.
    pub fn validate(&self) -> NetSimResult<()> {
        for (name, value) in [
            (Property::DelayProbability, self.delay_probability),
            (Property::DropProbability, self.drop_probability),
            (Property::DuplicateProbability, self.duplicate_probability),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(NetSimError::InvalidConfig(format!(
                    "{name} must be within [0, 1], got {value}"
                )));
            }
        }

        for (name, value) in [
            (Property::MaxKbps, self.max_kbps),
            (Property::MaxBucketSize, self.max_bucket_size),
        ] {
            if value < -1 {
                return Err(NetSimError::InvalidConfig(format!(
                    "{name} must be -1 or non-negative, got {value}"
                )));
            }
        }

        Ok(())
    }

    pub fn from_json_str(json: &str) -> NetSimResult<Self> {
        let config: FilterConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> NetSimResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Parse `value` and store it in the field named by `property`
    pub fn set(&mut self, property: Property, value: &str) -> NetSimResult<()> {
        let invalid = |reason: &str| NetSimError::InvalidProperty {
            name: property.name().to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        };
        let value = value.trim();

        match property {
            Property::MinDelay => {
                self.min_delay = value.parse().map_err(|_| invalid("expected an integer"))?;
            }
            Property::MaxDelay => {
                self.max_delay = value.parse().map_err(|_| invalid("expected an integer"))?;
            }
            Property::DelayDistribution => {
                self.delay_distribution = value
                    .parse()
                    .map_err(|_| invalid("expected uniform or normal"))?;
            }
            Property::DelayProbability
            | Property::DropProbability
            | Property::DuplicateProbability => {
                let p: f32 = value.parse().map_err(|_| invalid("expected a number"))?;
                if !(0.0..=1.0).contains(&p) {
                    return Err(invalid("must be within [0, 1]"));
                }
                match property {
                    Property::DelayProbability => self.delay_probability = p,
                    Property::DropProbability => self.drop_probability = p,
                    _ => self.duplicate_probability = p,
                }
            }
            Property::DropPackets => {
                self.drop_packets = value
                    .parse()
                    .map_err(|_| invalid("expected a non-negative integer"))?;
            }
            Property::MaxKbps | Property::MaxBucketSize => {
                let v: i32 = value.parse().map_err(|_| invalid("expected an integer"))?;
                if v < -1 {
                    return Err(invalid("must be -1 or non-negative"));
                }
                if property == Property::MaxKbps {
                    self.max_kbps = v;
                } else {
                    self.max_bucket_size = v;
                }
            }
        }

        Ok(())
    }

    /// Render the field named by `property`
    pub fn get(&self, property: Property) -> String {
        match property {
            Property::MinDelay => self.min_delay.to_string(),
            Property::MaxDelay => self.max_delay.to_string(),
            Property::DelayDistribution => self.delay_distribution.to_string(),
            Property::DelayProbability => self.delay_probability.to_string(),
            Property::DropProbability => self.drop_probability.to_string(),
            Property::DuplicateProbability => self.duplicate_probability.to_string(),
            Property::DropPackets => self.drop_packets.to_string(),
            Property::MaxKbps => self.max_kbps.to_string(),
            Property::MaxBucketSize => self.max_bucket_size.to_string(),
        }
    }
}

/// Names of the settable filter properties
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Property {
    MinDelay,
    MaxDelay,
    DelayDistribution,
    DelayProbability,
    DropProbability,
    DuplicateProbability,
    DropPackets,
    MaxKbps,
    MaxBucketSize,
}

impl Property {
    pub const ALL: [Property; 9] = [
        Property::MinDelay,
        Property::MaxDelay,
        Property::DelayDistribution,
        Property::DelayProbability,
        Property::DropProbability,
        Property::DuplicateProbability,
        Property::DropPackets,
        Property::MaxKbps,
        Property::MaxBucketSize,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Property::MinDelay => "min-delay",
            Property::MaxDelay => "max-delay",
            Property::DelayDistribution => "delay-distribution",
            Property::DelayProbability => "delay-probability",
            Property::DropProbability => "drop-probability",
            Property::DuplicateProbability => "duplicate-probability",
            Property::DropPackets => "drop-packets",
            Property::MaxKbps => "max-kbps",
            Property::MaxBucketSize => "max-bucket-size",
        }
    }
}

impl fmt::Display for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Property {
    type Err = NetSimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Property::ALL
            .into_iter()
            .find(|p| p.name() == s)
            .ok_or_else(|| NetSimError::UnknownProperty(s.to_string()))
    }
}

/// Counters kept by a filter instance
#[derive(Debug, Default)]
pub struct FilterStats {
    pub buffers_received: AtomicU64,
    /// Refused by the token bucket
    pub buffers_rejected: AtomicU64,
    pub buffers_dropped: AtomicU64,
    pub buffers_duplicated: AtomicU64,
    pub buffers_delayed: AtomicU64,
    /// Pushed synchronously on the arrival thread
    pub forwarded_immediate: AtomicU64,
    /// Pushed by the delivery thread after a delay
    pub forwarded_delayed: AtomicU64,
    /// Still pending when the delivery loop was shut down
    pub discarded_on_stop: AtomicU64,
    pub bytes_forwarded: AtomicU64,
}

impl FilterStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn forwarded_total(&self) -> u64 {
        self.forwarded_immediate.load(Ordering::Relaxed)
            + self.forwarded_delayed.load(Ordering::Relaxed)
    }

    pub fn loss_rate(&self) -> f64 {
        let received = self.buffers_received.load(Ordering::Relaxed);
        let lost = self.buffers_dropped.load(Ordering::Relaxed)
            + self.buffers_rejected.load(Ordering::Relaxed);
        if received > 0 {
            lost as f64 / received as f64
        } else {
            0.0
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "Received: {}, Rejected: {}, Dropped: {} ({:.1}% lost), Duplicated: {}, Delayed: {}, Forwarded: {} immediate / {} delayed, Discarded on stop: {}",
            self.buffers_received.load(Ordering::Relaxed),
            self.buffers_rejected.load(Ordering::Relaxed),
            self.buffers_dropped.load(Ordering::Relaxed),
            self.loss_rate() * 100.0,
            self.buffers_duplicated.load(Ordering::Relaxed),
            self.buffers_delayed.load(Ordering::Relaxed),
            self.forwarded_immediate.load(Ordering::Relaxed),
            self.forwarded_delayed.load(Ordering::Relaxed),
            self.discarded_on_stop.load(Ordering::Relaxed),
        )
    }

    pub fn reset(&self) {
        self.buffers_received.store(0, Ordering::Relaxed);
        self.buffers_rejected.store(0, Ordering::Relaxed);
        self.buffers_dropped.store(0, Ordering::Relaxed);
        self.buffers_duplicated.store(0, Ordering::Relaxed);
        self.buffers_delayed.store(0, Ordering::Relaxed);
        self.forwarded_immediate.store(0, Ordering::Relaxed);
        self.forwarded_delayed.store(0, Ordering::Relaxed);
        self.discarded_on_stop.store(0, Ordering::Relaxed);
        self.bytes_forwarded.store(0, Ordering::Relaxed);
    }
}

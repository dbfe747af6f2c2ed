//! Delay sampling

use crate::netsim::error::NetSimError;
use crate::netsim::random::RandomSource;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

/// z-score bounding a 95% confidence interval
const CONFIDENCE_95: f64 = 1.96;

/// Shape of the delay applied to delayed buffers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DelayDistribution {
    #[default]
    Uniform,
    Normal,
}

impl DelayDistribution {
    /// Draw a delay in milliseconds between `min` and `max`, never negative
    pub fn sample(
        &self,
        rng: &mut RandomSource,
        min: i32,
        max: i32,
        state: &mut NormalDistributionState,
    ) -> u64 {
        let delay = match self {
            DelayDistribution::Uniform => i64::from(rng.uniform_int(min, max)),
            DelayDistribution::Normal => state.sample(rng, min, max),
        };
        delay.max(0) as u64
    }
}

impl fmt::Display for DelayDistribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DelayDistribution::Uniform => f.write_str("uniform"),
            DelayDistribution::Normal => f.write_str("normal"),
        }
    }
}

impl FromStr for DelayDistribution {
    type Err = NetSimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uniform" => Ok(DelayDistribution::Uniform),
            "normal" => Ok(DelayDistribution::Normal),
            other => Err(NetSimError::InvalidConfig(format!(
                "unknown delay distribution: {other}"
            ))),
        }
    }
}

/// Box-Muller pair cache.
///
/// Every transform yields two independent gaussian samples; the first call of
/// a pair computes both and returns `z0`, the next call returns the cached
/// `z1` without drawing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalDistributionState {
    generate: bool,
    z0: f64,
    z1: f64,
}

impl NormalDistributionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sample a normal distribution whose 95% interval spans `[low, high]`.
    pub fn sample(&mut self, rng: &mut RandomSource, low: i32, high: i32) -> i64 {
        let mu = (f64::from(high) + f64::from(low)) / 2.0;
        let sigma = (f64::from(high) - f64::from(low)) / (2.0 * CONFIDENCE_95);

        self.generate = !self.generate;

        if !self.generate {
            return (self.z1 * sigma + mu).round() as i64;
        }

        let (u1, u2) = loop {
            let u1 = rng.uniform_double();
            let u2 = rng.uniform_double();
            if u1 > f64::EPSILON {
                break (u1, u2);
            }
        };

        let t1 = (-2.0 * u1.ln()).sqrt();
        let t2 = 2.0 * PI * u2;
        self.z0 = t1 * t2.cos();
        self.z1 = t1 * t2.sin();

        (self.z0 * sigma + mu).round() as i64
    }
}

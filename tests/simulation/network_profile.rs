//! Predefined network profiles for testing

#![allow(dead_code)]

use netsim::FilterConfig;

/// Named filter configuration
#[derive(Debug, Clone)]
pub struct NetworkProfile {
    pub name: String,
    pub description: String,
    pub config: FilterConfig,
}

impl NetworkProfile {
    /// Get all predefined profiles
    pub fn all_profiles() -> Vec<NetworkProfile> {
        vec![
            Self::perfect(),
            Self::lan(),
            Self::wifi(),
            Self::mobile_4g(),
            Self::disaster(),
            Self::lossy(0.05),
            Self::lossy(0.15),
            Self::lossy(0.30),
        ]
    }

    pub fn perfect() -> Self {
        Self {
            name: "perfect".to_string(),
            description: "Pass-through, nothing delayed or lost".to_string(),
            config: FilterConfig::perfect(),
        }
    }

    pub fn lan() -> Self {
        Self {
            name: "lan".to_string(),
            description: "LAN (0-2ms delay, 0.1% loss)".to_string(),
            config: FilterConfig::lan(),
        }
    }

    pub fn wifi() -> Self {
        Self {
            name: "wifi".to_string(),
            description: "WiFi (5-25ms normal delay, 2% loss)".to_string(),
            config: FilterConfig::wifi(),
        }
    }

    pub fn mobile_4g() -> Self {
        Self {
            name: "mobile_4g".to_string(),
            description: "Degraded 4G (50-110ms, 5% loss, 10Mbps)".to_string(),
            config: FilterConfig::mobile_4g(),
        }
    }

    pub fn disaster() -> Self {
        Self {
            name: "disaster".to_string(),
            description: "Disaster scenario (200-400ms, 20% loss, 1Mbps)".to_string(),
            config: FilterConfig::disaster_scenario(),
        }
    }

    /// Pure random loss, no delay
    pub fn lossy(drop_probability: f32) -> Self {
        Self {
            name: format!("lossy_{}pct", (drop_probability * 100.0).round()),
            description: format!("{:.0}% random loss", drop_probability * 100.0),
            config: FilterConfig {
                drop_probability,
                ..Default::default()
            },
        }
    }

    /// Same profile with the token bucket disabled
    pub fn without_rate_limit(mut self) -> Self {
        self.config.max_kbps = -1;
        self.config.max_bucket_size = -1;
        self
    }
}

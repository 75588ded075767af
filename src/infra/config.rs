// src/infra/config.rs — Configuration loading (TOML)

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::infra::paths;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub billing: BillingConfig,

    #[serde(default)]
    pub accounts: AccountsConfig,

    #[serde(default)]
    pub api: ApiConfig,
}

/// Rates and timing for call metering.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BillingConfig {
    pub audio_rate_per_minute: u32,
    pub video_rate_per_minute: u32,
    /// Real-time period between two billing ticks. One tick bills one second.
    pub tick_interval_ms: u64,
    /// Extra attempts for the final balance write. 0 = fire-and-forget.
    pub persist_retries: u32,
    pub persist_backoff_ms: u64,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            audio_rate_per_minute: 10,
            video_rate_per_minute: 60,
            tick_interval_ms: 1000,
            persist_retries: 0,
            persist_backoff_ms: 500,
        }
    }
}

impl BillingConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn persist_backoff(&self) -> Duration {
        Duration::from_millis(self.persist_backoff_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountsConfig {
    /// Coins granted to a user on first login.
    pub starting_coins: u64,
}

impl Default for AccountsConfig {
    fn default() -> Self {
        Self {
            starting_coins: 750,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 5000,
            cors_origins: vec![
                "http://localhost:5000".into(),
                "http://localhost:5173".into(),
                "http://127.0.0.1:5173".into(),
            ],
        }
    }
}

impl Config {
    /// Load config from file, falling back to defaults.
    pub fn load() -> anyhow::Result<Self> {
        let path = paths::config_file_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        let billing = &self.billing;
        let positive = [
            ("tick_interval_ms", billing.tick_interval_ms),
            ("audio_rate_per_minute", u64::from(billing.audio_rate_per_minute)),
            ("video_rate_per_minute", u64::from(billing.video_rate_per_minute)),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(crate::infra::errors::DosttError::Config(format!(
                    "billing.{field} must be greater than 0"
                ))
                .into());
            }
        }
        Ok(())
    }
}

// src/billing/rate.rs — Call kinds and the per-minute rate table

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::infra::config::BillingConfig;

/// Billing happens in sixtieths of a coin so that a per-minute rate divides
/// evenly into per-second ticks.
pub const SUBUNITS_PER_COIN: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallKind {
    Audio,
    Video,
}

impl CallKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallKind::Audio => "audio",
            CallKind::Video => "video",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            CallKind::Audio => "Audio Call",
            CallKind::Video => "Video Call",
        }
    }
}

impl fmt::Display for CallKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CallKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "audio" => Ok(CallKind::Audio),
            "video" => Ok(CallKind::Video),
            other => Err(format!("unknown call kind '{other}' (expected audio or video)")),
        }
    }
}

/// Coins per minute for each call kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateTable {
    pub audio: u32,
    pub video: u32,
}

impl Default for RateTable {
    fn default() -> Self {
        Self {
            audio: 10,
            video: 60,
        }
    }
}

impl RateTable {
    pub fn from_config(config: &BillingConfig) -> Self {
        Self {
            audio: config.audio_rate_per_minute,
            video: config.video_rate_per_minute,
        }
    }

    pub fn per_minute(&self, kind: CallKind) -> u32 {
        match kind {
            CallKind::Audio => self.audio,
            CallKind::Video => self.video,
        }
    }

    /// Per-second rate as a float, for display only.
    pub fn per_second(&self, kind: CallKind) -> f64 {
        self.per_minute(kind) as f64 / 60.0
    }
}

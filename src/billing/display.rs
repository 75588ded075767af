// src/billing/display.rs — Rendering of the live call status line

use std::fmt;

use super::rate::CallKind;
use super::session::{CallStatus, TickResult};

/// Format elapsed seconds as zero-padded `MM:SS`. Minutes keep growing past 99.
pub fn format_elapsed(seconds: u64) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}

/// One rendered frame of the call screen.
pub struct CallDisplay<'a> {
    pub companion: &'a str,
    pub kind: CallKind,
    pub rate_per_minute: u32,
    pub tick: TickResult,
}

impl fmt::Display for CallDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.tick.status {
            CallStatus::Active => "",
            CallStatus::EndedByUser => "  [ended]",
            CallStatus::EndedByDepletion => "  [out of coins]",
        };
        write!(
            f,
            "{} with {}  {}  {} coins  ({} coins/minute){}",
            self.kind.label(),
            self.companion,
            format_elapsed(self.tick.elapsed_seconds),
            self.tick.coins_remaining,
            self.rate_per_minute,
            state
        )
    }
}

// src/billing/session.rs — Call billing state machine
//
// Pure, clock-free core of a call: the scheduler calls `tick()` once per
// billed second, the user calls `end()` to hang up. Balances are tracked in
// sixtieths of a coin so any per-minute rate is exact per second.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::rate::{CallKind, RateTable, SUBUNITS_PER_COIN};
use crate::infra::errors::DosttError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Active,
    EndedByUser,
    EndedByDepletion,
}

impl CallStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, CallStatus::Active)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Active => "active",
            CallStatus::EndedByUser => "ended_by_user",
            CallStatus::EndedByDepletion => "ended_by_depletion",
        }
    }
}

/// What the display layer gets after every tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickResult {
    pub elapsed_seconds: u64,
    /// Floored remaining coins.
    pub coins_remaining: u64,
    pub status: CallStatus,
}

impl TickResult {
    pub fn ended(&self) -> bool {
        !self.status.is_active()
    }
}

/// The single write-back a finished session asks the account store to apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistBalance {
    pub companion_id: i64,
    pub kind: CallKind,
    pub started_at: DateTime<Utc>,
    pub final_balance: u64,
    pub elapsed_seconds: u64,
    pub coins_spent: u64,
    pub ended_by: CallStatus,
}

#[derive(Debug, Clone)]
pub struct CallSession {
    companion_id: i64,
    kind: CallKind,
    rate_per_minute: u32,
    started_at: DateTime<Utc>,
    elapsed_seconds: u64,
    /// Remaining balance in sixtieths of a coin.
    remaining: u64,
    /// Starting balance plus every top-up, in whole coins.
    credited: u64,
    status: CallStatus,
    persist_pending: bool,
}

impl CallSession {
    /// Open a session from a balance snapshot.
    ///
    /// A zero balance yields a session that is already ended by depletion;
    /// it never ticks and its persist effect carries 0.
    pub fn start(
        companion_id: i64,
        kind: CallKind,
        rates: &RateTable,
        balance: i64,
    ) -> Result<Self, DosttError> {
        if balance < 0 {
            return Err(DosttError::InvalidStartState { balance });
        }
        let coins = balance as u64;
        let status = if coins == 0 {
            CallStatus::EndedByDepletion
        } else {
            CallStatus::Active
        };

        Ok(Self {
            companion_id,
            kind,
            rate_per_minute: rates.per_minute(kind),
            started_at: Utc::now(),
            elapsed_seconds: 0,
            remaining: coins.saturating_mul(SUBUNITS_PER_COIN),
            credited: coins,
            status,
            persist_pending: true,
        })
    }

    /// Bill one second. No-op once the session has ended.
    pub fn tick(&mut self) -> TickResult {
        if self.status.is_active() {
            self.elapsed_seconds += 1;
            // Rate per second is rate_per_minute / 60 coins = rate_per_minute subunits
            self.remaining = self.remaining.saturating_sub(self.rate_per_minute as u64);
            if self.remaining == 0 {
                self.status = CallStatus::EndedByDepletion;
            }
        }
        self.snapshot()
    }

    /// Hang up. Returns the floored final balance; repeated calls return the
    /// same value and change nothing.
    pub fn end(&mut self) -> u64 {
        if self.status.is_active() {
            self.status = CallStatus::EndedByUser;
        }
        self.coins_floor()
    }

    /// Credit coins into a running call. Ignored once the call has ended.
    pub fn top_up(&mut self, coins: u64) -> bool {
        if !self.status.is_active() || coins == 0 {
            return false;
        }
        self.remaining = self
            .remaining
            .saturating_add(coins.saturating_mul(SUBUNITS_PER_COIN));
        self.credited = self.credited.saturating_add(coins);
        true
    }

    /// Hand out the persist effect. Yields `Some` exactly once, after the
    /// session has ended.
    pub fn take_persist_effect(&mut self) -> Option<PersistBalance> {
        if self.status.is_active() || !self.persist_pending {
            return None;
        }
        self.persist_pending = false;
        let final_balance = self.coins_floor();
        Some(PersistBalance {
            companion_id: self.companion_id,
            kind: self.kind,
            started_at: self.started_at,
            final_balance,
            elapsed_seconds: self.elapsed_seconds,
            coins_spent: self.credited.saturating_sub(final_balance),
            ended_by: self.status,
        })
    }

    pub fn snapshot(&self) -> TickResult {
        TickResult {
            elapsed_seconds: self.elapsed_seconds,
            coins_remaining: self.coins_floor(),
            status: self.status,
        }
    }

    pub fn coins_floor(&self) -> u64 {
        self.remaining / SUBUNITS_PER_COIN
    }

    pub fn status(&self) -> CallStatus {
        self.status
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub fn kind(&self) -> CallKind {
        self.kind
    }

    pub fn companion_id(&self) -> i64 {
        self.companion_id
    }

    pub fn rate_per_minute(&self) -> u32 {
        self.rate_per_minute
    }

    pub fn elapsed_seconds(&self) -> u64 {
        self.elapsed_seconds
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}

// src/api/types.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::billing::{CallKind, CallStatus, SessionHandle};

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CoinsUpdate {
    pub coins: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RechargeRequest {
    /// Size of the package being bought.
    pub coins: u64,
    #[serde(default)]
    pub payment_method: Option<String>,
}

/// Request body for starting a call. Leave `companionId` out for a random
/// online companion, and `kind` out for a random call kind.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartCallRequest {
    #[serde(default)]
    pub companion_id: Option<i64>,
    #[serde(default)]
    pub kind: Option<CallKind>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserQuery {
    pub user_id: Option<i64>,
}

/// Live state of a user's call.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallState {
    pub user_id: i64,
    pub companion_id: i64,
    pub companion_name: Option<String>,
    pub kind: CallKind,
    pub rate_per_minute: u32,
    pub started_at: DateTime<Utc>,
    pub elapsed_seconds: u64,
    pub coins_remaining: u64,
    pub status: CallStatus,
}

impl CallState {
    pub fn from_handle(handle: &SessionHandle, companion_name: Option<String>) -> Self {
        let tick = handle.snapshot();
        Self {
            user_id: handle.user_id(),
            companion_id: handle.companion_id(),
            companion_name,
            kind: handle.kind(),
            rate_per_minute: handle.rate_per_minute(),
            started_at: handle.started_at(),
            elapsed_seconds: tick.elapsed_seconds,
            coins_remaining: tick.coins_remaining,
            status: tick.status,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallEnded {
    pub final_balance: u64,
    pub elapsed_seconds: u64,
    pub status: CallStatus,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub status: &'static str,
    pub version: &'static str,
    pub active_calls: usize,
}

/// Error response body: `{"message": "..."}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub message: String,
}

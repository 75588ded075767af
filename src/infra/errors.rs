// src/infra/errors.rs — Error types for Dostt

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DosttError {
    // Billing errors
    #[error("Cannot start a call with a negative balance ({balance} coins)")]
    InvalidStartState { balance: i64 },

    #[error("Failed to persist final balance {balance} for user {user_id}: {message}")]
    PersistFailure {
        user_id: i64,
        balance: u64,
        message: String,
    },

    #[error("User {user_id} already has an active call")]
    CallActive { user_id: i64 },

    // Lookup errors
    #[error("User {user_id} not found")]
    UserNotFound { user_id: i64 },

    #[error("Companion {companion_id} not found")]
    CompanionNotFound { companion_id: i64 },

    #[error("Companion '{name}' is offline")]
    CompanionOffline { name: String },

    #[error("No companion is online right now")]
    NoOnlineCompanion,

    // Infra
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DosttError {
    /// Recover a typed error from an `anyhow` chain produced by the store layer.
    pub fn from_anyhow(err: anyhow::Error) -> Self {
        match err.downcast::<DosttError>() {
            Ok(typed) => typed,
            Err(other) => DosttError::Other(other),
        }
    }

    /// Lookup failures the caller can fix by choosing a different id.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            DosttError::UserNotFound { .. } | DosttError::CompanionNotFound { .. }
        )
    }
}

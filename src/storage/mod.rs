// src/storage/mod.rs — Account storage

pub mod remote;
pub mod schema;
pub mod store;
pub mod store_server;

use async_trait::async_trait;
use rusqlite::Connection;
use std::path::Path;

use store::{NewCall, Store};

/// What a call session needs from account storage: read the balance once at
/// start, write the final balance once at the end.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Current balance. Fails with `DosttError::UserNotFound` for unknown users.
    async fn get_balance(&self, user_id: i64) -> anyhow::Result<i64>;

    async fn set_balance(&self, user_id: i64, coins: u64) -> anyhow::Result<()>;

    /// Append a call history entry. Stores without history accept and drop it.
    async fn record_call(&self, _call: &NewCall) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Open (or create) the database at the given path.
pub fn open(path: &Path) -> anyhow::Result<Store> {
    let conn = Connection::open(path)?;
    // Enable WAL mode for better concurrent performance
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    conn.execute_batch("PRAGMA foreign_keys=ON;")?;

    schema::run_migrations(&conn)?;
    Ok(Store::new(conn))
}

/// Create an in-memory database (for testing).
pub fn in_memory() -> anyhow::Result<Store> {
    let conn = Connection::open_in_memory()?;
    conn.execute_batch("PRAGMA foreign_keys=ON;")?;
    schema::run_migrations(&conn)?;
    Ok(Store::new(conn))
}

// src/storage/store.rs — SQLite operations

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

/// Low-level SQLite operations for accounts, companions, calls and the ledger.
pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    // -- Users --

    pub fn get_user(&self, id: i64) -> anyhow::Result<Option<UserRow>> {
        let user = self
            .conn
            .query_row(
                "SELECT id, username, coins FROM users WHERE id = ?1",
                params![id],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    pub fn get_user_by_username(&self, username: &str) -> anyhow::Result<Option<UserRow>> {
        let user = self
            .conn
            .query_row(
                "SELECT id, username, coins FROM users WHERE username = ?1",
                params![username],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    pub fn create_user(&self, username: &str, coins: i64) -> anyhow::Result<UserRow> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO users (username, coins, created_at) VALUES (?1, ?2, ?3)",
            params![username, coins, now],
        )?;
        Ok(UserRow {
            id: self.conn.last_insert_rowid(),
            username: username.to_string(),
            coins,
        })
    }

    /// Username-only login: fetch the user, creating it with `starting_coins`
    /// on first sight.
    pub fn login_or_create(&self, username: &str, starting_coins: i64) -> anyhow::Result<UserRow> {
        match self.get_user_by_username(username)? {
            Some(user) => Ok(user),
            None => {
                tracing::info!(username, starting_coins, "Creating new user");
                self.create_user(username, starting_coins)
            }
        }
    }

    /// Overwrite the balance. `None` when the user does not exist.
    pub fn update_user_coins(&self, id: i64, coins: i64) -> anyhow::Result<Option<UserRow>> {
        let changed = self.conn.execute(
            "UPDATE users SET coins = ?1 WHERE id = ?2",
            params![coins, id],
        )?;
        if changed == 0 {
            return Ok(None);
        }
        self.get_user(id)
    }

    // -- Companions --

    pub fn list_companions(&self) -> anyhow::Result<Vec<CompanionRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, age, languages, interests, image_url, is_online
             FROM companions ORDER BY id",
        )?;
        let rows = stmt.query_map([], companion_from_row)?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    pub fn get_companion(&self, id: i64) -> anyhow::Result<Option<CompanionRow>> {
        let companion = self
            .conn
            .query_row(
                "SELECT id, name, age, languages, interests, image_url, is_online
                 FROM companions WHERE id = ?1",
                params![id],
                companion_from_row,
            )
            .optional()?;
        Ok(companion)
    }

    // -- Calls --

    pub fn insert_call(&self, call: &NewCall) -> anyhow::Result<CallRow> {
        let start_time = call
            .start_time
            .clone()
            .unwrap_or_else(|| Utc::now().to_rfc3339());
        self.conn.execute(
            "INSERT INTO calls (user_id, companion_id, start_time, duration, type, coins_spent)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                call.user_id,
                call.companion_id,
                start_time,
                call.duration,
                call.call_type,
                call.coins_spent
            ],
        )?;
        Ok(CallRow {
            id: self.conn.last_insert_rowid(),
            user_id: call.user_id,
            companion_id: call.companion_id,
            start_time,
            duration: call.duration,
            call_type: call.call_type.clone(),
            coins_spent: call.coins_spent,
        })
    }

    /// A user's calls, newest first.
    pub fn calls_by_user(&self, user_id: i64) -> anyhow::Result<Vec<CallRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, companion_id, start_time, duration, type, coins_spent
             FROM calls WHERE user_id = ?1
             ORDER BY start_time DESC, id DESC",
        )?;
        let rows = stmt.query_map(params![user_id], |row| {
            Ok(CallRow {
                id: row.get(0)?,
                user_id: row.get(1)?,
                companion_id: row.get(2)?,
                start_time: row.get(3)?,
                duration: row.get(4)?,
                call_type: row.get(5)?,
                coins_spent: row.get(6)?,
            })
        })?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    // -- Transactions --

    pub fn insert_transaction(&self, txn: &NewTransaction) -> anyhow::Result<TransactionRow> {
        let now = Utc::now().to_rfc3339();
        let method = txn.payment_method.as_deref().unwrap_or(DEFAULT_PAYMENT_METHOD);
        self.conn.execute(
            "INSERT INTO transactions (user_id, amount, coins, payment_method, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![txn.user_id, txn.amount, txn.coins, method, now],
        )?;
        Ok(TransactionRow {
            id: self.conn.last_insert_rowid(),
            user_id: txn.user_id,
            amount: txn.amount,
            coins: txn.coins,
            payment_method: method.to_string(),
            timestamp: now,
        })
    }

    /// Record a purchase and credit the coins to the stored balance in one
    /// transaction. `None` when the user does not exist.
    pub fn apply_recharge(
        &self,
        txn: &NewTransaction,
    ) -> anyhow::Result<Option<(TransactionRow, UserRow)>> {
        let tx = self.conn.unchecked_transaction()?;
        let changed = tx.execute(
            "UPDATE users SET coins = coins + ?1 WHERE id = ?2",
            params![txn.coins, txn.user_id],
        )?;
        if changed == 0 {
            return Ok(None);
        }
        let entry = self.insert_transaction(txn)?;
        tx.commit()?;

        let user = self.get_user(txn.user_id)?;
        Ok(user.map(|u| (entry, u)))
    }

    /// A user's ledger, newest first.
    pub fn transactions_by_user(&self, user_id: i64) -> anyhow::Result<Vec<TransactionRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, amount, coins, payment_method, timestamp
             FROM transactions WHERE user_id = ?1
             ORDER BY timestamp DESC, id DESC",
        )?;
        let rows = stmt.query_map(params![user_id], |row| {
            Ok(TransactionRow {
                id: row.get(0)?,
                user_id: row.get(1)?,
                amount: row.get(2)?,
                coins: row.get(3)?,
                payment_method: row.get(4)?,
                timestamp: row.get(5)?,
            })
        })?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    /// Get a reference to the underlying connection (for advanced queries).
    pub fn conn(&self) -> &Connection {
        &self.conn
    }
}

const DEFAULT_PAYMENT_METHOD: &str = "card";

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        coins: row.get(2)?,
    })
}

fn companion_from_row(row: &Row<'_>) -> rusqlite::Result<CompanionRow> {
    Ok(CompanionRow {
        id: row.get(0)?,
        name: row.get(1)?,
        age: row.get(2)?,
        languages: row.get(3)?,
        interests: row.get(4)?,
        image_url: row.get(5)?,
        is_online: row.get(6)?,
    })
}

// -- Row types --

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub coins: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanionRow {
    pub id: i64,
    pub name: String,
    pub age: i64,
    pub languages: String,
    pub interests: String,
    pub image_url: String,
    pub is_online: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRow {
    pub id: i64,
    pub user_id: i64,
    pub companion_id: i64,
    pub start_time: String,
    /// Seconds.
    pub duration: i64,
    #[serde(rename = "type")]
    pub call_type: String,
    pub coins_spent: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRow {
    pub id: i64,
    pub user_id: i64,
    /// Price paid.
    pub amount: i64,
    pub coins: i64,
    pub payment_method: String,
    pub timestamp: String,
}

/// A call history entry to insert. `start_time` defaults to now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCall {
    pub user_id: i64,
    pub companion_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    pub duration: i64,
    #[serde(rename = "type")]
    pub call_type: String,
    pub coins_spent: i64,
}

/// A ledger entry to insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTransaction {
    pub user_id: i64,
    pub amount: i64,
    pub coins: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_method: Option<String>,
}

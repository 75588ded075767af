// src/billing/recharge.rs — Coin packages and purchases

use serde::Serialize;

use super::registry::ActiveCalls;
use crate::infra::errors::DosttError;
use crate::storage::store::{NewTransaction, TransactionRow};
use crate::storage::store_server::StoreHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RechargePackage {
    pub coins: u64,
    pub price: u64,
    pub discount_percent: u8,
}

pub const PACKAGES: [RechargePackage; 4] = [
    RechargePackage {
        coins: 100,
        price: 100,
        discount_percent: 0,
    },
    RechargePackage {
        coins: 300,
        price: 250,
        discount_percent: 17,
    },
    RechargePackage {
        coins: 500,
        price: 400,
        discount_percent: 20,
    },
    RechargePackage {
        coins: 1000,
        price: 750,
        discount_percent: 25,
    },
];

pub fn find_package(coins: u64) -> Option<&'static RechargePackage> {
    PACKAGES.iter().find(|p| p.coins == coins)
}

impl RechargePackage {
    pub fn label(&self) -> String {
        if self.discount_percent == 0 {
            format!("{} coins for {}", self.coins, self.price)
        } else {
            format!(
                "{} coins for {} ({}% off)",
                self.coins, self.price, self.discount_percent
            )
        }
    }
}

/// Result of a completed purchase.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RechargeReceipt {
    pub transaction: TransactionRow,
    /// Balance after the credit: live call balance, or the stored one.
    pub coins: u64,
    pub applied_to_call: bool,
}

/// Buy a package.
///
/// With a live call the coins go into the call first and the ledger entry is
/// written after; the call carries them to the store in its final write.
/// Otherwise the ledger entry and the stored balance change in one database
/// transaction, after any pending write-back of an ended call has landed.
pub async fn recharge(
    store: &StoreHandle,
    calls: &ActiveCalls,
    user_id: i64,
    package: &RechargePackage,
    payment_method: Option<String>,
) -> Result<RechargeReceipt, DosttError> {
    let entry = NewTransaction {
        user_id,
        amount: package.price as i64,
        coins: package.coins as i64,
        payment_method,
    };
    let turn = calls.turn(user_id).await;

    if let Some(tick) = turn.top_up(package.coins).await {
        let transaction = store.insert_transaction(entry).await.map_err(|e| {
            tracing::error!(
                user_id,
                coins = package.coins,
                "Coins added to live call but the purchase was not recorded: {e}"
            );
            DosttError::from_anyhow(e)
        })?;
        tracing::info!(
            user_id,
            coins = package.coins,
            price = package.price,
            "Recharge applied to live call"
        );
        return Ok(RechargeReceipt {
            transaction,
            coins: tick.coins_remaining,
            applied_to_call: true,
        });
    }

    turn.settle().await;
    let (transaction, user) = store
        .apply_recharge(entry)
        .await
        .map_err(DosttError::from_anyhow)?
        .ok_or(DosttError::UserNotFound { user_id })?;

    tracing::info!(
        user_id,
        coins = package.coins,
        price = package.price,
        "Recharge applied"
    );
    Ok(RechargeReceipt {
        transaction,
        coins: user.coins.max(0) as u64,
        applied_to_call: false,
    })
}

// src/cli/account.rs — Account commands against the local database

use std::sync::Arc;

use crate::billing::display::format_elapsed;
use crate::billing::recharge::{self, RechargePackage, PACKAGES};
use crate::billing::ActiveCalls;
use crate::infra::config::Config;
use crate::storage::store::UserRow;
use crate::storage::store_server::StoreHandle;

use super::open_local_store;

async fn login(store: &StoreHandle, username: &str, config: &Config) -> anyhow::Result<UserRow> {
    let username = username.trim();
    if username.is_empty() {
        anyhow::bail!("Username is required");
    }
    store
        .login_or_create(username.to_string(), config.accounts.starting_coins as i64)
        .await
}

pub async fn run_login(username: &str, config: &Config) -> anyhow::Result<()> {
    let store = open_local_store().await?;
    let user = login(&store, username, config).await?;
    println!("Logged in as {} (id {})", user.username, user.id);
    println!("Balance: {} coins", user.coins);
    Ok(())
}

pub async fn run_companions(online_only: bool) -> anyhow::Result<()> {
    let store = open_local_store().await?;
    let companions = store.list_companions().await?;

    for c in companions.iter().filter(|c| c.is_online || !online_only) {
        let status = if c.is_online { "online" } else { "offline" };
        println!(
            "{:>3}  {:<8} {:>2}  {:<8}  {} | {}",
            c.id, c.name, c.age, status, c.languages, c.interests
        );
    }
    Ok(())
}

pub fn show_packages() {
    for p in PACKAGES.iter() {
        println!("  {}", p.label());
    }
}

pub async fn run_recharge(username: &str, coins: Option<u64>, config: &Config) -> anyhow::Result<()> {
    let package = match coins {
        Some(coins) => recharge::find_package(coins).ok_or_else(|| {
            let sizes: Vec<String> = PACKAGES.iter().map(|p| p.coins.to_string()).collect();
            anyhow::anyhow!(
                "No package with {coins} coins (available: {})",
                sizes.join(", ")
            )
        })?,
        None => pick_package()?,
    };

    let store = open_local_store().await?;
    let user = login(&store, username, config).await?;
    let calls = ActiveCalls::new(Arc::new(store.clone()), config.billing.clone());

    let receipt = recharge::recharge(&store, &calls, user.id, package, None).await?;
    println!(
        "Added {} coins for {}. Balance: {} coins",
        package.coins, package.price, receipt.coins
    );
    Ok(())
}

fn pick_package() -> anyhow::Result<&'static RechargePackage> {
    let labels: Vec<String> = PACKAGES.iter().map(|p| p.label()).collect();
    let choice = inquire::Select::new("Recharge package:", labels.clone()).prompt()?;
    let index = labels
        .iter()
        .position(|l| *l == choice)
        .ok_or_else(|| anyhow::anyhow!("Unknown package '{choice}'"))?;
    Ok(&PACKAGES[index])
}

pub async fn run_history(username: &str, config: &Config) -> anyhow::Result<()> {
    let store = open_local_store().await?;
    let user = login(&store, username, config).await?;
    let companions = store.list_companions().await?;
    let name_of = |id: i64| {
        companions
            .iter()
            .find(|c| c.id == id)
            .map(|c| c.name.as_str())
            .unwrap_or("?")
    };

    println!("{}: {} coins", user.username, user.coins);

    let calls = store.calls_by_user(user.id).await?;
    println!();
    println!("Calls ({}):", calls.len());
    for call in &calls {
        println!(
            "  {}  {:<5} with {:<8} {:>6}  -{} coins",
            short_time(&call.start_time),
            call.call_type,
            name_of(call.companion_id),
            format_elapsed(call.duration.max(0) as u64),
            call.coins_spent
        );
    }

    let purchases = store.transactions_by_user(user.id).await?;
    println!();
    println!("Purchases ({}):", purchases.len());
    for t in &purchases {
        println!(
            "  {}  +{} coins for {} ({})",
            short_time(&t.timestamp),
            t.coins,
            t.amount,
            t.payment_method
        );
    }
    Ok(())
}

/// `YYYY-MM-DD HH:MM` from an RFC 3339 timestamp; anything else is shown as is.
fn short_time(ts: &str) -> String {
    match chrono::DateTime::parse_from_rfc3339(ts) {
        Ok(dt) => dt.format("%Y-%m-%d %H:%M").to_string(),
        Err(_) => ts.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_time() {
        assert_eq!(short_time("2024-05-01T13:45:10+00:00"), "2024-05-01 13:45");
        assert_eq!(short_time("yesterday"), "yesterday");
    }
}

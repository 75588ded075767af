// src/cli/call.rs — Live call in the terminal

use std::io::Write;
use std::sync::Arc;

use crate::billing::display::{format_elapsed, CallDisplay};
use crate::billing::{CallKind, CallRequest, CallStatus, PersistOutcome, RateTable, SessionHandle};
use crate::directory;
use crate::infra::config::Config;
use crate::storage::remote::RemoteAccountStore;
use crate::storage::store::{CompanionRow, UserRow};
use crate::storage::AccountStore;

use super::open_local_store;

pub struct CallOptions {
    pub username: String,
    pub companion: Option<i64>,
    pub kind: Option<CallKind>,
    pub random: bool,
    pub server: Option<String>,
}

/// Where the call is billed: the account, the directory, and the store that
/// receives the final balance.
struct Backend {
    user: UserRow,
    companions: Vec<CompanionRow>,
    store: Arc<dyn AccountStore>,
}

async fn connect(options: &CallOptions, config: &Config) -> anyhow::Result<Backend> {
    let username = options.username.trim();
    if username.is_empty() {
        anyhow::bail!("Username is required");
    }

    match &options.server {
        Some(url) => {
            let remote = RemoteAccountStore::new(url);
            let user = remote.login(username).await?;
            let companions = remote.list_companions().await?;
            Ok(Backend {
                user,
                companions,
                store: Arc::new(remote),
            })
        }
        None => {
            let store = open_local_store().await?;
            let user = store
                .login_or_create(username.to_string(), config.accounts.starting_coins as i64)
                .await?;
            let companions = store.list_companions().await?;
            Ok(Backend {
                user,
                companions,
                store: Arc::new(store),
            })
        }
    }
}

fn pick_companion(companions: &[CompanionRow]) -> anyhow::Result<CompanionRow> {
    let online = directory::online(companions);
    if online.is_empty() {
        return Err(crate::infra::errors::DosttError::NoOnlineCompanion.into());
    }
    let labels: Vec<String> = online
        .iter()
        .map(|c| format!("{} ({}), {}", c.name, c.age, c.languages))
        .collect();
    let choice = inquire::Select::new("Call whom?", labels.clone()).prompt()?;
    let index = labels
        .iter()
        .position(|l| *l == choice)
        .ok_or_else(|| anyhow::anyhow!("Unknown companion '{choice}'"))?;
    Ok(online[index].clone())
}

fn pick_kind(rates: &RateTable) -> anyhow::Result<CallKind> {
    let options = [CallKind::Audio, CallKind::Video];
    let labels: Vec<String> = options
        .iter()
        .map(|k| format!("{} ({} coins/minute)", k.label(), rates.per_minute(*k)))
        .collect();
    let choice = inquire::Select::new("Call type:", labels.clone()).prompt()?;
    let index = labels.iter().position(|l| *l == choice).unwrap_or(0);
    Ok(options[index])
}

pub async fn run_call(options: CallOptions, config: &Config) -> anyhow::Result<()> {
    let backend = connect(&options, config).await?;
    let rates = RateTable::from_config(&config.billing);

    let (companion, kind) = if options.random {
        let companion = directory::pick_random_online(&backend.companions)?.clone();
        (companion, directory::random_kind()?)
    } else {
        let companion = match options.companion {
            Some(id) => directory::find_online(&backend.companions, id)?.clone(),
            None => pick_companion(&backend.companions)?,
        };
        let kind = match options.kind {
            Some(kind) => kind,
            None => pick_kind(&rates)?,
        };
        (companion, kind)
    };

    println!(
        "Calling {} ({}). Balance: {} coins. Press Ctrl+C to hang up.",
        companion.name,
        kind.label(),
        backend.user.coins
    );

    let handle = SessionHandle::start(
        CallRequest {
            user_id: backend.user.id,
            companion_id: companion.id,
            kind,
        },
        backend.store.clone(),
        &config.billing,
    )
    .await?;

    let last = drive(&handle, &companion.name).await;
    println!();

    match last.status {
        CallStatus::EndedByDepletion if last.elapsed_seconds == 0 => {
            println!("You have no coins left. Recharge with `dostt recharge`.");
        }
        CallStatus::EndedByDepletion => {
            println!(
                "Call ended after {}: out of coins.",
                format_elapsed(last.elapsed_seconds)
            );
        }
        _ => println!("Call ended after {}.", format_elapsed(last.elapsed_seconds)),
    }

    match handle.wait_persisted().await {
        Some(PersistOutcome::Persisted { balance }) => {
            println!("Balance: {balance} coins");
        }
        Some(PersistOutcome::Failed { balance, error }) => {
            eprintln!("Could not save your balance of {balance} coins: {error}");
        }
        None => {}
    }
    Ok(())
}

/// Render one status line per tick until the call ends or Ctrl+C hangs up.
async fn drive(handle: &SessionHandle, companion: &str) -> crate::billing::TickResult {
    let mut feed = handle.subscribe();
    let first = *feed.borrow_and_update();
    render(handle, companion, first);

    if !first.ended() {
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    handle.end();
                    break;
                }
                changed = feed.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let tick = *feed.borrow_and_update();
                    render(handle, companion, tick);
                    if tick.ended() {
                        break;
                    }
                }
            }
        }
    }

    let last = handle.snapshot();
    render(handle, companion, last);
    last
}

fn render(handle: &SessionHandle, companion: &str, tick: crate::billing::TickResult) {
    let line = CallDisplay {
        companion,
        kind: handle.kind(),
        rate_per_minute: handle.rate_per_minute(),
        tick,
    };
    let mut out = std::io::stdout();
    let _ = write!(out, "\r\x1b[2K{line}");
    let _ = out.flush();
}

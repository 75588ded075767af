// src/cli/mod.rs — CLI definition (clap derive)

pub mod account;
pub mod call;
pub mod migrate;

use clap::{Parser, Subcommand};

use crate::billing::CallKind;
use crate::infra::config::Config;
use crate::storage;
use crate::storage::store_server::{spawn_store_server, StoreHandle};

#[derive(Parser)]
#[command(name = "dostt", about = "Pay-per-second companion calls", version)]
pub struct Cli {
    /// Config file path
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Log level when RUST_LOG is unset (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP API server
    Serve {
        /// Bind address (overrides config)
        #[arg(long)]
        host: Option<String>,
        /// Port (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Log in, creating the account on first use
    Login {
        username: String,
    },
    /// List companions
    Companions {
        /// Only show companions that are online
        #[arg(long)]
        online: bool,
    },
    /// Start a live call in this terminal (Ctrl+C hangs up)
    Call {
        /// Account to bill
        #[arg(short, long)]
        user: String,
        /// Companion id; interactive picker if omitted
        #[arg(short, long)]
        companion: Option<i64>,
        /// audio or video; asked if omitted
        #[arg(short, long)]
        kind: Option<CallKind>,
        /// Random online companion and random call kind
        #[arg(long, conflicts_with_all = ["companion", "kind"])]
        random: bool,
        /// Bill against a running server instead of the local database
        #[arg(long)]
        server: Option<String>,
    },
    /// Buy a coin package
    Recharge {
        #[arg(short, long)]
        user: String,
        /// Package size in coins; interactive picker if omitted
        #[arg(long)]
        coins: Option<u64>,
    },
    /// Show call history and purchases
    History {
        #[arg(short, long)]
        user: String,
    },
    /// List recharge packages
    Packages,
    /// Show or change the database schema version
    Migrate {
        #[arg(long)]
        status: bool,
        #[arg(long)]
        rollback: bool,
    },
}

/// Open the local database and start its store server.
pub async fn open_local_store() -> anyhow::Result<StoreHandle> {
    crate::infra::paths::ensure_dirs().await?;
    let store = storage::open(&crate::infra::paths::db_path())?;
    let (handle, _join) = spawn_store_server(store);
    Ok(handle)
}

/// Run one CLI command to completion.
pub async fn dispatch(cli: Cli, config: Config) -> anyhow::Result<()> {
    match cli.command {
        Commands::Serve { host, port } => {
            let mut config = config;
            if let Some(host) = host {
                config.api.host = host;
            }
            if let Some(port) = port {
                config.api.port = port;
            }
            serve(config).await
        }
        Commands::Login { username } => account::run_login(&username, &config).await,
        Commands::Companions { online } => account::run_companions(online).await,
        Commands::Call {
            user,
            companion,
            kind,
            random,
            server,
        } => {
            let options = call::CallOptions {
                username: user,
                companion,
                kind,
                random,
                server,
            };
            call::run_call(options, &config).await
        }
        Commands::Recharge { user, coins } => account::run_recharge(&user, coins, &config).await,
        Commands::History { user } => account::run_history(&user, &config).await,
        Commands::Packages => {
            account::show_packages();
            Ok(())
        }
        Commands::Migrate { status, rollback } => migrate::run_migrate(status, rollback).await,
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let store = open_local_store().await?;
    let state = crate::api::ApiState::new(store, config);

    crate::api::start_server(state, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
        tracing::info!("Shutdown requested");
    })
    .await
}

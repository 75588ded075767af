// src/storage/store_server.rs — Async message passing for Store

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use super::store::{
    CallRow, CompanionRow, NewCall, NewTransaction, Store, TransactionRow, UserRow,
};
use super::AccountStore;
use crate::infra::errors::DosttError;

type Reply<T> = oneshot::Sender<anyhow::Result<T>>;

#[derive(Debug)]
pub enum StoreCommand {
    GetUser {
        id: i64,
        resp: Reply<Option<UserRow>>,
    },
    LoginOrCreate {
        username: String,
        starting_coins: i64,
        resp: Reply<UserRow>,
    },
    UpdateUserCoins {
        id: i64,
        coins: i64,
        resp: Reply<Option<UserRow>>,
    },
    ListCompanions {
        resp: Reply<Vec<CompanionRow>>,
    },
    GetCompanion {
        id: i64,
        resp: Reply<Option<CompanionRow>>,
    },
    InsertCall {
        call: NewCall,
        resp: Reply<CallRow>,
    },
    CallsByUser {
        user_id: i64,
        resp: Reply<Vec<CallRow>>,
    },
    InsertTransaction {
        txn: NewTransaction,
        resp: Reply<TransactionRow>,
    },
    ApplyRecharge {
        txn: NewTransaction,
        resp: Reply<Option<(TransactionRow, UserRow)>>,
    },
    TransactionsByUser {
        user_id: i64,
        resp: Reply<Vec<TransactionRow>>,
    },
}

/// A handle to the Store that uses message passing.
#[derive(Clone)]
pub struct StoreHandle {
    tx: mpsc::Sender<StoreCommand>,
}

impl StoreHandle {
    pub fn new(tx: mpsc::Sender<StoreCommand>) -> Self {
        Self { tx }
    }

    pub async fn get_user(&self, id: i64) -> anyhow::Result<Option<UserRow>> {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.tx
            .send(StoreCommand::GetUser { id, resp: resp_tx })
            .await?;
        resp_rx.await?
    }

    pub async fn login_or_create(
        &self,
        username: String,
        starting_coins: i64,
    ) -> anyhow::Result<UserRow> {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.tx
            .send(StoreCommand::LoginOrCreate {
                username,
                starting_coins,
                resp: resp_tx,
            })
            .await?;
        resp_rx.await?
    }

    pub async fn update_user_coins(&self, id: i64, coins: i64) -> anyhow::Result<Option<UserRow>> {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.tx
            .send(StoreCommand::UpdateUserCoins {
                id,
                coins,
                resp: resp_tx,
            })
            .await?;
        resp_rx.await?
    }

    pub async fn list_companions(&self) -> anyhow::Result<Vec<CompanionRow>> {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.tx
            .send(StoreCommand::ListCompanions { resp: resp_tx })
            .await?;
        resp_rx.await?
    }

    pub async fn get_companion(&self, id: i64) -> anyhow::Result<Option<CompanionRow>> {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.tx
            .send(StoreCommand::GetCompanion { id, resp: resp_tx })
            .await?;
        resp_rx.await?
    }

    pub async fn insert_call(&self, call: NewCall) -> anyhow::Result<CallRow> {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.tx
            .send(StoreCommand::InsertCall {
                call,
                resp: resp_tx,
            })
            .await?;
        resp_rx.await?
    }

    pub async fn calls_by_user(&self, user_id: i64) -> anyhow::Result<Vec<CallRow>> {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.tx
            .send(StoreCommand::CallsByUser {
                user_id,
                resp: resp_tx,
            })
            .await?;
        resp_rx.await?
    }

    pub async fn insert_transaction(&self, txn: NewTransaction) -> anyhow::Result<TransactionRow> {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.tx
            .send(StoreCommand::InsertTransaction { txn, resp: resp_tx })
            .await?;
        resp_rx.await?
    }

    pub async fn apply_recharge(
        &self,
        txn: NewTransaction,
    ) -> anyhow::Result<Option<(TransactionRow, UserRow)>> {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.tx
            .send(StoreCommand::ApplyRecharge { txn, resp: resp_tx })
            .await?;
        resp_rx.await?
    }

    pub async fn transactions_by_user(&self, user_id: i64) -> anyhow::Result<Vec<TransactionRow>> {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.tx
            .send(StoreCommand::TransactionsByUser {
                user_id,
                resp: resp_tx,
            })
            .await?;
        resp_rx.await?
    }
}

#[async_trait]
impl AccountStore for StoreHandle {
    async fn get_balance(&self, user_id: i64) -> anyhow::Result<i64> {
        match self.get_user(user_id).await? {
            Some(user) => Ok(user.coins),
            None => Err(DosttError::UserNotFound { user_id }.into()),
        }
    }

    async fn set_balance(&self, user_id: i64, coins: u64) -> anyhow::Result<()> {
        let coins = i64::try_from(coins)?;
        match self.update_user_coins(user_id, coins).await? {
            Some(_) => Ok(()),
            None => Err(DosttError::UserNotFound { user_id }.into()),
        }
    }

    async fn record_call(&self, call: &NewCall) -> anyhow::Result<()> {
        self.insert_call(call.clone()).await.map(|_| ())
    }
}

/// Helper to spawn the store server and return a handle.
pub fn spawn_store_server(store: Store) -> (StoreHandle, tokio::task::JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(100);
    let handle = StoreHandle::new(tx);
    let join_handle = tokio::spawn(run_store_server(store, rx));
    (handle, join_handle)
}

/// The background task that owns the Store.
pub async fn run_store_server(store: Store, mut rx: mpsc::Receiver<StoreCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            StoreCommand::GetUser { id, resp } => {
                let _ = resp.send(store.get_user(id));
            }
            StoreCommand::LoginOrCreate {
                username,
                starting_coins,
                resp,
            } => {
                let _ = resp.send(store.login_or_create(&username, starting_coins));
            }
            StoreCommand::UpdateUserCoins { id, coins, resp } => {
                let _ = resp.send(store.update_user_coins(id, coins));
            }
            StoreCommand::ListCompanions { resp } => {
                let _ = resp.send(store.list_companions());
            }
            StoreCommand::GetCompanion { id, resp } => {
                let _ = resp.send(store.get_companion(id));
            }
            StoreCommand::InsertCall { call, resp } => {
                let _ = resp.send(store.insert_call(&call));
            }
            StoreCommand::CallsByUser { user_id, resp } => {
                let _ = resp.send(store.calls_by_user(user_id));
            }
            StoreCommand::InsertTransaction { txn, resp } => {
                let _ = resp.send(store.insert_transaction(&txn));
            }
            StoreCommand::ApplyRecharge { txn, resp } => {
                let _ = resp.send(store.apply_recharge(&txn));
            }
            StoreCommand::TransactionsByUser { user_id, resp } => {
                let _ = resp.send(store.transactions_by_user(user_id));
            }
        }
    }
    tracing::debug!("Store server stopped");
}

// src/billing/registry.rs — At most one active call per user

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

use super::handle::{CallRequest, SessionHandle};
use super::session::TickResult;
use crate::infra::config::BillingConfig;
use crate::infra::errors::DosttError;
use crate::storage::AccountStore;

#[derive(Default)]
struct Slot {
    turn: Arc<Mutex<()>>,
    call: Option<Arc<SessionHandle>>,
}

/// Maps user id to that user's current (or most recent) call.
///
/// Starting a call while another one is active for the same user hangs up
/// the old call first and waits for its balance to be written back, so the
/// new call snapshots the settled balance. Each user has their own turn:
/// a slow write-back for one user never holds up another.
pub struct ActiveCalls {
    store: Arc<dyn AccountStore>,
    config: BillingConfig,
    slots: Mutex<HashMap<i64, Slot>>,
}

/// Exclusive right to change one user's call and stored balance.
pub struct UserTurn<'a> {
    calls: &'a ActiveCalls,
    user_id: i64,
    _guard: OwnedMutexGuard<()>,
}

impl UserTurn<'_> {
    pub async fn call(&self) -> Option<Arc<SessionHandle>> {
        self.calls.get(self.user_id).await
    }

    /// Credit coins into the live call. `None` when no call is being billed.
    pub async fn top_up(&self, coins: u64) -> Option<TickResult> {
        self.call().await.and_then(|h| h.top_up(coins))
    }

    /// Wait for the final balance of an ended call to reach the store.
    pub async fn settle(&self) {
        if let Some(handle) = self.call().await {
            if handle.is_ended() {
                handle.wait_persisted().await;
            }
        }
    }

    async fn take_call(&self) -> Option<Arc<SessionHandle>> {
        self.calls
            .slots
            .lock()
            .await
            .get_mut(&self.user_id)
            .and_then(|slot| slot.call.take())
    }

    async fn put_call(&self, handle: Arc<SessionHandle>) {
        self.calls
            .slots
            .lock()
            .await
            .entry(self.user_id)
            .or_default()
            .call = Some(handle);
    }
}

impl ActiveCalls {
    pub fn new(store: Arc<dyn AccountStore>, config: BillingConfig) -> Self {
        Self {
            store,
            config,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Wait for the user's turn. The shared map is only locked briefly.
    pub async fn turn(&self, user_id: i64) -> UserTurn<'_> {
        let turn = self
            .slots
            .lock()
            .await
            .entry(user_id)
            .or_default()
            .turn
            .clone();
        UserTurn {
            calls: self,
            user_id,
            _guard: turn.lock_owned().await,
        }
    }

    pub async fn start(&self, request: CallRequest) -> Result<Arc<SessionHandle>, DosttError> {
        let turn = self.turn(request.user_id).await;

        if let Some(prior) = turn.take_call().await {
            if !prior.is_ended() {
                tracing::info!(
                    user_id = request.user_id,
                    "New call requested; ending the active one first"
                );
            }
            prior.end();
            prior.wait_persisted().await;
        }

        let handle = Arc::new(
            SessionHandle::start(request, self.store.clone(), &self.config).await?,
        );
        turn.put_call(handle.clone()).await;
        Ok(handle)
    }

    /// The user's current call, including one that just ended by depletion.
    pub async fn get(&self, user_id: i64) -> Option<Arc<SessionHandle>> {
        self.slots
            .lock()
            .await
            .get(&user_id)
            .and_then(|slot| slot.call.clone())
    }

    /// Whether the user has a call that is still being billed.
    pub async fn is_active(&self, user_id: i64) -> bool {
        self.get(user_id).await.is_some_and(|h| !h.is_ended())
    }

    /// Hang up the user's call and wait for the write-back.
    ///
    /// Returns the final balance, or `None` when the user has no call.
    pub async fn end(&self, user_id: i64) -> Option<u64> {
        let turn = self.turn(user_id).await;
        let handle = turn.take_call().await?;
        let final_balance = handle.end();
        handle.wait_persisted().await;
        Some(final_balance)
    }

    /// Overwrite the stored balance of a user without a live call.
    pub async fn write_balance(&self, user_id: i64, coins: u64) -> Result<(), DosttError> {
        let turn = self.turn(user_id).await;

        if turn.call().await.is_some_and(|h| !h.is_ended()) {
            return Err(DosttError::CallActive { user_id });
        }
        turn.settle().await;

        self.store
            .set_balance(user_id, coins)
            .await
            .map_err(DosttError::from_anyhow)
    }

    /// Hang up every call and wait for all write-backs (server shutdown).
    pub async fn end_all(&self) -> usize {
        let users: Vec<i64> = self.slots.lock().await.keys().copied().collect();
        let mut ended = 0;
        for user_id in users {
            let turn = self.turn(user_id).await;
            let Some(handle) = turn.take_call().await else {
                continue;
            };
            if !handle.is_ended() {
                ended += 1;
                tracing::info!(user_id, "Ending call on shutdown");
            }
            handle.end();
            handle.wait_persisted().await;
        }
        ended
    }

    pub async fn active_count(&self) -> usize {
        self.slots
            .lock()
            .await
            .values()
            .filter_map(|slot| slot.call.as_ref())
            .filter(|h| !h.is_ended())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::rate::CallKind;
    use crate::billing::session::CallStatus;
    use crate::storage::store::NewCall;
    use async_trait::async_trait;
    use std::collections::HashMap as Map;
    use std::time::Duration;

    #[derive(Default)]
    struct Balances {
        coins: std::sync::Mutex<Map<i64, i64>>,
        writes: std::sync::Mutex<Vec<(i64, u64)>>,
        /// Users whose balance writes always fail.
        broken: std::sync::Mutex<Vec<i64>>,
    }

    #[async_trait]
    impl AccountStore for Balances {
        async fn get_balance(&self, user_id: i64) -> anyhow::Result<i64> {
            self.coins
                .lock()
                .unwrap()
                .get(&user_id)
                .copied()
                .ok_or_else(|| DosttError::UserNotFound { user_id }.into())
        }

        async fn set_balance(&self, user_id: i64, coins: u64) -> anyhow::Result<()> {
            if self.broken.lock().unwrap().contains(&user_id) {
                anyhow::bail!("disk I/O error");
            }
            self.coins.lock().unwrap().insert(user_id, coins as i64);
            self.writes.lock().unwrap().push((user_id, coins));
            Ok(())
        }

        async fn record_call(&self, _call: &NewCall) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn registry(users: &[(i64, i64)]) -> (ActiveCalls, Arc<Balances>) {
        let store = Arc::new(Balances::default());
        store.coins.lock().unwrap().extend(users.iter().copied());
        (
            ActiveCalls::new(store.clone(), BillingConfig::default()),
            store,
        )
    }

    fn video(user_id: i64) -> CallRequest {
        CallRequest {
            user_id,
            companion_id: 1,
            kind: CallKind::Video,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_call_ends_first_and_uses_settled_balance() {
        let (calls, store) = registry(&[(1, 100)]);

        let first = calls.start(video(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10_500)).await;

        let second = calls.start(video(1)).await.unwrap();
        assert_eq!(first.snapshot().status, CallStatus::EndedByUser);
        assert_eq!(second.snapshot().coins_remaining, 90);
        assert_eq!(store.writes.lock().unwrap().clone(), vec![(1, 90)]);
        assert_eq!(calls.active_count().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_returns_final_balance() {
        let (calls, store) = registry(&[(1, 100), (2, 50)]);
        calls.start(video(1)).await.unwrap();
        calls.start(video(2)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(3_500)).await;
        assert_eq!(calls.end(1).await, Some(97));
        assert_eq!(calls.end(1).await, None);
        assert!(calls.is_active(2).await);
        assert!(!calls.is_active(1).await);
        assert_eq!(store.writes.lock().unwrap().clone(), vec![(1, 97)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_depleted_call_stays_visible() {
        let (calls, _store) = registry(&[(1, 2)]);
        let handle = calls.start(video(1)).await.unwrap();
        handle.terminated().await;

        let seen = calls.get(1).await.unwrap();
        assert_eq!(seen.snapshot().status, CallStatus::EndedByDepletion);
        assert!(!calls.is_active(1).await);
        assert_eq!(calls.end(1).await, Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_top_up_only_for_live_calls() {
        let (calls, _store) = registry(&[(1, 10)]);
        assert!(calls.turn(1).await.top_up(100).await.is_none());

        calls.start(video(1)).await.unwrap();
        let snap = calls.turn(1).await.top_up(100).await.unwrap();
        assert_eq!(snap.coins_remaining, 110);
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_all_settles_every_call() {
        let (calls, store) = registry(&[(1, 100), (2, 100), (3, 0)]);
        calls.start(video(1)).await.unwrap();
        calls.start(video(2)).await.unwrap();
        calls.start(video(3)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(calls.end_all().await, 2);

        let mut writes = store.writes.lock().unwrap().clone();
        writes.sort();
        assert_eq!(writes, vec![(1, 99), (2, 99), (3, 0)]);
        assert_eq!(calls.active_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_settle_waits_for_final_write() {
        let (calls, store) = registry(&[(1, 1)]);
        let handle = calls.start(video(1)).await.unwrap();
        handle.terminated().await;

        let turn = calls.turn(1).await;
        assert!(turn.top_up(300).await.is_none());
        turn.settle().await;
        assert_eq!(store.writes.lock().unwrap().clone(), vec![(1, 0)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_write_back_does_not_block_other_users() {
        let store = Arc::new(Balances::default());
        store.coins.lock().unwrap().extend([(1, 100), (2, 100)]);
        store.broken.lock().unwrap().push(1);
        let config = BillingConfig {
            persist_retries: 4,
            persist_backoff_ms: 1_000,
            ..BillingConfig::default()
        };
        let calls = Arc::new(ActiveCalls::new(store.clone(), config));
        calls.start(video(1)).await.unwrap();

        // Replacing user 1's call waits out every retry of the old write
        let restart = {
            let calls = calls.clone();
            tokio::spawn(async move { calls.start(video(1)).await })
        };
        tokio::task::yield_now().await;

        let began = tokio::time::Instant::now();
        assert!(calls.get(2).await.is_none());
        calls.start(video(2)).await.unwrap();
        assert!(calls.is_active(2).await);
        assert!(calls.active_count().await >= 1);
        assert_eq!(calls.end(2).await, Some(100));
        assert!(began.elapsed() < Duration::from_secs(1));

        let replaced = restart.await.unwrap().unwrap();
        assert!(!replaced.is_ended());
        assert!(began.elapsed() >= Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_balance_refused_during_call() {
        let (calls, store) = registry(&[(1, 50)]);
        calls.start(video(1)).await.unwrap();

        let err = calls.write_balance(1, 500).await.unwrap_err();
        assert!(matches!(err, DosttError::CallActive { user_id: 1 }));

        calls.end(1).await;
        calls.write_balance(1, 500).await.unwrap();
        assert_eq!(*store.coins.lock().unwrap().get(&1).unwrap(), 500);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_start_leaves_no_entry() {
        let (calls, _store) = registry(&[]);
        let err = calls.start(video(5)).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(calls.get(5).await.is_none());
    }
}

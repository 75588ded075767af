// src/billing/handle.rs — Live call session: timer + state machine + persistence
//
// A `SessionHandle` owns one call. The tick timer drives `CallSession::tick`
// once per period; `end()` stops the timer and settles the session. Whichever
// path terminates the call hands the single persist effect to a background
// task that writes the final balance to the injected `AccountStore`.

use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use super::rate::{CallKind, RateTable};
use super::session::{CallSession, PersistBalance, TickResult};
use super::timer::TickTimer;
use crate::infra::config::BillingConfig;
use crate::infra::errors::DosttError;
use crate::storage::store::NewCall;
use crate::storage::AccountStore;

const MAX_PERSIST_BACKOFF: Duration = Duration::from_secs(30);

/// Who is calling whom, and how.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallRequest {
    pub user_id: i64,
    pub companion_id: i64,
    pub kind: CallKind,
}

/// How hard to try the final balance write.
#[derive(Debug, Clone, Copy)]
pub struct PersistSettings {
    pub retries: u32,
    pub backoff: Duration,
}

impl PersistSettings {
    pub fn from_config(config: &BillingConfig) -> Self {
        Self {
            retries: config.persist_retries,
            backoff: config.persist_backoff(),
        }
    }

    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.backoff
            .checked_mul(factor)
            .unwrap_or(MAX_PERSIST_BACKOFF)
            .min(MAX_PERSIST_BACKOFF)
    }
}

impl Default for PersistSettings {
    fn default() -> Self {
        Self::from_config(&BillingConfig::default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistOutcome {
    Persisted { balance: u64 },
    Failed { balance: u64, error: String },
}

impl PersistOutcome {
    pub fn balance(&self) -> u64 {
        match self {
            PersistOutcome::Persisted { balance } | PersistOutcome::Failed { balance, .. } => {
                *balance
            }
        }
    }

    pub fn is_persisted(&self) -> bool {
        matches!(self, PersistOutcome::Persisted { .. })
    }
}

/// Apply a persist effect: set the final balance, then record the call.
///
/// Failures are logged and reported in the outcome; nothing is re-opened.
pub async fn persist_final_balance(
    store: Arc<dyn AccountStore>,
    user_id: i64,
    effect: PersistBalance,
    settings: PersistSettings,
) -> PersistOutcome {
    let balance = effect.final_balance;
    let mut attempt = 0;

    let outcome = loop {
        match store.set_balance(user_id, balance).await {
            Ok(()) => {
                tracing::info!(user_id, balance, "Final balance persisted");
                break PersistOutcome::Persisted { balance };
            }
            Err(e) if attempt < settings.retries => {
                let delay = settings.delay_for_attempt(attempt);
                tracing::warn!(
                    user_id,
                    balance,
                    attempt = attempt + 1,
                    "Balance write failed: {e}. Retrying in {}ms",
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                let err = DosttError::PersistFailure {
                    user_id,
                    balance,
                    message: e.to_string(),
                };
                tracing::error!("{err}");
                break PersistOutcome::Failed {
                    balance,
                    error: e.to_string(),
                };
            }
        }
    };

    let record = NewCall {
        user_id,
        companion_id: effect.companion_id,
        start_time: Some(effect.started_at.to_rfc3339()),
        duration: effect.elapsed_seconds as i64,
        call_type: effect.kind.as_str().to_string(),
        coins_spent: effect.coins_spent as i64,
    };
    if let Err(e) = store.record_call(&record).await {
        tracing::warn!(user_id, "Failed to record call history: {e}");
    }

    outcome
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Shared {
    user_id: i64,
    session: Mutex<CallSession>,
    feed: watch::Sender<TickResult>,
    outcome: watch::Sender<Option<PersistOutcome>>,
    store: Arc<dyn AccountStore>,
    persist: PersistSettings,
}

impl Shared {
    fn on_tick(self: &Arc<Self>) -> ControlFlow<()> {
        let (result, effect) = {
            let mut session = lock(&self.session);
            let result = session.tick();
            (result, session.take_persist_effect())
        };

        if let Some(effect) = effect {
            tracing::info!(
                user_id = self.user_id,
                elapsed = result.elapsed_seconds,
                "Call ended: coins depleted"
            );
            self.feed.send_replace(result);
            self.spawn_persist(effect);
            return ControlFlow::Break(());
        }

        if result.status.is_active() {
            self.feed.send_replace(result);
            ControlFlow::Continue(())
        } else {
            // Ended by the user between two ticks; end() already settled it
            ControlFlow::Break(())
        }
    }

    fn spawn_persist(self: &Arc<Self>, effect: PersistBalance) {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(rt) => rt,
            Err(_) => {
                tracing::error!(
                    user_id = self.user_id,
                    balance = effect.final_balance,
                    "No runtime available; final balance was not persisted"
                );
                return;
            }
        };

        let shared = Arc::clone(self);
        runtime.spawn(async move {
            let outcome = persist_final_balance(
                shared.store.clone(),
                shared.user_id,
                effect,
                shared.persist,
            )
            .await;
            shared.outcome.send_replace(Some(outcome));
        });
    }
}

/// Handle to one live call.
///
/// Dropping the handle hangs up the call, exactly like `end()`.
pub struct SessionHandle {
    shared: Arc<Shared>,
    timer: Mutex<Option<TickTimer>>,
    companion_id: i64,
    kind: CallKind,
    rate_per_minute: u32,
    started_at: DateTime<Utc>,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("companion_id", &self.companion_id)
            .field("kind", &self.kind)
            .field("rate_per_minute", &self.rate_per_minute)
            .field("started_at", &self.started_at)
            .finish_non_exhaustive()
    }
}

impl SessionHandle {
    /// Snapshot the user's balance and start metering the call.
    pub async fn start(
        request: CallRequest,
        store: Arc<dyn AccountStore>,
        config: &BillingConfig,
    ) -> Result<Self, DosttError> {
        let balance = store
            .get_balance(request.user_id)
            .await
            .map_err(DosttError::from_anyhow)?;

        let rates = RateTable::from_config(config);
        let mut session =
            CallSession::start(request.companion_id, request.kind, &rates, balance)?;
        let immediate_effect = session.take_persist_effect();

        let (feed, _) = watch::channel(session.snapshot());
        let (outcome, _) = watch::channel(None);
        let rate_per_minute = session.rate_per_minute();
        let started_at = session.started_at();

        let shared = Arc::new(Shared {
            user_id: request.user_id,
            session: Mutex::new(session),
            feed,
            outcome,
            store,
            persist: PersistSettings::from_config(config),
        });

        let timer = match immediate_effect {
            Some(effect) => {
                tracing::info!(
                    user_id = request.user_id,
                    "Call not started: balance is empty"
                );
                shared.spawn_persist(effect);
                None
            }
            None => {
                tracing::info!(
                    user_id = request.user_id,
                    companion_id = request.companion_id,
                    kind = %request.kind,
                    balance,
                    rate_per_minute,
                    "Call started"
                );
                let ticking = Arc::clone(&shared);
                Some(TickTimer::start(config.tick_interval(), move || {
                    ticking.on_tick()
                }))
            }
        };

        Ok(Self {
            shared,
            timer: Mutex::new(timer),
            companion_id: request.companion_id,
            kind: request.kind,
            rate_per_minute,
            started_at,
        })
    }

    /// Hang up. Returns the floored final balance.
    ///
    /// Once this returns no tick can touch the session again. Calling it on an
    /// ended session returns the same balance and persists nothing.
    pub fn end(&self) -> u64 {
        let (final_balance, snapshot, effect) = {
            let mut session = lock(&self.shared.session);
            let final_balance = session.end();
            (final_balance, session.snapshot(), session.take_persist_effect())
        };

        if let Some(mut timer) = lock(&self.timer).take() {
            timer.stop();
        }

        if let Some(effect) = effect {
            tracing::info!(
                user_id = self.shared.user_id,
                elapsed = snapshot.elapsed_seconds,
                final_balance,
                "Call ended by user"
            );
            self.shared.feed.send_replace(snapshot);
            self.shared.spawn_persist(effect);
        }

        final_balance
    }

    /// Credit recharged coins into the running call.
    pub fn top_up(&self, coins: u64) -> Option<TickResult> {
        let snapshot = {
            let mut session = lock(&self.shared.session);
            if !session.top_up(coins) {
                return None;
            }
            session.snapshot()
        };
        tracing::info!(user_id = self.shared.user_id, coins, "Coins added to live call");
        self.shared.feed.send_replace(snapshot);
        Some(snapshot)
    }

    /// Wait until the call has ended (by depletion or hang-up).
    pub async fn terminated(&self) -> TickResult {
        let mut rx = self.shared.feed.subscribe();
        let result = match rx.wait_for(|r| r.ended()).await {
            Ok(r) => *r,
            Err(_) => self.snapshot(),
        };
        result
    }

    /// Wait for the persist effect to finish. Only meaningful once ended.
    pub async fn wait_persisted(&self) -> Option<PersistOutcome> {
        let mut rx = self.shared.outcome.subscribe();
        let outcome = match rx.wait_for(|o| o.is_some()).await {
            Ok(o) => (*o).clone(),
            Err(_) => None,
        };
        outcome
    }

    /// The display feed: one value per tick.
    pub fn subscribe(&self) -> watch::Receiver<TickResult> {
        self.shared.feed.subscribe()
    }

    pub fn snapshot(&self) -> TickResult {
        lock(&self.shared.session).snapshot()
    }

    pub fn is_ended(&self) -> bool {
        !lock(&self.shared.session).is_active()
    }

    pub fn user_id(&self) -> i64 {
        self.shared.user_id
    }

    pub fn companion_id(&self) -> i64 {
        self.companion_id
    }

    pub fn kind(&self) -> CallKind {
        self.kind
    }

    pub fn rate_per_minute(&self) -> u32 {
        self.rate_per_minute
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.end();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::session::CallStatus;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct FakeStore {
        balance: Mutex<i64>,
        writes: Mutex<Vec<u64>>,
        calls: Mutex<Vec<NewCall>>,
        attempts: AtomicU32,
        failures_left: AtomicU32,
    }

    impl FakeStore {
        fn with_balance(balance: i64) -> Arc<Self> {
            Arc::new(Self {
                balance: Mutex::new(balance),
                ..Default::default()
            })
        }

        fn failing(balance: i64, failures: u32) -> Arc<Self> {
            let store = Self::with_balance(balance);
            store.failures_left.store(failures, Ordering::SeqCst);
            store
        }

        fn writes(&self) -> Vec<u64> {
            self.writes.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AccountStore for FakeStore {
        async fn get_balance(&self, user_id: i64) -> anyhow::Result<i64> {
            if user_id != 1 {
                return Err(DosttError::UserNotFound { user_id }.into());
            }
            Ok(*self.balance.lock().unwrap())
        }

        async fn set_balance(&self, _user_id: i64, coins: u64) -> anyhow::Result<()> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                anyhow::bail!("storage unavailable");
            }
            *self.balance.lock().unwrap() = coins as i64;
            self.writes.lock().unwrap().push(coins);
            Ok(())
        }

        async fn record_call(&self, call: &NewCall) -> anyhow::Result<()> {
            self.calls.lock().unwrap().push(call.clone());
            Ok(())
        }
    }

    fn request(kind: CallKind) -> CallRequest {
        CallRequest {
            user_id: 1,
            companion_id: 4,
            kind,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_audio_call_depletes_and_persists_zero() {
        let store = FakeStore::with_balance(5);
        let handle = SessionHandle::start(
            request(CallKind::Audio),
            store.clone(),
            &BillingConfig::default(),
        )
        .await
        .unwrap();

        let last = handle.terminated().await;
        assert_eq!(last.elapsed_seconds, 30);
        assert_eq!(last.coins_remaining, 0);
        assert_eq!(last.status, CallStatus::EndedByDepletion);

        let outcome = handle.wait_persisted().await.unwrap();
        assert_eq!(outcome, PersistOutcome::Persisted { balance: 0 });
        assert_eq!(store.writes(), vec![0]);

        let calls = store.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].duration, 30);
        assert_eq!(calls[0].coins_spent, 5);
        assert_eq!(calls[0].call_type, "audio");

        // Hanging up afterwards changes nothing
        assert_eq!(handle.end(), 0);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(store.writes(), vec![0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_video_hangup_persists_once() {
        let store = FakeStore::with_balance(100);
        let handle = SessionHandle::start(
            request(CallKind::Video),
            store.clone(),
            &BillingConfig::default(),
        )
        .await
        .unwrap();

        tokio::time::sleep(Duration::from_millis(10_500)).await;
        assert_eq!(handle.snapshot().elapsed_seconds, 10);

        assert_eq!(handle.end(), 90);
        assert_eq!(handle.end(), 90);

        let outcome = handle.wait_persisted().await.unwrap();
        assert_eq!(outcome.balance(), 90);
        assert!(outcome.is_persisted());
        assert_eq!(store.writes(), vec![90]);
        assert_eq!(handle.snapshot().status, CallStatus::EndedByUser);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_tick_after_end() {
        let store = FakeStore::with_balance(100);
        let handle = SessionHandle::start(
            request(CallKind::Video),
            store.clone(),
            &BillingConfig::default(),
        )
        .await
        .unwrap();

        tokio::time::sleep(Duration::from_millis(2_500)).await;
        handle.end();
        tokio::time::sleep(Duration::from_secs(10)).await;

        let snap = handle.snapshot();
        assert_eq!(snap.elapsed_seconds, 2);
        assert_eq!(snap.coins_remaining, 98);
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_hangup_keeps_starting_balance() {
        let store = FakeStore::with_balance(42);
        let handle = SessionHandle::start(
            request(CallKind::Audio),
            store.clone(),
            &BillingConfig::default(),
        )
        .await
        .unwrap();

        assert_eq!(handle.end(), 42);
        handle.wait_persisted().await.unwrap();
        assert_eq!(store.writes(), vec![42]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_balance_never_ticks() {
        let store = FakeStore::with_balance(0);
        let handle = SessionHandle::start(
            request(CallKind::Video),
            store.clone(),
            &BillingConfig::default(),
        )
        .await
        .unwrap();

        assert!(handle.is_ended());
        assert_eq!(handle.snapshot().status, CallStatus::EndedByDepletion);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(handle.snapshot().elapsed_seconds, 0);
        assert_eq!(handle.wait_persisted().await.unwrap().balance(), 0);
        assert_eq!(handle.end(), 0);
        assert_eq!(store.writes(), vec![0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_negative_balance_rejected() {
        let store = FakeStore::with_balance(-5);
        let result = SessionHandle::start(
            request(CallKind::Audio),
            store.clone(),
            &BillingConfig::default(),
        )
        .await;

        assert!(matches!(
            result,
            Err(DosttError::InvalidStartState { balance: -5 })
        ));
        assert!(store.writes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_user_rejected() {
        let store = FakeStore::with_balance(10);
        let result = SessionHandle::start(
            CallRequest {
                user_id: 99,
                companion_id: 1,
                kind: CallKind::Audio,
            },
            store,
            &BillingConfig::default(),
        )
        .await;
        assert!(matches!(result, Err(DosttError::UserNotFound { user_id: 99 })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_persist_failure_is_logged_not_reopened() {
        let store = FakeStore::failing(20, 1);
        let handle = SessionHandle::start(
            request(CallKind::Video),
            store.clone(),
            &BillingConfig::default(),
        )
        .await
        .unwrap();

        tokio::time::sleep(Duration::from_millis(3_500)).await;
        assert_eq!(handle.end(), 17);

        let outcome = handle.wait_persisted().await.unwrap();
        assert!(matches!(outcome, PersistOutcome::Failed { balance: 17, .. }));
        assert!(store.writes().is_empty());
        assert_eq!(store.attempts.load(Ordering::SeqCst), 1);
        // The session stays closed
        assert!(handle.is_ended());
        assert_eq!(handle.end(), 17);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persist_retries_with_backoff() {
        let store = FakeStore::failing(20, 2);
        let config = BillingConfig {
            persist_retries: 2,
            persist_backoff_ms: 100,
            ..BillingConfig::default()
        };
        let handle = SessionHandle::start(request(CallKind::Audio), store.clone(), &config)
            .await
            .unwrap();

        handle.end();
        let outcome = handle.wait_persisted().await.unwrap();
        assert_eq!(outcome, PersistOutcome::Persisted { balance: 20 });
        assert_eq!(store.attempts.load(Ordering::SeqCst), 3);
        assert_eq!(store.writes(), vec![20]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_is_implicit_end() {
        let store = FakeStore::with_balance(60);
        let handle = SessionHandle::start(
            request(CallKind::Video),
            store.clone(),
            &BillingConfig::default(),
        )
        .await
        .unwrap();

        tokio::time::sleep(Duration::from_millis(5_200)).await;
        drop(handle);
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(store.writes(), vec![55]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_feed_reports_each_tick() {
        let store = FakeStore::with_balance(3);
        let handle = SessionHandle::start(
            request(CallKind::Video),
            store.clone(),
            &BillingConfig::default(),
        )
        .await
        .unwrap();

        let mut feed = handle.subscribe();
        let mut seen = Vec::new();
        while feed.changed().await.is_ok() {
            let r = *feed.borrow_and_update();
            seen.push((r.elapsed_seconds, r.coins_remaining));
            if r.ended() {
                break;
            }
        }
        assert_eq!(seen, vec![(1, 2), (2, 1), (3, 0)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_top_up_reaches_store_through_persist() {
        let store = FakeStore::with_balance(10);
        let handle = SessionHandle::start(
            request(CallKind::Video),
            store.clone(),
            &BillingConfig::default(),
        )
        .await
        .unwrap();

        tokio::time::sleep(Duration::from_millis(4_500)).await;
        let after = handle.top_up(300).unwrap();
        assert_eq!(after.coins_remaining, 306);

        assert_eq!(handle.end(), 306);
        handle.wait_persisted().await.unwrap();
        assert_eq!(store.writes(), vec![306]);
        assert!(handle.top_up(5).is_none());
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let settings = PersistSettings {
            retries: 5,
            backoff: Duration::from_millis(500),
        };
        assert_eq!(settings.delay_for_attempt(0), Duration::from_millis(500));
        assert_eq!(settings.delay_for_attempt(2), Duration::from_millis(2_000));
        assert_eq!(settings.delay_for_attempt(20), MAX_PERSIST_BACKOFF);
    }
}

//! Synchronization Session
//!
//! Owns the one live subscription that feeds a [`MarkerRepository`]. A
//! session is activated when the map is shown and deactivated on teardown;
//! after deactivation no batch from the old feed reaches the mirror.
//!
//! When the feed closes the session re-subscribes (once by default). Every
//! attempt, failed or not, spends budget until a batch arrives. Once the budget
//! is spent the session parks in [`SyncState::OutOfSync`] until it is
//! activated again.

use std::fmt;
use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::repository::{Generation, MarkerRepository};
use crate::store::{ChangeStream, StoreError, StoreResult};

/// Health of the live subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncState {
    /// No subscription is open.
    Idle,
    /// Batches are flowing into the mirror.
    Live,
    /// The feed closed and a replacement is being opened.
    Resubscribing,
    /// The feed could not be restored; the mirror may be stale.
    OutOfSync { reason: String },
}

impl SyncState {
    pub fn is_out_of_sync(&self) -> bool {
        matches!(self, Self::OutOfSync { .. })
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Live => f.write_str("live"),
            Self::Resubscribing => f.write_str("resubscribing"),
            Self::OutOfSync { reason } => write!(f, "out of sync ({reason})"),
        }
    }
}

/// Session tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// Re-subscriptions attempted after the feed closes, before giving up.
    pub resubscribe_attempts: u32,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            resubscribe_attempts: 1,
        }
    }
}

struct ActiveSubscription {
    generation: Generation,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Lifecycle owner of a repository's live subscription.
pub struct SyncSession {
    repository: Arc<MarkerRepository>,
    options: SessionOptions,
    state_tx: watch::Sender<SyncState>,
    active: Option<ActiveSubscription>,
}

impl SyncSession {
    pub fn new(repository: Arc<MarkerRepository>) -> Self {
        Self::with_options(repository, SessionOptions::default())
    }

    pub fn with_options(repository: Arc<MarkerRepository>, options: SessionOptions) -> Self {
        let (state_tx, _) = watch::channel(SyncState::Idle);
        Self {
            repository,
            options,
            state_tx,
            active: None,
        }
    }

    pub fn repository(&self) -> &Arc<MarkerRepository> {
        &self.repository
    }

    pub fn state(&self) -> SyncState {
        self.state_tx.borrow().clone()
    }

    /// Receiver that observes every state transition.
    pub fn watch_state(&self) -> watch::Receiver<SyncState> {
        self.state_tx.subscribe()
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Open the live subscription, replacing any previous one.
    ///
    /// The initial batch is applied by the background task, not by this call.
    pub async fn activate(&mut self) -> StoreResult<()> {
        self.deactivate().await;

        let store = Arc::clone(self.repository.store());
        let scope = self.repository.scope().clone();
        let stream = match store.subscribe(&scope).await {
            Ok(stream) => stream,
            Err(err) => {
                error!(store = store.name(), error = %err, "Failed to open subscription");
                self.state_tx.send_replace(SyncState::OutOfSync {
                    reason: err.to_string(),
                });
                return Err(err);
            }
        };

        let generation = self.repository.begin_subscription();
        let cancel = CancellationToken::new();
        let feed = Feed {
            repository: Arc::clone(&self.repository),
            generation,
            cancel: cancel.clone(),
            state_tx: self.state_tx.clone(),
            attempts: self.options.resubscribe_attempts,
        };
        self.state_tx.send_replace(SyncState::Live);
        let task = tokio::spawn(feed.run(stream));

        info!(
            store = store.name(),
            scope = %scope,
            generation = generation.as_u64(),
            "Subscription activated"
        );
        self.active = Some(ActiveSubscription {
            generation,
            cancel,
            task,
        });
        Ok(())
    }

    /// Cancel the live subscription. No further batches reach the mirror.
    pub async fn deactivate(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };

        self.repository.end_subscription(active.generation);
        active.cancel.cancel();
        if let Err(err) = active.task.await {
            if !err.is_cancelled() {
                warn!(error = %err, "Subscription task ended abnormally");
            }
        }
        self.state_tx.send_replace(SyncState::Idle);
        info!(
            generation = active.generation.as_u64(),
            "Subscription deactivated"
        );
    }
}

impl Drop for SyncSession {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            self.repository.end_subscription(active.generation);
            active.cancel.cancel();
            active.task.abort();
        }
    }
}

/// Background half of a session: pumps one feed into the repository.
struct Feed {
    repository: Arc<MarkerRepository>,
    generation: Generation,
    cancel: CancellationToken,
    state_tx: watch::Sender<SyncState>,
    attempts: u32,
}

impl Feed {
    async fn run(self, mut stream: ChangeStream) {
        let mut budget = self.attempts;

        loop {
            let reason = loop {
                let item = tokio::select! {
                    biased;
                    () = self.cancel.cancelled() => return,
                    item = stream.next() => item,
                };

                match item {
                    Some(Ok(batch)) => {
                        if self.repository.apply_batch(self.generation, batch) {
                            budget = self.attempts;
                            self.set_state(SyncState::Live);
                        }
                    }
                    Some(Err(err)) => break err,
                    None => break StoreError::SubscriptionClosed("feed ended".to_string()),
                }
            };

            stream = match self.reopen(reason, &mut budget).await {
                Some(next) => next,
                None => return,
            };
        }
    }

    /// Re-subscribe until a feed opens or the budget runs out.
    ///
    /// Returns `None` when cancelled or when the session went out of sync.
    async fn reopen(&self, mut reason: StoreError, budget: &mut u32) -> Option<ChangeStream> {
        let store = Arc::clone(self.repository.store());
        let scope = self.repository.scope().clone();

        loop {
            if *budget == 0 {
                error!(error = %reason, "Subscription lost, mirror is out of sync");
                self.set_state(SyncState::OutOfSync {
                    reason: reason.to_string(),
                });
                return None;
            }
            *budget -= 1;

            warn!(error = %reason, remaining = *budget, "Subscription closed, re-subscribing");
            self.set_state(SyncState::Resubscribing);

            let reopened = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return None,
                reopened = store.subscribe(&scope) => reopened,
            };

            match reopened {
                Ok(next) => {
                    debug!(generation = self.generation.as_u64(), "Re-subscribed");
                    return Some(next);
                }
                Err(err) => reason = err,
            }
        }
    }

    fn set_state(&self, state: SyncState) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marker::{NewMarker, Position};
    use crate::store::{InMemoryMarkerStore, QueryScope, StoreOp};
    use std::time::Duration;

    fn setup() -> (InMemoryMarkerStore, Arc<MarkerRepository>) {
        let store = InMemoryMarkerStore::new();
        let repo = Arc::new(MarkerRepository::new(
            Arc::new(store.clone()),
            QueryScope::all(),
        ));
        (store, repo)
    }

    fn at(lat: f64) -> NewMarker {
        NewMarker::new(Position { lat, lng: 0.0 })
    }

    async fn wait_for_len(repo: &MarkerRepository, len: usize) {
        let mut rx = repo.watch();
        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|m| m.len() == len))
            .await
            .expect("mirror did not reach expected size")
            .expect("repository dropped");
    }

    async fn wait_for_state(session: &SyncSession, pred: impl FnMut(&SyncState) -> bool) {
        let mut rx = session.watch_state();
        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(pred))
            .await
            .expect("session did not reach expected state")
            .expect("session dropped");
    }

    #[tokio::test]
    async fn activation_applies_initial_batch() {
        let (store, repo) = setup();
        store.seed(at(1.0));
        store.seed(at(2.0));

        let mut session = SyncSession::new(Arc::clone(&repo));
        session.activate().await.unwrap();

        wait_for_len(&repo, 2).await;
        assert_eq!(session.state(), SyncState::Live);
    }

    #[tokio::test]
    async fn remote_changes_flow_into_mirror() {
        let (store, repo) = setup();
        let mut session = SyncSession::new(Arc::clone(&repo));
        session.activate().await.unwrap();

        store.seed(at(1.0));
        wait_for_len(&repo, 1).await;
    }

    #[tokio::test]
    async fn reactivation_replaces_previous_subscription() {
        let (store, repo) = setup();
        let mut session = SyncSession::new(Arc::clone(&repo));

        session.activate().await.unwrap();
        let first = repo.active_generation().unwrap();
        session.activate().await.unwrap();
        let second = repo.active_generation().unwrap();

        assert!(second > first);
        assert_eq!(store.call_count(StoreOp::Subscribe), 2);
        assert_eq!(store.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn deactivation_stops_updates() {
        let (store, repo) = setup();
        let mut session = SyncSession::new(Arc::clone(&repo));
        session.activate().await.unwrap();
        wait_for_len(&repo, 0).await;

        session.deactivate().await;
        assert_eq!(session.state(), SyncState::Idle);
        assert!(!session.is_active());

        store.seed(at(1.0));
        tokio::task::yield_now().await;
        assert!(repo.is_empty());
    }

    #[tokio::test]
    async fn closed_feed_resubscribes_once() {
        let (store, repo) = setup();
        let mut session = SyncSession::new(Arc::clone(&repo));
        session.activate().await.unwrap();
        wait_for_state(&session, |s| *s == SyncState::Live).await;

        store.close_subscriptions();
        store.seed(at(1.0));

        wait_for_len(&repo, 1).await;
        assert_eq!(store.call_count(StoreOp::Subscribe), 2);
        assert_eq!(session.state(), SyncState::Live);
    }

    #[tokio::test]
    async fn failed_resubscription_is_out_of_sync() {
        let (store, repo) = setup();
        let mut session = SyncSession::new(Arc::clone(&repo));
        session.activate().await.unwrap();
        wait_for_state(&session, |s| *s == SyncState::Live).await;

        store.fail_next(StoreOp::Subscribe, StoreError::Unavailable("offline".into()));
        store.close_subscriptions();

        wait_for_state(&session, SyncState::is_out_of_sync).await;
        assert_eq!(store.call_count(StoreOp::Subscribe), 2);
    }

    #[tokio::test]
    async fn failed_resubscriptions_spend_the_configured_budget() {
        let (store, repo) = setup();
        let options = SessionOptions {
            resubscribe_attempts: 3,
        };
        let mut session = SyncSession::with_options(Arc::clone(&repo), options);
        session.activate().await.unwrap();
        wait_for_state(&session, |s| *s == SyncState::Live).await;

        store.fail_next(StoreOp::Subscribe, StoreError::Unavailable("blip".into()));
        store.fail_next(StoreOp::Subscribe, StoreError::Unavailable("blip".into()));
        store.close_subscriptions();
        store.seed(at(1.0));

        wait_for_len(&repo, 1).await;
        assert_eq!(store.call_count(StoreOp::Subscribe), 4);
        assert_eq!(session.state(), SyncState::Live);
    }

    #[tokio::test]
    async fn exhausted_budget_is_out_of_sync() {
        let (store, repo) = setup();
        let options = SessionOptions {
            resubscribe_attempts: 2,
        };
        let mut session = SyncSession::with_options(Arc::clone(&repo), options);
        session.activate().await.unwrap();
        wait_for_state(&session, |s| *s == SyncState::Live).await;

        for _ in 0..3 {
            store.fail_next(StoreOp::Subscribe, StoreError::Unavailable("down".into()));
        }
        store.close_subscriptions();

        wait_for_state(&session, SyncState::is_out_of_sync).await;
        assert_eq!(store.call_count(StoreOp::Subscribe), 3);
    }

    #[tokio::test]
    async fn failed_activation_reports_error() {
        let (store, repo) = setup();
        store.fail_next(StoreOp::Subscribe, StoreError::Unavailable("offline".into()));

        let mut session = SyncSession::new(Arc::clone(&repo));
        assert!(session.activate().await.is_err());
        assert!(session.state().is_out_of_sync());
        assert!(!session.is_active());
    }

    #[tokio::test]
    async fn dropping_session_retires_generation() {
        let (_store, repo) = setup();
        let mut session = SyncSession::new(Arc::clone(&repo));
        session.activate().await.unwrap();
        assert!(repo.active_generation().is_some());

        drop(session);
        assert_eq!(repo.active_generation(), None);
    }
}

//! In-process [`MarkerStore`] implementation.
//!
//! Behaves like a remote collection: ids are assigned on create, documents
//! are ordered by a logical creation clock, and every committed change pushes
//! a fresh snapshot to each live subscriber.
//!
//! Tests drive it through a few extra hooks:
//!
//! - [`fail_next`](InMemoryMarkerStore::fail_next) queues an error for the next
//!   call of one operation
//! - [`inject_after_list`](InMemoryMarkerStore::inject_after_list) commits a
//!   document right after the next `list` returns
//! - [`close_subscriptions`](InMemoryMarkerStore::close_subscriptions) ends
//!   every live feed with [`StoreError::SubscriptionClosed`]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, trace};

use super::{ChangeBatch, ChangeStream, MarkerStore, QueryScope, StoreError, StoreResult};
use crate::marker::{MarkerDocument, MarkerId, MarkerPatch, NewMarker};

/// Store operations, used to target failure injection and call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Create,
    Update,
    Delete,
    DeleteMany,
    List,
    Subscribe,
}

struct Subscriber {
    scope: QueryScope,
    tx: mpsc::UnboundedSender<StoreResult<ChangeBatch>>,
}

struct Inner {
    documents: Vec<MarkerDocument>,
    next_id: u64,
    epoch: DateTime<Utc>,
    failures: HashMap<StoreOp, VecDeque<StoreError>>,
    after_list: Option<NewMarker>,
    subscribers: Vec<Subscriber>,
    calls: HashMap<StoreOp, usize>,
}

impl Inner {
    fn record(&mut self, op: StoreOp) -> StoreResult<()> {
        *self.calls.entry(op).or_default() += 1;
        match self.failures.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(err) => {
                debug!(?op, error = %err, "Injected store failure");
                Err(err)
            }
            None => Ok(()),
        }
    }

    fn insert(&mut self, marker: NewMarker) -> MarkerId {
        self.next_id += 1;
        let id = MarkerId::new(format!("m-{:06}", self.next_id));
        #[allow(clippy::cast_possible_wrap)]
        let created_at = self.epoch + Duration::milliseconds(self.next_id as i64);
        self.documents.push(MarkerDocument {
            id: id.clone(),
            position: marker.position,
            description: marker.description,
            created_at,
            tags: marker.tags,
        });
        id
    }

    fn snapshot(&self, scope: &QueryScope) -> Vec<MarkerDocument> {
        let mut docs: Vec<MarkerDocument> = self
            .documents
            .iter()
            .filter(|doc| scope.matches(doc))
            .cloned()
            .collect();
        // stable: equal timestamps keep insertion order
        docs.sort_by_key(|doc| doc.created_at);
        docs
    }

    fn publish(&mut self) {
        let snapshots: Vec<ChangeBatch> = self
            .subscribers
            .iter()
            .map(|sub| ChangeBatch::new(self.snapshot(&sub.scope)))
            .collect();

        let before = self.subscribers.len();
        let mut snapshots = snapshots.into_iter();
        self.subscribers.retain(|sub| match snapshots.next() {
            Some(batch) => sub.tx.send(Ok(batch)).is_ok(),
            None => false,
        });

        let dropped = before - self.subscribers.len();
        if dropped > 0 {
            trace!(dropped, "Pruned cancelled subscribers");
        }
    }
}

/// Marker collection held in memory.
///
/// Cloning shares the same collection.
#[derive(Clone)]
pub struct InMemoryMarkerStore {
    inner: Arc<Mutex<Inner>>,
}

impl Default for InMemoryMarkerStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryMarkerStore {
    /// Create an empty collection.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                documents: Vec::new(),
                next_id: 0,
                epoch: Utc::now(),
                failures: HashMap::new(),
                after_list: None,
                subscribers: Vec::new(),
                calls: HashMap::new(),
            })),
        }
    }

    /// Commit a document directly, bypassing failure injection and counters.
    pub fn seed(&self, marker: NewMarker) -> MarkerId {
        let mut inner = self.inner.lock();
        let id = inner.insert(marker);
        inner.publish();
        id
    }

    /// All documents in creation order, ignoring scopes.
    pub fn documents(&self) -> Vec<MarkerDocument> {
        self.inner.lock().snapshot(&QueryScope::all())
    }

    /// Make the next call of `op` fail with `error`. Queued errors are used in order.
    pub fn fail_next(&self, op: StoreOp, error: StoreError) {
        self.inner
            .lock()
            .failures
            .entry(op)
            .or_default()
            .push_back(error);
    }

    /// Commit `marker` immediately after the next `list` call has taken its snapshot.
    pub fn inject_after_list(&self, marker: NewMarker) {
        self.inner.lock().after_list = Some(marker);
    }

    /// Terminate every live feed with [`StoreError::SubscriptionClosed`].
    pub fn close_subscriptions(&self) {
        let mut inner = self.inner.lock();
        for sub in inner.subscribers.drain(..) {
            let _ = sub.tx.send(Err(StoreError::SubscriptionClosed(
                "feed terminated by store".to_string(),
            )));
        }
    }

    /// Number of calls made to `op`, including failed ones.
    pub fn call_count(&self, op: StoreOp) -> usize {
        self.inner.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Number of feeds still attached.
    pub fn subscriber_count(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.subscribers.retain(|sub| !sub.tx.is_closed());
        inner.subscribers.len()
    }
}

#[async_trait]
impl MarkerStore for InMemoryMarkerStore {
    async fn create(&self, marker: NewMarker) -> StoreResult<MarkerId> {
        let mut inner = self.inner.lock();
        inner.record(StoreOp::Create)?;
        let id = inner.insert(marker);
        inner.publish();
        debug!(id = %id, "Created marker document");
        Ok(id)
    }

    async fn update(&self, id: &MarkerId, patch: MarkerPatch) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        inner.record(StoreOp::Update)?;
        let doc = inner
            .documents
            .iter_mut()
            .find(|doc| &doc.id == id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        doc.position = patch.position;
        inner.publish();
        Ok(())
    }

    async fn delete(&self, id: &MarkerId) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        inner.record(StoreOp::Delete)?;
        let before = inner.documents.len();
        inner.documents.retain(|doc| &doc.id != id);
        if inner.documents.len() != before {
            inner.publish();
        }
        Ok(())
    }

    async fn delete_many(&self, ids: &[MarkerId]) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        inner.record(StoreOp::DeleteMany)?;
        inner.documents.retain(|doc| !ids.contains(&doc.id));
        inner.publish();
        Ok(())
    }

    async fn list(&self, scope: &QueryScope) -> StoreResult<Vec<MarkerDocument>> {
        let mut inner = self.inner.lock();
        inner.record(StoreOp::List)?;
        let docs = inner.snapshot(scope);
        if let Some(late) = inner.after_list.take() {
            let id = inner.insert(late);
            inner.publish();
            debug!(id = %id, "Committed document after list snapshot");
        }
        Ok(docs)
    }

    async fn subscribe(&self, scope: &QueryScope) -> StoreResult<ChangeStream> {
        let mut inner = self.inner.lock();
        inner.record(StoreOp::Subscribe)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let initial = ChangeBatch::new(inner.snapshot(scope));
        // receiver is alive, send cannot fail here
        let _ = tx.send(Ok(initial));
        inner.subscribers.push(Subscriber {
            scope: scope.clone(),
            tx,
        });
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marker::Position;

    fn at(lat: f64, lng: f64) -> NewMarker {
        NewMarker::new(Position { lat, lng })
    }

    #[tokio::test]
    async fn create_assigns_sequential_ids_in_order() {
        let store = InMemoryMarkerStore::new();
        let a = store.create(at(1.0, 1.0)).await.unwrap();
        let b = store.create(at(2.0, 2.0)).await.unwrap();

        assert_ne!(a, b);
        let docs = store.list(&QueryScope::all()).await.unwrap();
        assert_eq!(docs.iter().map(|d| d.id.clone()).collect::<Vec<_>>(), vec![a, b]);
        assert!(docs[0].created_at < docs[1].created_at);
    }

    #[tokio::test]
    async fn update_missing_document_is_not_found() {
        let store = InMemoryMarkerStore::new();
        let id = MarkerId::new("ghost");
        let err = store
            .update(&id, MarkerPatch::position(Position { lat: 0.0, lng: 0.0 }))
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::NotFound(id));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = InMemoryMarkerStore::new();
        let id = store.seed(at(1.0, 1.0));
        store.delete(&id).await.unwrap();
        store.delete(&id).await.unwrap();
        assert!(store.documents().is_empty());
    }

    #[tokio::test]
    async fn injected_failure_is_consumed_once() {
        let store = InMemoryMarkerStore::new();
        store.fail_next(StoreOp::Create, StoreError::Unavailable("down".into()));

        assert!(store.create(at(1.0, 1.0)).await.is_err());
        assert!(store.create(at(1.0, 1.0)).await.is_ok());
        assert_eq!(store.call_count(StoreOp::Create), 2);
        assert_eq!(store.documents().len(), 1);
    }

    #[tokio::test]
    async fn failed_delete_many_removes_nothing() {
        let store = InMemoryMarkerStore::new();
        let a = store.seed(at(1.0, 1.0));
        let b = store.seed(at(2.0, 2.0));
        store.fail_next(StoreOp::DeleteMany, StoreError::Unavailable("down".into()));

        assert!(store.delete_many(&[a.clone(), b.clone()]).await.is_err());
        assert_eq!(store.documents().len(), 2);

        store.delete_many(&[a, b]).await.unwrap();
        assert!(store.documents().is_empty());
    }

    #[tokio::test]
    async fn subscribe_delivers_initial_and_subsequent_snapshots() {
        let store = InMemoryMarkerStore::new();
        store.seed(at(1.0, 1.0));

        let mut feed = store.subscribe(&QueryScope::all()).await.unwrap();
        let initial = feed.next().await.unwrap().unwrap();
        assert_eq!(initial.len(), 1);

        store.create(at(2.0, 2.0)).await.unwrap();
        let next = feed.next().await.unwrap().unwrap();
        assert_eq!(next.len(), 2);
    }

    #[tokio::test]
    async fn subscription_respects_scope() {
        let store = InMemoryMarkerStore::new();
        store.seed(at(1.0, 1.0));
        store.seed(at(2.0, 2.0).with_tag("quest", "ring"));

        let mut feed = store.subscribe(&QueryScope::non_empty("quest")).await.unwrap();
        let initial = feed.next().await.unwrap().unwrap();
        assert_eq!(initial.len(), 1);
        assert_eq!(initial.documents[0].field("quest"), Some("ring"));
    }

    #[tokio::test]
    async fn dropped_feed_is_pruned() {
        let store = InMemoryMarkerStore::new();
        let feed = store.subscribe(&QueryScope::all()).await.unwrap();
        assert_eq!(store.subscriber_count(), 1);
        drop(feed);
        assert_eq!(store.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn close_subscriptions_ends_feed_with_error() {
        let store = InMemoryMarkerStore::new();
        let mut feed = store.subscribe(&QueryScope::all()).await.unwrap();
        feed.next().await.unwrap().unwrap();

        store.close_subscriptions();
        assert!(matches!(
            feed.next().await,
            Some(Err(StoreError::SubscriptionClosed(_)))
        ));
        assert!(feed.next().await.is_none());
    }

    #[tokio::test]
    async fn inject_after_list_lands_outside_the_snapshot() {
        let store = InMemoryMarkerStore::new();
        store.seed(at(1.0, 1.0));
        store.inject_after_list(at(3.0, 3.0));

        let listed = store.list(&QueryScope::all()).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(store.documents().len(), 2);
    }
}

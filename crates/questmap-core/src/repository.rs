//! Marker Repository
//!
//! Owns the mirror: the ordered in-memory copy of the remote marker
//! collection. Every mutation intent is applied to the mirror first, then sent
//! to the store, and rolled back if the store refuses it. Change batches from
//! the live subscription replace the mirror wholesale.
//!
//! All mirror reads and writes happen under a single lock that is never held
//! across an `.await`. Rollbacks are skipped once a change batch has been
//! applied after the optimistic step, since that batch already reflects the
//! remote state.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{MarkerError, MarkerResult};
use crate::marker::{Marker, MarkerId, MarkerPatch, NewMarker, Position};
use crate::store::{ChangeBatch, MarkerStore, QueryScope};

/// Read-only view of the mirror handed to the presentation layer.
pub type MarkerSnapshot = Arc<Vec<Marker>>;

/// Identifies one subscription registered with a repository.
///
/// Batches tagged with anything but the active generation are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Generation(u64);

impl Generation {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

struct Entry {
    /// Local key of an optimistic entry whose create call has not resolved.
    pending: Option<u64>,
    marker: Marker,
}

#[derive(Default)]
struct Mirror {
    entries: Vec<Entry>,
    next_pending: u64,
    /// Bumped on every applied change batch.
    batches_applied: u64,
    next_generation: u64,
    active_generation: Option<Generation>,
}

impl Mirror {
    fn position_of(&self, id: &MarkerId) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.marker.id.as_ref() == Some(id))
    }

    fn position_of_pending(&self, key: u64) -> Option<usize> {
        self.entries.iter().position(|e| e.pending == Some(key))
    }

    fn markers(&self) -> Vec<Marker> {
        self.entries.iter().map(|e| e.marker.clone()).collect()
    }
}

/// Single source of truth for the markers of one scope.
pub struct MarkerRepository {
    store: Arc<dyn MarkerStore>,
    scope: QueryScope,
    mirror: Mutex<Mirror>,
    snapshot_tx: watch::Sender<MarkerSnapshot>,
}

impl MarkerRepository {
    /// Create an empty repository over `store`, limited to `scope`.
    pub fn new(store: Arc<dyn MarkerStore>, scope: QueryScope) -> Self {
        let (snapshot_tx, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            store,
            scope,
            mirror: Mutex::new(Mirror::default()),
            snapshot_tx,
        }
    }

    pub fn store(&self) -> &Arc<dyn MarkerStore> {
        &self.store
    }

    pub fn scope(&self) -> &QueryScope {
        &self.scope
    }

    /// Current markers in display order.
    pub fn markers(&self) -> Vec<Marker> {
        self.mirror.lock().markers()
    }

    /// Receiver that observes every mirror change.
    pub fn watch(&self) -> watch::Receiver<MarkerSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn get(&self, id: &MarkerId) -> Option<Marker> {
        let mirror = self.mirror.lock();
        mirror
            .position_of(id)
            .map(|idx| mirror.entries[idx].marker.clone())
    }

    pub fn len(&self) -> usize {
        self.mirror.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mirror.lock().entries.is_empty()
    }

    fn publish(&self, mirror: &Mirror) {
        self.snapshot_tx.send_replace(Arc::new(mirror.markers()));
    }

    // ========================================================================
    // Mutation intents
    // ========================================================================

    /// Place a new marker.
    ///
    /// Returns `Ok(None)` without touching the store when there is no
    /// description to attach.
    pub async fn place_marker(
        &self,
        position: Position,
        description: Option<String>,
    ) -> MarkerResult<Option<MarkerId>> {
        let Some(description) = description.filter(|d| !d.is_empty()) else {
            debug!("Dropping place intent without a description");
            return Ok(None);
        };
        position.validate()?;

        let key = {
            let mut mirror = self.mirror.lock();
            let key = mirror.next_pending;
            mirror.next_pending += 1;
            mirror.entries.push(Entry {
                pending: Some(key),
                marker: Marker {
                    id: None,
                    position,
                    description: Some(description.clone()),
                },
            });
            self.publish(&mirror);
            key
        };

        let mut new_marker = NewMarker::new(position).with_description(description.clone());
        if let Some(field) = self.scope.required_field() {
            new_marker = new_marker.with_tag(field, description.clone());
        }

        match self.store.create(new_marker).await {
            Ok(id) => {
                let mut mirror = self.mirror.lock();
                match mirror.position_of_pending(key) {
                    Some(idx) if mirror.position_of(&id).is_some() => {
                        mirror.entries.remove(idx);
                    }
                    Some(idx) => {
                        let entry = &mut mirror.entries[idx];
                        entry.pending = None;
                        entry.marker.id = Some(id.clone());
                    }
                    None if mirror.position_of(&id).is_none() => {
                        mirror.entries.push(Entry {
                            pending: None,
                            marker: Marker {
                                id: Some(id.clone()),
                                position,
                                description: Some(description),
                            },
                        });
                    }
                    None => {}
                }
                self.publish(&mirror);
                info!(id = %id, %position, "Placed marker");
                Ok(Some(id))
            }
            Err(err) => {
                let mut mirror = self.mirror.lock();
                if let Some(idx) = mirror.position_of_pending(key) {
                    mirror.entries.remove(idx);
                    self.publish(&mirror);
                }
                warn!(error = %err, "Failed to place marker, discarded local entry");
                Err(err.into())
            }
        }
    }

    /// Move an existing marker. Order and description are preserved.
    pub async fn move_marker(&self, id: &MarkerId, position: Position) -> MarkerResult<()> {
        position.validate()?;

        let (previous, batches_seen) = {
            let mut mirror = self.mirror.lock();
            let previous = mirror.position_of(id).map(|idx| {
                let marker = &mut mirror.entries[idx].marker;
                std::mem::replace(&mut marker.position, position)
            });
            if previous.is_some() {
                self.publish(&mirror);
            }
            (previous, mirror.batches_applied)
        };

        match self.store.update(id, MarkerPatch::position(position)).await {
            Ok(()) => {
                debug!(id = %id, %position, "Moved marker");
                Ok(())
            }
            Err(err) => {
                let mut mirror = self.mirror.lock();
                if let (Some(previous), true) = (previous, mirror.batches_applied == batches_seen)
                {
                    if let Some(idx) = mirror.position_of(id) {
                        let marker = &mut mirror.entries[idx].marker;
                        if marker.position == position {
                            marker.position = previous;
                            self.publish(&mirror);
                        }
                    }
                }
                warn!(id = %id, error = %err, "Failed to move marker, restored position");
                Err(err.into())
            }
        }
    }

    /// Delete a marker. Deleting an absent marker succeeds.
    pub async fn remove_marker(&self, id: &MarkerId) -> MarkerResult<()> {
        let (removed, batches_seen) = {
            let mut mirror = self.mirror.lock();
            let removed = mirror
                .position_of(id)
                .map(|idx| (idx, mirror.entries.remove(idx)));
            if removed.is_some() {
                self.publish(&mirror);
            }
            (removed, mirror.batches_applied)
        };

        match self.store.delete(id).await {
            Ok(()) => {
                debug!(id = %id, "Removed marker");
                Ok(())
            }
            Err(err) => {
                let mut mirror = self.mirror.lock();
                if let Some((idx, entry)) = removed {
                    if mirror.batches_applied == batches_seen && mirror.position_of(id).is_none() {
                        let idx = idx.min(mirror.entries.len());
                        mirror.entries.insert(idx, entry);
                        self.publish(&mirror);
                    }
                }
                warn!(id = %id, error = %err, "Failed to remove marker, restored entry");
                Err(err.into())
            }
        }
    }

    /// Delete every marker the store currently lists for this scope.
    ///
    /// The store is enumerated first and exactly the enumerated documents are
    /// deleted in one batch. Markers created after the enumeration are not
    /// covered and stay. Returns the number of documents deleted.
    ///
    /// An empty listing drops confirmed entries from the mirror unless a change
    /// batch landed meanwhile. Pending entries are kept.
    pub async fn remove_all_markers(&self) -> MarkerResult<usize> {
        let batches_before_list = self.mirror.lock().batches_applied;
        let listed = self.store.list(&self.scope).await?;
        let ids: Vec<MarkerId> = listed.into_iter().map(|doc| doc.id).collect();

        if ids.is_empty() {
            let mut mirror = self.mirror.lock();
            // confirmed entries the store no longer has; a newer batch wins
            if mirror.batches_applied == batches_before_list {
                let before = mirror.entries.len();
                mirror.entries.retain(|entry| entry.marker.id.is_none());
                let stale = before - mirror.entries.len();
                if stale > 0 {
                    self.publish(&mirror);
                    debug!(stale, "Dropped markers missing from the store");
                }
            }
            debug!(scope = %self.scope, "Nothing to delete");
            return Ok(0);
        }

        let (removed, batches_seen) = {
            let mut mirror = self.mirror.lock();
            let mut removed = Vec::new();
            let mut idx = 0;
            while idx < mirror.entries.len() {
                let covered = mirror.entries[idx]
                    .marker
                    .id
                    .as_ref()
                    .is_some_and(|id| ids.contains(id));
                if covered {
                    removed.push((idx + removed.len(), mirror.entries.remove(idx)));
                } else {
                    idx += 1;
                }
            }
            if !removed.is_empty() {
                self.publish(&mirror);
            }
            (removed, mirror.batches_applied)
        };

        match self.store.delete_many(&ids).await {
            Ok(()) => {
                info!(count = ids.len(), scope = %self.scope, "Removed all markers");
                Ok(ids.len())
            }
            Err(err) => {
                let mut mirror = self.mirror.lock();
                if mirror.batches_applied == batches_seen && !removed.is_empty() {
                    for (idx, entry) in removed {
                        let idx = idx.min(mirror.entries.len());
                        mirror.entries.insert(idx, entry);
                    }
                    self.publish(&mirror);
                }
                warn!(count = ids.len(), error = %err, "Failed to remove all markers, restored entries");
                Err(err.into())
            }
        }
    }

    // ========================================================================
    // Reconciliation
    // ========================================================================

    /// Register a new subscription; batches from older ones are ignored from now on.
    pub fn begin_subscription(&self) -> Generation {
        let mut mirror = self.mirror.lock();
        mirror.next_generation += 1;
        let generation = Generation(mirror.next_generation);
        mirror.active_generation = Some(generation);
        generation
    }

    /// Retire `generation` if it is still the active one.
    pub fn end_subscription(&self, generation: Generation) {
        let mut mirror = self.mirror.lock();
        if mirror.active_generation == Some(generation) {
            mirror.active_generation = None;
        }
    }

    pub fn active_generation(&self) -> Option<Generation> {
        self.mirror.lock().active_generation
    }

    /// Replace the mirror with `batch` if it belongs to the active subscription.
    ///
    /// Returns whether the batch was applied.
    pub fn apply_batch(&self, generation: Generation, batch: ChangeBatch) -> bool {
        let mut mirror = self.mirror.lock();
        if mirror.active_generation != Some(generation) {
            debug!(
                generation = generation.as_u64(),
                "Ignoring batch from inactive subscription"
            );
            return false;
        }

        let dropped_pending = mirror.entries.iter().filter(|e| e.pending.is_some()).count();
        mirror.entries = batch
            .documents
            .into_iter()
            .map(|doc| Entry {
                pending: None,
                marker: Marker::from(doc),
            })
            .collect();
        mirror.batches_applied += 1;
        self.publish(&mirror);

        debug!(
            generation = generation.as_u64(),
            markers = mirror.entries.len(),
            dropped_pending,
            "Applied change batch"
        );
        true
    }
}

impl std::fmt::Debug for MarkerRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarkerRepository")
            .field("store", &self.store.name())
            .field("scope", &self.scope)
            .field("markers", &self.len())
            .finish()
    }
}

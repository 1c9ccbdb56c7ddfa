//! Remote Marker Store Abstraction
//!
//! [`MarkerStore`] is the contract the synchronization engine needs from a
//! remote document collection. Implementations are bound to one collection;
//! a [`QueryScope`] narrows listing and subscriptions within it.
//!
//! Subscriptions use snapshot semantics: every [`ChangeBatch`] carries the
//! full ordered result set, never a diff. Dropping the returned stream cancels
//! the subscription.
//!
//! # Example
//!
//! ```ignore
//! use questmap_core::store::{MarkerStore, QueryScope};
//! use futures::StreamExt;
//!
//! async fn example(store: &dyn MarkerStore) -> StoreResult<()> {
//!     let scope = QueryScope::all();
//!     let mut feed = store.subscribe(&scope).await?;
//!     while let Some(batch) = feed.next().await {
//!         println!("{} markers", batch?.len());
//!     }
//!     Ok(())
//! }
//! ```

mod error;
pub mod memory;

use std::fmt;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::marker::{MarkerDocument, MarkerId, MarkerPatch, NewMarker};

pub use error::{StoreError, StoreResult};
pub use memory::{InMemoryMarkerStore, StoreOp};

// ============================================================================
// Scopes
// ============================================================================

/// Which documents of the collection a query covers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "field", rename_all = "snake_case")]
pub enum ScopeFilter {
    /// Every document in the collection.
    All,
    /// Documents whose string field is present and non-empty.
    NonEmpty(String),
}

/// Query scope shared by listing, subscriptions and bulk deletion.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryScope {
    pub filter: ScopeFilter,
}

impl QueryScope {
    /// Every document, ordered by creation time.
    pub fn all() -> Self {
        Self {
            filter: ScopeFilter::All,
        }
    }

    /// Documents with a non-empty `field`.
    pub fn non_empty(field: impl Into<String>) -> Self {
        Self {
            filter: ScopeFilter::NonEmpty(field.into()),
        }
    }

    /// Evaluate the filter against a document.
    pub fn matches(&self, doc: &MarkerDocument) -> bool {
        match &self.filter {
            ScopeFilter::All => true,
            ScopeFilter::NonEmpty(field) => doc.field(field).is_some_and(|v| !v.is_empty()),
        }
    }

    /// Field a new document must carry to fall inside this scope.
    pub fn required_field(&self) -> Option<&str> {
        match &self.filter {
            ScopeFilter::All => None,
            ScopeFilter::NonEmpty(field) if field == "description" => None,
            ScopeFilter::NonEmpty(field) => Some(field),
        }
    }
}

impl Default for QueryScope {
    fn default() -> Self {
        Self::all()
    }
}

impl fmt::Display for QueryScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.filter {
            ScopeFilter::All => f.write_str("all"),
            ScopeFilter::NonEmpty(field) => write!(f, "{field} != \"\""),
        }
    }
}

// ============================================================================
// Change feed
// ============================================================================

/// Full ordered result set of a query at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeBatch {
    pub documents: Vec<MarkerDocument>,
}

impl ChangeBatch {
    pub fn new(documents: Vec<MarkerDocument>) -> Self {
        Self { documents }
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn contains(&self, id: &MarkerId) -> bool {
        self.documents.iter().any(|doc| &doc.id == id)
    }
}

/// Live feed returned by [`MarkerStore::subscribe`].
///
/// An `Err` item or the end of the stream means the subscription closed.
pub type ChangeStream = BoxStream<'static, StoreResult<ChangeBatch>>;

// ============================================================================
// Store contract
// ============================================================================

/// Remote collection of marker documents.
#[async_trait]
pub trait MarkerStore: Send + Sync {
    /// Persist a new document with a server-assigned creation time.
    ///
    /// The write only happened if this returns `Ok`.
    async fn create(&self, marker: NewMarker) -> StoreResult<MarkerId>;

    /// Apply a partial change to an existing document.
    ///
    /// Returns [`StoreError::NotFound`] if the document is gone.
    async fn update(&self, id: &MarkerId, patch: MarkerPatch) -> StoreResult<()>;

    /// Remove a document. Removing a missing document succeeds.
    async fn delete(&self, id: &MarkerId) -> StoreResult<()>;

    /// Remove every listed document in one transaction; all or nothing.
    async fn delete_many(&self, ids: &[MarkerId]) -> StoreResult<()>;

    /// One-shot ordered fetch of the scope's documents.
    async fn list(&self, scope: &QueryScope) -> StoreResult<Vec<MarkerDocument>>;

    /// Open a live feed; the first batch is delivered immediately.
    async fn subscribe(&self, scope: &QueryScope) -> StoreResult<ChangeStream>;

    /// Short backend name for logs.
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marker::Position;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn doc(description: Option<&str>, tags: &[(&str, &str)]) -> MarkerDocument {
        MarkerDocument {
            id: MarkerId::new("d"),
            position: Position { lat: 0.0, lng: 0.0 },
            description: description.map(str::to_string),
            created_at: Utc::now(),
            tags: tags
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    #[test]
    fn all_scope_matches_everything() {
        assert!(QueryScope::all().matches(&doc(None, &[])));
    }

    #[test]
    fn non_empty_scope_requires_value() {
        let scope = QueryScope::non_empty("quest");
        assert!(!scope.matches(&doc(Some("ring"), &[])));
        assert!(!scope.matches(&doc(None, &[("quest", "")])));
        assert!(scope.matches(&doc(None, &[("quest", "ring")])));
    }

    #[test]
    fn description_scope_needs_no_extra_field() {
        let scope = QueryScope::non_empty("description");
        assert_eq!(scope.required_field(), None);
        assert!(scope.matches(&doc(Some("ring"), &[])));
        assert_eq!(QueryScope::non_empty("quest").required_field(), Some("quest"));
    }

    #[test]
    fn scope_display() {
        assert_eq!(QueryScope::all().to_string(), "all");
        assert_eq!(QueryScope::non_empty("quest").to_string(), "quest != \"\"");
    }
}

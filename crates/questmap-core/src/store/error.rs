//! Remote store error types

use thiserror::Error;

use crate::marker::MarkerId;

/// Failures reported by a [`MarkerStore`](super::MarkerStore).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Transient network or service failure.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store refused the write (validation or permissions).
    #[error("write rejected: {0}")]
    WriteRejected(String),

    /// The target document no longer exists.
    #[error("marker not found: {0}")]
    NotFound(MarkerId),

    /// A live feed terminated unexpectedly.
    #[error("subscription closed: {0}")]
    SubscriptionClosed(String),
}

impl StoreError {
    /// Whether reissuing the same action later could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::SubscriptionClosed(_))
    }
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

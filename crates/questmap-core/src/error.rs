//! Error types for marker intents

use thiserror::Error;

use crate::marker::PositionError;
use crate::store::StoreError;

/// Why a marker intent failed.
///
/// The mirror is already back at its last known good state when one of these
/// is returned.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MarkerError {
    /// The remote store refused or could not process the call.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The intent carried coordinates outside the valid ranges.
    #[error("invalid position: {0}")]
    InvalidPosition(#[from] PositionError),
}

impl MarkerError {
    /// Whether reissuing the intent later could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Store(err) => err.is_transient(),
            Self::InvalidPosition(_) => false,
        }
    }
}

/// Result type for marker intents
pub type MarkerResult<T> = Result<T, MarkerError>;

//! # Questmap Core
//!
//! Marker synchronization engine: keeps an in-memory mirror of a remote marker
//! collection consistent with the store while the user places, drags and
//! deletes markers.
//!
//! ```text
//! ┌───────────────┐ intent ┌──────────────────┐ persist ┌───────────────┐
//! │ MapController │───────▶│ MarkerRepository │────────▶│  MarkerStore  │
//! └───────────────┘        └──────────────────┘         └───────────────┘
//!         ▲                   ▲          │ watch()              │
//!         │ render            │ batches  ▼                      │ subscribe
//!         └───────────────────┼──── snapshot           ┌───────────────┐
//!                             └────────────────────────│  SyncSession  │
//!                                                      └───────────────┘
//! ```
//!
//! Mutations are optimistic: the mirror changes first and is rolled back if
//! the store refuses the call. Change batches from the subscription always
//! replace the mirror wholesale.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use questmap_core::{InMemoryMarkerStore, MarkerRepository, Position, QueryScope, SyncSession};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(InMemoryMarkerStore::new());
//! let repository = Arc::new(MarkerRepository::new(store, QueryScope::all()));
//!
//! let mut session = SyncSession::new(Arc::clone(&repository));
//! session.activate().await?;
//!
//! let position = Position::new(49.8, 24.0)?;
//! repository
//!     .place_marker(position, Some("Find the lost ring".to_string()))
//!     .await?;
//!
//! session.deactivate().await;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod error;
pub mod marker;
pub mod presentation;
pub mod repository;
pub mod session;
pub mod store;

pub use error::{MarkerError, MarkerResult};
pub use marker::{
    Marker, MarkerDocument, MarkerId, MarkerPatch, NewMarker, Position, PositionError,
};
pub use presentation::{render_markers, MapController, MapEvent, MarkerView, Notice, NoticeLevel};
pub use repository::{Generation, MarkerRepository, MarkerSnapshot};
pub use session::{SessionOptions, SyncSession, SyncState};
pub use store::{
    ChangeBatch, ChangeStream, InMemoryMarkerStore, MarkerStore, QueryScope, ScopeFilter,
    StoreError, StoreOp, StoreResult,
};

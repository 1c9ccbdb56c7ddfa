//! # Questmap Firestore
//!
//! [`FirestoreStore`] implements [`questmap_core::MarkerStore`] against the
//! Cloud Firestore REST API (`v1`), authenticated with an API key and an
//! optional OAuth bearer token.
//!
//! ```rust,no_run
//! use questmap_firestore::{FirestoreSettings, FirestoreStore};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = FirestoreSettings::new("my-project", "AIza...").with_collection("markers");
//! let store = FirestoreStore::connect(settings)?;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]
#![deny(unsafe_code)]

mod store;
pub mod wire;

pub use store::{FirestoreSettings, FirestoreStore};

//! # Questmap Configuration
//!
//! Loads the store endpoint, credentials, query scope, session tuning and
//! logging level for a questmap process.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use questmap_config::{ConfigLoader, Preset};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConfigLoader::new()
//!         .with_path("questmap.toml")
//!         .with_preset(Preset::Markers)
//!         .load()?;
//!     println!("scope: {}", config.query_scope());
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]
#![deny(unsafe_code)]

mod config;
mod error;
mod loader;
mod preset;

pub use config::*;
pub use error::{ConfigError, ConfigResult};
pub use loader::*;
pub use preset::Preset;

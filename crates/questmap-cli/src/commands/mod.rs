//! Subcommand implementations.
//!
//! One-shot commands sync the mirror first, act through the repository, and
//! write their result to the given writer.

pub mod clear;
pub mod list;
pub mod place;
pub mod relocate;
pub mod remove;
pub mod repl;
pub mod watch;

use anyhow::{Context, Result};
use questmap_core::Position;

pub(crate) fn parse_position(lat: f64, lng: f64) -> Result<Position> {
    Position::new(lat, lng).context("Invalid position")
}

//! questmap CLI library
//!
//! A terminal presentation layer over `questmap-core`: one-shot commands for
//! scripting, a live `watch` view, and a REPL that plays the role of the map
//! screen.

pub mod app;
pub mod cli;
pub mod commands;
pub mod output;

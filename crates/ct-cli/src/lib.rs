//! Call tracker CLI library.
//!
//! This crate provides the `ct` command: signal replay through the
//! correlation engine plus inspection of its SQLite store.

mod cli;
pub mod commands;
mod config;

pub use cli::{CallLogAction, Cli, Commands, MarkerAction};
pub use config::Config;

//! Command-line argument definitions.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use ct_core::CallType;

/// Call event correlation.
///
/// Fuses line-state changes, number hints and the call-record store into a
/// single stream of call events.
#[derive(Debug, Parser)]
#[command(name = "ct", version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Feed a JSON-lines signal script through the engine and print the events.
    Replay {
        /// Script file; one `{"at_ms": .., "signal"|"call_log": ..}` per line.
        script: PathBuf,
    },

    /// Show the database, outgoing marker and call log size.
    Status,

    /// Inspect or edit the call-record store.
    #[command(subcommand)]
    CallLog(CallLogAction),

    /// Inspect or edit the outgoing marker.
    #[command(subcommand)]
    Marker(MarkerAction),
}

#[derive(Debug, Subcommand)]
pub enum CallLogAction {
    /// Insert a call record.
    Add {
        /// Remote number; omit for a private caller.
        #[arg(long)]
        number: Option<String>,

        /// Call type (incoming, outgoing, missed, voicemail, rejected,
        /// answered_externally, unknown).
        #[arg(long = "type")]
        call_type: CallType,

        /// Talk time in seconds.
        #[arg(long, default_value_t = 0)]
        duration: i64,

        /// Call start (RFC 3339). Defaults to now.
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },

    /// List the most recent call records.
    List {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Debug, Subcommand)]
pub enum MarkerAction {
    /// Record an outgoing call placement now.
    Set { number: String },

    /// Remove the outgoing marker.
    Clear,
}

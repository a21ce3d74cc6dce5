//! CLI subcommand implementations.

pub mod call_log;
pub mod marker;
pub mod replay;
pub mod status;

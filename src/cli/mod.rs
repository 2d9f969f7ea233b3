//! CLI subcommand implementations for the taxprobe binary.

pub mod doctor;
pub mod output;
pub mod run_cmd;
pub mod strategies_cmd;

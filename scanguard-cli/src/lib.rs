//! # scanguard-cli
//!
//! Operator command line for scanguard. Each invocation loads
//! `scanguard.toml`, restores the state snapshot from `general.data_dir`,
//! runs one command and writes the snapshot back.
//!
//! - [`cli`]: clap argument definitions
//! - [`commands`]: one handler per subcommand
//! - [`output`]: text / JSON rendering
//! - [`workspace`]: configuration plus restored state
//! - [`logging`]: tracing subscriber setup
//! - [`error`]: `CliError` and exit codes

pub mod cli;
pub mod commands;
pub mod error;
pub mod logging;
pub mod output;
pub mod workspace;

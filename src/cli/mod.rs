//! CLI module for tandem
//!
//! Provides command-line interface for:
//! - directory: run the liveness directory
//! - server: run a server node
//! - client: interactive client session

mod args;
mod commands;
mod errors;
mod io;

pub use args::{Cli, ClientArgs, Command, DirectoryArgs, ServerArgs};
pub use commands::{client, directory, run, run_command, server};
pub use errors::{CliError, CliErrorCode, CliResult};

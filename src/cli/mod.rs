//! CLI module for sgmlvault
//!
//! Provides command-line interface for:
//! - fetch: run the ingestion pipeline over a list of accessions
//! - decode: decode one local container
//! - pack / unpack: move submissions into and out of batch archives
//! - errors: show the error ledger

mod args;
mod commands;
mod errors;

pub use args::{Cli, Command};
pub use commands::{decode, errors, fetch, pack, parse_id_list, run, run_command, unpack};
pub use errors::{CliError, CliErrorCode, CliResult};

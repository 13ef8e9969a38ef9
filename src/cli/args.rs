//! CLI argument definitions using clap
//!
//! Commands:
//! - sgmlvault fetch --config <path> [--ids <file>] [--retry-failed] [--compressed]
//! - sgmlvault decode <container> --out <dir> [--accession <id>] [--lenient]
//! - sgmlvault pack --config <path>
//! - sgmlvault unpack --dir <dir> [--out <dir>] [--keep-archives]
//! - sgmlvault errors --dir <dir>

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// sgmlvault - bulk ingestion of legacy SGML filing containers
#[derive(Parser, Debug)]
#[command(name = "sgmlvault")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Download, decode and persist submissions
    Fetch {
        /// Path to configuration file
        #[arg(long, default_value = "./sgmlvault.json")]
        config: PathBuf,

        /// File with one accession per line, optionally followed by `zst`
        #[arg(long, required_unless_present = "retry_failed")]
        ids: Option<PathBuf>,

        /// Take accessions from the error ledger instead
        #[arg(long)]
        retry_failed: bool,

        /// Treat accessions without a marker as `.sgml.zst` sources
        #[arg(long)]
        compressed: bool,
    },

    /// Decode a local container file into a loose directory
    Decode {
        /// Raw container file
        container: PathBuf,

        /// Directory the submission directory is created in
        #[arg(long)]
        out: PathBuf,

        /// Accession to file under, if the header lacks one
        #[arg(long)]
        accession: Option<String>,

        /// Close unterminated structure instead of failing
        #[arg(long)]
        lenient: bool,
    },

    /// Move loose submission directories into batch archives
    Pack {
        /// Path to configuration file
        #[arg(long, default_value = "./sgmlvault.json")]
        config: PathBuf,
    },

    /// Restore every batch archive into loose directories
    Unpack {
        /// Directory holding the archives
        #[arg(long)]
        dir: PathBuf,

        /// Where to restore (defaults to --dir)
        #[arg(long)]
        out: Option<PathBuf>,

        /// Leave the archives in place after extraction
        #[arg(long)]
        keep_archives: bool,
    },

    /// Print the error ledger
    Errors {
        /// Output directory holding errors.json
        #[arg(long)]
        dir: PathBuf,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}

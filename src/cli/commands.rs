//! CLI command implementations
//!
//! Each command loads what it needs, does its work and prints a JSON
//! summary to stdout. Structured logs go to stdout/stderr alongside.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::json;

use crate::accession::Accession;
use crate::archive::{migrate_loose, ContainerReader};
use crate::config::IngestConfig;
use crate::observability::{log_event_with_fields, Event};
use crate::pipeline::{pending_requests, ErrorLedger, FetchRequest, ProcessingPipeline};
use crate::sgml::{decode_submission, DecodeOptions};
use crate::storage::{LooseStore, StoredSubmission};

use super::args::Command;
use super::errors::{CliError, CliResult};

/// Main entry point for CLI
pub fn run() -> CliResult<()> {
    let cli = super::args::Cli::parse_args();
    run_command(cli.command)
}

/// Run the appropriate command based on CLI args
pub fn run_command(cmd: Command) -> CliResult<()> {
    match cmd {
        Command::Fetch {
            config,
            ids,
            retry_failed,
            compressed,
        } => fetch(&config, ids.as_deref(), retry_failed, compressed),
        Command::Decode {
            container,
            out,
            accession,
            lenient,
        } => decode(&container, &out, accession.as_deref(), lenient).map(|_| ()),
        Command::Pack { config } => pack(&config),
        Command::Unpack {
            dir,
            out,
            keep_archives,
        } => unpack(&dir, out.as_deref(), keep_archives),
        Command::Errors { dir } => errors(&dir),
    }
}

fn load_config(path: &Path) -> CliResult<IngestConfig> {
    let config = IngestConfig::load(path)?;
    log_event_with_fields(
        Event::ConfigLoaded,
        &[
            ("output_dir", &config.output_dir.display().to_string()),
            ("path", &path.display().to_string()),
        ],
    );
    Ok(config)
}

/// Parse an ids file: one accession per line, optionally followed by a
/// `zst` marker. Blank lines and `#` comments are skipped.
pub fn parse_id_list(text: &str, default_compressed: bool) -> CliResult<Vec<FetchRequest>> {
    let mut requests = Vec::new();
    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let mut parts = line.split_whitespace();
        let Some(id) = parts.next() else { continue };
        let accession = Accession::parse(id)
            .map_err(|e| CliError::invalid_input(format!("line {}: {}", index + 1, e)))?;

        let compressed = match parts.next() {
            None => default_compressed,
            Some(marker) if marker.eq_ignore_ascii_case("zst") => true,
            Some(marker) if marker.eq_ignore_ascii_case("plain") => false,
            Some(marker) => {
                return Err(CliError::invalid_input(format!(
                    "line {}: unknown marker '{}'",
                    index + 1,
                    marker
                )))
            }
        };
        requests.push(FetchRequest::new(accession, compressed));
    }
    Ok(requests)
}

/// Run the ingestion pipeline
pub fn fetch(config_path: &Path, ids: Option<&Path>, retry_failed: bool, compressed: bool) -> CliResult<()> {
    let config = load_config(config_path)?;

    let mut requests = match ids {
        Some(path) => parse_id_list(&fs::read_to_string(path)?, compressed)?,
        None => Vec::new(),
    };
    if retry_failed {
        let ledger = ErrorLedger::in_dir(&config.output_dir)?;
        requests.extend(
            ledger
                .failed_accessions()
                .into_iter()
                .map(|accession| FetchRequest::new(accession, compressed)),
        );
    }

    let requests = pending_requests(requests, &config.output_dir)?;

    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| CliError::run_failed(format!("Failed to create tokio runtime: {}", e)))?;
    let pipeline = ProcessingPipeline::new(config)?;
    let summary = rt.block_on(pipeline.run(requests))?;

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

/// Decode one local container into `{out}/{accession}/`
pub fn decode(container: &Path, out: &Path, accession: Option<&str>, lenient: bool) -> CliResult<PathBuf> {
    let accession = accession
        .map(Accession::parse)
        .transpose()
        .map_err(|e| CliError::invalid_input(e.to_string()))?;
    let bytes = fs::read(container)?;

    let submission = decode_submission(&bytes, accession, DecodeOptions { lenient })
        .map_err(|e| CliError::decode_failed(format!("{}: {}", container.display(), e)))?;
    let documents = submission.documents.len();

    let path = LooseStore::new(out).save(&StoredSubmission::from_submission(submission))?;
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "path": path.display().to_string(),
            "documents": documents,
        }))?
    );
    Ok(path)
}

/// Pack loose directories under `output_dir` into archives
pub fn pack(config_path: &Path) -> CliResult<()> {
    let config = load_config(config_path)?;
    let summary = migrate_loose(&config.output_dir, &config.archive)?;

    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "migrated": summary.migrated,
            "skipped": summary.skipped,
            "archives": summary
                .archives
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>(),
        }))?
    );
    Ok(())
}

/// Restore archives into loose directories
pub fn unpack(dir: &Path, out: Option<&Path>, keep_archives: bool) -> CliResult<()> {
    let summary = ContainerReader::new(dir).extract_all(out.unwrap_or(dir), !keep_archives)?;

    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "archives": summary.archives,
            "submissions": summary.submissions,
            "documents": summary.documents,
            "archives_removed": summary.archives_removed,
        }))?
    );
    Ok(())
}

/// Print the error ledger
pub fn errors(dir: &Path) -> CliResult<()> {
    let ledger = ErrorLedger::in_dir(dir)?;
    println!("{}", serde_json::to_string_pretty(&ledger.entries())?);
    Ok(())
}

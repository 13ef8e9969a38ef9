//! sgmlvault - bulk ingestion of legacy SGML filing containers
//!
//! Downloads submissions from a rate-limited source, decodes the legacy
//! container format, and persists each submission either as a loose
//! directory or inside size-bounded tar archives with byte-offset indexes.

pub mod accession;
pub mod archive;
pub mod cli;
pub mod codec;
pub mod config;
pub mod fetch;
pub mod observability;
pub mod pipeline;
pub mod ratelimit;
pub mod sgml;
pub mod storage;

//! Observability for the ingestion core
//!
//! - Structured logging (JSON lines)
//! - Run counters and the end-of-run summary
//! - Typed lifecycle events
//!
//! # Usage
//!
//! ```ignore
//! use sgmlvault::observability::{log_event_with_fields, Event, MetricsRegistry};
//!
//! log_event_with_fields(Event::FetchComplete, &[("accession", "000095012309012345")]);
//!
//! let metrics = MetricsRegistry::new();
//! metrics.increment_fetched();
//! ```

mod events;
mod logger;
mod metrics;

pub use events::Event;
pub use logger::{Logger, Severity};
pub use metrics::{MetricsRegistry, MetricsSnapshot, RunSummary};

fn severity_for(event: Event) -> Severity {
    if event.is_fatal() {
        Severity::Fatal
    } else if event.is_item_failure() {
        Severity::Warn
    } else {
        Severity::Info
    }
}

/// Log a lifecycle event with fields
pub fn log_event_with_fields(event: Event, fields: &[(&str, &str)]) {
    Logger::log(severity_for(event), event.as_str(), fields);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_for_events() {
        assert_eq!(severity_for(Event::RunStart), Severity::Info);
        assert_eq!(severity_for(Event::DecodeFailed), Severity::Warn);
        assert_eq!(severity_for(Event::ArchiveWriteFailed), Severity::Fatal);
    }

    #[test]
    fn test_log_event_with_fields() {
        log_event_with_fields(Event::RunStart, &[]);
        log_event_with_fields(Event::ConfigLoaded, &[("output_dir", "/tmp/test")]);
    }
}

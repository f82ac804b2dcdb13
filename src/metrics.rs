//! Prometheus metrics for bucketsync.
//!
//! Metric name constants, description registration, and an end-of-run
//! textfile dump. A mirror is a batch job that exits when it is done, so
//! there is no scrape endpoint: when `observability.metrics_textfile` is
//! set the exposition text is written to disk for a textfile collector.

use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::path::Path;
use std::sync::OnceLock;

// -- Metric name constants ----------------------------------------------------

/// Listing pages fetched (counter).
pub const PAGES_FETCHED_TOTAL: &str = "bucketsync_pages_fetched_total";

/// Objects written to the store (counter). Labels: outcome.
pub const OBJECTS_UPSERTED_TOTAL: &str = "bucketsync_objects_upserted_total";

/// Failed units of work (counter). Labels: kind, action.
pub const ERRORS_TOTAL: &str = "bucketsync_errors_total";

/// Retried operations (counter).
pub const RETRIES_TOTAL: &str = "bucketsync_retries_total";

/// Tasks enqueued but not yet finished (gauge).
pub const TASKS_IN_FLIGHT: &str = "bucketsync_tasks_in_flight";

// -- Global recorder installation ---------------------------------------------

/// Singleton handle to the Prometheus recorder.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global Prometheus metrics recorder. Idempotent -- safe to call
/// multiple times (e.g. in tests). Returns a reference to the global handle.
pub fn init_metrics() -> &'static PrometheusHandle {
    PROMETHEUS_HANDLE.get_or_init(|| {
        PrometheusBuilder::new()
            .install_recorder()
            .expect("failed to install Prometheus recorder")
    })
}

/// Register metric descriptions with the global recorder. Call once after
/// `init_metrics()`.
pub fn describe_metrics() {
    describe_counter!(PAGES_FETCHED_TOTAL, "Listing pages fetched");
    describe_counter!(OBJECTS_UPSERTED_TOTAL, "Objects upserted by outcome");
    describe_counter!(ERRORS_TOTAL, "Failed units of work by kind and action");
    describe_counter!(RETRIES_TOTAL, "Retried operations");
    describe_gauge!(TASKS_IN_FLIGHT, "Tasks enqueued but not yet finished");
}

/// Render the current metrics and write them to `path`.
///
/// Writes to a sibling temp file first and renames it into place so a
/// collector never reads a half-written file.
pub fn write_textfile<P: AsRef<Path>>(path: P) -> std::io::Result<()> {
    let path = path.as_ref();
    let body = match PROMETHEUS_HANDLE.get() {
        Some(handle) => handle.render(),
        None => String::new(),
    };
    let tmp = path.with_extension("prom.tmp");
    std::fs::write(&tmp, body)?;
    std::fs::rename(&tmp, path)
}

// -- Tests --------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names_share_prefix() {
        for name in [
            PAGES_FETCHED_TOTAL,
            OBJECTS_UPSERTED_TOTAL,
            ERRORS_TOTAL,
            RETRIES_TOTAL,
            TASKS_IN_FLIGHT,
        ] {
            assert!(name.starts_with("bucketsync_"), "{name}");
        }
    }

    #[test]
    fn test_write_textfile_renders_counters() {
        init_metrics();
        describe_metrics();
        metrics::counter!(PAGES_FETCHED_TOTAL).increment(2);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bucketsync.prom");
        write_textfile(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains(PAGES_FETCHED_TOTAL));
        assert!(!dir.path().join("bucketsync.prom.tmp").exists());
    }
}

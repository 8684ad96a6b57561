//! Tracing setup shared by the HTTP server and the ingestion worker.
//!
//! Events go to stdout through a compact formatter. Setting `VECTOR_RECORDS_LOG_FILE` adds a
//! second, ANSI-free layer appending to that path through a non-blocking writer.
use std::sync::OnceLock;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Environment variable naming the optional log file.
pub const LOG_FILE_ENV: &str = "VECTOR_RECORDS_LOG_FILE";

// sqlx logs every statement at info.
const DEFAULT_DIRECTIVES: &str = "info,sqlx=warn";

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Install the global subscriber for `component` (the binary name, recorded on startup).
///
/// Respects `RUST_LOG`; without it, `info` with sqlx statement logging silenced.
pub fn init_tracing(component: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES));
    let file_layer = open_log_file().map(|writer| {
        fmt::layer()
            .with_writer(writer)
            .with_target(true)
            .with_ansi(false)
            .compact()
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(false).compact())
        .with(file_layer)
        .init();

    tracing::info!(component, version = env!("CARGO_PKG_VERSION"), "Tracing initialized");
}

fn open_log_file() -> Option<NonBlocking> {
    let path = std::env::var(LOG_FILE_ENV).ok()?;
    let file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
    {
        Ok(file) => file,
        Err(err) => {
            // The subscriber is not installed yet.
            eprintln!("Failed to open log file {path}: {err}");
            return None;
        }
    };
    let (writer, guard) = tracing_appender::non_blocking(file);
    let _ = LOG_GUARD.set(guard);
    Some(writer)
}

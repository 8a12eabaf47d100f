//! Tracing configuration and log routing.
//!
//! Logs go to stderr with a compact formatter so stdout stays free for
//! command output. Setting `RAGLINE_LOG_FILE` redirects the stream to that
//! file through a non-blocking writer held alive for the process lifetime.

use std::sync::OnceLock;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Environment variable redirecting log output to a file.
pub const LOG_FILE_VAR: &str = "RAGLINE_LOG_FILE";

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Configure the tracing subscriber for the server and the CLI binaries.
///
/// Respects `RUST_LOG` for filtering and defaults to `info`.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(env_filter);

    match file_writer() {
        Some(writer) => {
            let file_layer = fmt::layer().with_writer(writer).with_ansi(false).compact();
            registry.with(file_layer).init();
        }
        None => {
            let stderr_layer = fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .compact();
            registry.with(stderr_layer).init();
        }
    }
}

/// Open the file named by `RAGLINE_LOG_FILE`, when set, for appending.
fn file_writer() -> Option<NonBlocking> {
    let path = std::env::var(LOG_FILE_VAR).ok()?;
    match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
    {
        Ok(file) => {
            let (non_blocking, guard) = tracing_appender::non_blocking(file);
            let _ = LOG_GUARD.set(guard);
            Some(non_blocking)
        }
        Err(err) => {
            eprintln!("Failed to open log file {path}: {err}");
            None
        }
    }
}

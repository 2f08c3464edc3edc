//! # Logging Initialization
//!
//! One place to install the process-wide `tracing` subscriber.
//!
//! Standard output belongs to the supervised command (and to configuration
//! error messages), so diagnostics never go there:
//!
//! 1.  **Environment Filter (`EnvFilter`)**: `RUST_LOG` wins when set; otherwise the
//!     requested level applies to everything, with `debug` for `pathjail` itself.
//!
//! 2.  **File Logging (Default)**: a daily rolling file in the user cache directory
//!     (resolved with `directories`), written through a non-blocking
//!     `tracing_appender` worker with ANSI colours disabled.
//!
//! 3.  **Stderr Logging (Opt-in / Fallback)**: selected with `log_to_file = false`,
//!     or used automatically when the cache directory is not writable.

use anyhow::Result;
use directories::ProjectDirs;
use std::{io::stderr, path::Path, sync::Once};
use tracing_subscriber::{EnvFilter, fmt::layer, prelude::*};

static INIT: Once = Once::new();

/// Initialize verbose logging for tests.
pub fn init_test_logging() {
    let _ = init_logging("trace", false);
}

/// Initializes the logging system.
///
/// Safe to call more than once; only the first call installs a subscriber.
pub fn init_logging(log_level: &str, log_to_file: bool) -> Result<()> {
    INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("{log_level},pathjail=debug")));

        if log_to_file && let Some(proj_dirs) = ProjectDirs::from("com", "pathjail", "pathjail") {
            let log_dir = proj_dirs.cache_dir();

            // tracing_appender::rolling::daily panics on permission errors, so
            // probe the directory first and fall back to stderr.
            if test_write_permission(log_dir) {
                let file_appender_result =
                    std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                        tracing_appender::rolling::daily(log_dir, "pathjail.log")
                    }));

                if let Ok(file_appender) = file_appender_result {
                    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

                    tracing_subscriber::registry()
                        .with(env_filter)
                        .with(layer().with_writer(non_blocking).with_ansi(false))
                        .init();
                    // Leaked so buffered lines are flushed at exit.
                    Box::leak(Box::new(guard));
                    return;
                }
            }
        }

        tracing_subscriber::registry()
            .with(env_filter)
            .with(layer().with_writer(stderr).with_ansi(true))
            .init();
    });

    Ok(())
}

/// Creates `dir` if needed and checks that a file can be written into it.
fn test_write_permission(dir: &Path) -> bool {
    if std::fs::create_dir_all(dir).is_err() {
        return false;
    }

    let test_file = dir.join(".pathjail_log_test");
    match std::fs::write(&test_file, "test") {
        Ok(()) => {
            let _ = std::fs::remove_file(&test_file);
            true
        }
        Err(_) => false,
    }
}

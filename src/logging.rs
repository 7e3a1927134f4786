//! Tracing initialization.
//!
//! The terminal belongs to the live status display, so events go to a log
//! file instead of stderr.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Install a file-backed subscriber filtered by `RUST_LOG` (default `info`).
///
/// A subscriber that is already installed is left in place.
pub fn init(path: &Path) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("error creating log directory {}", dir.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("error opening log file {}", path.display()))?;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_ansi(false)
        .with_writer(Mutex::new(file));

    // Tests may initialize tracing multiple times.
    let _ = tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .try_init();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_log_file_and_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("headway-build.log");
        init(&path).unwrap();
        assert!(path.exists());
        // A second call keeps the first subscriber.
        init(&path).unwrap();
    }
}

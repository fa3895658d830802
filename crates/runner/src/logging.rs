#![forbid(unsafe_code)]

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

const LOG_FILTER_ENV: &str = "BW_LOG";
const LOG_FILE_ENV: &str = "BW_LOG_FILE";

fn open_log_file(path: &Path) -> Option<Mutex<File>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).ok()?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .ok()
        .map(Mutex::new)
}

fn make_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_FILTER_ENV).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Installs the global fmt subscriber. `BW_LOG` is an `EnvFilter` directive
/// (default `info`); `BW_LOG_FILE` redirects output to an append-only file.
/// A second call is a no-op.
pub fn init_tracing() {
    let file_writer = std::env::var(LOG_FILE_ENV)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .and_then(|path| open_log_file(Path::new(path.trim())));

    match file_writer {
        Some(writer) => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(make_filter())
                .with_target(true)
                .with_ansi(false)
                .with_writer(writer)
                .try_init();
        }
        None => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(make_filter())
                .with_target(true)
                .with_writer(std::io::stderr)
                .try_init();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_file_is_created_with_missing_parents() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("logs").join("engine.log");
        assert!(open_log_file(&path).is_some());
        assert!(path.exists());
    }

    #[test]
    fn repeated_init_is_harmless() {
        init_tracing();
        init_tracing();
        tracing::info!("subscriber installed");
    }
}

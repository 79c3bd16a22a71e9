use crate::events::{DEFAULT_BUFFER_SIZE, DEFAULT_MAX_CLIENTS, DEFAULT_SUBSCRIBER_CAPACITY};
use crate::sessions::{SessionOptions, TailerConfig};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_POLL_INTERVAL_MS: u64 = 100;
const DEFAULT_DISCOVER_INTERVAL_SECS: u64 = 5;

/// Optional TOML file named by `PROGRESS_CONFIG`. Environment variables win.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    watch_dirs: Option<Vec<PathBuf>>,
    buffer_size: Option<usize>,
    max_clients: Option<usize>,
    subscriber_capacity: Option<usize>,
    poll_interval_ms: Option<u64>,
    discover_interval_secs: Option<u64>,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub watch_dirs: Vec<PathBuf>,
    pub buffer_size: usize,
    pub max_clients: usize,
    pub subscriber_capacity: usize,
    pub poll_interval: Duration,
    pub discover_interval: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let file = lookup("PROGRESS_CONFIG")
            .map(|path| load_file(Path::new(&path)))
            .unwrap_or_default();

        let watch_dirs = lookup("PROGRESS_WATCH_DIRS")
            .map(|raw| split_dirs(&raw))
            .filter(|dirs| !dirs.is_empty())
            .or(file.watch_dirs)
            .unwrap_or_else(|| vec![PathBuf::from(".")]);

        Self {
            watch_dirs,
            buffer_size: positive(
                &lookup,
                "PROGRESS_BUFFER_SIZE",
                file.buffer_size.unwrap_or(DEFAULT_BUFFER_SIZE),
            ),
            max_clients: positive(
                &lookup,
                "PROGRESS_MAX_CLIENTS",
                file.max_clients.unwrap_or(DEFAULT_MAX_CLIENTS),
            ),
            subscriber_capacity: positive(
                &lookup,
                "PROGRESS_SUBSCRIBER_CAPACITY",
                file.subscriber_capacity.unwrap_or(DEFAULT_SUBSCRIBER_CAPACITY),
            ),
            poll_interval: Duration::from_millis(positive(
                &lookup,
                "PROGRESS_POLL_INTERVAL_MS",
                file.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS),
            )),
            discover_interval: Duration::from_secs(positive(
                &lookup,
                "PROGRESS_DISCOVER_INTERVAL_SECS",
                file.discover_interval_secs.unwrap_or(DEFAULT_DISCOVER_INTERVAL_SECS),
            )),
        }
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            buffer_size: self.buffer_size,
            max_clients: self.max_clients,
            subscriber_capacity: self.subscriber_capacity,
            tailer: TailerConfig {
                poll_interval: self.poll_interval,
                ..TailerConfig::default()
            },
        }
    }
}

fn load_file(path: &Path) -> FileConfig {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            log::warn!("[CONFIG] Cannot read {}: {}", path.display(), e);
            return FileConfig::default();
        }
    };
    toml::from_str(&content).unwrap_or_else(|e| {
        log::warn!("[CONFIG] Invalid config file {}: {}", path.display(), e);
        FileConfig::default()
    })
}

fn split_dirs(raw: &str) -> Vec<PathBuf> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .collect()
}

/// Parse a positive number, keeping `fallback` when unset or invalid.
fn positive<T, F>(lookup: &F, key: &str, fallback: T) -> T
where
    T: FromStr + PartialOrd + Default,
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return fallback;
    };
    match raw.trim().parse::<T>() {
        Ok(value) if value > T::default() => value,
        _ => {
            log::warn!("[CONFIG] Invalid {}={:?}, using default", key, raw);
            fallback
        }
    }
}

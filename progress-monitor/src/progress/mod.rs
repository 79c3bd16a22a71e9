//! Progress log file format: parsing, liveness, resumable scan and writing.

pub mod lock;
pub mod logger;
pub mod parser;
pub mod protocol;
pub mod resumable;

pub use lock::{ProgressLock, is_active, is_locked_by_current_process};
pub use logger::{Logger, ProgressLogConfig, ProgressLogger};
pub use parser::{LineParser, parse_progress_header};
pub use resumable::{ScanResult, check_resumable, find_resumable_sessions, scan_progress_file};

use crate::error::ProgressError;
use protocol::{PROGRESS_FILE_EXTENSION, PROGRESS_FILE_PREFIX};
use std::path::{Path, PathBuf};

/// Progress files in `dir` whose session id starts with `id_prefix`.
pub(crate) fn list_progress_files(dir: &Path, id_prefix: &str) -> Result<Vec<PathBuf>, ProgressError> {
    let pattern = format!(
        "{}/{}{}*{}",
        glob::Pattern::escape(&dir.to_string_lossy()),
        PROGRESS_FILE_PREFIX,
        id_prefix,
        PROGRESS_FILE_EXTENSION
    );

    let mut paths: Vec<PathBuf> = glob::glob(&pattern)?.filter_map(Result::ok).collect();
    paths.sort();
    Ok(paths)
}

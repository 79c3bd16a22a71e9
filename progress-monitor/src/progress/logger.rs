//! Structured log sink used by the executor, and its file-backed writer.

use super::lock::ProgressLock;
use super::protocol::{
    COMPLETED_PREFIX, HEADER_BANNER, HEADER_BRANCH, HEADER_MODE, HEADER_PLAN, HEADER_STARTED,
    HEADER_TIME_FORMAT, LINE_TIME_FORMAT, QUESTION_END, QUESTION_START, SEPARATOR_LINE, signal_marker,
};
use crate::error::ProgressError;
use chrono::{DateTime, Utc};
use progress_types::Phase;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Log operations the executor performs while running a plan.
pub trait Logger: Send {
    /// Set the phase subsequent output belongs to
    fn set_phase(&mut self, phase: Phase);
    /// Timestamped line
    fn print(&mut self, text: &str);
    /// Line without timestamp
    fn print_raw(&mut self, text: &str);
    /// `--- name ---` section header
    fn print_section(&mut self, name: &str);
    /// Multi-line text, each line timestamped
    fn print_aligned(&mut self, text: &str);
    fn path(&self) -> &Path;
}

#[derive(Debug, Clone, Default)]
pub struct ProgressLogConfig {
    pub path: PathBuf,
    /// Plan file path, or the plan description in plan mode
    pub plan_description: String,
    pub branch: String,
    pub mode: String,
    /// Continue an existing log instead of starting a new one
    pub append: bool,
}

/// Writes a progress log and holds its advisory lock while alive.
pub struct ProgressLogger {
    file: File,
    path: PathBuf,
    phase: Phase,
    started: Instant,
    _lock: ProgressLock,
}

impl ProgressLogger {
    pub fn create(config: ProgressLogConfig) -> Result<Self, ProgressError> {
        let path = config.path;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| ProgressError::io("create progress file", &path, e))?;

        // lock before touching content so a live writer's log is never clobbered
        let lock = ProgressLock::acquire(&path)?;

        if !config.append {
            file.set_len(0)
                .map_err(|e| ProgressError::io("truncate progress file", &path, e))?;
        }
        let len = file
            .metadata()
            .map_err(|e| ProgressError::io("stat progress file", &path, e))?
            .len();

        let mut logger = Self {
            file,
            path,
            phase: Phase::default(),
            started: Instant::now(),
            _lock: lock,
        };

        if len == 0 {
            let header = format!(
                "{}\n{}: {}\n{}: {}\n{}: {}\n{}: {}\n{}\n\n",
                HEADER_BANNER,
                HEADER_PLAN,
                config.plan_description,
                HEADER_BRANCH,
                config.branch,
                HEADER_MODE,
                config.mode,
                HEADER_STARTED,
                Utc::now().format(HEADER_TIME_FORMAT),
                SEPARATOR_LINE,
            );
            logger
                .file
                .write_all(header.as_bytes())
                .map_err(|e| ProgressError::io("write progress header", &logger.path, e))?;
        }

        log::info!("[PROGRESS] Writing progress log {}", logger.path.display());
        Ok(logger)
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Record a structured question as an inline block.
    pub fn log_question(&mut self, question: &str, options: &[String]) {
        let payload = serde_json::json!({ "question": question, "options": options });
        self.print(&format!("{}{}{}", QUESTION_START, payload, QUESTION_END));
    }

    pub fn log_answer(&mut self, answer: &str) {
        self.print(&format!("ANSWER: {}", answer));
    }

    pub fn log_signal(&mut self, signal: &str) {
        self.print(&signal_marker(signal));
    }

    /// Write the completion footer and release the lock.
    pub fn finish(mut self) -> Result<(), ProgressError> {
        let footer = format!(
            "{}\n{} {} ({})\n",
            SEPARATOR_LINE,
            COMPLETED_PREFIX,
            Utc::now().format(HEADER_TIME_FORMAT),
            format_elapsed(self.started.elapsed())
        );
        self.file
            .write_all(footer.as_bytes())
            .and_then(|_| self.file.flush())
            .map_err(|e| ProgressError::io("write progress footer", &self.path, e))?;
        log::info!("[PROGRESS] Finished {}", self.path.display());
        Ok(())
    }

    fn write_line(&mut self, line: &str) {
        if let Err(e) = writeln!(self.file, "{}", line) {
            log::warn!("[PROGRESS] Failed to write {}: {}", self.path.display(), e);
        }
    }
}

impl Logger for ProgressLogger {
    fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
    }

    fn print(&mut self, text: &str) {
        let line = format!("{}{}", timestamp_prefix(Utc::now()), text);
        self.write_line(&line);
    }

    fn print_raw(&mut self, text: &str) {
        self.write_line(text);
    }

    fn print_section(&mut self, name: &str) {
        self.write_line(&format!("\n--- {} ---", name));
    }

    fn print_aligned(&mut self, text: &str) {
        let prefix = timestamp_prefix(Utc::now());
        for line in text.trim_end().lines() {
            self.write_line(&format!("{}{}", prefix, line));
        }
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

fn timestamp_prefix(now: DateTime<Utc>) -> String {
    format!("[{}] ", now.format(LINE_TIME_FORMAT))
}

/// `1h 2m 3s`, `5m 0s`, `42s`
fn format_elapsed(elapsed: std::time::Duration) -> String {
    let secs = elapsed.as_secs();
    let (hours, minutes, seconds) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failures of the subscriber hub.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HubError {
    #[error("maximum number of clients ({max}) reached")]
    MaxClientsExceeded { max: usize },
}

/// Failures of the question/answer bridge.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QuestionError {
    #[error("no options provided")]
    NoOptions,
    #[error("a question is already pending")]
    AlreadyPending,
    #[error("no pending question")]
    NoPendingQuestion,
    #[error("question ID mismatch: pending {expected}, got {got}")]
    IdMismatch { expected: String, got: String },
    #[error("invalid answer {0:?}: not in options list")]
    InvalidAnswer(String),
    #[error("question canceled")]
    Cancelled,
}

/// Failures reading, probing or writing progress files.
#[derive(Debug, Error)]
pub enum ProgressError {
    #[error("{op} {}: {source}", .path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("not a file: {}", .0.display())]
    NotAFile(PathBuf),
    #[error("progress file already locked: {}", .0.display())]
    Locked(PathBuf),
    #[error("invalid progress file pattern: {0}")]
    Pattern(#[from] glob::PatternError),
    #[error("not a directory: {}", .0.display())]
    NotADirectory(PathBuf),
    #[error("not a progress file name: {}", .0.display())]
    InvalidName(PathBuf),
    #[error("session already active: {}", .0.display())]
    AlreadyActive(PathBuf),
    #[error("not a plan mode session: {0:?}")]
    NotPlanMode(String),
    #[error("session not found: {0}")]
    SessionNotFound(String),
}

impl ProgressError {
    pub(crate) fn io(op: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            op,
            path: path.into(),
            source,
        }
    }
}

/// Failures starting a file tailer.
#[derive(Debug, Error)]
pub enum TailerError {
    #[error("{op} {}: {source}", .path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("tailing requires a running tokio runtime")]
    NoRuntime,
}

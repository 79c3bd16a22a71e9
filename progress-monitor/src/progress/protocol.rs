//! Tokens and layout constants of the progress log format.

/// Opening of every protocol marker, e.g. `<<<PROTOCOL:REVIEW_DONE>>>`
pub const MARKER_PREFIX: &str = "<<<PROTOCOL:";
pub const MARKER_SUFFIX: &str = ">>>";

/// Structured question block delimiters. The payload between them is a JSON
/// object `{"question": "...", "options": ["..."]}`, inline or spread over
/// several lines.
pub const QUESTION_START: &str = "<<<PROTOCOL:QUESTION>>>";
pub const QUESTION_END: &str = "<<<PROTOCOL:END>>>";

pub const SIGNAL_COMPLETED: &str = "COMPLETED";
pub const SIGNAL_FAILED: &str = "FAILED";
pub const SIGNAL_REVIEW_DONE: &str = "REVIEW_DONE";
pub const SIGNAL_CODEX_DONE: &str = "CODEX_DONE";
pub const SIGNAL_ALL_TASKS_DONE: &str = "ALL_TASKS_DONE";
/// Plan creation finished; a log containing it is never resumable
pub const SIGNAL_PLAN_READY: &str = "PLAN_READY";

pub const HEADER_BANNER: &str = "# Progress Log";
/// Terminates the header and precedes the completion footer
pub const SEPARATOR_LINE: &str = "------------------------------------------------------------";
pub const COMPLETED_PREFIX: &str = "Completed:";

pub const HEADER_PLAN: &str = "Plan";
pub const HEADER_BRANCH: &str = "Branch";
pub const HEADER_MODE: &str = "Mode";
pub const HEADER_STARTED: &str = "Started";

/// `Started:` header value and `Completed:` footer
pub const HEADER_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
/// Bracketed prefix on body lines, `[26-01-22 10:30:05]`
pub const LINE_TIME_FORMAT: &str = "%y-%m-%d %H:%M:%S";

/// Discoverable progress files are named `progress-<id>.txt`
pub const PROGRESS_FILE_PREFIX: &str = "progress-";
pub const PROGRESS_FILE_EXTENSION: &str = ".txt";
/// Plan-creation sessions carry this infix: `progress-plan-<slug>.txt`
pub const PLAN_SESSION_INFIX: &str = "plan-";

pub const PLAN_MODE: &str = "plan";

/// Build the marker line for a signal token.
pub fn signal_marker(signal: &str) -> String {
    format!("{}{}{}", MARKER_PREFIX, signal, MARKER_SUFFIX)
}

//! Parsing of progress log headers and body lines.
//!
//! The format is written by a long-running process and read while it is
//! still being appended to, so every function here is forgiving: missing
//! header fields become empty values and malformed question blocks are
//! ignored rather than reported.

use super::protocol::{
    HEADER_BRANCH, HEADER_MODE, HEADER_PLAN, HEADER_STARTED, HEADER_TIME_FORMAT, LINE_TIME_FORMAT,
    QUESTION_END, QUESTION_START,
};
use crate::error::ProgressError;
use chrono::{DateTime, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use progress_types::{Event, Phase, SessionMetadata};
use regex::Regex;
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

static TIMESTAMP_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\[(\d{2}-\d{2}-\d{2} \d{2}:\d{2}:\d{2})\] ?").expect("valid regex"));

static SECTION_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^--- (.+?) ---\s*$").expect("valid regex"));

static SIGNAL_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<<<PROTOCOL:([A-Z][A-Z0-9_]*)>>>").expect("valid regex"));

// =====================================================
// Header
// =====================================================

/// Read the header of a progress file.
pub fn parse_progress_header(path: &Path) -> Result<SessionMetadata, ProgressError> {
    let file = File::open(path).map_err(|e| ProgressError::io("open progress file", path, e))?;
    parse_header(BufReader::new(file)).map_err(|e| ProgressError::io("read progress header", path, e))
}

/// Parse `Key: value` header lines up to the dashed separator.
pub fn parse_header<R: BufRead>(mut reader: R) -> std::io::Result<SessionMetadata> {
    let mut meta = SessionMetadata::default();
    let mut buf = Vec::new();

    while let Some(line) = read_lossy_line(&mut reader, &mut buf)? {
        let text = line.as_str();
        if is_separator(text) {
            break;
        }

        let Some((key, value)) = text.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key {
            HEADER_PLAN => meta.plan_path = value.to_string(),
            HEADER_BRANCH => meta.branch = value.to_string(),
            HEADER_MODE => meta.mode = value.to_string(),
            HEADER_STARTED => meta.start_time = parse_header_time(value),
            _ => {}
        }
    }

    Ok(meta)
}

/// Next line without its line ending. Invalid UTF-8 is replaced, not an error.
pub(crate) fn read_lossy_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<Option<String>> {
    buf.clear();
    if reader.read_until(b'\n', buf)? == 0 {
        return Ok(None);
    }
    let text = String::from_utf8_lossy(buf);
    Ok(Some(text.trim_end_matches(['\r', '\n']).to_string()))
}

fn parse_header_time(value: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value, HEADER_TIME_FORMAT)
        .ok()
        .map(|t| t.and_utc())
}

fn is_header_field(line: &str) -> bool {
    [HEADER_PLAN, HEADER_BRANCH, HEADER_MODE, HEADER_STARTED]
        .into_iter()
        .any(|key| line.strip_prefix(key).is_some_and(|rest| rest.starts_with(':')))
}

/// A line made only of dashes (header terminator / footer separator).
pub fn is_separator(line: &str) -> bool {
    let line = line.trim();
    line.len() >= 3 && line.bytes().all(|b| b == b'-')
}

// =====================================================
// Body lines
// =====================================================

/// Split a `[YY-MM-DD HH:MM:SS] ` prefix off a body line.
pub fn strip_timestamp_prefix(line: &str) -> (Option<DateTime<Utc>>, &str) {
    match TIMESTAMP_PREFIX.captures(line) {
        Some(caps) => {
            let timestamp = NaiveDateTime::parse_from_str(&caps[1], LINE_TIME_FORMAT)
                .ok()
                .map(|t| t.and_utc());
            (timestamp, &line[caps[0].len()..])
        }
        None => (None, line),
    }
}

/// Name of a `--- name ---` section delimiter.
pub fn section_name(line: &str) -> Option<&str> {
    SECTION_LINE
        .captures(line)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
        .filter(|name| !name.is_empty())
}

/// First signal token on the line, excluding question block delimiters.
pub fn signal_name(line: &str) -> Option<&str> {
    SIGNAL_MARKER
        .captures_iter(line)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str())
        .find(|name| *name != "QUESTION" && *name != "END")
}

/// Phase implied by a section heading, if any.
pub fn phase_for_section(name: &str) -> Option<Phase> {
    let name = name.to_lowercase();
    if name.contains("codex") {
        Some(Phase::Codex)
    } else if name.contains("review") {
        Some(Phase::Review)
    } else if name.contains("plan") {
        Some(Phase::Plan)
    } else if name.contains("task") {
        Some(Phase::Task)
    } else {
        None
    }
}

#[derive(Deserialize)]
struct QuestionPayload {
    #[serde(default)]
    question: String,
    #[serde(default)]
    options: Vec<String>,
}

/// Decode the JSON payload of a structured question block.
///
/// Returns `None` for empty, malformed, or question-less payloads.
pub fn parse_question_block(raw: &str) -> Option<(String, Vec<String>)> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let payload: QuestionPayload = serde_json::from_str(raw).ok()?;
    let question = payload.question.trim();
    if question.is_empty() {
        return None;
    }
    Some((question.to_string(), payload.options))
}

/// Split a legacy `OPTIONS: a, b, c` list.
pub fn split_options(text: &str) -> Vec<String> {
    text.split(", ")
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

/// Incremental line-to-event converter.
///
/// Keeps the state that spans lines: whether the header is still being
/// read, the phase of the current section, and an open multi-line question
/// block.
#[derive(Debug, Default)]
pub struct LineParser {
    phase: Phase,
    in_header: bool,
    block: Option<String>,
    block_timestamp: Option<DateTime<Utc>>,
}

impl LineParser {
    /// Parser for a stream positioned in the body (e.g. tail from EOF).
    pub fn new() -> Self {
        Self::default()
    }

    /// Parser for a stream starting at the top of the file.
    pub fn with_header() -> Self {
        Self {
            in_header: true,
            ..Self::default()
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Drop all state, e.g. after the underlying file was truncated.
    pub fn reset(&mut self, expect_header: bool) {
        *self = if expect_header { Self::with_header() } else { Self::new() };
    }

    /// True while a structured question block is open.
    pub fn in_question_block(&self) -> bool {
        self.block.is_some()
    }

    /// Convert one line into at most one event.
    pub fn parse_line(&mut self, line: &str) -> Option<Event> {
        let line = line.trim_end_matches(['\r', '\n']);

        if self.in_header {
            if is_separator(line) {
                self.in_header = false;
                return None;
            }
            if line.starts_with('#') || is_header_field(line) || line.trim().is_empty() {
                return None;
            }
            self.in_header = false;
        }

        let (timestamp, raw) = strip_timestamp_prefix(line);

        if let Some(block) = self.block.as_mut() {
            let Some(end) = raw.find(QUESTION_END) else {
                push_block_line(block, raw);
                return None;
            };
            push_block_line(block, &raw[..end]);
            let payload = self.block.take().unwrap_or_default();
            let started_at = self.block_timestamp.take().or(timestamp);
            return self.question_event(&payload, started_at);
        }

        if let Some(name) = section_name(raw) {
            if let Some(phase) = phase_for_section(name) {
                self.phase = phase;
            }
            return Some(stamp(Event::section(self.phase, name), timestamp));
        }

        if let Some((_, after)) = raw.split_once(QUESTION_START) {
            if let Some((payload, _)) = after.split_once(QUESTION_END) {
                return self.question_event(payload, timestamp);
            }
            let mut block = String::new();
            push_block_line(&mut block, after);
            self.block = Some(block);
            self.block_timestamp = timestamp;
            return None;
        }

        if let Some(signal) = signal_name(raw) {
            return Some(stamp(Event::signal(self.phase, signal), timestamp));
        }

        if raw.trim().is_empty() || is_separator(raw) {
            return None;
        }

        Some(stamp(Event::output(self.phase, raw), timestamp))
    }

    fn question_event(&self, payload: &str, timestamp: Option<DateTime<Utc>>) -> Option<Event> {
        let (question, options) = parse_question_block(payload)?;
        Some(stamp(Event::question(self.phase, "", question, options), timestamp))
    }
}

fn push_block_line(block: &mut String, text: &str) {
    let text = text.trim();
    if !text.is_empty() {
        block.push_str(text);
        block.push('\n');
    }
}

fn stamp(event: Event, timestamp: Option<DateTime<Utc>>) -> Event {
    match timestamp {
        Some(ts) => event.with_timestamp(ts),
        None => event,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone, Timelike};
    use progress_types::EventKind;
    use std::io::Cursor;

    const HEADER: &str = "# Progress Log
Plan: docs/plans/my-plan.md
Branch: feature-branch
Mode: full
Started: 2026-01-22 10:30:00
------------------------------------------------------------

[26-01-22 10:30:05] Some output
";

    fn parse_all(input: &str) -> Vec<Event> {
        let mut parser = LineParser::with_header();
        input.lines().filter_map(|l| parser.parse_line(l)).collect()
    }

    #[test]
    fn test_parse_header_all_fields() {
        let meta = parse_header(Cursor::new(HEADER)).unwrap();
        assert_eq!(meta.plan_path, "docs/plans/my-plan.md");
        assert_eq!(meta.branch, "feature-branch");
        assert_eq!(meta.mode, "full");
        assert_eq!(meta.start_time, Some(Utc.with_ymd_and_hms(2026, 1, 22, 10, 30, 0).unwrap()));
    }

    #[test]
    fn test_parse_header_missing_fields() {
        let input = "# Progress Log\nBranch: main\n------------------------------------------------------------\n";
        let meta = parse_header(Cursor::new(input)).unwrap();
        assert!(meta.plan_path.is_empty());
        assert_eq!(meta.branch, "main");
        assert!(meta.mode.is_empty());
        assert!(meta.start_time.is_none());
    }

    #[test]
    fn test_parse_header_keeps_colons_in_values() {
        let input = "Plan: (no plan - review only)\nStarted: not a time\n---\nPlan: ignored\n";
        let meta = parse_header(Cursor::new(input)).unwrap();
        assert_eq!(meta.plan_path, "(no plan - review only)");
        assert!(meta.start_time.is_none());
    }

    #[test]
    fn test_parse_header_tolerates_invalid_utf8() {
        let mut input = b"Plan: caf\xe9 plan\r\nBranch: main\n".to_vec();
        input.extend_from_slice(b"---\n\xff\xfe\n");
        let meta = parse_header(Cursor::new(input)).unwrap();
        assert_eq!(meta.plan_path, "caf\u{FFFD} plan");
        assert_eq!(meta.branch, "main");
    }

    #[test]
    fn test_parse_progress_header_missing_file() {
        let err = parse_progress_header(Path::new("/nonexistent/progress-x.txt")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/progress-x.txt"));
    }

    #[test]
    fn test_strip_timestamp_prefix() {
        let (ts, rest) = strip_timestamp_prefix("[26-01-22 10:30:05] hello world");
        assert_eq!(rest, "hello world");
        let ts = ts.unwrap();
        assert_eq!((ts.year(), ts.month(), ts.day()), (2026, 1, 22));
        assert_eq!((ts.hour(), ts.minute(), ts.second()), (10, 30, 5));

        assert_eq!(strip_timestamp_prefix("no prefix").1, "no prefix");
        assert_eq!(strip_timestamp_prefix("[INFO] kept").1, "[INFO] kept");
    }

    #[test]
    fn test_section_and_signal_names() {
        assert_eq!(section_name("--- Task 1 ---"), Some("Task 1"));
        assert_eq!(section_name("------------"), None);
        assert_eq!(signal_name("done <<<PROTOCOL:REVIEW_DONE>>>"), Some("REVIEW_DONE"));
        assert_eq!(signal_name("<<<PROTOCOL:QUESTION>>>{}<<<PROTOCOL:END>>>"), None);
        assert_eq!(signal_name("plain text"), None);
    }

    #[test]
    fn test_phase_for_section() {
        assert_eq!(phase_for_section("Task 3"), Some(Phase::Task));
        assert_eq!(phase_for_section("Claude Review"), Some(Phase::Review));
        assert_eq!(phase_for_section("codex external review"), Some(Phase::Codex));
        assert_eq!(phase_for_section("Plan creation"), Some(Phase::Plan));
        assert_eq!(phase_for_section("misc"), None);
    }

    #[test]
    fn test_parse_question_block() {
        let parsed = parse_question_block(r#"{"question":"Pick?","options":["A","B"]}"#);
        assert_eq!(parsed, Some(("Pick?".to_string(), vec!["A".to_string(), "B".to_string()])));

        assert_eq!(parse_question_block("{not json"), None);
        assert_eq!(parse_question_block(r#"{"options":["A"]}"#), None);
        assert_eq!(parse_question_block("   "), None);
    }

    #[test]
    fn test_split_options() {
        assert_eq!(split_options("A, B, C"), vec!["A", "B", "C"]);
        assert_eq!(split_options("only"), vec!["only"]);
        assert!(split_options("").is_empty());
    }

    #[test]
    fn test_line_parser_skips_header() {
        let events = parse_all(HEADER);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].text(), Some("Some output"));
        assert_eq!(events[0].timestamp, Utc.with_ymd_and_hms(2026, 1, 22, 10, 30, 5).unwrap());
    }

    #[test]
    fn test_line_parser_sections_signals_and_phase() {
        let input = "--- Task 1 ---
[26-01-22 10:00:01] executing task
--- Review ---
[26-01-22 10:00:05] <<<PROTOCOL:REVIEW_DONE>>>
";
        let events = parse_all(input);
        assert_eq!(events.len(), 4);
        assert_eq!(events[0].kind, EventKind::Section { name: "Task 1".into() });
        assert_eq!(events[1].phase, Phase::Task);
        assert_eq!(events[2].phase, Phase::Review);
        assert_eq!(events[3].kind, EventKind::Signal { signal: "REVIEW_DONE".into() });
        assert_eq!(events[3].phase, Phase::Review);
    }

    #[test]
    fn test_inline_and_multiline_question_blocks_match() {
        let inline = r#"[26-01-25 10:30:05] <<<PROTOCOL:QUESTION>>>{"question":"Pick?","options":["A","B"]}<<<PROTOCOL:END>>>"#;
        let multiline = "[26-01-25 10:30:05] <<<PROTOCOL:QUESTION>>>
{
  \"question\": \"Pick?\",
  \"options\": [\"A\", \"B\"]
}
<<<PROTOCOL:END>>>";

        let a = parse_all(inline);
        let b = parse_all(multiline);
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
        assert_eq!(a[0].kind, b[0].kind);
        assert_eq!(
            a[0].kind,
            EventKind::Question {
                question_id: String::new(),
                question: "Pick?".into(),
                options: vec!["A".into(), "B".into()],
            }
        );
    }

    #[test]
    fn test_unterminated_block_yields_nothing() {
        let mut parser = LineParser::new();
        assert!(parser.parse_line(r#"<<<PROTOCOL:QUESTION>>>{"question":"Pick?","#).is_none());
        assert!(parser.parse_line(r#""options":["A"]}"#).is_none());
        assert!(parser.in_question_block());

        parser.reset(false);
        assert!(!parser.in_question_block());
        assert_eq!(parser.parse_line("after").unwrap().text(), Some("after"));
    }

    #[test]
    fn test_malformed_block_is_ignored() {
        let events = parse_all("<<<PROTOCOL:QUESTION>>>{oops<<<PROTOCOL:END>>>\nnext line\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].text(), Some("next line"));
    }

    #[test]
    fn test_body_without_header_is_not_swallowed() {
        let events = parse_all("first line\nsecond line\n");
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn test_footer_separator_skipped() {
        let events = parse_all(&format!(
            "{}------------------------------------------------------------\nCompleted: 2026-01-22 10:35:00 (5m 0s)\n",
            HEADER
        ));
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].text(), Some("Completed: 2026-01-22 10:35:00 (5m 0s)"));
    }
}

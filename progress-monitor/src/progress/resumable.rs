use super::lock::is_active;
use super::parser::{
    parse_progress_header, parse_question_block, read_lossy_line, split_options, strip_timestamp_prefix,
};
use super::list_progress_files;
use super::protocol::{COMPLETED_PREFIX, PLAN_SESSION_INFIX, QUESTION_END, QUESTION_START, SIGNAL_PLAN_READY};
use crate::error::ProgressError;
use progress_types::ResumableSession;
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

const LEGACY_QUESTION: &str = "QUESTION:";
const LEGACY_OPTIONS: &str = "OPTIONS:";
const LEGACY_ANSWER: &str = "ANSWER:";

/// Outcome of scanning a progress log body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanResult {
    /// Plan-ready token seen or `Completed:` footer present
    pub completed: bool,
    /// Number of `ANSWER:` lines
    pub qa_count: usize,
    pub pending_question: Option<String>,
    pub pending_options: Vec<String>,
}

impl ScanResult {
    fn set_pending(&mut self, question: String, options: Vec<String>) {
        self.pending_question = Some(question);
        self.pending_options = options;
    }

    fn clear_pending(&mut self) {
        self.pending_question = None;
        self.pending_options.clear();
    }
}

/// Scan a progress log for completion markers and question/answer state.
pub fn scan_progress_file(path: &Path) -> Result<ScanResult, ProgressError> {
    let file = File::open(path).map_err(|e| ProgressError::io("open progress file", path, e))?;
    scan_lines(BufReader::new(file)).map_err(|e| ProgressError::io("scan progress file", path, e))
}

fn scan_lines<R: BufRead>(mut reader: R) -> std::io::Result<ScanResult> {
    let mut result = ScanResult::default();
    let mut block: Option<String> = None;
    let mut buf = Vec::new();

    while let Some(line) = read_lossy_line(&mut reader, &mut buf)? {
        let (_, raw) = strip_timestamp_prefix(&line);

        if raw.starts_with(COMPLETED_PREFIX) || raw.contains(SIGNAL_PLAN_READY) {
            result.completed = true;
        }

        if let Some(buf) = block.as_mut() {
            let Some(end) = raw.find(QUESTION_END) else {
                append_trimmed(buf, raw);
                continue;
            };
            append_trimmed(buf, &raw[..end]);
            if let Some((question, options)) = block.take().as_deref().and_then(parse_question_block) {
                result.set_pending(question, options);
            }
            continue;
        }

        if let Some((_, after)) = raw.split_once(QUESTION_START) {
            match after.split_once(QUESTION_END) {
                Some((payload, _)) => {
                    if let Some((question, options)) = parse_question_block(payload) {
                        result.set_pending(question, options);
                    }
                }
                None => {
                    let mut buf = String::new();
                    append_trimmed(&mut buf, after);
                    block = Some(buf);
                }
            }
            continue;
        }

        if raw.starts_with(LEGACY_ANSWER) {
            result.qa_count += 1;
            result.clear_pending();
            continue;
        }

        if let Some(question) = raw.strip_prefix(LEGACY_QUESTION) {
            let question = question.trim();
            if !question.is_empty() {
                result.set_pending(question.to_string(), Vec::new());
            }
            continue;
        }

        if let Some(options) = raw.strip_prefix(LEGACY_OPTIONS) {
            if result.pending_question.is_some() {
                result.pending_options = split_options(options.trim());
            }
        }
    }

    Ok(result)
}

fn append_trimmed(buf: &mut String, text: &str) {
    let text = text.trim();
    if !text.is_empty() {
        buf.push_str(text);
        buf.push('\n');
    }
}

/// Classify one progress file.
///
/// Returns `Ok(None)` when the session is live, not a plan session, or
/// already completed.
pub fn check_resumable(path: &Path) -> Result<Option<ResumableSession>, ProgressError> {
    if is_active(path)? {
        return Ok(None);
    }

    let meta = parse_progress_header(path)?;
    if !meta.is_plan_mode() {
        return Ok(None);
    }

    let scan = scan_progress_file(path)?;
    if scan.completed {
        return Ok(None);
    }

    Ok(Some(ResumableSession {
        progress_path: path.to_path_buf(),
        plan_description: meta.plan_path,
        branch: meta.branch,
        start_time: meta.start_time,
        dir: path.parent().map(Path::to_path_buf).unwrap_or_default(),
        qa_count: scan.qa_count,
        pending_question: scan.pending_question,
        pending_options: scan.pending_options,
    }))
}

/// Find interrupted plan-creation sessions in `dirs`.
///
/// Empty and repeated directories are scanned once. Files that cannot be
/// read or checked are skipped.
pub fn find_resumable_sessions<P: AsRef<Path>>(dirs: &[P]) -> Vec<ResumableSession> {
    let mut sessions = Vec::new();
    let mut seen = HashSet::new();

    for dir in dirs {
        let dir = dir.as_ref();
        if dir.as_os_str().is_empty() || !seen.insert(dir) {
            continue;
        }
        let paths = match list_progress_files(dir, PLAN_SESSION_INFIX) {
            Ok(paths) => paths,
            Err(e) => {
                log::warn!("[PROGRESS] Cannot scan {}: {}", dir.display(), e);
                continue;
            }
        };
        for path in paths {
            match check_resumable(&path) {
                Ok(Some(session)) => sessions.push(session),
                Ok(None) => {}
                Err(e) => log::debug!("[PROGRESS] Skipping {}: {}", path.display(), e),
            }
        }
    }

    sessions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::lock::ProgressLock;
    use std::io::Cursor;
    use std::path::PathBuf;
    use tempfile::TempDir;

    const PLAN_HEADER: &str = "# Progress Log
Plan: add user authentication
Branch: plan-auth
Mode: plan
Started: 2026-01-25 10:30:00
------------------------------------------------------------
";

    fn scan(body: &str) -> ScanResult {
        scan_lines(Cursor::new(format!("{}{}", PLAN_HEADER, body))).unwrap()
    }

    fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_scan_legacy_exchange() {
        let result = scan(
            "[26-01-25 10:30:01] QUESTION: Which database?
[26-01-25 10:30:01] OPTIONS: Postgres, SQLite, MySQL
[26-01-25 10:30:09] ANSWER: SQLite
",
        );
        assert!(!result.completed);
        assert_eq!(result.qa_count, 1);
        assert_eq!(result.pending_question, None);
        assert!(result.pending_options.is_empty());
    }

    #[test]
    fn test_scan_pending_structured_question() {
        let result = scan(
            r#"[26-01-25 10:30:01] QUESTION: Which database?
[26-01-25 10:30:01] OPTIONS: Postgres, SQLite
[26-01-25 10:30:09] ANSWER: SQLite
[26-01-25 10:31:00] <<<PROTOCOL:QUESTION>>>{"question":"Pick?","options":["A","B"]}<<<PROTOCOL:END>>>
"#,
        );
        assert_eq!(result.qa_count, 1);
        assert_eq!(result.pending_question.as_deref(), Some("Pick?"));
        assert_eq!(result.pending_options, vec!["A", "B"]);
    }

    #[test]
    fn test_scan_pending_multiline_question() {
        let result = scan(
            "[26-01-25 10:31:00] <<<PROTOCOL:QUESTION>>>
{
  \"question\": \"Pick?\",
  \"options\": [\"A\", \"B\"]
}
<<<PROTOCOL:END>>>
",
        );
        assert_eq!(result.pending_question.as_deref(), Some("Pick?"));
        assert_eq!(result.pending_options, vec!["A", "B"]);
    }

    #[test]
    fn test_scan_legacy_pending_question() {
        let result = scan("QUESTION: Which auth?\nOPTIONS: JWT, Sessions\n");
        assert_eq!(result.pending_question.as_deref(), Some("Which auth?"));
        assert_eq!(result.pending_options, vec!["JWT", "Sessions"]);
    }

    #[test]
    fn test_scan_blank_legacy_question_ignored() {
        let result = scan("QUESTION:   \nOPTIONS: A, B\n");
        assert_eq!(result.pending_question, None);
        assert!(result.pending_options.is_empty());

        // a blank question does not hide an earlier pending one
        let result = scan("QUESTION: Which auth?\nQUESTION:\n");
        assert_eq!(result.pending_question.as_deref(), Some("Which auth?"));
    }

    #[test]
    fn test_scan_options_without_question_ignored() {
        let result = scan("OPTIONS: A, B\n");
        assert_eq!(result.pending_question, None);
        assert!(result.pending_options.is_empty());
    }

    #[test]
    fn test_scan_unterminated_block_has_no_pending() {
        let result = scan("<<<PROTOCOL:QUESTION>>>\n{\"question\": \"Pick?\",\n");
        assert!(!result.completed);
        assert_eq!(result.pending_question, None);
    }

    #[test]
    fn test_scan_malformed_block_ignored() {
        let result = scan("<<<PROTOCOL:QUESTION>>>{\"question\": <<<PROTOCOL:END>>>\n");
        assert_eq!(result.pending_question, None);
    }

    #[test]
    fn test_scan_completion_markers() {
        assert!(scan("[26-01-25 10:40:00] <<<PROTOCOL:PLAN_READY>>>\n").completed);
        assert!(scan("------------------------------------------------------------\nCompleted: 2026-01-25 10:40:00 (10m 0s)\n").completed);
        assert!(!scan("[26-01-25 10:40:00] still working\n").completed);
    }

    #[test]
    fn test_check_resumable_plan_session() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "progress-plan-auth.txt",
            &format!("{}QUESTION: Which auth?\nOPTIONS: JWT, Sessions\nANSWER: JWT\n", PLAN_HEADER),
        );

        let session = check_resumable(&path).unwrap().expect("resumable");
        assert_eq!(session.plan_description, "add user authentication");
        assert_eq!(session.branch, "plan-auth");
        assert_eq!(session.dir, dir.path());
        assert_eq!(session.qa_count, 1);
        assert!(session.start_time.is_some());
    }

    #[test]
    fn test_check_resumable_with_invalid_utf8_output() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("progress-plan-binary.txt");
        let mut content = PLAN_HEADER.as_bytes().to_vec();
        content.extend_from_slice(b"[26-01-25 10:30:01] tool output \xff\xfe garbage\n");
        content.extend_from_slice(b"QUESTION: Which cache?\nOPTIONS: Redis, Memcached\n");
        std::fs::write(&path, content).unwrap();

        let session = check_resumable(&path).unwrap().expect("resumable");
        assert_eq!(session.pending_question.as_deref(), Some("Which cache?"));
        assert_eq!(session.pending_options, vec!["Redis", "Memcached"]);
    }

    #[test]
    fn test_check_resumable_rejects_non_plan_and_completed() {
        let dir = TempDir::new().unwrap();
        let full = write(
            &dir,
            "progress-plan-full.txt",
            &PLAN_HEADER.replace("Mode: plan", "Mode: full"),
        );
        let done = write(
            &dir,
            "progress-plan-done.txt",
            &format!("{}QUESTION: Q?\nANSWER: A\n<<<PROTOCOL:PLAN_READY>>>\n", PLAN_HEADER),
        );

        assert!(check_resumable(&full).unwrap().is_none());
        assert!(check_resumable(&done).unwrap().is_none());
    }

    #[test]
    fn test_check_resumable_skips_locked() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "progress-plan-live.txt", PLAN_HEADER);

        let lock = ProgressLock::acquire(&path).unwrap();
        assert!(check_resumable(&path).unwrap().is_none());
        drop(lock);
        assert!(check_resumable(&path).unwrap().is_some());
    }

    #[test]
    fn test_find_resumable_sessions_across_dirs() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        write(&first, "progress-plan-one.txt", PLAN_HEADER);
        write(&first, "progress-plan-two.txt", &format!("{}<<<PROTOCOL:PLAN_READY>>>\n", PLAN_HEADER));
        write(&first, "progress-feature.txt", PLAN_HEADER);
        write(&second, "progress-plan-three.txt", PLAN_HEADER);
        write(&second, "notes.txt", PLAN_HEADER);

        let mut found: Vec<String> = find_resumable_sessions(&[first.path(), second.path()])
            .into_iter()
            .map(|s| s.progress_path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        found.sort();
        assert_eq!(found, vec!["progress-plan-one.txt", "progress-plan-three.txt"]);
    }

    #[test]
    fn test_find_resumable_sessions_skips_repeated_dirs() {
        let dir = TempDir::new().unwrap();
        write(&dir, "progress-plan-once.txt", PLAN_HEADER);

        let sessions = find_resumable_sessions(&[dir.path(), Path::new(""), dir.path()]);
        assert_eq!(sessions.len(), 1);
    }

    #[test]
    fn test_find_resumable_sessions_missing_dir() {
        let sessions = find_resumable_sessions(&[Path::new("/nonexistent/dir")]);
        assert!(sessions.is_empty());
    }
}

use super::session::{Session, SessionOptions};
use crate::error::ProgressError;
use crate::events::Buffer;
use crate::progress::protocol::{PLAN_SESSION_INFIX, PROGRESS_FILE_EXTENSION, PROGRESS_FILE_PREFIX};
use crate::progress::parser::read_lossy_line;
use crate::progress::{LineParser, is_active, list_progress_files, parse_progress_header};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use progress_types::SessionState;
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Max characters of a plan description kept in its session id
const PLAN_SLUG_LEN: usize = 20;

/// Tracks sessions by id, discovering them from progress files on disk.
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    options: SessionOptions,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::with_options(SessionOptions::default())
    }

    pub fn with_options(options: SessionOptions) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            options,
        }
    }

    /// Sizing used for sessions this manager creates.
    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Scan `dir` for progress files and create or refresh their sessions.
    ///
    /// Files that fail to parse or lock-check are logged and skipped. Returns
    /// the ids of all sessions found in the directory.
    pub fn discover(&self, dir: &Path) -> Result<Vec<String>, ProgressError> {
        let mut ids = Vec::new();
        for path in list_progress_files(dir, "")? {
            match self.discover_file(&path) {
                Ok(Some(id)) => ids.push(id),
                Ok(None) => {}
                Err(e) => log::warn!("[SESSIONS] Skipping {}: {}", path.display(), e),
            }
        }
        log::debug!("[SESSIONS] Discovered {} session(s) in {}", ids.len(), dir.display());
        Ok(ids)
    }

    /// Discover over several directories; failing directories are logged.
    pub fn discover_all<P: AsRef<Path>>(&self, dirs: &[P]) -> Vec<String> {
        let mut ids = Vec::new();
        for dir in dirs {
            let dir = dir.as_ref();
            match self.discover(dir) {
                Ok(found) => ids.extend(found),
                Err(e) => log::warn!("[SESSIONS] Failed to scan {}: {}", dir.display(), e),
            }
        }
        ids
    }

    fn discover_file(&self, path: &Path) -> Result<Option<String>, ProgressError> {
        let Some(id) = session_id_from_path(path) else {
            return Ok(None);
        };

        let metadata = parse_progress_header(path)?;
        let active = is_active(path)?;
        let modified = std::fs::metadata(path)
            .and_then(|m| m.modified())
            .map_err(|e| ProgressError::io("stat progress file", path, e))?;

        let (session, created) = self.get_or_create(&id, path);
        let was_active = !created && session.state() == SessionState::Active;

        session.set_metadata(metadata);
        session.set_last_modified(DateTime::<Utc>::from(modified));
        session.set_state(if active {
            SessionState::Active
        } else {
            SessionState::Completed
        });

        if created {
            log::info!(
                "[SESSIONS] New session {} ({})",
                id,
                if active { "active" } else { "completed" }
            );
        }

        if !active {
            let first_load = session.mark_loaded_if_not();
            if was_active {
                log::info!("[SESSIONS] Session {} completed", id);
                session.stop_tailing();
            }
            // the tailer may not have caught up with the final lines
            if first_load || was_active {
                session.buffer().clear();
                load_progress_file(path, session.buffer());
            }
        }

        Ok(Some(id))
    }

    fn get_or_create(&self, id: &str, path: &Path) -> (Arc<Session>, bool) {
        if let Some(session) = self.get(id) {
            return (session, false);
        }

        let mut sessions = self.sessions.write();
        if let Some(session) = sessions.get(id) {
            return (session.clone(), false);
        }
        let session = Arc::new(Session::with_options(id, path, self.options.clone()));
        sessions.insert(id.to_string(), session.clone());
        (session, true)
    }

    /// Track a session created in-process. Replaces any session with the same id.
    pub fn register(&self, session: Arc<Session>) {
        let id = session.id().to_string();
        if let Some(previous) = self.sessions.write().insert(id.clone(), session) {
            log::debug!("[SESSIONS] Replaced session {}", previous.id());
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().get(id).cloned()
    }

    pub fn all(&self) -> Vec<Arc<Session>> {
        self.sessions.read().values().cloned().collect()
    }

    /// Stop tracking a session without closing it.
    pub fn remove(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.write().remove(id)
    }

    /// Close every session and forget them all.
    pub fn close(&self) {
        let sessions: Vec<_> = self.sessions.write().drain().map(|(_, s)| s).collect();
        for session in &sessions {
            session.close();
        }
        log::info!("[SESSIONS] Closed {} session(s)", sessions.len());
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

/// `progress-<id>.txt` → `<id>`
pub fn session_id_from_path(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    let id = name
        .strip_prefix(PROGRESS_FILE_PREFIX)?
        .strip_suffix(PROGRESS_FILE_EXTENSION)?;
    (!id.is_empty()).then(|| id.to_string())
}

/// Replay a whole progress file into `buffer`, skipping the header.
///
/// An unreadable file is logged and leaves the buffer untouched.
pub fn load_progress_file(path: &Path, buffer: &Buffer) {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) => {
            log::warn!("[SESSIONS] Cannot load {}: {}", path.display(), e);
            return;
        }
    };

    let mut reader = BufReader::new(file);
    let mut parser = LineParser::with_header();
    let mut buf = Vec::new();
    let mut loaded = 0;
    loop {
        match read_lossy_line(&mut reader, &mut buf) {
            Ok(None) => break,
            Ok(Some(line)) => {
                if let Some(event) = parser.parse_line(&line) {
                    buffer.add(event);
                    loaded += 1;
                }
            }
            Err(e) => {
                log::warn!("[SESSIONS] Read error in {}: {}", path.display(), e);
                break;
            }
        }
    }
    log::debug!("[SESSIONS] Loaded {} event(s) from {}", loaded, path.display());
}

/// Path for a new plan-creation log:
/// `progress-plan-<description slug>-<unix nanos>.txt`.
pub fn plan_progress_path(dir: &Path, description: &str) -> PathBuf {
    let slug: String = description
        .chars()
        .take(PLAN_SLUG_LEN)
        .filter_map(|c| match c {
            c if c.is_ascii_alphanumeric() => Some(c),
            ' ' | '-' | '_' => Some('-'),
            _ => None,
        })
        .collect();
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();

    dir.join(format!(
        "{}{}{}-{}{}",
        PROGRESS_FILE_PREFIX, PLAN_SESSION_INFIX, slug, nanos, PROGRESS_FILE_EXTENSION
    ))
}

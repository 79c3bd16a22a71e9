//! Registry of plan-creation sessions started or resumed from a viewer.
//!
//! The runner owns each plan's cancellation token and question bridge and
//! hands them to the executor as a [`PlanHandle`]. Running the plan itself
//! is up to the caller, which reports back through [`PlanRunner::finish`].

use super::question::QuestionBridge;
use crate::error::ProgressError;
use crate::progress::protocol::PLAN_MODE;
use crate::progress::{ProgressLogConfig, find_resumable_sessions, is_active, parse_progress_header};
use crate::sessions::{Session, SessionManager, load_progress_file, plan_progress_path, session_id_from_path};
use chrono::Utc;
use dashmap::DashMap;
use progress_types::{ResumableSession, SessionMetadata, SessionState};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// What an executor needs to run one plan session.
#[derive(Clone)]
pub struct PlanHandle {
    pub session: Arc<Session>,
    /// Answers questions the executor asks during planning
    pub bridge: Arc<QuestionBridge>,
    pub cancel: CancellationToken,
    /// Continuing an interrupted log rather than starting a new one
    pub resumed: bool,
}

impl PlanHandle {
    pub fn id(&self) -> &str {
        self.session.id()
    }

    /// Writer configuration for this session's progress file.
    pub fn log_config(&self) -> ProgressLogConfig {
        let meta = self.session.metadata();
        ProgressLogConfig {
            path: self.session.path().to_path_buf(),
            plan_description: meta.plan_path,
            branch: meta.branch,
            mode: PLAN_MODE.to_string(),
            append: self.resumed,
        }
    }
}

pub struct PlanRunner {
    plans: DashMap<String, PlanHandle>,
    manager: Arc<SessionManager>,
}

impl PlanRunner {
    pub fn new(manager: Arc<SessionManager>) -> Self {
        Self {
            plans: DashMap::new(),
            manager,
        }
    }

    /// Register a new plan session writing to a fresh progress file in `dir`.
    pub fn start_plan(&self, dir: &Path, description: &str, branch: &str) -> Result<PlanHandle, ProgressError> {
        let meta = std::fs::metadata(dir).map_err(|e| ProgressError::io("stat plan directory", dir, e))?;
        if !meta.is_dir() {
            return Err(ProgressError::NotADirectory(dir.to_path_buf()));
        }

        let path = plan_progress_path(dir, description);
        let id = session_id_from_path(&path).ok_or_else(|| ProgressError::InvalidName(path.clone()))?;

        let session = Arc::new(Session::with_options(id, &path, self.manager.options().clone()));
        session.set_state(SessionState::Active);
        session.set_metadata(SessionMetadata {
            plan_path: description.to_string(),
            branch: branch.to_string(),
            mode: PLAN_MODE.to_string(),
            start_time: Some(Utc::now()),
        });
        // nothing on disk yet; events arrive through the broadcast logger
        session.mark_loaded_if_not();
        self.manager.register(session.clone());

        Ok(self.track(session, false))
    }

    /// Pick up an interrupted plan session from its progress file.
    ///
    /// The file must exist, be unlocked and carry `Mode: plan`. Its history
    /// is loaded into the session unless already loaded.
    pub fn resume_plan(&self, path: &Path) -> Result<PlanHandle, ProgressError> {
        let meta = std::fs::metadata(path).map_err(|e| ProgressError::io("stat progress file", path, e))?;
        if meta.is_dir() {
            return Err(ProgressError::NotAFile(path.to_path_buf()));
        }
        if is_active(path)? {
            return Err(ProgressError::AlreadyActive(path.to_path_buf()));
        }

        let header = parse_progress_header(path)?;
        if !header.is_plan_mode() {
            return Err(ProgressError::NotPlanMode(header.mode));
        }

        let id = session_id_from_path(path).ok_or_else(|| ProgressError::InvalidName(path.to_path_buf()))?;
        // resumed but the executor has not locked the file yet
        if self.plans.contains_key(&id) {
            return Err(ProgressError::AlreadyActive(path.to_path_buf()));
        }

        let session = match self.manager.get(&id) {
            Some(existing) => existing,
            None => {
                let session = Arc::new(Session::with_options(&id, path, self.manager.options().clone()));
                self.manager.register(session.clone());
                session
            }
        };
        session.set_state(SessionState::Active);
        session.set_metadata(SessionMetadata {
            mode: PLAN_MODE.to_string(),
            ..header
        });
        if session.mark_loaded_if_not() {
            session.buffer().clear();
            load_progress_file(path, session.buffer());
        }

        Ok(self.track(session, true))
    }

    fn track(&self, session: Arc<Session>, resumed: bool) -> PlanHandle {
        let handle = PlanHandle {
            bridge: Arc::new(QuestionBridge::new(session.clone())),
            cancel: CancellationToken::new(),
            session,
            resumed,
        };
        log::info!(
            "[PLANS] {} plan {} ({})",
            if resumed { "Resumed" } else { "Started" },
            handle.id(),
            handle.session.path().display()
        );
        self.plans.insert(handle.id().to_string(), handle.clone());
        handle
    }

    /// Cancel a running plan and stop tracking it.
    pub fn cancel(&self, id: &str) -> Result<(), ProgressError> {
        let (_, plan) = self
            .plans
            .remove(id)
            .ok_or_else(|| ProgressError::SessionNotFound(id.to_string()))?;

        log::info!("[PLANS] Cancelling plan {}", id);
        plan.cancel.cancel();
        plan.session.set_state(SessionState::Completed);
        Ok(())
    }

    /// Called by the executor when a plan ends. Returns false if it was
    /// not tracked (already cancelled).
    pub fn finish(&self, id: &str) -> bool {
        match self.plans.remove(id) {
            Some((_, plan)) => {
                plan.session.set_state(SessionState::Completed);
                log::debug!("[PLANS] Plan {} finished", id);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: &str) -> Option<PlanHandle> {
        self.plans.get(id).map(|plan| plan.value().clone())
    }

    pub fn all(&self) -> Vec<PlanHandle> {
        self.plans.iter().map(|plan| plan.value().clone()).collect()
    }

    /// Interrupted plan sessions across `dirs`, each directory scanned once.
    pub fn resumable_sessions<P: AsRef<Path>>(&self, dirs: &[P]) -> Vec<ResumableSession> {
        find_resumable_sessions(dirs)
    }
}

//! Question/answer rendezvous between the executor and a web viewer.
//!
//! The executor blocks in `ask_question` until a viewer answers through
//! `submit_answer` or the executor's cancellation token fires. Each bridge
//! holds at most one pending question.

use crate::error::QuestionError;
use crate::sessions::Session;
use async_trait::async_trait;
use parking_lot::Mutex;
use progress_types::{Event, Phase};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// Source of answers for questions raised during execution.
#[async_trait]
pub trait InputCollector: Send + Sync {
    /// Ask `question` and wait for one of `options` to be chosen.
    async fn ask_question(
        &self,
        cancel: &CancellationToken,
        question: &str,
        options: &[String],
    ) -> Result<String, QuestionError>;
}

/// Snapshot of the question currently waiting for an answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingQuestion {
    pub id: String,
    pub question: String,
    pub options: Vec<String>,
}

struct Pending {
    info: PendingQuestion,
    /// Taken on first delivery
    answer_tx: Option<oneshot::Sender<String>>,
}

pub struct QuestionBridge {
    session: Arc<Session>,
    phase: Phase,
    pending: Mutex<Option<Pending>>,
}

impl QuestionBridge {
    pub fn new(session: Arc<Session>) -> Self {
        Self {
            session,
            phase: Phase::Plan,
            pending: Mutex::new(None),
        }
    }

    /// Phase used for question events (plan by default).
    pub fn with_phase(mut self, phase: Phase) -> Self {
        self.phase = phase;
        self
    }

    pub fn pending_question(&self) -> Option<PendingQuestion> {
        self.pending.lock().as_ref().map(|p| p.info.clone())
    }

    /// Deliver the answer to the waiting asker.
    ///
    /// A repeated answer to an already answered question is ignored.
    pub fn submit_answer(&self, question_id: &str, answer: &str) -> Result<(), QuestionError> {
        let answer_tx = {
            let mut guard = self.pending.lock();
            let pending = guard.as_mut().ok_or(QuestionError::NoPendingQuestion)?;
            if pending.info.id != question_id {
                return Err(QuestionError::IdMismatch {
                    expected: pending.info.id.clone(),
                    got: question_id.to_string(),
                });
            }
            if !pending.info.options.iter().any(|o| o == answer) {
                return Err(QuestionError::InvalidAnswer(answer.to_string()));
            }
            pending.answer_tx.take()
        };

        let Some(answer_tx) = answer_tx else {
            log::debug!("[QUESTION] Question {} already answered", question_id);
            return Ok(());
        };
        if answer_tx.send(answer.to_string()).is_err() {
            log::debug!("[QUESTION] Asker for {} is gone", question_id);
            return Ok(());
        }

        log::info!("[QUESTION] Answered {}: {}", question_id, answer);
        self.session
            .publish(Event::question_answered(self.phase, question_id, answer));
        Ok(())
    }

    fn clear_pending(&self, question_id: &str) {
        let mut guard = self.pending.lock();
        if guard.as_ref().is_some_and(|p| p.info.id == question_id) {
            *guard = None;
        }
    }
}

#[async_trait]
impl InputCollector for QuestionBridge {
    async fn ask_question(
        &self,
        cancel: &CancellationToken,
        question: &str,
        options: &[String],
    ) -> Result<String, QuestionError> {
        if options.is_empty() {
            return Err(QuestionError::NoOptions);
        }

        let id = generate_question_id();
        let (answer_tx, answer_rx) = oneshot::channel();
        {
            let mut guard = self.pending.lock();
            if guard.is_some() {
                return Err(QuestionError::AlreadyPending);
            }
            *guard = Some(Pending {
                info: PendingQuestion {
                    id: id.clone(),
                    question: question.to_string(),
                    options: options.to_vec(),
                },
                answer_tx: Some(answer_tx),
            });
        }
        // clears the record even when this future is dropped mid-wait
        let _pending = PendingGuard { bridge: self, id: &id };

        log::info!("[QUESTION] Asking {}: {}", id, question);
        self.session
            .publish(Event::question(self.phase, id.clone(), question, options.to_vec()));

        let result = tokio::select! {
            biased;
            answer = answer_rx => answer.map_err(|_| QuestionError::Cancelled),
            _ = cancel.cancelled() => {
                log::info!("[QUESTION] Question {} cancelled", id);
                Err(QuestionError::Cancelled)
            }
        };

        result
    }
}

struct PendingGuard<'a> {
    bridge: &'a QuestionBridge,
    id: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.bridge.clear_pending(self.id);
    }
}

/// 16 hex chars from 8 random bytes
fn generate_question_id() -> String {
    hex::encode(rand::random::<[u8; 8]>())
}

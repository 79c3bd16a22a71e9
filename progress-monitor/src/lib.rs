//! Live observability for progress logs written by plan executors.
//!
//! Progress files are discovered on disk, followed while their writer holds
//! the advisory lock, and fanned out as typed events to any number of
//! viewers. In-process executors publish directly through
//! [`bridge::BroadcastLogger`] and ask questions through
//! [`bridge::QuestionBridge`]; [`bridge::PlanRunner`] tracks the plan
//! sessions started or resumed that way.

pub mod bridge;
pub mod config;
pub mod error;
pub mod events;
pub mod progress;
pub mod sessions;

#[cfg(test)]
mod pipeline_tests;

pub use progress_types::{Event, EventKind, Phase, ResumableSession, SessionMetadata, SessionState};

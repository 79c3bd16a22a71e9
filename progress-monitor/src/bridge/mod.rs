//! Adapters that connect a running executor to a session's event stream.

mod broadcast_logger;
mod plan_runner;
mod question;

pub use broadcast_logger::BroadcastLogger;
pub use plan_runner::{PlanHandle, PlanRunner};
pub use question::{InputCollector, PendingQuestion, QuestionBridge};

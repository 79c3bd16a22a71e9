//! Sessions: one per progress log, tracked and refreshed by the manager.

mod manager;
mod session;
mod tailer;

pub use manager::{SessionManager, load_progress_file, plan_progress_path, session_id_from_path};
pub use session::{Session, SessionOptions};
pub use tailer::{MIN_LINE_BYTES, Tailer, TailerConfig};

//! In-memory event distribution for sessions
//!
//! - `Buffer`: bounded replay log for late-joining viewers
//! - `Hub`: non-blocking fan-out to live subscribers

mod buffer;
mod hub;

pub use buffer::{Buffer, DEFAULT_BUFFER_SIZE};
pub use hub::{DEFAULT_MAX_CLIENTS, DEFAULT_SUBSCRIBER_CAPACITY, Hub, Subscription};

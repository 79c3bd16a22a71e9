use parking_lot::RwLock;
use progress_types::Event;
use std::collections::VecDeque;

/// Default number of recent events kept per session for replay on connect
pub const DEFAULT_BUFFER_SIZE: usize = 10_000;

/// Fixed-capacity ring buffer of recent events.
///
/// When full, adding an event evicts the oldest one. Safe to share between
/// the feeder task, the broadcast logger and any number of readers.
pub struct Buffer {
    events: RwLock<VecDeque<Event>>,
    capacity: usize,
}

impl Buffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: RwLock::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
        }
    }

    /// Append an event, dropping the oldest if the buffer is full.
    pub fn add(&self, event: Event) {
        let mut events = self.events.write();
        if events.len() >= self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }

    /// Snapshot of all buffered events in insertion order.
    pub fn all(&self) -> Vec<Event> {
        self.events.read().iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.events.write().clear();
    }

    pub fn count(&self) -> usize {
        self.events.read().len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for Buffer {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_SIZE)
    }
}

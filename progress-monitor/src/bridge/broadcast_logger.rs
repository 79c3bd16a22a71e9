use crate::progress::Logger;
use crate::sessions::Session;
use progress_types::{Event, Phase};
use std::path::Path;
use std::sync::Arc;

/// Logger decorator that mirrors every write into a session as events.
pub struct BroadcastLogger<L: Logger> {
    inner: L,
    session: Arc<Session>,
    phase: Phase,
}

impl<L: Logger> BroadcastLogger<L> {
    pub fn new(inner: L, session: Arc<Session>) -> Self {
        Self {
            inner,
            session,
            phase: Phase::default(),
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn into_inner(self) -> L {
        self.inner
    }
}

impl<L: Logger> Logger for BroadcastLogger<L> {
    fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
        self.inner.set_phase(phase);
    }

    fn print(&mut self, text: &str) {
        self.inner.print(text);
        self.session.publish(Event::output(self.phase, text));
    }

    fn print_raw(&mut self, text: &str) {
        self.inner.print_raw(text);
        self.session.publish(Event::output(self.phase, text));
    }

    fn print_section(&mut self, name: &str) {
        self.inner.print_section(name);
        self.session.publish(Event::section(self.phase, name));
    }

    fn print_aligned(&mut self, text: &str) {
        self.inner.print_aligned(text);
        self.session.publish(Event::output(self.phase, text));
    }

    fn path(&self) -> &Path {
        self.inner.path()
    }
}

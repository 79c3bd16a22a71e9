use super::tailer::{Tailer, TailerConfig};
use crate::error::TailerError;
use crate::events::{Buffer, DEFAULT_BUFFER_SIZE, DEFAULT_MAX_CLIENTS, DEFAULT_SUBSCRIBER_CAPACITY, Hub};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use progress_types::{Event, SessionMetadata, SessionState};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Sizing applied to every session a manager creates.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub buffer_size: usize,
    pub max_clients: usize,
    pub subscriber_capacity: usize,
    pub tailer: TailerConfig,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_clients: DEFAULT_MAX_CLIENTS,
            subscriber_capacity: DEFAULT_SUBSCRIBER_CAPACITY,
            tailer: TailerConfig::default(),
        }
    }
}

#[derive(Debug, Default)]
struct SessionInfo {
    metadata: SessionMetadata,
    state: SessionState,
    last_modified: Option<DateTime<Utc>>,
}

/// A running tailer plus the task copying its events into the session.
struct TailHandle {
    tailer: Tailer,
    stop: CancellationToken,
    feeder: JoinHandle<()>,
}

impl TailHandle {
    fn is_live(&self) -> bool {
        self.tailer.is_running() && !self.feeder.is_finished()
    }
}

impl Drop for TailHandle {
    fn drop(&mut self) {
        self.stop.cancel();
        self.feeder.abort();
        self.tailer.stop();
    }
}

/// One progress log, with its replay buffer, viewer hub and optional tailer.
pub struct Session {
    id: String,
    path: PathBuf,
    info: RwLock<SessionInfo>,
    buffer: Arc<Buffer>,
    hub: Arc<Hub>,
    tailer_config: TailerConfig,
    tailing: Mutex<Option<TailHandle>>,
    loaded: AtomicBool,
}

impl Session {
    pub fn new(id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self::with_options(id, path, SessionOptions::default())
    }

    pub fn with_options(id: impl Into<String>, path: impl Into<PathBuf>, options: SessionOptions) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            info: RwLock::new(SessionInfo::default()),
            buffer: Arc::new(Buffer::new(options.buffer_size)),
            hub: Arc::new(Hub::with_limits(options.max_clients, options.subscriber_capacity)),
            tailer_config: options.tailer,
            tailing: Mutex::new(None),
            loaded: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    pub fn metadata(&self) -> SessionMetadata {
        self.info.read().metadata.clone()
    }

    pub fn set_metadata(&self, metadata: SessionMetadata) {
        self.info.write().metadata = metadata;
    }

    pub fn state(&self) -> SessionState {
        self.info.read().state
    }

    pub fn set_state(&self, state: SessionState) {
        self.info.write().state = state;
    }

    pub fn last_modified(&self) -> Option<DateTime<Utc>> {
        self.info.read().last_modified
    }

    pub fn set_last_modified(&self, modified: DateTime<Utc>) {
        self.info.write().last_modified = Some(modified);
    }

    /// Record an event for replay and push it to live viewers.
    pub fn publish(&self, event: Event) {
        fan_out(&self.buffer, &self.hub, event);
    }

    /// Follow the progress file, feeding new events into buffer and hub.
    ///
    /// With `from_start` the buffer is rebuilt from the whole file. A
    /// session that is already tailing is left alone.
    pub fn start_tailing(&self, from_start: bool) -> Result<(), TailerError> {
        let mut tailing = self.tailing.lock();
        if tailing.as_ref().is_some_and(TailHandle::is_live) {
            return Ok(());
        }
        // a finished run is replaced
        tailing.take();

        let mut tailer = Tailer::new(&self.path, self.tailer_config.clone());
        tailer.start(from_start)?;
        let Some(mut events) = tailer.take_events() else {
            return Ok(());
        };

        if from_start {
            self.buffer.clear();
            self.loaded.store(true, Ordering::SeqCst);
        }

        let stop = CancellationToken::new();
        let token = stop.clone();
        let buffer = self.buffer.clone();
        let hub = self.hub.clone();
        let id = self.id.clone();
        let feeder = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    event = events.recv() => match event {
                        Some(event) => fan_out(&buffer, &hub, event),
                        None => break,
                    },
                }
            }
            log::debug!("[SESSION] Feeder for {} exited", id);
        });

        log::info!("[SESSION] Tailing {} ({})", self.id, self.path.display());
        *tailing = Some(TailHandle { tailer, stop, feeder });
        Ok(())
    }

    /// Stop following the file. Does nothing if not tailing.
    pub fn stop_tailing(&self) {
        let handle = self.tailing.lock().take();
        if handle.is_some() {
            log::info!("[SESSION] Stopped tailing {}", self.id);
        }
    }

    pub fn is_tailing(&self) -> bool {
        self.tailing.lock().as_ref().is_some_and(TailHandle::is_live)
    }

    /// Mark the full file as loaded into the buffer.
    ///
    /// Returns true for the one caller that flipped the flag and should
    /// therefore do the loading.
    pub fn mark_loaded_if_not(&self) -> bool {
        !self.loaded.swap(true, Ordering::SeqCst)
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    /// Stop tailing, disconnect all viewers and drop buffered events.
    pub fn close(&self) {
        self.stop_tailing();
        self.hub.close();
        self.buffer.clear();
        log::debug!("[SESSION] Closed {}", self.id);
    }
}

fn fan_out(buffer: &Buffer, hub: &Hub, event: Event) {
    hub.broadcast(&event);
    buffer.add(event);
}

use crate::error::TailerError;
use crate::progress::LineParser;
use progress_types::Event;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Lines up to this size are always supported
pub const MIN_LINE_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct TailerConfig {
    /// How often the file size is checked for new data
    pub poll_interval: Duration,
    /// A partial line growing past this is emitted as-is
    pub max_line_bytes: usize,
    /// Events buffered between the follow task and its consumer
    pub channel_capacity: usize,
}

impl Default for TailerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            max_line_bytes: 4 * MIN_LINE_BYTES,
            channel_capacity: 1024,
        }
    }
}

/// Follows a progress file and turns appended lines into events.
pub struct Tailer {
    path: PathBuf,
    config: TailerConfig,
    running: Arc<AtomicBool>,
    cancel: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
    events: Option<mpsc::Receiver<Event>>,
}

impl Tailer {
    pub fn new(path: impl Into<PathBuf>, config: TailerConfig) -> Self {
        Self {
            path: path.into(),
            config,
            running: Arc::new(AtomicBool::new(false)),
            cancel: None,
            task: None,
            events: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Begin following from the start of the file or from its current end.
    ///
    /// Must be called within a tokio runtime. Calling it while already
    /// running does nothing.
    pub fn start(&mut self, from_beginning: bool) -> Result<(), TailerError> {
        if self.is_running() {
            return Ok(());
        }

        let handle = Handle::try_current().map_err(|_| TailerError::NoRuntime)?;

        let file = std::fs::File::open(&self.path).map_err(|e| TailerError::Io {
            op: "open",
            path: self.path.clone(),
            source: e,
        })?;
        let offset = if from_beginning {
            0
        } else {
            file.metadata()
                .map_err(|e| TailerError::Io {
                    op: "stat",
                    path: self.path.clone(),
                    source: e,
                })?
                .len()
        };

        let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));
        let token = CancellationToken::new();
        let follow = Follow {
            file: File::from_std(file),
            path: self.path.clone(),
            offset,
            carry: Vec::new(),
            parser: if from_beginning {
                LineParser::with_header()
            } else {
                LineParser::new()
            },
            max_line_bytes: self.config.max_line_bytes.max(MIN_LINE_BYTES),
        };

        // fresh flag per run so a finishing old task cannot clear it
        self.running = Arc::new(AtomicBool::new(true));
        let running = self.running.clone();
        let poll_interval = self.config.poll_interval;
        let task_token = token.clone();
        let task = handle.spawn(async move {
            follow.run(tx, task_token, poll_interval).await;
            running.store(false, Ordering::SeqCst);
        });

        log::debug!(
            "[TAILER] Following {} from {}",
            self.path.display(),
            if from_beginning { "start" } else { "end" }
        );
        self.cancel = Some(token);
        self.task = Some(task);
        self.events = Some(rx);
        Ok(())
    }

    /// Take the event stream of the current run. Returns `None` if already taken.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<Event>> {
        self.events.take()
    }

    /// Stop following and release the file. No events are produced afterwards.
    pub fn stop(&mut self) {
        if let Some(token) = self.cancel.take() {
            token.cancel();
        }
        if let Some(task) = self.task.take() {
            task.abort();
            log::debug!("[TAILER] Stopped {}", self.path.display());
        }
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for Tailer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// State owned by the follow task.
struct Follow {
    file: File,
    path: PathBuf,
    offset: u64,
    carry: Vec<u8>,
    parser: LineParser,
    max_line_bytes: usize,
}

impl Follow {
    async fn run(mut self, tx: mpsc::Sender<Event>, token: CancellationToken, poll_interval: Duration) {
        loop {
            match self.poll().await {
                Ok(lines) => {
                    for line in lines {
                        let Some(event) = self.parser.parse_line(&line) else {
                            continue;
                        };
                        if tx.send(event).await.is_err() {
                            log::debug!("[TAILER] Consumer gone for {}", self.path.display());
                            return;
                        }
                    }
                }
                Err(e) => {
                    log::warn!("[TAILER] Read error on {}: {}", self.path.display(), e);
                    return;
                }
            }

            tokio::select! {
                biased;
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }
    }

    /// Read whatever was appended since the last poll and return complete lines.
    async fn poll(&mut self) -> std::io::Result<Vec<String>> {
        let open = self.file.metadata().await?;
        // a missing path keeps the old handle until a new file appears
        if let Ok(current) = tokio::fs::metadata(&self.path).await {
            if !same_file(&open, &current) {
                log::warn!("[TAILER] {} was replaced, reopening", self.path.display());
                self.file = File::open(&self.path).await?;
                self.restart();
            }
        }

        let size = self.file.metadata().await?.len();
        if size < self.offset {
            log::warn!(
                "[TAILER] {} truncated ({} < {}), restarting from the top",
                self.path.display(),
                size,
                self.offset
            );
            self.restart();
        }
        if size == self.offset {
            return Ok(Vec::new());
        }

        self.file.seek(SeekFrom::Start(self.offset)).await?;
        let mut chunk = Vec::new();
        (&mut self.file).take(size - self.offset).read_to_end(&mut chunk).await?;
        self.offset += chunk.len() as u64;
        self.carry.extend_from_slice(&chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(pos) = self.carry[start..].iter().position(|&b| b == b'\n') {
            lines.push(decode_line(&self.carry[start..start + pos]));
            start += pos + 1;
        }
        self.carry.drain(..start);

        if self.carry.len() > self.max_line_bytes {
            log::warn!(
                "[TAILER] Line over {} bytes in {}, emitting partial",
                self.max_line_bytes,
                self.path.display()
            );
            lines.push(decode_line(&self.carry));
            self.carry.clear();
        }

        Ok(lines)
    }

    fn restart(&mut self) {
        self.offset = 0;
        self.carry.clear();
        self.parser.reset(true);
    }
}

#[cfg(unix)]
fn same_file(a: &std::fs::Metadata, b: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::MetadataExt;

    a.dev() == b.dev() && a.ino() == b.ino()
}

// No portable file identity; only truncation is detected.
#[cfg(not(unix))]
fn same_file(_a: &std::fs::Metadata, _b: &std::fs::Metadata) -> bool {
    true
}

fn decode_line(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    text.strip_suffix('\r').unwrap_or(text.as_ref()).to_string()
}

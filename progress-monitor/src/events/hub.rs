use crate::error::HubError;
use parking_lot::RwLock;
use progress_types::Event;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use uuid::Uuid;

/// Max number of concurrently connected viewers per session
pub const DEFAULT_MAX_CLIENTS: usize = 100;

/// Queue size per subscriber; events beyond this are dropped for slow clients
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 256;

/// Receiving end of a hub subscription.
///
/// The hub owns the sending side. Once the subscription is removed (via
/// `Hub::unsubscribe` or `Hub::close`) the queue is closed: buffered events
/// can still be drained, after which `recv` returns `None`.
pub struct Subscription {
    id: String,
    receiver: mpsc::Receiver<Event>,
}

impl Subscription {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn recv(&mut self) -> Option<Event> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Result<Event, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Blocking receive for callers outside the async runtime.
    pub fn blocking_recv(&mut self) -> Option<Event> {
        self.receiver.blocking_recv()
    }
}

/// Per-session fan-out of events to live viewers.
///
/// `broadcast()` never blocks: each subscriber has a bounded queue and events
/// that do not fit are dropped and counted.
pub struct Hub {
    clients: RwLock<HashMap<String, mpsc::Sender<Event>>>,
    max_clients: usize,
    capacity: usize,
    dropped: AtomicU64,
}

impl Hub {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MAX_CLIENTS, DEFAULT_SUBSCRIBER_CAPACITY)
    }

    pub fn with_limits(max_clients: usize, capacity: usize) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            max_clients,
            capacity: capacity.max(1),
            dropped: AtomicU64::new(0),
        }
    }

    /// Register a new subscriber queue.
    pub fn subscribe(&self) -> Result<Subscription, HubError> {
        let mut clients = self.clients.write();
        if clients.len() >= self.max_clients {
            log::warn!("[HUB] Rejecting subscriber: {} clients connected", clients.len());
            return Err(HubError::MaxClientsExceeded { max: self.max_clients });
        }

        let client_id = Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::channel(self.capacity);
        clients.insert(client_id.clone(), tx);

        log::debug!("[HUB] Client {} subscribed ({} total)", client_id, clients.len());
        Ok(Subscription {
            id: client_id,
            receiver: rx,
        })
    }

    /// Remove a subscriber and close its queue. Unknown ids are ignored.
    pub fn unsubscribe(&self, client_id: &str) {
        if self.clients.write().remove(client_id).is_some() {
            log::debug!("[HUB] Client {} unsubscribed", client_id);
        }
    }

    /// Deliver an event to every subscriber without waiting.
    pub fn broadcast(&self, event: &Event) {
        let mut closed_clients = Vec::new();
        {
            let clients = self.clients.read();
            for (client_id, sender) in clients.iter() {
                match sender.try_send(event.clone()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                        log::debug!(
                            "[HUB] Queue full for client {}, dropping event ({} dropped total)",
                            client_id,
                            dropped
                        );
                    }
                    Err(TrySendError::Closed(_)) => closed_clients.push(client_id.clone()),
                }
            }
        }

        if !closed_clients.is_empty() {
            let mut clients = self.clients.write();
            for client_id in closed_clients {
                clients.remove(&client_id);
                log::debug!("[HUB] Removed disconnected client {}", client_id);
            }
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.read().len()
    }

    /// Total events dropped across all subscribers because their queue was full.
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Close every subscriber queue. The hub remains usable afterwards.
    pub fn close(&self) {
        let mut clients = self.clients.write();
        let count = clients.len();
        clients.clear();
        if count > 0 {
            log::debug!("[HUB] Closed {} client(s)", count);
        }
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

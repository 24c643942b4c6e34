//! Transport adapters carrying events between participants in the same
//! process. Only the in-VM queue and loopback adapters are implemented
//! here: cross-process delivery (QUIC/gRPC, Unix IPC, enclave mailboxes)
//! is out of scope for this crate, which assumes every objective's
//! participants run as tasks in a single process or test harness.
#![deny(missing_docs)]

use std::sync::Arc;

use async_trait::async_trait;
use channel_core::{EventStore, InMemoryEventStore};
use channel_spec::events::Event;
use tokio::sync::broadcast;
use tokio::sync::broadcast::Receiver;

/// Transport error.
pub type TransportResult<T> = Result<T, anyhow::Error>;

const DEFAULT_QUEUE_DEPTH: usize = 1024;

fn publish_event(tx: &broadcast::Sender<Event>, queue_depth: usize, event: Event) -> TransportResult<()> {
    if tx.len() >= queue_depth {
        anyhow::bail!("backpressure: subscriber queue is full");
    }
    let _ = tx.send(event);
    Ok(())
}

/// Transport trait for append/read/subscribe semantics over the event log.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Append an event to the transport.
    async fn append(&self, event: Event) -> TransportResult<()>;
    /// Read events starting at offset with limit.
    async fn read(&self, offset: u64, limit: usize) -> TransportResult<Vec<Event>>;
    /// Subscribe to newly appended events.
    async fn subscribe(&self) -> TransportResult<Receiver<Event>>;
}

/// In-VM queue: an `EventStore` plus a broadcast channel fanning out
/// appended events to subscribers, for participants sharing a process.
pub struct InVmQueue {
    /// The backing event store.
    pub store: Arc<dyn EventStore>,
    tx: broadcast::Sender<Event>,
    queue_depth: usize,
}

impl InVmQueue {
    /// Create a new queue backed by a fresh in-memory store.
    pub fn new() -> Self {
        Self::with_store(Arc::new(InMemoryEventStore::new()))
    }

    /// Create a queue backed by a provided store implementation.
    pub fn with_store(store: Arc<dyn EventStore>) -> Self {
        let (tx, _) = broadcast::channel(DEFAULT_QUEUE_DEPTH);
        Self {
            store,
            tx,
            queue_depth: DEFAULT_QUEUE_DEPTH,
        }
    }
}

impl Default for InVmQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for InVmQueue {
    async fn append(&self, event: Event) -> TransportResult<()> {
        self.store
            .append(event.clone())
            .map_err(|err| anyhow::anyhow!(err.to_string()))?;
        publish_event(&self.tx, self.queue_depth, event)
    }

    async fn read(&self, offset: u64, limit: usize) -> TransportResult<Vec<Event>> {
        Ok(self.store.read(offset, limit))
    }

    async fn subscribe(&self) -> TransportResult<Receiver<Event>> {
        Ok(self.tx.subscribe())
    }
}

/// Loopback adapter: a thin wrapper over `InVmQueue` for single-process
/// test harnesses and demos where every participant is local.
pub struct Loopback {
    queue: InVmQueue,
}

impl Loopback {
    /// Create a loopback adapter over a fresh in-memory store.
    pub fn new() -> Self {
        Self {
            queue: InVmQueue::new(),
        }
    }

    /// Create a loopback adapter over a provided store.
    pub fn with_store(store: Arc<dyn EventStore>) -> Self {
        Self {
            queue: InVmQueue::with_store(store),
        }
    }
}

impl Default for Loopback {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for Loopback {
    async fn append(&self, event: Event) -> TransportResult<()> {
        self.queue.append(event).await
    }

    async fn read(&self, offset: u64, limit: usize) -> TransportResult<Vec<Event>> {
        self.queue.read(offset, limit).await
    }

    async fn subscribe(&self) -> TransportResult<Receiver<Event>> {
        self.queue.subscribe().await
    }
}

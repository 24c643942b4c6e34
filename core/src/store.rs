//! The append-only event store: the single source of truth every other
//! module folds over.
//!
//! A single `parking_lot::RwLock` guards the backing vector; the length is
//! additionally tracked in an `AtomicU64` so `len()` can be read lock-free.
//! Appends are serialized (the writer holds the lock for the duration of
//! validation + push + subscriber fan-out); reads proceed concurrently with
//! each other and are only blocked by an in-flight append. Subscriber
//! callbacks run synchronously, inside the write-lock critical section, in
//! registration order, exactly once per event — they must not call back
//! into the store or they will deadlock on the lock they are already
//! inside.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use channel_spec::events::Event;
use channel_spec::{Hash32, ValidationError};
use parking_lot::RwLock;

/// A stable reference to an event's position in the log. Offsets are never
/// invalidated by subsequent appends: offset `k` always refers to the same
/// event for the lifetime of the store.
pub type Offset = u64;

/// A subscriber invoked once per appended event, inside the append's
/// write-lock critical section.
pub trait Subscriber: Send + Sync {
    /// Called with the event and the offset it was appended at.
    fn on_append(&self, offset: Offset, event: &Event);
}

/// Storage-layer errors: validation failures from `channel-spec` plus I/O
/// failures from a durable backing store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The event failed structural or protocol validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// A durable store's I/O failed.
    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

/// The contract a durable, alternate (e.g. key-value-backed) store
/// implementation must satisfy to be a drop-in replacement for
/// `InMemoryEventStore`: append/read/len/subscribe behave identically from
/// the caller's point of view, and recovery reproduces the same sequence
/// of events in the same order.
pub trait EventStore: Send + Sync {
    /// Append an event, returning the offset it was stored at.
    fn append(&self, event: Event) -> Result<Offset, StoreError>;
    /// Read up to `limit` events starting at `offset`.
    fn read(&self, offset: Offset, limit: usize) -> Vec<Event>;
    /// Current log length. Safe to call without blocking on a concurrent
    /// append.
    fn len(&self) -> u64;
    /// Whether the log is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// Read the single event at `offset`, bounds-checked against the log's
    /// current length rather than silently returning nothing past the end.
    fn read_at(&self, offset: Offset) -> Result<Event, ValidationError> {
        let len = self.len();
        if offset >= len {
            return Err(ValidationError::OffsetOutOfBounds { offset, len });
        }
        self.read(offset, 1)
            .into_iter()
            .next()
            .ok_or(ValidationError::OffsetOutOfBounds { offset, len })
    }
    /// Whether an event with this id has already been appended. Exposed so
    /// a collaborator can implement inbound-message deduplication as an
    /// external-boundary policy; the store itself does not deduplicate.
    fn event_exists(&self, id: Hash32) -> bool;
    /// Register a subscriber. Subscribers are invoked in registration
    /// order and see every event appended after they register; they do
    /// not see a backlog of events appended before registration.
    fn subscribe(&self, subscriber: Arc<dyn Subscriber>);
}

#[derive(Default)]
struct Inner {
    events: Vec<Event>,
    subscribers: Vec<Arc<dyn Subscriber>>,
}

/// The canonical, fully in-memory event store.
pub struct InMemoryEventStore {
    inner: RwLock<Inner>,
    len: AtomicU64,
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryEventStore {
    /// Construct an empty store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            len: AtomicU64::new(0),
        }
    }
}

impl EventStore for InMemoryEventStore {
    fn append(&self, event: Event) -> Result<Offset, StoreError> {
        let span = tracing::info_span!(
            "event_store_append",
            event = event.kind.name(),
            offset = tracing::field::Empty,
            latency_ms = tracing::field::Empty
        );
        let _guard = span.enter();
        let start = std::time::Instant::now();

        let mut inner = self.inner.write();
        let offset = inner.events.len() as u64;
        inner.events.push(event);
        // Fires inside the write-lock critical section: subscribers must
        // not re-enter the store, or they deadlock on this same lock.
        for subscriber in &inner.subscribers {
            subscriber.on_append(offset, &inner.events[offset as usize]);
        }
        self.len.store(offset + 1, Ordering::Release);

        let elapsed = start.elapsed().as_millis() as u64;
        span.record("offset", offset);
        span.record("latency_ms", elapsed);
        tracing::debug!("event appended");
        Ok(offset)
    }

    fn read(&self, offset: Offset, limit: usize) -> Vec<Event> {
        let inner = self.inner.read();
        inner
            .events
            .iter()
            .skip(offset as usize)
            .take(limit)
            .cloned()
            .collect()
    }

    fn len(&self) -> u64 {
        self.len.load(Ordering::Acquire)
    }

    fn event_exists(&self, id: Hash32) -> bool {
        self.inner.read().events.iter().any(|e| e.id == id)
    }

    fn subscribe(&self, subscriber: Arc<dyn Subscriber>) {
        self.inner.write().subscribers.push(subscriber);
    }
}

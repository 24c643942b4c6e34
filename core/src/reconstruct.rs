//! Fold-based state reconstruction with snapshot acceleration.
//!
//! A `Projection` is any type that can be built from nothing and folded
//! over events one at a time. `Reconstructor::reconstruct` finds the
//! largest snapshot at or before the requested offset, deserializes it (or
//! starts from `Projection::default()` if none exists), and replays only
//! the tail of events after that point — the "snapshot acceleration" that
//! keeps reconstruction fast on long logs. Snapshots are themselves
//! canonical JSON, so two processes that took a snapshot at the same
//! offset produce byte-identical bytes.

use channel_spec::canonical;
use channel_spec::events::{ChannelEvent, Event, EventKind, ObjectiveEvent, TimestampMillis};
use channel_spec::{Hash32, ValidationError};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::store::{EventStore, Offset};

/// A type that can be built by folding the event log from scratch.
pub trait Projection: Default + Serialize + DeserializeOwned + Clone {
    /// Fold a single event into the projection's state.
    fn apply(&mut self, event: &Event);
}

/// A point-in-time snapshot of a projection's canonical JSON encoding, tied
/// to the offset it was taken at.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// The offset (exclusive upper bound) this snapshot was taken at: it
    /// reflects folding events `[0, offset)`.
    pub offset: Offset,
    /// Canonical JSON encoding of the projection at `offset`.
    pub payload: Vec<u8>,
}

/// An in-memory table of snapshots for a single projection, keyed by
/// offset, sorted ascending.
#[derive(Default)]
pub struct SnapshotManager {
    snapshots: RwLock<Vec<Snapshot>>,
}

impl SnapshotManager {
    /// Construct an empty snapshot table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a snapshot of `projection` as of `offset`.
    pub fn record<P: Projection>(&self, offset: Offset, projection: &P) -> serde_json::Result<()> {
        let payload = canonical::to_canonical_bytes(projection)?;
        let mut snapshots = self.snapshots.write();
        snapshots.push(Snapshot { offset, payload });
        snapshots.sort_by_key(|s| s.offset);
        Ok(())
    }

    /// The largest snapshot at or before `offset`, if any.
    pub fn latest_at_or_before(&self, offset: Offset) -> Option<Snapshot> {
        self.snapshots
            .read()
            .iter()
            .rev()
            .find(|s| s.offset <= offset)
            .cloned()
    }
}

impl Clone for Snapshot {
    fn clone(&self) -> Self {
        Self {
            offset: self.offset,
            payload: self.payload.clone(),
        }
    }
}

/// Reconstructs a `Projection` by folding the event log, accelerated by
/// whatever snapshot is available.
pub struct Reconstructor;

impl Reconstructor {
    /// Fold events `[0, up_to_offset)` into a `P`, starting from the
    /// largest snapshot at or before `up_to_offset` if one exists.
    pub fn reconstruct<P: Projection>(
        store: &dyn EventStore,
        snapshots: &SnapshotManager,
        up_to_offset: Offset,
    ) -> serde_json::Result<P> {
        let (mut projection, start_offset) = match snapshots.latest_at_or_before(up_to_offset) {
            Some(snapshot) => {
                let value: P = serde_json::from_slice(&snapshot.payload)?;
                (value, snapshot.offset)
            }
            None => (P::default(), 0),
        };

        let remaining = (up_to_offset - start_offset) as usize;
        if remaining > 0 {
            for event in store.read(start_offset, remaining) {
                projection.apply(&event);
            }
        }
        Ok(projection)
    }
}

fn objective_event_id(event: &ObjectiveEvent) -> &str {
    match event {
        ObjectiveEvent::ObjectiveCreated { objective_id, .. } => objective_id,
        ObjectiveEvent::ObjectiveApproved { objective_id } => objective_id,
        ObjectiveEvent::ObjectiveRejected { objective_id, .. } => objective_id,
        ObjectiveEvent::ObjectiveCranked { objective_id, .. } => objective_id,
        ObjectiveEvent::ObjectiveCompleted { objective_id, .. } => objective_id,
    }
}

fn channel_event_channel_id(event: &ChannelEvent) -> Hash32 {
    match event {
        ChannelEvent::ChannelCreated { channel_id, .. } => *channel_id,
        ChannelEvent::StateSigned { channel_id, .. } => *channel_id,
        ChannelEvent::StateReceived { channel_id, .. } => *channel_id,
        ChannelEvent::StateSupportedUpdated { channel_id, .. } => *channel_id,
        ChannelEvent::ChannelFinalized { channel_id, .. } => *channel_id,
    }
}

/// An objective's lifecycle status, a linear progression from `Created`
/// except for `Rejected`, which absorbs from `Created` or `Approved`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectiveStatus {
    /// Just proposed, awaiting local approval.
    Created,
    /// Locally approved, eligible to crank.
    Approved,
    /// Locally rejected; will not progress further.
    Rejected,
    /// Has cranked at least once and is not yet terminal.
    Cranked,
    /// Reached its terminal, successful state.
    Completed,
}

/// Typed, reconstructed state for a single objective, folded only over the
/// events that carry its identifier.
#[derive(Debug, Clone)]
pub struct ObjectiveState {
    /// Objective id.
    pub id: String,
    /// Current lifecycle status.
    pub status: ObjectiveStatus,
    /// Number of events folded into this state.
    pub event_count: u64,
    /// Timestamp of the creating event.
    pub created_at: TimestampMillis,
    /// Timestamp of the completing event, if completed.
    pub completed_at: Option<TimestampMillis>,
}

impl ObjectiveState {
    /// Whether this objective has reached a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, ObjectiveStatus::Completed | ObjectiveStatus::Rejected)
    }

    fn apply(&mut self, event: &ObjectiveEvent, timestamp: TimestampMillis) {
        self.event_count += 1;
        match event {
            ObjectiveEvent::ObjectiveCreated { .. } => {}
            ObjectiveEvent::ObjectiveApproved { .. } => {
                if self.status == ObjectiveStatus::Created {
                    self.status = ObjectiveStatus::Approved;
                }
            }
            ObjectiveEvent::ObjectiveRejected { .. } => {
                self.status = ObjectiveStatus::Rejected;
            }
            ObjectiveEvent::ObjectiveCranked { .. } => {
                if !self.is_terminal() {
                    self.status = ObjectiveStatus::Cranked;
                }
            }
            ObjectiveEvent::ObjectiveCompleted { .. } => {
                self.status = ObjectiveStatus::Completed;
                self.completed_at = Some(timestamp);
            }
        }
    }
}

/// Fold the event log into the typed state of the objective identified by
/// `objective_id`. Single pass, filtering out every event that does not
/// carry this identifier.
pub fn reconstruct_objective(
    store: &dyn EventStore,
    objective_id: &str,
) -> Result<ObjectiveState, ValidationError> {
    let mut state: Option<ObjectiveState> = None;
    for event in store.read(0, usize::MAX) {
        let EventKind::Objective(objective_event) = &event.kind else {
            continue;
        };
        if objective_event_id(objective_event) != objective_id {
            continue;
        }
        match &mut state {
            None => match objective_event {
                ObjectiveEvent::ObjectiveCreated { .. } => {
                    state = Some(ObjectiveState {
                        id: objective_id.to_string(),
                        status: ObjectiveStatus::Created,
                        event_count: 1,
                        created_at: event.timestamp,
                        completed_at: None,
                    });
                }
                _ => {
                    return Err(ValidationError::InvalidFirstEvent(
                        event.kind.name().to_string(),
                    ));
                }
            },
            Some(s) => s.apply(objective_event, event.timestamp),
        }
    }
    state.ok_or_else(|| ValidationError::ObjectiveNotFound(objective_id.to_string()))
}

/// A channel's lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    /// `FixedPart` observed, not yet funded.
    Created,
    /// Funded and exchanging signed states.
    Open,
    /// Reached a final, on-chain-finalizable state.
    Finalized,
}

/// Typed, reconstructed state for a single channel, folded only over the
/// events that carry its identifier.
#[derive(Debug, Clone)]
pub struct ChannelState {
    /// Channel id.
    pub id: Hash32,
    /// Current lifecycle status.
    pub status: ChannelStatus,
    /// The highest turn number seen in a locally signed state.
    pub latest_turn_num: u64,
    /// The highest turn number that has become fully supported, if any.
    pub latest_supported_turn: Option<u64>,
    /// Number of events folded into this state.
    pub event_count: u64,
    /// Timestamp of the finalizing event, if finalized.
    pub finalized_at: Option<TimestampMillis>,
}

impl ChannelState {
    fn apply(&mut self, event: &ChannelEvent, timestamp: TimestampMillis) {
        self.event_count += 1;
        if self.status == ChannelStatus::Created && !matches!(event, ChannelEvent::ChannelCreated { .. }) {
            self.status = ChannelStatus::Open;
        }
        match event {
            ChannelEvent::ChannelCreated { .. } => {}
            ChannelEvent::StateSigned { state, .. } => {
                self.latest_turn_num = self.latest_turn_num.max(state.variable_part.turn_num);
            }
            ChannelEvent::StateReceived { .. } => {}
            ChannelEvent::StateSupportedUpdated { turn_num, .. } => {
                let supersedes = match self.latest_supported_turn {
                    None => true,
                    Some(current) => *turn_num > current,
                };
                if supersedes {
                    self.latest_supported_turn = Some(*turn_num);
                }
            }
            ChannelEvent::ChannelFinalized { .. } => {
                self.status = ChannelStatus::Finalized;
                self.finalized_at = Some(timestamp);
            }
        }
    }
}

/// Fold the event log into the typed state of the channel identified by
/// `channel_id`. Single pass, filtering out every event that does not
/// carry this identifier.
pub fn reconstruct_channel(
    store: &dyn EventStore,
    channel_id: Hash32,
) -> Result<ChannelState, ValidationError> {
    let mut state: Option<ChannelState> = None;
    for event in store.read(0, usize::MAX) {
        let EventKind::Channel(channel_event) = &event.kind else {
            continue;
        };
        if channel_event_channel_id(channel_event) != channel_id {
            continue;
        }
        match &mut state {
            None => match channel_event {
                ChannelEvent::ChannelCreated { .. } => {
                    state = Some(ChannelState {
                        id: channel_id,
                        status: ChannelStatus::Created,
                        latest_turn_num: 0,
                        latest_supported_turn: None,
                        event_count: 1,
                        finalized_at: None,
                    });
                }
                _ => {
                    return Err(ValidationError::InvalidFirstEvent(
                        event.kind.name().to_string(),
                    ));
                }
            },
            Some(s) => s.apply(channel_event, event.timestamp),
        }
    }
    state.ok_or(ValidationError::ChannelNotFound(channel_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{EventStore, InMemoryEventStore};
    use channel_spec::events::{EventKind, ObjectiveEvent};
    use channel_spec::Hash32;
    use serde::Deserialize;

    #[derive(Default, Clone, Serialize, Deserialize)]
    struct Counter {
        n: u64,
    }

    impl Projection for Counter {
        fn apply(&mut self, _event: &Event) {
            self.n += 1;
        }
    }

    fn sample_event(n: u64) -> Event {
        Event::new(
            EventKind::Objective(ObjectiveEvent::ObjectiveCreated {
                objective_id: format!("o-{n}"),
                channel_id: Hash32::new([n as u8; 32]),
                protocol: "direct-fund".to_string(),
                participants: vec![],
            }),
            n,
        )
        .unwrap()
    }

    #[test]
    fn reconstructs_from_scratch_without_snapshot() {
        let store = InMemoryEventStore::new();
        for n in 0..5 {
            store.append(sample_event(n)).unwrap();
        }
        let snapshots = SnapshotManager::new();
        let counter: Counter = Reconstructor::reconstruct(&store, &snapshots, 5).unwrap();
        assert_eq!(counter.n, 5);
    }

    #[test]
    fn snapshot_acceleration_matches_full_replay() {
        let store = InMemoryEventStore::new();
        for n in 0..10 {
            store.append(sample_event(n)).unwrap();
        }
        let snapshots = SnapshotManager::new();
        let at_five: Counter = Reconstructor::reconstruct(&store, &snapshots, 5).unwrap();
        snapshots.record(5, &at_five).unwrap();

        let full: Counter = {
            let fresh_snapshots = SnapshotManager::new();
            Reconstructor::reconstruct(&store, &fresh_snapshots, 10).unwrap()
        };
        let accelerated: Counter = Reconstructor::reconstruct(&store, &snapshots, 10).unwrap();

        let full_bytes = channel_spec::canonical::to_canonical_bytes(&full).unwrap();
        let accelerated_bytes = channel_spec::canonical::to_canonical_bytes(&accelerated).unwrap();
        assert_eq!(full_bytes, accelerated_bytes);
    }

    #[test]
    fn picks_the_largest_snapshot_at_or_before_offset() {
        let manager = SnapshotManager::new();
        manager.record(3, &Counter { n: 3 }).unwrap();
        manager.record(7, &Counter { n: 7 }).unwrap();
        let snap = manager.latest_at_or_before(9).unwrap();
        assert_eq!(snap.offset, 7);
        let snap = manager.latest_at_or_before(5).unwrap();
        assert_eq!(snap.offset, 3);
        assert!(manager.latest_at_or_before(2).is_none());
    }

    fn objective_created(id: &str, n: u64) -> Event {
        Event::new(
            EventKind::Objective(ObjectiveEvent::ObjectiveCreated {
                objective_id: id.to_string(),
                channel_id: Hash32::new([n as u8; 32]),
                protocol: "direct-fund".to_string(),
                participants: vec![],
            }),
            n,
        )
        .unwrap()
    }

    #[test]
    fn objective_reconstruction_tracks_status_transitions() {
        let store = InMemoryEventStore::new();
        store.append(objective_created("o-1", 0)).unwrap();
        store
            .append(
                Event::new(
                    EventKind::Objective(ObjectiveEvent::ObjectiveApproved {
                        objective_id: "o-1".to_string(),
                    }),
                    1,
                )
                .unwrap(),
            )
            .unwrap();
        store
            .append(
                Event::new(
                    EventKind::Objective(ObjectiveEvent::ObjectiveCompleted {
                        objective_id: "o-1".to_string(),
                        success: true,
                        final_state_hash: None,
                    }),
                    2,
                )
                .unwrap(),
            )
            .unwrap();

        let state = reconstruct_objective(&store, "o-1").unwrap();
        assert_eq!(state.status, ObjectiveStatus::Completed);
        assert!(state.is_terminal());
        assert_eq!(state.event_count, 3);
        assert_eq!(state.completed_at, Some(2));
    }

    #[test]
    fn objective_reconstruction_filters_unrelated_events() {
        let store = InMemoryEventStore::new();
        store.append(objective_created("o-1", 0)).unwrap();
        store.append(objective_created("o-2", 1)).unwrap();
        let state = reconstruct_objective(&store, "o-1").unwrap();
        assert_eq!(state.event_count, 1);
    }

    #[test]
    fn objective_reconstruction_reports_not_found() {
        let store = InMemoryEventStore::new();
        let err = reconstruct_objective(&store, "missing").unwrap_err();
        assert!(matches!(err, ValidationError::ObjectiveNotFound(_)));
    }

    #[test]
    fn objective_reconstruction_rejects_non_creation_first_event() {
        let store = InMemoryEventStore::new();
        store
            .append(
                Event::new(
                    EventKind::Objective(ObjectiveEvent::ObjectiveApproved {
                        objective_id: "o-1".to_string(),
                    }),
                    0,
                )
                .unwrap(),
            )
            .unwrap();
        let err = reconstruct_objective(&store, "o-1").unwrap_err();
        assert!(matches!(err, ValidationError::InvalidFirstEvent(_)));
    }

    #[test]
    fn channel_reconstruction_reports_not_found() {
        let store = InMemoryEventStore::new();
        let err = reconstruct_channel(&store, Hash32::new([1u8; 32])).unwrap_err();
        assert!(matches!(err, ValidationError::ChannelNotFound(_)));
    }
}

//! Channel core library: the append-only event store, fold-based state
//! reconstruction with snapshot acceleration, the objective/crank engine,
//! channel state validation, Merkle inclusion receipts, and the recovery
//! path that rebuilds state after a restart.
#![deny(missing_docs)]

/// Pure objective/crank state machines: `DirectFund`, `DirectDefund`, and
/// `ConsensusChannel`.
pub mod objective;
/// Disk-backed `EventStore` implementation: WAL, segment compaction, and
/// metadata recovery.
pub mod persist;
/// Merkle inclusion receipts over the event log.
pub mod receipts;
/// Fold-based state reconstruction with snapshot acceleration.
pub mod reconstruct;
/// The read-only restart recovery path.
pub mod recovery;
/// The append-only event store and its `EventStore` contract.
pub mod store;
/// Channel state model invariants: turn progression, participant
/// membership, and signature authenticity.
pub mod validation;

pub use objective::{step, Objective, SideEffect, WaitingFor};
pub use receipts::{compute_merkle_root, MerkleReceipt};
pub use reconstruct::{Projection, Reconstructor, SnapshotManager};
pub use store::{EventStore, InMemoryEventStore, Offset, StoreError, Subscriber};

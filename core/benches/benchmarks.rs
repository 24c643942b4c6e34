use channel_core::receipts::{receipt_for, root_for};
use channel_core::reconstruct::{Projection, Reconstructor, SnapshotManager};
use channel_core::store::{EventStore, InMemoryEventStore};
use channel_spec::events::{Event, EventKind, ObjectiveEvent};
use channel_spec::{Address, Hash32};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde::{Deserialize, Serialize};

fn sample_event(n: u64) -> Event {
    Event::new(
        EventKind::Objective(ObjectiveEvent::ObjectiveCreated {
            objective_id: format!("direct-fund-{n}"),
            channel_id: Hash32::new([n as u8; 32]),
            protocol: "direct-fund".to_string(),
            participants: vec![Address::new([1u8; 20]), Address::new([2u8; 20])],
        }),
        n,
    )
    .unwrap()
}

fn filled_store(n: u64) -> InMemoryEventStore {
    let store = InMemoryEventStore::new();
    for i in 0..n {
        store.append(sample_event(i)).unwrap();
    }
    store
}

fn bench_append_latency(c: &mut Criterion) {
    let store = InMemoryEventStore::new();
    let mut n = 0u64;
    c.bench_function("event_store_append", |b| {
        b.iter(|| {
            store.append(black_box(sample_event(n))).unwrap();
            n += 1;
        });
    });
}

fn bench_read_window(c: &mut Criterion) {
    let store = filled_store(10_000);
    c.bench_function("event_store_read_window", |b| {
        b.iter(|| black_box(store.read(5_000, 100)));
    });
}

#[derive(Default, Clone, Serialize, Deserialize)]
struct Tally {
    n: u64,
}

impl Projection for Tally {
    fn apply(&mut self, _event: &Event) {
        self.n += 1;
    }
}

fn bench_reconstruct_full_fold(c: &mut Criterion) {
    let store = filled_store(10_000);
    let snapshots = SnapshotManager::new();
    c.bench_function("reconstruct_full_fold_10k", |b| {
        b.iter(|| {
            black_box(Reconstructor::reconstruct::<Tally>(&store, &snapshots, 10_000).unwrap())
        });
    });
}

fn bench_reconstruct_snapshot_accelerated(c: &mut Criterion) {
    let store = filled_store(10_000);
    let snapshots = SnapshotManager::new();
    let at_5k: Tally = Reconstructor::reconstruct(&store, &snapshots, 5_000).unwrap();
    snapshots.record(5_000, &at_5k).unwrap();
    c.bench_function("reconstruct_snapshot_accelerated_10k", |b| {
        b.iter(|| {
            black_box(Reconstructor::reconstruct::<Tally>(&store, &snapshots, 10_000).unwrap())
        });
    });
}

fn bench_merkle_root(c: &mut Criterion) {
    let store = filled_store(1_000);
    c.bench_function("merkle_root_1k", |b| {
        b.iter(|| black_box(root_for(&store)));
    });
}

fn bench_merkle_receipt(c: &mut Criterion) {
    let store = filled_store(1_000);
    c.bench_function("merkle_receipt_generation", |b| {
        b.iter(|| black_box(receipt_for(&store, 500)));
    });
}

criterion_group!(
    benches,
    bench_append_latency,
    bench_read_window,
    bench_reconstruct_full_fold,
    bench_reconstruct_snapshot_accelerated,
    bench_merkle_root,
    bench_merkle_receipt,
);
criterion_main!(benches);

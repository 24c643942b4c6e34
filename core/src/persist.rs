//! Disk-backed `EventStore`: a WAL of newly appended events plus a
//! compacted segment file, matching `InMemoryEventStore`'s external
//! behavior exactly (§1's "alternate key-value-backed implementation can
//! be swapped in" promise made concrete). Grounded on the teacher's
//! `PersistentAppendLog`: length-prefixed, checksummed records, periodic
//! compaction, and a metadata file cross-checked on recovery.

use std::fs::{self, File, OpenOptions};
use std::io::{Read as _, Seek, SeekFrom, Write as _};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Context;
use channel_spec::events::Event;
use channel_spec::Hash32;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};

use crate::store::{EventStore, Offset, StoreError, Subscriber};

const DEFAULT_SEGMENT_SIZE: usize = 1024;
const CHECKSUM_DOMAIN: &[u8] = b"channel-core:wal:v1";

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
struct PersistentMetadata {
    length: u64,
}

struct State {
    events: Vec<Event>,
    subscribers: Vec<Arc<dyn Subscriber>>,
}

/// Disk-backed `EventStore`: appends land in a checksummed WAL first, and
/// are periodically folded into a compacted segment file once the WAL
/// reaches `segment_size` records.
pub struct PersistentEventStore {
    state: RwLock<State>,
    len: AtomicU64,
    wal: Mutex<File>,
    segments: Mutex<File>,
    dir: PathBuf,
    meta_path: PathBuf,
    wal_path: PathBuf,
    segment_size: usize,
}

impl PersistentEventStore {
    /// Open (or create) a persistent store at `dir` with the default
    /// segment size.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, StoreError> {
        Self::open_with_segment_size(dir, DEFAULT_SEGMENT_SIZE)
    }

    /// Open (or create) a persistent store at `dir` with a custom segment
    /// size.
    pub fn open_with_segment_size<P: AsRef<Path>>(
        dir: P,
        segment_size: usize,
    ) -> Result<Self, StoreError> {
        let dir = dir.as_ref();
        let segment_size = segment_size.max(1);
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create event store directory {}", dir.display()))?;
        let wal_path = dir.join("append.wal");
        let segments_path = dir.join("segments.bin");
        let meta_path = dir.join("meta.json");

        let mut events = read_records(&segments_path)?;
        events.extend(read_records(&wal_path)?);

        let expected = PersistentMetadata {
            length: events.len() as u64,
        };
        if let Some(on_disk) = read_metadata_file(&meta_path) {
            if on_disk != expected {
                return Err(anyhow::anyhow!("event store metadata mismatch during recovery").into());
            }
        }

        let wal = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&wal_path)
            .with_context(|| format!("failed to open wal {}", wal_path.display()))?;
        let segments = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&segments_path)
            .with_context(|| format!("failed to open segments {}", segments_path.display()))?;

        let store = Self {
            len: AtomicU64::new(events.len() as u64),
            state: RwLock::new(State {
                events,
                subscribers: Vec::new(),
            }),
            wal: Mutex::new(wal),
            segments: Mutex::new(segments),
            dir: dir.to_path_buf(),
            meta_path,
            wal_path,
            segment_size,
        };
        store.persist_metadata()?;
        Ok(store)
    }

    fn persist_metadata(&self) -> Result<(), StoreError> {
        let meta = PersistentMetadata {
            length: self.len.load(Ordering::Acquire),
        };
        let tmp = self.meta_path.with_extension("tmp");
        let encoded = serde_json::to_vec(&meta).context("failed to serialize event store metadata")?;
        fs::write(&tmp, encoded)
            .with_context(|| format!("failed to write metadata {}", tmp.display()))?;
        fs::rename(&tmp, &self.meta_path).with_context(|| {
            format!(
                "failed to atomically persist metadata {} -> {}",
                tmp.display(),
                self.meta_path.display()
            )
        })?;
        Ok(())
    }

    fn write_wal(&self, event: &Event) -> Result<(), StoreError> {
        let mut wal = self.wal.lock();
        let bytes = serde_json::to_vec(event).context("failed to serialize event")?;
        let mut hasher = Keccak256::new();
        hasher.update(CHECKSUM_DOMAIN);
        hasher.update(&bytes);
        let checksum: [u8; 32] = hasher.finalize().into();
        wal.write_all(&(bytes.len() as u32).to_be_bytes())
            .context("failed to write wal length prefix")?;
        wal.write_all(&checksum)
            .context("failed to write wal checksum")?;
        wal.write_all(&bytes)
            .context("failed to write wal body")?;
        wal.flush().context("failed to flush wal")?;
        wal.sync_all().context("failed to sync wal")?;
        Ok(())
    }

    fn compact_segments(&self) -> Result<(), StoreError> {
        let wal_bytes = fs::read(&self.wal_path).unwrap_or_default();
        if wal_bytes.is_empty() {
            return Ok(());
        }
        {
            let mut segments = self.segments.lock();
            segments
                .write_all(&wal_bytes)
                .context("failed to compact wal into segments")?;
            segments.sync_all().context("failed to sync segments")?;
        }
        let mut wal = self.wal.lock();
        wal.set_len(0).context("failed to truncate wal")?;
        wal.seek(SeekFrom::End(0))
            .context("failed to reset wal cursor")?;
        wal.sync_all().context("failed to sync truncated wal")?;
        Ok(())
    }

    /// Combined byte size of the WAL, segment, and metadata files, for
    /// operability reporting.
    pub fn storage_usage_bytes(&self) -> u64 {
        let wal = fs::metadata(&self.wal_path).map(|m| m.len()).unwrap_or(0);
        let seg = fs::metadata(self.dir.join("segments.bin"))
            .map(|m| m.len())
            .unwrap_or(0);
        let meta = fs::metadata(&self.meta_path).map(|m| m.len()).unwrap_or(0);
        wal + seg + meta
    }
}

fn read_metadata_file(path: &Path) -> Option<PersistentMetadata> {
    fs::read(path)
        .ok()
        .and_then(|bytes| serde_json::from_slice(&bytes).ok())
}

fn read_records(path: &Path) -> Result<Vec<Event>, StoreError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut file =
        File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let mut cursor = 0usize;
    let mut out = Vec::new();
    while cursor < buf.len() {
        if cursor + 4 > buf.len() {
            return Err(anyhow::anyhow!("truncated record length in {}", path.display()).into());
        }
        let len = u32::from_be_bytes(buf[cursor..cursor + 4].try_into().unwrap()) as usize;
        cursor += 4;
        if cursor + 32 + len > buf.len() {
            return Err(anyhow::anyhow!("truncated record body in {}", path.display()).into());
        }
        let checksum: [u8; 32] = buf[cursor..cursor + 32].try_into().unwrap();
        cursor += 32;
        let payload = &buf[cursor..cursor + len];
        cursor += len;
        let mut hasher = Keccak256::new();
        hasher.update(CHECKSUM_DOMAIN);
        hasher.update(payload);
        let digest: [u8; 32] = hasher.finalize().into();
        if digest != checksum {
            return Err(anyhow::anyhow!("checksum mismatch in {}", path.display()).into());
        }
        let event: Event =
            serde_json::from_slice(payload).context("failed to decode event from wal")?;
        out.push(event);
    }
    Ok(out)
}

impl EventStore for PersistentEventStore {
    fn append(&self, event: Event) -> Result<Offset, StoreError> {
        let span = tracing::info_span!(
            "persistent_event_store_append",
            event = event.kind.name(),
            offset = tracing::field::Empty
        );
        let _guard = span.enter();

        let mut state = self.state.write();
        let offset = state.events.len() as u64;
        self.write_wal(&event)?;
        state.events.push(event);
        for subscriber in &state.subscribers {
            subscriber.on_append(offset, &state.events[offset as usize]);
        }
        self.len.store(offset + 1, Ordering::Release);
        drop(state);
        self.persist_metadata()?;
        if (offset + 1) as usize % self.segment_size == 0 {
            self.compact_segments()?;
        }
        span.record("offset", offset);
        Ok(offset)
    }

    fn read(&self, offset: Offset, limit: usize) -> Vec<Event> {
        self.state
            .read()
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
        self.state.read().events.iter().any(|e| e.id == id)
    }

    fn subscribe(&self, subscriber: Arc<dyn Subscriber>) {
        self.state.write().subscribers.push(subscriber);
    }
}

use std::collections::BTreeMap;
use std::fs;
use std::ops::Bound;
use chrono::Utc;
use parking_lot::{Mutex, MutexGuard, RwLock, RwLockReadGuard};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use crate::core::error::Result;
use crate::storage::file_lock::FileLock;
use crate::storage::layout::{sync_parent_dir, StorageLayout};
use crate::storage::wal::{SyncMode, WAL};

/// Named keyspaces inside the primary file
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Bucket {
    Documents,
    TimeIndex,
    TitleIndex,
    JournalIndex,
    References,
    DocReferences,
    Scheduled,
    BlockSchedules,
    DocBlocks,
    ManualSchedules,
    Recents,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Mutation {
    Put { bucket: Bucket, key: Vec<u8>, value: Vec<u8> },
    Delete { bucket: Bucket, key: Vec<u8> },
}

/// One committed write transaction, stored as a single log frame
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CommitBatch {
    sequence: u64,
    committed_at_ms: i64,
    mutations: Vec<Mutation>,
}

type Tree = BTreeMap<Vec<u8>, Vec<u8>>;

#[derive(Default)]
struct KvState {
    buckets: BTreeMap<Bucket, Tree>,
}

impl KvState {
    fn apply(&mut self, mutations: Vec<Mutation>) {
        for mutation in mutations {
            match mutation {
                Mutation::Put { bucket, key, value } => {
                    self.buckets.entry(bucket).or_default().insert(key, value);
                }
                Mutation::Delete { bucket, key } => {
                    if let Some(tree) = self.buckets.get_mut(&bucket) {
                        tree.remove(&key);
                    }
                }
            }
        }
    }

    fn tree(&self, bucket: Bucket) -> Option<&Tree> {
        self.buckets.get(&bucket)
    }
}

struct KvWriter {
    wal: WAL,
    sequence: u64,
    frames: usize,
}

/// Durable ordered key-value store with bucketed keyspaces.
///
/// Readers share the committed state; a single writer at a time buffers its
/// changes and publishes them atomically after they reach the log.
pub struct KvStore {
    layout: StorageLayout,
    state: RwLock<KvState>,
    writer: Mutex<KvWriter>,
    compaction_threshold: u64,
    _lock: FileLock,
}

impl KvStore {
    pub fn open(layout: StorageLayout, sync_mode: SyncMode, compaction_threshold: u64) -> Result<Self> {
        let lock = FileLock::acquire(&layout.lock_path)?;

        let mut wal = WAL::open(&layout.data_path, sync_mode)?;
        let batches: Vec<CommitBatch> = wal.read_entries()?;

        let mut state = KvState::default();
        let frames = batches.len();
        let mut sequence = 0;
        for batch in batches {
            sequence = batch.sequence;
            state.apply(batch.mutations);
        }

        info!(
            path = %layout.data_path.display(),
            frames,
            sequence,
            "opened primary store"
        );

        Ok(KvStore {
            layout,
            state: RwLock::new(state),
            writer: Mutex::new(KvWriter { wal, sequence, frames }),
            compaction_threshold,
            _lock: lock,
        })
    }

    pub fn begin_read(&self) -> ReadTxn<'_> {
        ReadTxn {
            state: self.state.read(),
        }
    }

    pub fn begin_write(&self) -> WriteTxn<'_> {
        WriteTxn {
            store: self,
            writer: self.writer.lock(),
            pending: BTreeMap::new(),
        }
    }

    /// Run `f` in a read transaction
    pub fn view<T>(&self, f: impl FnOnce(&ReadTxn<'_>) -> Result<T>) -> Result<T> {
        let tx = self.begin_read();
        f(&tx)
    }

    /// Run `f` in a write transaction; commits on `Ok`, discards every
    /// buffered change on `Err`
    pub fn update<T>(&self, f: impl FnOnce(&mut WriteTxn<'_>) -> Result<T>) -> Result<T> {
        let mut tx = self.begin_write();
        let out = f(&mut tx)?;
        tx.commit()?;
        Ok(out)
    }

    /// Flush and rewrite the log down to the live data
    pub fn close(self) -> Result<()> {
        let mut writer = self.writer.lock();
        if writer.frames > 1 {
            self.compact(&mut writer)?;
        }
        writer.wal.sync()?;
        Ok(())
    }

    fn compact(&self, writer: &mut MutexGuard<'_, KvWriter>) -> Result<()> {
        let snapshot = {
            let state = self.state.read();
            let mutations = state.buckets.iter()
                .flat_map(|(bucket, tree)| {
                    tree.iter().map(move |(k, v)| Mutation::Put {
                        bucket: *bucket,
                        key: k.clone(),
                        value: v.clone(),
                    })
                })
                .collect();
            CommitBatch {
                sequence: writer.sequence,
                committed_at_ms: Utc::now().timestamp_millis(),
                mutations,
            }
        };

        let before = writer.wal.position;
        WAL::write_fresh(&self.layout.compact_path, &[snapshot])?;

        // Open the replacement before publishing it; the handle follows the
        // inode through the rename, so the writer never points at an
        // unlinked file
        let mut fresh = match WAL::open(&self.layout.compact_path, writer.wal.sync_mode)
            .and_then(|wal| {
                fs::rename(&self.layout.compact_path, &self.layout.data_path)?;
                Ok(wal)
            }) {
            Ok(wal) => wal,
            Err(e) => {
                let _ = fs::remove_file(&self.layout.compact_path);
                return Err(e);
            }
        };
        fresh.path = self.layout.data_path.clone();
        writer.wal = fresh;
        writer.frames = 1;
        sync_parent_dir(&self.layout.data_path)?;

        debug!(before_bytes = before, after_bytes = writer.wal.position, "compacted primary log");
        Ok(())
    }
}

pub struct ReadTxn<'a> {
    state: RwLockReadGuard<'a, KvState>,
}

impl<'a> ReadTxn<'a> {
    pub fn get(&self, bucket: Bucket, key: &[u8]) -> Option<&[u8]> {
        self.state.tree(bucket)
            .and_then(|tree| tree.get(key))
            .map(|v| v.as_slice())
    }

    /// All pairs of a bucket in key order
    pub fn iter(&self, bucket: Bucket) -> impl Iterator<Item = (&[u8], &[u8])> + '_ {
        self.state.tree(bucket)
            .into_iter()
            .flat_map(|tree| tree.iter())
            .map(|(k, v)| (k.as_slice(), v.as_slice()))
    }

    /// Pairs with `from <= key <= to`, in key order
    pub fn range(&self, bucket: Bucket, from: &[u8], to: &[u8]) -> impl Iterator<Item = (&[u8], &[u8])> + '_ {
        let bounds = (Bound::Included(from.to_vec()), Bound::Included(to.to_vec()));
        self.state.tree(bucket)
            .into_iter()
            .flat_map(move |tree| tree.range::<Vec<u8>, _>(bounds.clone()))
            .map(|(k, v)| (k.as_slice(), v.as_slice()))
    }

    pub fn len(&self, bucket: Bucket) -> usize {
        self.state.tree(bucket).map(|t| t.len()).unwrap_or(0)
    }
}

pub struct WriteTxn<'a> {
    store: &'a KvStore,
    writer: MutexGuard<'a, KvWriter>,
    pending: BTreeMap<(Bucket, Vec<u8>), Option<Vec<u8>>>,
}

impl<'a> WriteTxn<'a> {
    /// Read through this transaction's own uncommitted writes
    pub fn get(&self, bucket: Bucket, key: &[u8]) -> Option<Vec<u8>> {
        if let Some(pending) = self.pending.get(&(bucket, key.to_vec())) {
            return pending.clone();
        }
        let state = self.store.state.read();
        state.tree(bucket).and_then(|tree| tree.get(key)).cloned()
    }

    pub fn put(&mut self, bucket: Bucket, key: impl Into<Vec<u8>>, value: Vec<u8>) {
        self.pending.insert((bucket, key.into()), Some(value));
    }

    pub fn delete(&mut self, bucket: Bucket, key: impl Into<Vec<u8>>) {
        self.pending.insert((bucket, key.into()), None);
    }

    pub fn commit(mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let mutations: Vec<Mutation> = std::mem::take(&mut self.pending)
            .into_iter()
            .map(|((bucket, key), value)| match value {
                Some(value) => Mutation::Put { bucket, key, value },
                None => Mutation::Delete { bucket, key },
            })
            .collect();

        let batch = CommitBatch {
            sequence: self.writer.sequence + 1,
            committed_at_ms: Utc::now().timestamp_millis(),
            mutations,
        };
        self.writer.wal.append(&batch)?;
        self.writer.sequence = batch.sequence;
        self.writer.frames += 1;

        self.store.state.write().apply(batch.mutations);

        if self.writer.wal.position > self.store.compaction_threshold {
            // The batch is already durable; a failed rewrite only leaves a longer log
            if let Err(e) = self.store.compact(&mut self.writer) {
                warn!(error = %e, "primary log compaction failed");
            }
        }

        Ok(())
    }
}

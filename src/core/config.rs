use std::path::PathBuf;
use std::time::Duration;
use crate::storage::wal::SyncMode;

#[derive(Debug, Clone)]
pub struct Config {
    /// Primary data file. The search index lives next to it in `<path>.search`.
    pub storage_path: PathBuf,
    pub sync_mode: SyncMode,
    /// Rewrite the primary log once it grows past this many bytes
    pub compaction_threshold_bytes: u64,

    pub recents_capacity: usize,

    // Search indexing
    pub index_retry_attempts: u32,
    pub retry_base_delay: Duration,     // delay before attempt n+1 is n² × base
    pub search_result_limit: usize,
    pub title_boost: f32,
    /// Fold the search op log into a new snapshot past this many bytes
    pub search_snapshot_threshold_bytes: u64,
}

impl Config {
    pub fn new(storage_path: impl Into<PathBuf>) -> Self {
        Config {
            storage_path: storage_path.into(),
            ..Config::default()
        }
    }

    pub fn with_sync_mode(mut self, sync_mode: SyncMode) -> Self {
        self.sync_mode = sync_mode;
        self
    }

    pub fn with_compaction_threshold(mut self, bytes: u64) -> Self {
        self.compaction_threshold_bytes = bytes;
        self
    }

    pub fn with_recents_capacity(mut self, capacity: usize) -> Self {
        self.recents_capacity = capacity;
        self
    }

    pub fn with_retry(mut self, attempts: u32, base_delay: Duration) -> Self {
        self.index_retry_attempts = attempts.max(1);
        self.retry_base_delay = base_delay;
        self
    }

    pub fn with_search_snapshot_threshold(mut self, bytes: u64) -> Self {
        self.search_snapshot_threshold_bytes = bytes;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            storage_path: PathBuf::from("./journal.db"),
            sync_mode: SyncMode::Immediate,
            compaction_threshold_bytes: 8 * 1024 * 1024,   // 8MB of log before rewrite

            recents_capacity: 100,

            index_retry_attempts: 3,
            retry_base_delay: Duration::from_millis(100),
            search_result_limit: 10_000,                   // effectively "all matches"
            title_boost: 2.0,
            search_snapshot_threshold_bytes: 512 * 1024,
        }
    }
}

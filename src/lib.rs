pub mod core;
pub mod storage;
pub mod analysis;
pub mod index;
pub mod search;

pub use crate::core::config::Config;
pub use crate::core::database::Database;
pub use crate::core::error::{Error, ErrorKind, Result};
pub use crate::core::types::{
    Block, BlockId, Document, DocumentId, DocumentSummary, IndexHealth, ReferenceContext,
    ScheduledTask, TaskId, UpcomingTask,
};
pub use crate::storage::wal::SyncMode;

/*
┌──────────────────────────────────────────────────────────────────────────────────────┐
│                              JOURNALDB ARCHITECTURE                                   │
└──────────────────────────────────────────────────────────────────────────────────────┘

┌──────────────────────────────────── CORE LAYER ──────────────────────────────────────┐
│                                                                                       │
│  ┌───────────────────────────────────────────────────────────────────────────────┐   │
│  │                              struct Database                                   │   │
│  │  config: Config                  // paths, sync mode, retry + search knobs     │   │
│  │  layout: StorageLayout           // <path>, .lock, .compact, .search/          │   │
│  │  kv: KvStore                     // documents + secondary indexes              │   │
│  │  recents: RecentsIndex           // bounded MRU list                           │   │
│  │  search: SearchCoordinator       // RwLock<Option<SearchEngine>> + failures    │   │
│  └───────────────────────────────────────────────────────────────────────────────┘   │
│                                                                                       │
│  Document { id, title, date: DateTime<FixedOffset>, is_journal, blocks }              │
│  Block { id, content, indent }     ScheduledTask { id, doc_id, block_id, time }        │
└───────────────────────────────────────────────────────────────────────────────────────┘

┌────────────────────────────────── STORAGE LAYER ─────────────────────────────────────┐
│                                                                                       │
│  KvStore ──commit──> WAL frame [len u32][crc32 u32][bincode CommitBatch]               │
│     │                                                                                 │
│     ├── RwLock<KvState>     buckets: BTreeMap<Vec<u8>, Vec<u8>> per Bucket            │
│     ├── Mutex<KvWriter>     one write transaction at a time                           │
│     └── FileLock            flock on <path>.lock                                      │
│                                                                                       │
│  compaction: live state ──> <path>.compact ──rename──> <path>                          │
└───────────────────────────────────────────────────────────────────────────────────────┘

┌────────────────────────────── SECONDARY INDEXES (same txn) ───────────────────────────┐
│                                                                                       │
│  TitleIndex      lowercase(title)      -> id       (unique)                           │
│  TimeIndex       RFC 3339 UTC (ns)     -> id                                          │
│  JournalIndex    YYYY-MM-DD            -> id       (journals only)                    │
│  ReferencesIndex lowercase([[title]])  -> {ids}    + per-doc snapshot for diffing     │
│  ScheduledIndex  YYYY-MM-DD            -> [tasks]  + per-block snapshot for diffing   │
│  RecentsIndex    "recents_list"        -> [ids]                                       │
└───────────────────────────────────────────────────────────────────────────────────────┘

┌──────────────────────────────────── SEARCH LAYER ────────────────────────────────────┐
│                                                                                       │
│  save ──commit──> SearchCoordinator::index ──retry n² × base──> FailedIndexTable      │
│                         │ read lock                                                   │
│                         v                                                             │
│  SearchEngine { state: RwLock<IndexState>, log: Mutex<WAL> }                          │
│     IndexState: title: FieldIndex, content: FieldIndex                                │
│     FieldIndex: term -> PostingList { docs: RoaringBitmap, positions }                │
│     disk: segment.bin (crc32 + lz4 bincode) + ops.log                                 │
│                                                                                       │
│  query: "phrase" -> positional match   token -> FuzzyAutomaton (Levenshtein DFA)      │
│         each clause = title^2 OR content, clauses ANDed                               │
└───────────────────────────────────────────────────────────────────────────────────────┘
*/

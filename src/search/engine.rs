use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use parking_lot::{Mutex, RwLock};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;
use crate::analysis::analyzer::Analyzer;
use crate::analysis::token::Token;
use crate::core::config::Config;
use crate::core::error::{Error, ErrorKind, Result};
use crate::search::fuzzy::FuzzyAutomaton;
use crate::search::inverted::{FieldIndex, Hits};
use crate::search::query::{Field, FieldQuery, SearchQuery};
use crate::storage::codec::DocumentRecord;
use crate::storage::layout::sync_parent_dir;
use crate::storage::wal::{SyncMode, WAL};

const SEGMENT_FILE: &str = "segment.bin";
const SEGMENT_TMP_FILE: &str = "segment.bin.tmp";
const LOG_FILE: &str = "ops.log";
const SEGMENT_VERSION: u32 = 1;
const DEFAULT_SNAPSHOT_THRESHOLD: u64 = 512 * 1024;

/// Flattened form of a document as the full-text index sees it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedDocument {
    pub id: Uuid,
    pub title: String,
    pub content: String,  // Block contents joined by '\n'
    pub date: String,
}

impl IndexedDocument {
    pub fn from_record(record: &DocumentRecord) -> Self {
        let content = record.blocks.iter()
            .map(|b| b.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        IndexedDocument {
            id: record.id,
            title: record.title.clone(),
            content,
            date: record.date.clone(),
        }
    }
}

/// A document after analysis, ready to be applied under the write lock
pub struct AnalyzedDocument {
    pub doc: IndexedDocument,
    pub title_tokens: Vec<Token>,
    pub content_tokens: Vec<Token>,
}

#[derive(Serialize, Deserialize)]
enum IndexOp {
    Index(IndexedDocument),
    Delete(Uuid),
}

#[derive(Serialize, Deserialize)]
struct SegmentSnapshot {
    version: u32,
    documents: Vec<IndexedDocument>,
}

/// How an engine persists itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    pub sync_mode: SyncMode,
    /// Fold the op log into a fresh snapshot once it grows past this
    pub snapshot_threshold_bytes: u64,
}

impl EngineOptions {
    pub fn new(sync_mode: SyncMode) -> Self {
        EngineOptions {
            sync_mode,
            snapshot_threshold_bytes: DEFAULT_SNAPSHOT_THRESHOLD,
        }
    }

    pub fn with_snapshot_threshold(mut self, bytes: u64) -> Self {
        self.snapshot_threshold_bytes = bytes;
        self
    }
}

impl From<&Config> for EngineOptions {
    fn from(config: &Config) -> Self {
        EngineOptions::new(config.sync_mode)
            .with_snapshot_threshold(config.search_snapshot_threshold_bytes)
    }
}

/// Boundary to the full-text engine.
///
/// The store only needs these operations: index or replace a flattened
/// document, delete it, answer a parsed query with ranked ids, and be
/// closed or thrown away for a rebuild. Ranking, term expansion and the
/// on-disk format belong to the implementation. [`SearchEngine`] is the
/// bundled in-process one; any other full-text library can sit behind
/// this trait without touching the coordinator or the primary store.
pub trait SearchBackend: Send + Sync + Sized {
    /// Open the index stored in `dir`, creating it if absent
    fn open(dir: &Path, options: EngineOptions) -> Result<Self>;

    /// Index or replace one document
    fn index_doc(&self, doc: &IndexedDocument) -> Result<()>;

    fn index_batch(&self, docs: Vec<IndexedDocument>) -> Result<()> {
        for doc in &docs {
            self.index_doc(doc)?;
        }
        Ok(())
    }

    fn delete_doc(&self, id: Uuid) -> Result<()>;

    fn search(&self, query: &SearchQuery, limit: usize) -> Result<Vec<Uuid>>;

    /// False once a write left the on-disk state unknown
    fn is_usable(&self) -> bool;

    fn close(self) -> Result<()>;

    fn delete_dir(dir: &Path) -> Result<()>;
}

#[derive(Default)]
struct IndexState {
    ordinals: HashMap<Uuid, u32>,
    documents: HashMap<u32, IndexedDocument>,
    next_ordinal: u32,
    title: FieldIndex,
    content: FieldIndex,
}

impl IndexState {
    fn insert(&mut self, analyzed: AnalyzedDocument) {
        let ordinal = match self.ordinals.get(&analyzed.doc.id) {
            Some(ordinal) => *ordinal,
            None => {
                let ordinal = self.next_ordinal;
                self.next_ordinal += 1;
                self.ordinals.insert(analyzed.doc.id, ordinal);
                ordinal
            }
        };

        self.title.add_document(ordinal, &analyzed.title_tokens);
        self.content.add_document(ordinal, &analyzed.content_tokens);
        self.documents.insert(ordinal, analyzed.doc);
    }

    fn remove(&mut self, id: &Uuid) -> bool {
        let Some(ordinal) = self.ordinals.remove(id) else {
            return false;
        };
        self.title.remove_document(ordinal);
        self.content.remove_document(ordinal);
        self.documents.remove(&ordinal);
        true
    }

    fn field(&self, field: Field) -> &FieldIndex {
        match field {
            Field::Title => &self.title,
            Field::Content => &self.content,
        }
    }

    fn evaluate(&self, leaf: &FieldQuery) -> Hits {
        let hits = match leaf {
            FieldQuery::Phrase { field, terms, .. } => self.field(*field).phrase(terms),
            FieldQuery::Fuzzy { field, term, .. } => {
                self.field(*field).fuzzy(&FuzzyAutomaton::for_term(term.as_str()))
            }
        };
        hits.scaled(leaf.boost())
    }
}

/// In-process positional index over `title` and `content`.
///
/// Durable as a compressed snapshot (`segment.bin`) plus a log of the
/// operations applied since (`ops.log`). The log is folded into a new
/// snapshot when it passes the size threshold, after a replay on open, and
/// on close.
pub struct SearchEngine {
    dir: PathBuf,
    analyzer: Analyzer,
    state: RwLock<IndexState>,
    log: Mutex<WAL>,
    snapshot_threshold: u64,
    poisoned: AtomicBool,
}

impl SearchEngine {
    pub fn analyze(&self, doc: IndexedDocument) -> AnalyzedDocument {
        AnalyzedDocument {
            title_tokens: self.analyzer.analyze(&doc.title),
            content_tokens: self.analyzer.analyze(&doc.content),
            doc,
        }
    }

    pub fn doc_count(&self) -> usize {
        self.state.read().ordinals.len()
    }

    fn append(&self, log: &mut WAL, op: &IndexOp) -> Result<()> {
        if self.poisoned.load(Ordering::Acquire) {
            return Err(Error::new(
                ErrorKind::InvalidState,
                format!("search index at {} needs a rebuild", self.dir.display()),
            ));
        }

        log.append(op).map_err(|e| {
            if e.kind == ErrorKind::Corrupt {
                self.poisoned.store(true, Ordering::Release);
            }
            Error::new(ErrorKind::IndexingFailure, e.to_string())
        })
    }

    /// Log then apply; the log lock is held across both so replay order
    /// matches apply order
    fn apply(&self, analyzed: AnalyzedDocument) -> Result<()> {
        let mut log = self.log.lock();
        self.append(&mut log, &IndexOp::Index(analyzed.doc.clone()))?;
        self.state.write().insert(analyzed);
        self.fold_if_large(&mut log);
        Ok(())
    }

    /// Snapshot the current state and empty the log. Callers hold the log
    /// lock, so no logged op can be missing from the snapshot.
    fn fold_log(&self, log: &mut WAL) -> Result<()> {
        self.write_snapshot()?;
        log.truncate()
    }

    fn fold_if_large(&self, log: &mut WAL) {
        if log.position <= self.snapshot_threshold {
            return;
        }
        let before = log.position;
        // The op is already logged; a failed fold only leaves a longer log
        match self.fold_log(log) {
            Ok(()) => debug!(dir = %self.dir.display(), before_bytes = before, "search log folded"),
            Err(e) => warn!(dir = %self.dir.display(), error = %e, "search log fold failed"),
        }
    }

    fn write_snapshot(&self) -> Result<()> {
        let state = self.state.read();
        let mut documents: Vec<IndexedDocument> = state.documents.values().cloned().collect();
        documents.sort_by_key(|d| d.id);

        let snapshot = SegmentSnapshot { version: SEGMENT_VERSION, documents };
        let data = bincode::serialize(&snapshot)?;
        let compressed = lz4_flex::compress_prepend_size(&data);

        let mut frame = Vec::with_capacity(4 + compressed.len());
        frame.extend_from_slice(&crc32fast::hash(&compressed).to_le_bytes());
        frame.extend_from_slice(&compressed);

        let tmp = self.dir.join(SEGMENT_TMP_FILE);
        fs::write(&tmp, &frame)?;
        fs::File::open(&tmp)?.sync_all()?;
        fs::rename(&tmp, self.dir.join(SEGMENT_FILE))?;
        sync_parent_dir(&tmp)?;

        debug!(
            dir = %self.dir.display(),
            documents = snapshot.documents.len(),
            bytes = frame.len(),
            "search segment written"
        );
        Ok(())
    }
}

fn read_snapshot(path: &Path) -> Result<Vec<IndexedDocument>> {
    let frame = match fs::read(path) {
        Ok(frame) => frame,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    if frame.len() < 4 {
        return Err(Error::corrupt(format!("{}: truncated segment", path.display())));
    }
    let (crc, compressed) = frame.split_at(4);
    let crc = u32::from_le_bytes([crc[0], crc[1], crc[2], crc[3]]);
    if crc32fast::hash(compressed) != crc {
        return Err(Error::corrupt(format!("{}: segment checksum mismatch", path.display())));
    }

    let data = lz4_flex::decompress_size_prepended(compressed)
        .map_err(|e| Error::corrupt(format!("{}: {}", path.display(), e)))?;
    let snapshot: SegmentSnapshot = bincode::deserialize(&data)?;
    if snapshot.version != SEGMENT_VERSION {
        return Err(Error::corrupt(format!(
            "{}: unsupported segment version {}", path.display(), snapshot.version
        )));
    }
    Ok(snapshot.documents)
}

impl SearchBackend for SearchEngine {
    fn open(dir: &Path, options: EngineOptions) -> Result<Self> {
        fs::create_dir_all(dir)?;

        let engine = SearchEngine {
            dir: dir.to_path_buf(),
            analyzer: Analyzer::standard(),
            state: RwLock::new(IndexState::default()),
            log: Mutex::new(WAL::open(&dir.join(LOG_FILE), options.sync_mode)?),
            snapshot_threshold: options.snapshot_threshold_bytes,
            poisoned: AtomicBool::new(false),
        };

        let documents = read_snapshot(&dir.join(SEGMENT_FILE))?;
        let ops: Vec<IndexOp> = engine.log.lock().read_entries()?;
        let (snapshot_docs, replayed) = (documents.len(), ops.len());

        let analyzed: Vec<AnalyzedDocument> = documents.into_par_iter()
            .map(|doc| engine.analyze(doc))
            .collect();
        {
            let mut state = engine.state.write();
            for doc in analyzed {
                state.insert(doc);
            }
            for op in ops {
                match op {
                    IndexOp::Index(doc) => state.insert(engine.analyze(doc)),
                    IndexOp::Delete(id) => {
                        state.remove(&id);
                    }
                }
            }
        }

        // Otherwise sessions that never close would replay an ever longer log
        if replayed > 0 {
            if let Err(e) = engine.fold_log(&mut engine.log.lock()) {
                warn!(dir = %dir.display(), error = %e, "could not fold replayed search log");
            }
        }

        info!(
            dir = %dir.display(),
            snapshot_docs,
            replayed,
            documents = engine.doc_count(),
            "search index opened"
        );
        Ok(engine)
    }

    fn index_doc(&self, doc: &IndexedDocument) -> Result<()> {
        let analyzed = self.analyze(doc.clone());
        self.apply(analyzed)
    }

    fn index_batch(&self, docs: Vec<IndexedDocument>) -> Result<()> {
        // Analysis is the costly part and needs no lock
        let analyzed: Vec<AnalyzedDocument> = docs.into_par_iter()
            .map(|doc| self.analyze(doc))
            .collect();

        for doc in analyzed {
            self.apply(doc)?;
        }
        Ok(())
    }

    fn delete_doc(&self, id: Uuid) -> Result<()> {
        let mut log = self.log.lock();
        self.append(&mut log, &IndexOp::Delete(id))?;
        if !self.state.write().remove(&id) {
            debug!(%id, "delete of unindexed document");
        }
        self.fold_if_large(&mut log);
        Ok(())
    }

    fn search(&self, query: &SearchQuery, limit: usize) -> Result<Vec<Uuid>> {
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let state = self.state.read();
        let mut result: Option<Hits> = None;

        for clause in &query.clauses {
            let mut clause_hits = Hits::default();
            for leaf in &clause.alternatives {
                clause_hits.merge(state.evaluate(leaf));
            }

            match result.as_mut() {
                Some(acc) => acc.intersect(&clause_hits),
                None => result = Some(clause_hits),
            }
            if result.as_ref().is_some_and(|r| r.docs.is_empty()) {
                break;
            }
        }

        let Some(hits) = result else {
            return Ok(Vec::new());
        };

        let mut ranked: Vec<(Uuid, f32)> = hits.docs.iter()
            .filter_map(|ordinal| {
                let doc = state.documents.get(&ordinal)?;
                Some((doc.id, hits.scores.get(&ordinal).copied().unwrap_or(0.0)))
            })
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(limit);

        Ok(ranked.into_iter().map(|(id, _)| id).collect())
    }

    fn is_usable(&self) -> bool {
        !self.poisoned.load(Ordering::Acquire)
    }

    fn close(self) -> Result<()> {
        if !self.is_usable() {
            warn!(dir = %self.dir.display(), "closing damaged search index without snapshot");
            return Ok(());
        }

        self.fold_log(&mut self.log.lock())?;
        info!(dir = %self.dir.display(), documents = self.doc_count(), "search index closed");
        Ok(())
    }

    fn delete_dir(dir: &Path) -> Result<()> {
        match fs::remove_dir_all(dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::query::QueryParser;

    fn doc(title: &str, content: &str) -> IndexedDocument {
        IndexedDocument {
            id: Uuid::new_v4(),
            title: title.to_string(),
            content: content.to_string(),
            date: "2024-05-01T09:00:00Z".to_string(),
        }
    }

    fn search(engine: &SearchEngine, q: &str) -> Vec<Uuid> {
        engine.search(&QueryParser::new(2.0).parse(q), 10_000).unwrap()
    }

    #[test]
    fn title_hits_rank_first() {
        let dir = tempfile::tempdir().unwrap();
        let engine = SearchEngine::open(dir.path(), EngineOptions::new(SyncMode::None)).unwrap();
        let in_content = doc("Groceries", "buy kiwi and bread");
        let in_title = doc("Kiwi", "fruit notes");
        engine.index_doc(&in_content).unwrap();
        engine.index_doc(&in_title).unwrap();

        assert_eq!(search(&engine, "kiwi"), vec![in_title.id, in_content.id]);
    }

    #[test]
    fn clauses_are_conjunctive() {
        let dir = tempfile::tempdir().unwrap();
        let engine = SearchEngine::open(dir.path(), EngineOptions::new(SyncMode::None)).unwrap();
        let both = doc("Trip", "pack the tent and the stove");
        let one = doc("Shed", "the tent is torn");
        engine.index_doc(&both).unwrap();
        engine.index_doc(&one).unwrap();

        assert_eq!(search(&engine, "tent stove"), vec![both.id]);
        assert_eq!(search(&engine, r#""the tent""#).len(), 2);
        assert_eq!(search(&engine, r#""tent the""#), Vec::<Uuid>::new());
        assert!(search(&engine, "").is_empty());
    }

    #[test]
    fn reindexing_same_id_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let engine = SearchEngine::open(dir.path(), EngineOptions::new(SyncMode::None)).unwrap();
        let mut d = doc("Draft", "original words");
        engine.index_doc(&d).unwrap();
        d.content = "rewritten sentence".to_string();
        engine.index_doc(&d).unwrap();

        assert_eq!(engine.doc_count(), 1);
        assert!(search(&engine, r#""original words""#).is_empty());
        assert_eq!(search(&engine, "rewritten"), vec![d.id]);
    }

    #[test]
    fn survives_reopen_with_and_without_close() {
        let dir = tempfile::tempdir().unwrap();
        let kept = doc("Kept", "persistent content");
        let dropped = doc("Dropped", "temporary content");

        let engine = SearchEngine::open(dir.path(), EngineOptions::new(SyncMode::Immediate)).unwrap();
        engine.index_doc(&kept).unwrap();
        engine.close().unwrap();

        // Second session ends without close; only the op log has its changes
        let engine = SearchEngine::open(dir.path(), EngineOptions::new(SyncMode::Immediate)).unwrap();
        engine.index_doc(&dropped).unwrap();
        engine.delete_doc(dropped.id).unwrap();
        drop(engine);

        let engine = SearchEngine::open(dir.path(), EngineOptions::new(SyncMode::Immediate)).unwrap();
        assert_eq!(engine.doc_count(), 1);
        assert_eq!(search(&engine, "content"), vec![kept.id]);
    }

    #[test]
    fn op_log_is_folded_past_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let options = EngineOptions::new(SyncMode::None).with_snapshot_threshold(64 * 1024);
        let engine = SearchEngine::open(dir.path(), options).unwrap();

        let mut d = doc("Busy page", &"lorem ipsum dolor ".repeat(600));
        for i in 0..200 {
            d.title = format!("Busy page {}", i);
            engine.index_doc(&d).unwrap();
        }
        let log_len = fs::metadata(dir.path().join(LOG_FILE)).unwrap().len();
        assert!(log_len <= 64 * 1024 + 16 * 1024, "op log grew to {} bytes", log_len);
        drop(engine);

        let engine = SearchEngine::open(dir.path(), options).unwrap();
        assert_eq!(engine.doc_count(), 1);
        assert_eq!(search(&engine, "\"busy page 199\""), vec![d.id]);
    }

    #[test]
    fn replayed_log_is_folded_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let d = doc("Unclosed", "session ended abruptly");

        let engine = SearchEngine::open(dir.path(), EngineOptions::new(SyncMode::None)).unwrap();
        engine.index_doc(&d).unwrap();
        drop(engine);
        assert!(fs::metadata(dir.path().join(LOG_FILE)).unwrap().len() > 0);

        let engine = SearchEngine::open(dir.path(), EngineOptions::new(SyncMode::None)).unwrap();
        assert_eq!(fs::metadata(dir.path().join(LOG_FILE)).unwrap().len(), 0);
        assert!(dir.path().join(SEGMENT_FILE).exists());
        assert_eq!(search(&engine, "abruptly"), vec![d.id]);
    }

    #[test]
    fn damaged_segment_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let engine = SearchEngine::open(dir.path(), EngineOptions::new(SyncMode::None)).unwrap();
        engine.index_doc(&doc("A", "b")).unwrap();
        engine.close().unwrap();

        let path = dir.path().join(SEGMENT_FILE);
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        fs::write(&path, bytes).unwrap();

        let err = SearchEngine::open(dir.path(), EngineOptions::new(SyncMode::None)).err().unwrap();
        assert_eq!(err.kind, ErrorKind::Corrupt);
    }

    #[test]
    fn delete_dir_tolerates_missing() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("idx");
        SearchEngine::open(&target, EngineOptions::new(SyncMode::None)).unwrap().close().unwrap();
        SearchEngine::delete_dir(&target).unwrap();
        assert!(!target.exists());
        SearchEngine::delete_dir(&target).unwrap();
    }
}

use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};
use crate::core::config::Config;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{DocumentId, IndexHealth};
use crate::search::engine::{EngineOptions, IndexedDocument, SearchBackend, SearchEngine};
use crate::search::health::{compute_health, EngineState, FailedIndexTable};
use crate::search::query::QueryParser;

/// Owns the search engine handle.
///
/// Indexing and queries share the handle (read lock); reindex and close
/// replace or take it (write lock). Failed documents are tracked in their
/// own table so recording a failure never waits on the handle.
pub struct SearchCoordinator<E: SearchBackend = SearchEngine> {
    dir: PathBuf,
    options: EngineOptions,
    engine: RwLock<Option<E>>,
    failed: FailedIndexTable,
    health: Mutex<IndexHealth>,
    parser: QueryParser,
    retry_attempts: u32,
    retry_base_delay: Duration,
    result_limit: usize,
}

impl<E: SearchBackend> SearchCoordinator<E> {
    /// Open the engine in `dir`. A failure leaves the handle unset and is
    /// reported through health rather than returned.
    pub fn open(dir: &Path, config: &Config) -> Self {
        let options = EngineOptions::from(config);
        let engine = match E::open(dir, options) {
            Ok(engine) => Some(engine),
            Err(e) => {
                error!(dir = %dir.display(), error = %e, "search index could not be opened");
                None
            }
        };

        let state = engine_state(&engine);
        SearchCoordinator {
            dir: dir.to_path_buf(),
            options,
            engine: RwLock::new(engine),
            failed: FailedIndexTable::new(),
            health: Mutex::new(compute_health(state, 0)),
            parser: QueryParser::new(config.title_boost),
            retry_attempts: config.index_retry_attempts.max(1),
            retry_base_delay: config.retry_base_delay,
            result_limit: config.search_result_limit,
        }
    }

    /// Index with retries. Exhausted attempts land in the failed table;
    /// nothing is returned to the caller.
    pub fn index(&self, doc: IndexedDocument) {
        let engine = self.engine.read();
        let id = DocumentId(doc.id);

        // Cleared before indexing so a concurrent retry of an older copy
        // either finishes first or sees nothing to do
        self.failed.remove(&id);

        match self.index_with_retry(&engine, &doc) {
            Ok(()) => {}
            Err((attempts, e)) => {
                error!(doc_id = %id, attempts, error = %e, "search indexing failed");
                self.failed.record(id, doc, attempts, e.to_string());
            }
        }
        self.refresh_health(&engine);
    }

    pub fn delete(&self, id: DocumentId) {
        {
            let engine = self.engine.read();
            match engine.as_ref() {
                Some(engine) => {
                    if let Err(e) = engine.delete_doc(id.value()) {
                        warn!(doc_id = %id, error = %e, "search delete failed");
                    }
                }
                None => warn!(doc_id = %id, "search delete skipped, index not open"),
            }
        }
        if self.failed.remove(&id) {
            debug!(doc_id = %id, "dropped from failed index table");
        }
    }

    pub fn search(&self, query: &str) -> Result<Vec<DocumentId>> {
        let query = self.parser.parse(query);
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let engine = self.engine.read();
        let Some(engine) = engine.as_ref() else {
            warn!("search skipped, index not open");
            return Ok(Vec::new());
        };

        let ids = engine.search(&query, self.result_limit)?;
        debug!(clauses = query.clauses.len(), hits = ids.len(), "search");
        Ok(ids.into_iter().map(DocumentId).collect())
    }

    /// Throw away the on-disk index and rebuild it from `load_all`.
    ///
    /// If the fresh index cannot be created the handle stays unset and the
    /// error is returned.
    pub fn reindex<F>(&self, load_all: F) -> Result<usize>
    where
        F: FnOnce() -> Result<Vec<IndexedDocument>>,
    {
        let mut engine = self.engine.write();

        if let Some(old) = engine.take() {
            if let Err(e) = old.close() {
                warn!(dir = %self.dir.display(), error = %e, "closing old search index failed");
            }
        }

        let rebuilt = E::delete_dir(&self.dir)
            .and_then(|()| E::open(&self.dir, self.options));
        let fresh = match rebuilt {
            Ok(fresh) => fresh,
            Err(e) => {
                self.refresh_health(&engine);
                return Err(e);
            }
        };
        *engine = Some(fresh);

        let result = load_all().and_then(|docs| {
            let count = docs.len();
            engine.as_ref()
                .ok_or_else(|| Error::new(ErrorKind::Internal, "search index vanished during rebuild".into()))?
                .index_batch(docs)?;
            Ok(count)
        });

        if result.is_ok() {
            self.failed.clear();
        }
        let health = self.refresh_health(&engine);

        match &result {
            Ok(count) => info!(documents = count, healthy = health.is_healthy, "search index rebuilt"),
            Err(e) => error!(error = %e, "search reindex failed"),
        }
        result
    }

    /// Re-attempt every failed document once; returns how many made it in.
    ///
    /// Entries cleared or re-recorded by a save since the table was read
    /// are left alone.
    pub fn retry_failed(&self) -> usize {
        let engine = self.engine.read();
        let mut succeeded = 0;

        for (id, entry) in self.failed.snapshot() {
            let outcome = self.failed.retry_if_unchanged(id, entry.generation, |doc| match engine.as_ref() {
                Some(engine) => engine.index_doc(doc),
                None => Err(not_open()),
            });

            match outcome {
                Some(Ok(())) => succeeded += 1,
                Some(Err(e)) => warn!(doc_id = %id, error = %e, "retry of failed document failed"),
                None => debug!(doc_id = %id, "failed entry changed since snapshot, skipped"),
            }
        }

        self.refresh_health(&engine);
        info!(succeeded, remaining = self.failed.len(), "failed indexing retried");
        succeeded
    }

    pub fn health(&self) -> IndexHealth {
        let engine = self.engine.read();
        self.refresh_health(&engine)
    }

    /// Last computed health, without touching the engine lock
    pub fn last_health(&self) -> IndexHealth {
        self.health.lock().clone()
    }

    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    pub fn close(&self) -> Result<()> {
        let mut engine = self.engine.write();
        match engine.take() {
            Some(engine) => engine.close(),
            None => Ok(()),
        }
    }

    /// Retries only real indexing errors; with no engine open there is
    /// nothing to wait for and the document fails at once
    fn index_with_retry(&self, engine: &Option<E>, doc: &IndexedDocument) -> std::result::Result<(), (u32, Error)> {
        let Some(engine) = engine.as_ref() else {
            return Err((1, not_open()));
        };
        let mut last_error = None;

        for attempt in 1..=self.retry_attempts {
            match engine.index_doc(doc) {
                Ok(()) => {
                    if attempt > 1 {
                        debug!(doc_id = %doc.id, attempt, "indexed after retry");
                    }
                    return Ok(());
                }
                Err(e) => {
                    debug!(doc_id = %doc.id, attempt, error = %e, "indexing attempt failed");
                    last_error = Some(e);
                }
            }

            if attempt < self.retry_attempts {
                thread::sleep(self.retry_base_delay * attempt * attempt);
            }
        }

        let e = last_error.unwrap_or_else(|| Error::new(ErrorKind::Internal, "no indexing attempt made".into()));
        Err((self.retry_attempts, e))
    }

    fn refresh_health(&self, engine: &Option<E>) -> IndexHealth {
        let health = compute_health(engine_state(engine), self.failed.len());
        *self.health.lock() = health.clone();
        health
    }
}

fn not_open() -> Error {
    Error::new(ErrorKind::IndexingFailure, "search index is not open".into())
}

fn engine_state<E: SearchBackend>(engine: &Option<E>) -> EngineState {
    match engine {
        Some(engine) if engine.is_usable() => EngineState::Ready,
        Some(_) => EngineState::Damaged,
        None => EngineState::Missing,
    }
}

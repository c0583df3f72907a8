use std::collections::HashMap;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use crate::core::error::Result;
use crate::core::types::{DocumentId, IndexHealth};
use crate::search::engine::IndexedDocument;

/// A document whose indexing ran out of attempts
#[derive(Debug, Clone)]
pub struct FailedIndex {
    pub doc: IndexedDocument,
    pub attempts: u32,
    pub last_attempt: DateTime<Utc>,
    pub last_error: String,
    /// Bumped on every record; tells a retry whether its copy is stale
    pub generation: u64,
}

#[derive(Default)]
struct Entries {
    by_id: HashMap<DocumentId, FailedIndex>,
    next_generation: u64,
}

/// Documents waiting for a retry, keyed by id so re-failures overwrite
#[derive(Default)]
pub struct FailedIndexTable {
    entries: Mutex<Entries>,
}

impl FailedIndexTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, id: DocumentId, doc: IndexedDocument, attempts: u32, error: String) {
        let mut entries = self.entries.lock();
        let previous = entries.by_id.get(&id).map_or(0, |e| e.attempts);
        entries.next_generation += 1;
        let generation = entries.next_generation;
        entries.by_id.insert(id, FailedIndex {
            doc,
            attempts: previous + attempts,
            last_attempt: Utc::now(),
            last_error: error,
            generation,
        });
    }

    /// Run `index` on the entry for `id` if it is still the one seen at
    /// `generation`. The table stays locked meanwhile, so a save that
    /// clears the entry either waits for this attempt or makes it a no-op.
    ///
    /// Returns `None` when the entry was cleared or replaced.
    pub fn retry_if_unchanged<F>(&self, id: DocumentId, generation: u64, index: F) -> Option<Result<()>>
    where
        F: FnOnce(&IndexedDocument) -> Result<()>,
    {
        let mut entries = self.entries.lock();
        let entry = entries.by_id.get_mut(&id).filter(|e| e.generation == generation)?;

        let outcome = index(&entry.doc);
        match &outcome {
            Ok(()) => {
                entries.by_id.remove(&id);
            }
            Err(e) => {
                entry.attempts += 1;
                entry.last_attempt = Utc::now();
                entry.last_error = e.to_string();
            }
        }
        Some(outcome)
    }

    pub fn remove(&self, id: &DocumentId) -> bool {
        self.entries.lock().by_id.remove(id).is_some()
    }

    pub fn get(&self, id: &DocumentId) -> Option<FailedIndex> {
        self.entries.lock().by_id.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the table so retries run without holding the lock
    pub fn snapshot(&self) -> Vec<(DocumentId, FailedIndex)> {
        self.entries.lock()
            .by_id
            .iter()
            .map(|(id, entry)| (*id, entry.clone()))
            .collect()
    }

    pub fn clear(&self) {
        self.entries.lock().by_id.clear();
    }
}

/// State of the engine handle as seen by the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Ready,
    Damaged,
    Missing,
}

pub fn compute_health(engine: EngineState, failed_documents: usize) -> IndexHealth {
    let message = match (engine, failed_documents) {
        (EngineState::Missing, _) => "search index is not open; reindex required".to_string(),
        (EngineState::Damaged, _) => "search index is damaged; reindex required".to_string(),
        (EngineState::Ready, 0) => "search index is healthy".to_string(),
        (EngineState::Ready, n) => format!("{} document(s) failed to index; retry pending", n),
    };

    IndexHealth {
        is_healthy: engine == EngineState::Ready && failed_documents == 0,
        failed_documents,
        last_health_check: Utc::now(),
        requires_reindex: engine != EngineState::Ready,
        message,
    }
}

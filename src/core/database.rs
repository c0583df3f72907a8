use chrono::{DateTime, Days, Local, NaiveDate, TimeZone, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;
use crate::core::config::Config;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::outline::{journal_title, mentioning_subtrees};
use crate::core::types::{
    BlockId, Document, DocumentId, DocumentSummary, IndexHealth, ReferenceContext,
    ScheduledTask, TaskId, UpcomingTask,
};
use crate::index::recents::RecentsIndex;
use crate::index::references::ReferencesIndex;
use crate::index::scheduled::ScheduledIndex;
use crate::index::timeline::{JournalIndex, TimeIndex};
use crate::index::title::TitleIndex;
use crate::search::coordinator::SearchCoordinator;
use crate::search::engine::IndexedDocument;
use crate::storage::codec::{decode_record, encode_id, encode_record, DocumentRecord};
use crate::storage::kv::{Bucket, KvStore, ReadTxn};
use crate::storage::layout::StorageLayout;

/// Embedded journal store: documents plus every secondary index in one
/// transactional file, and a full-text index kept up to date beside it.
///
/// Share it between threads behind an `Arc`; all methods take `&self`
/// except [`Database::close`].
pub struct Database {
    config: Config,
    layout: StorageLayout,
    kv: KvStore,
    recents: RecentsIndex,
    search: SearchCoordinator,
}

impl Database {
    pub fn open(config: Config) -> Result<Self> {
        let layout = StorageLayout::new(config.storage_path.clone())?;
        let kv = KvStore::open(layout.clone(), config.sync_mode, config.compaction_threshold_bytes)?;
        let search: SearchCoordinator = SearchCoordinator::open(&layout.search_dir, &config);

        let documents = kv.view(|tx| Ok(tx.len(Bucket::Documents)))?;
        info!(
            path = %layout.data_path.display(),
            documents,
            search_healthy = search.last_health().is_healthy,
            "database opened"
        );

        Ok(Database {
            recents: RecentsIndex::new(config.recents_capacity),
            config,
            layout,
            kv,
            search,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn storage_layout(&self) -> &StorageLayout {
        &self.layout
    }

    /// Write the document and every secondary index in one transaction,
    /// then hand it to the search index. Search failures are recorded for
    /// retry and do not fail the save.
    pub fn save(&self, doc: &Document) -> Result<()> {
        let record = DocumentRecord::from_document(doc);
        let key = encode_id(record.id);

        self.kv.update(|tx| {
            let previous = match tx.get(Bucket::Documents, &key) {
                Some(data) => Some(decode_record(&data)?),
                None => None,
            };

            // Uniqueness first so a clash leaves nothing behind
            TitleIndex::save(tx, &record, previous.as_ref())?;
            tx.put(Bucket::Documents, key.clone(), encode_record(&record)?);
            TimeIndex::save(tx, &record, previous.as_ref())?;
            JournalIndex::save(tx, &record, previous.as_ref())?;
            ReferencesIndex::save(tx, &record)?;
            ScheduledIndex::save(tx, &record)?;
            self.recents.update(tx, record.id)?;
            Ok(())
        })?;

        debug!(doc_id = %record.id, title = %record.title, blocks = record.blocks.len(), "document saved");
        self.search.index(IndexedDocument::from_record(&record));
        Ok(())
    }

    pub fn load_document(&self, id: DocumentId) -> Result<Document> {
        self.kv.view(|tx| {
            load_in(tx, id.value())?.ok_or_else(|| Error::document_not_found(id))
        })
    }

    /// Case-insensitive exact title match
    pub fn load_document_by_title(&self, title: &str) -> Result<Document> {
        self.kv.view(|tx| {
            let id = TitleIndex::lookup(tx, title)?.ok_or_else(|| Error::title_not_found(title))?;
            load_in(tx, id.value())?.ok_or_else(|| Error::title_not_found(title))
        })
    }

    /// Document whose timestamp is exactly `instant`
    pub fn load_document_at<Tz: TimeZone>(&self, instant: &DateTime<Tz>) -> Result<Document> {
        let instant = instant.with_timezone(&Utc);
        self.kv.view(|tx| {
            let not_found = || Error::new(
                ErrorKind::NotFound,
                format!("no document at {}", TimeIndex::key(&instant)),
            );
            let id = TimeIndex::lookup(tx, &instant)?.ok_or_else(not_found)?;
            load_in(tx, id.value())?.ok_or_else(not_found)
        })
    }

    /// Summaries of every stored document. A record that fails to decode
    /// fails the whole listing.
    pub fn list_documents(&self) -> Result<Vec<DocumentSummary>> {
        self.kv.view(|tx| {
            tx.iter(Bucket::Documents)
                .map(|(_, data)| -> Result<DocumentSummary> {
                    Ok(decode_record(data)?.into_document()?.summary())
                })
                .collect()
        })
    }

    /// Journal pages for the calendar days `from..=to`, oldest first
    pub fn load_journals(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<Document>> {
        self.kv.view(|tx| {
            let mut docs = Vec::new();
            for (day, id) in JournalIndex::range(tx, from, to)? {
                match load_in(tx, id.value())? {
                    Some(doc) => docs.push(doc),
                    None => debug!(%day, doc_id = %id, "journal index points at missing document"),
                }
            }
            Ok(docs)
        })
    }

    pub fn delete(&self, id: DocumentId) -> Result<()> {
        let key = encode_id(id.value());

        let record = self.kv.update(|tx| {
            let data = tx.get(Bucket::Documents, &key).ok_or_else(|| Error::document_not_found(id))?;
            let record = decode_record(&data)?;

            tx.delete(Bucket::Documents, key.clone());
            TimeIndex::delete(tx, &record)?;
            TitleIndex::delete(tx, &record)?;
            JournalIndex::delete(tx, &record)?;
            ReferencesIndex::delete(tx, record.id)?;
            ScheduledIndex::delete(tx, &record)?;
            Ok(record)
        })?;

        self.search.delete(id);
        self.kv.update(|tx| self.recents.delete(tx, id.value()))?;

        info!(doc_id = %id, title = %record.title, "document deleted");
        Ok(())
    }

    pub fn search(&self, query: &str) -> Result<Vec<DocumentId>> {
        self.search.search(query)
    }

    /// Search hits as summaries; hits whose record is gone are skipped
    pub fn search_summaries(&self, query: &str) -> Result<Vec<DocumentSummary>> {
        let ids = self.search.search(query)?;
        self.kv.view(|tx| {
            let mut summaries = Vec::with_capacity(ids.len());
            for id in ids {
                match load_in(tx, id.value())? {
                    Some(doc) => summaries.push(doc.summary()),
                    None => debug!(doc_id = %id, "search hit without a record"),
                }
            }
            Ok(summaries)
        })
    }

    /// Documents linking to `title` with `[[...]]`
    pub fn get_references(&self, title: &str) -> Result<Vec<DocumentId>> {
        self.kv.view(|tx| ReferencesIndex::get_references(tx, title))
    }

    /// Referencing documents with the blocks that mention `title` and the
    /// children of those blocks
    pub fn get_reference_context(&self, title: &str) -> Result<Vec<ReferenceContext>> {
        self.kv.view(|tx| {
            let mut contexts = Vec::new();
            for id in ReferencesIndex::get_references(tx, title)? {
                let Some(doc) = load_in(tx, id.value())? else {
                    debug!(doc_id = %id, "reference from missing document");
                    continue;
                };
                contexts.push(ReferenceContext {
                    id: doc.id,
                    blocks: mentioning_subtrees(&doc.blocks, title.trim()),
                    title: doc.title,
                });
            }
            Ok(contexts)
        })
    }

    /// Schedule a block of an existing document by hand. The task lives
    /// until the document is deleted.
    pub fn schedule_task(&self, date: NaiveDate, doc_id: DocumentId, block_id: BlockId) -> Result<TaskId> {
        let task = self.kv.update(|tx| {
            let data = tx.get(Bucket::Documents, &encode_id(doc_id.value()))
                .ok_or_else(|| Error::document_not_found(doc_id))?;
            let record = decode_record(&data)?;
            if !record.blocks.iter().any(|b| b.id == block_id.value()) {
                return Err(Error::new(
                    ErrorKind::NotFound,
                    format!("block {} not found in document {}", block_id, doc_id),
                ));
            }
            ScheduledIndex::schedule(tx, date, doc_id.value(), block_id.value())
        })?;

        debug!(%date, %doc_id, %block_id, task_id = %task, "task scheduled");
        Ok(task)
    }

    /// Tasks for `days_ahead` consecutive days starting at `date`
    pub fn get_scheduled_tasks(&self, date: NaiveDate, days_ahead: u32) -> Result<Vec<ScheduledTask>> {
        self.kv.view(|tx| {
            let mut tasks = Vec::new();
            for offset in 0..days_ahead {
                let day = date.checked_add_days(Days::new(offset as u64)).ok_or_else(|| {
                    Error::new(ErrorKind::InvalidArgument, format!("{} + {} days is out of range", date, offset))
                })?;
                tasks.extend(
                    ScheduledIndex::get_scheduled_tasks(tx, day)?
                        .into_iter()
                        .map(|entry| entry.into_task(day)),
                );
            }
            Ok(tasks)
        })
    }

    /// Scheduled tasks joined with their page title and block text;
    /// tasks whose document is gone are skipped
    pub fn get_upcoming_tasks(&self, date: NaiveDate, days_ahead: u32) -> Result<Vec<UpcomingTask>> {
        let tasks = self.get_scheduled_tasks(date, days_ahead)?;
        self.kv.view(|tx| {
            let mut upcoming = Vec::with_capacity(tasks.len());
            for task in tasks {
                let Some(doc) = load_in(tx, task.doc_id.value())? else {
                    continue;
                };
                let description = doc.block(task.block_id)
                    .map(|b| b.content.clone())
                    .unwrap_or_default();
                upcoming.push(UpcomingTask { task, title: doc.title, description });
            }
            Ok(upcoming)
        })
    }

    /// Most recently saved or opened documents, newest first
    pub fn get_recents(&self) -> Result<Vec<DocumentId>> {
        self.kv.view(|tx| self.recents.get(tx))
    }

    /// Record that a document was opened
    pub fn touch_recent(&self, id: DocumentId) -> Result<()> {
        self.kv.update(|tx| self.recents.update(tx, id.value()))
    }

    /// Open the page titled `title`, creating it with one empty block if
    /// there is none yet
    pub fn open_document_by_title(&self, title: &str) -> Result<Document> {
        match self.load_document_by_title(title) {
            Ok(doc) => {
                self.touch_recent(doc.id)?;
                Ok(doc)
            }
            Err(e) if e.is_not_found() => {
                let doc = Document::new(title, Local::now().fixed_offset()).with_block("", 0);
                self.save(&doc)?;
                info!(doc_id = %doc.id, title, "created page on open");
                Ok(doc)
            }
            Err(e) => Err(e),
        }
    }

    /// The journal page for `day`, or a fresh unsaved one titled after the
    /// day with a single empty block
    pub fn journal_for_day(&self, day: NaiveDate) -> Result<Document> {
        let existing = self.kv.view(|tx| {
            match JournalIndex::range(tx, day, day)?.first() {
                Some((_, id)) => load_in(tx, id.value()),
                None => Ok(None),
            }
        })?;
        if let Some(doc) = existing {
            return Ok(doc);
        }

        let midnight = day.and_time(chrono::NaiveTime::MIN);
        let date = Local.from_local_datetime(&midnight)
            .earliest()
            .map(|d| d.fixed_offset())
            .unwrap_or_else(|| Utc.from_utc_datetime(&midnight).fixed_offset());
        Ok(Document::journal(journal_title(day), date).with_block("", 0))
    }

    pub fn get_index_health(&self) -> IndexHealth {
        self.search.health()
    }

    /// Rebuild the search index from every stored document; returns how
    /// many were indexed
    pub fn reindex_search(&self) -> Result<usize> {
        self.search.reindex(|| {
            self.kv.view(|tx| {
                tx.iter(Bucket::Documents)
                    .map(|(_, data)| -> Result<IndexedDocument> {
                        Ok(IndexedDocument::from_record(&decode_record(data)?))
                    })
                    .collect()
            })
        })
    }

    /// Retry documents whose indexing failed; returns how many succeeded
    pub fn retry_failed_indexing(&self) -> Result<usize> {
        Ok(self.search.retry_failed())
    }

    /// Flush the search index and compact the primary log.
    ///
    /// Callers must make sure no other operation is still running.
    pub fn close(self) -> Result<()> {
        let search = self.search.close();
        if let Err(e) = &search {
            warn!(error = %e, "search index did not close cleanly");
        }
        self.kv.close()?;
        info!(path = %self.layout.data_path.display(), "database closed");
        search
    }
}

fn load_in(tx: &ReadTxn<'_>, id: Uuid) -> Result<Option<Document>> {
    match tx.get(Bucket::Documents, &encode_id(id)) {
        Some(data) => Ok(Some(decode_record(data)?.into_document()?)),
        None => Ok(None),
    }
}

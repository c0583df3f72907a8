use std::collections::BTreeSet;
use std::sync::LazyLock;
use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;
use crate::core::error::Result;
use crate::core::types::{BlockId, DocumentId, ScheduledTask, TaskId};
use crate::index::timeline::JournalIndex;
use crate::storage::codec::{decode, encode, DocumentRecord};
use crate::storage::kv::{Bucket, ReadTxn, WriteTxn};

static SCHEDULED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/scheduled (\d{4}-\d{2}-\d{2})").unwrap());

/// Dates named by `/scheduled YYYY-MM-DD` markers; impossible dates are skipped
pub fn extract_scheduled_dates(content: &str) -> Vec<NaiveDate> {
    SCHEDULED_RE.captures_iter(content)
        .filter_map(|caps| NaiveDate::parse_from_str(&caps[1], "%Y-%m-%d").ok())
        .collect()
}

/// Entry in a day bucket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskEntry {
    pub task_id: Uuid,
    pub doc_id: Uuid,
    pub block_id: Uuid,
    pub manual: bool,   // added through `schedule`, not derived from content
}

impl TaskEntry {
    pub fn into_task(self, time: NaiveDate) -> ScheduledTask {
        ScheduledTask {
            id: TaskId(self.task_id),
            doc_id: DocumentId(self.doc_id),
            block_id: BlockId(self.block_id),
            time,
        }
    }
}

/// Forward index `day -> tasks`, a `doc_block -> days` snapshot for diffing,
/// and `doc -> blocks with a snapshot` so removed blocks can be cleaned up
pub struct ScheduledIndex;

impl ScheduledIndex {
    pub fn save(tx: &mut WriteTxn<'_>, record: &DocumentRecord) -> Result<()> {
        let doc_id = record.id;
        let known_blocks: BTreeSet<Uuid> = read_or_default(tx, Bucket::DocBlocks, &doc_key(doc_id), "scheduled blocks")?;
        let mut scheduled_blocks = BTreeSet::new();

        for block in &record.blocks {
            let dates: BTreeSet<NaiveDate> = extract_scheduled_dates(&block.content).into_iter().collect();
            let snapshot_key = pair_key(doc_id, block.id);
            let old_dates: BTreeSet<NaiveDate> = read_or_default(tx, Bucket::BlockSchedules, &snapshot_key, "block schedule")?;

            for stale in old_dates.difference(&dates) {
                remove_entries(tx, *stale, |e| !e.manual && e.doc_id == doc_id && e.block_id == block.id)?;
            }

            // Tasks are reissued on every save rather than updated in place
            for date in &dates {
                remove_entries(tx, *date, |e| !e.manual && e.doc_id == doc_id && e.block_id == block.id)?;
                append_entry(tx, *date, TaskEntry {
                    task_id: Uuid::new_v4(),
                    doc_id,
                    block_id: block.id,
                    manual: false,
                })?;
            }

            if !dates.is_empty() || !old_dates.is_empty() {
                debug!(%doc_id, block_id = %block.id, dates = ?dates, "scheduled dates updated");
            }

            if dates.is_empty() {
                tx.delete(Bucket::BlockSchedules, snapshot_key);
            } else {
                tx.put(Bucket::BlockSchedules, snapshot_key, encode(&dates)?);
                scheduled_blocks.insert(block.id);
            }
        }

        let present: BTreeSet<Uuid> = record.blocks.iter().map(|b| b.id).collect();
        for removed in known_blocks.difference(&present) {
            Self::forget_block(tx, doc_id, *removed)?;
        }

        if scheduled_blocks.is_empty() {
            tx.delete(Bucket::DocBlocks, doc_key(doc_id));
        } else {
            tx.put(Bucket::DocBlocks, doc_key(doc_id), encode(&scheduled_blocks)?);
        }
        Ok(())
    }

    /// Add one task by hand; it stays until the document is deleted
    pub fn schedule(tx: &mut WriteTxn<'_>, date: NaiveDate, doc_id: Uuid, block_id: Uuid) -> Result<TaskId> {
        let task_id = Uuid::new_v4();
        append_entry(tx, date, TaskEntry { task_id, doc_id, block_id, manual: true })?;

        let mut days: BTreeSet<NaiveDate> = read_or_default(tx, Bucket::ManualSchedules, &doc_key(doc_id), "manual schedule")?;
        if days.insert(date) {
            tx.put(Bucket::ManualSchedules, doc_key(doc_id), encode(&days)?);
        }
        Ok(TaskId(task_id))
    }

    pub fn delete(tx: &mut WriteTxn<'_>, record: &DocumentRecord) -> Result<()> {
        let doc_id = record.id;
        let known_blocks: BTreeSet<Uuid> = read_or_default(tx, Bucket::DocBlocks, &doc_key(doc_id), "scheduled blocks")?;
        for block_id in known_blocks {
            Self::forget_block(tx, doc_id, block_id)?;
        }
        tx.delete(Bucket::DocBlocks, doc_key(doc_id));

        let manual_days: BTreeSet<NaiveDate> = read_or_default(tx, Bucket::ManualSchedules, &doc_key(doc_id), "manual schedule")?;
        for day in manual_days {
            remove_entries(tx, day, |e| e.doc_id == doc_id)?;
        }
        tx.delete(Bucket::ManualSchedules, doc_key(doc_id));
        Ok(())
    }

    pub fn get_scheduled_tasks(tx: &ReadTxn<'_>, date: NaiveDate) -> Result<Vec<TaskEntry>> {
        match tx.get(Bucket::Scheduled, JournalIndex::key(date).as_bytes()) {
            Some(data) => decode(data, "scheduled tasks"),
            None => Ok(Vec::new()),
        }
    }

    fn forget_block(tx: &mut WriteTxn<'_>, doc_id: Uuid, block_id: Uuid) -> Result<()> {
        let key = pair_key(doc_id, block_id);
        let dates: BTreeSet<NaiveDate> = read_or_default(tx, Bucket::BlockSchedules, &key, "block schedule")?;
        for date in dates {
            remove_entries(tx, date, |e| !e.manual && e.doc_id == doc_id && e.block_id == block_id)?;
        }
        tx.delete(Bucket::BlockSchedules, key);
        Ok(())
    }
}

fn doc_key(doc_id: Uuid) -> String {
    doc_id.hyphenated().to_string()
}

fn pair_key(doc_id: Uuid, block_id: Uuid) -> String {
    format!("{}_{}", doc_id.hyphenated(), block_id.hyphenated())
}

fn read_or_default<T>(tx: &WriteTxn<'_>, bucket: Bucket, key: &str, what: &str) -> Result<T>
where
    T: serde::de::DeserializeOwned + Default,
{
    match tx.get(bucket, key.as_bytes()) {
        Some(data) => decode(&data, what),
        None => Ok(T::default()),
    }
}

fn day_entries(tx: &WriteTxn<'_>, date: NaiveDate) -> Result<Vec<TaskEntry>> {
    read_or_default(tx, Bucket::Scheduled, &JournalIndex::key(date), "scheduled tasks")
}

fn append_entry(tx: &mut WriteTxn<'_>, date: NaiveDate, entry: TaskEntry) -> Result<()> {
    let mut entries = day_entries(tx, date)?;
    entries.push(entry);
    tx.put(Bucket::Scheduled, JournalIndex::key(date), encode(&entries)?);
    Ok(())
}

fn remove_entries(tx: &mut WriteTxn<'_>, date: NaiveDate, matches: impl Fn(&TaskEntry) -> bool) -> Result<()> {
    let mut entries = day_entries(tx, date)?;
    let before = entries.len();
    entries.retain(|e| !matches(e));
    if entries.len() == before {
        return Ok(());
    }

    let key = JournalIndex::key(date);
    if entries.is_empty() {
        tx.delete(Bucket::Scheduled, key);
    } else {
        tx.put(Bucket::Scheduled, key, encode(&entries)?);
    }
    Ok(())
}

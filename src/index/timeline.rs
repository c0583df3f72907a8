use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use crate::core::error::{Error, Result};
use crate::core::types::DocumentId;
use crate::storage::codec::{decode_id, encode_id, DocumentRecord};
use crate::storage::kv::{Bucket, ReadTxn, WriteTxn};

const DAY_FORMAT: &str = "%Y-%m-%d";

/// Exact-instant lookups: `UTC timestamp (ns) -> document`.
///
/// Keys are fixed width so byte order is chronological. Two documents with
/// the same nanosecond overwrite each other; that is not guarded against.
pub struct TimeIndex;

impl TimeIndex {
    pub fn key(instant: &DateTime<Utc>) -> String {
        instant.to_rfc3339_opts(SecondsFormat::Nanos, true)
    }

    fn record_key(record: &DocumentRecord) -> Result<String> {
        let date = DateTime::parse_from_rfc3339(&record.date)?;
        Ok(Self::key(&date.with_timezone(&Utc)))
    }

    pub fn save(tx: &mut WriteTxn<'_>, record: &DocumentRecord, previous: Option<&DocumentRecord>) -> Result<()> {
        let key = Self::record_key(record)?;
        if let Some(previous) = previous {
            let old_key = Self::record_key(previous)?;
            if old_key != key {
                release(tx, Bucket::TimeIndex, &old_key, record)?;
            }
        }
        tx.put(Bucket::TimeIndex, key, encode_id(record.id));
        Ok(())
    }

    pub fn delete(tx: &mut WriteTxn<'_>, record: &DocumentRecord) -> Result<()> {
        let key = Self::record_key(record)?;
        release(tx, Bucket::TimeIndex, &key, record)
    }

    pub fn lookup(tx: &ReadTxn<'_>, instant: &DateTime<Utc>) -> Result<Option<DocumentId>> {
        tx.get(Bucket::TimeIndex, Self::key(instant).as_bytes())
            .map(|data| decode_id(data).map(DocumentId))
            .transpose()
    }
}

/// Journal documents by calendar day: `YYYY-MM-DD -> document`
pub struct JournalIndex;

impl JournalIndex {
    pub fn key(day: NaiveDate) -> String {
        day.format(DAY_FORMAT).to_string()
    }

    /// Day in the document's own offset, `None` for non-journal documents
    fn record_key(record: &DocumentRecord) -> Result<Option<String>> {
        if !record.is_journal {
            return Ok(None);
        }
        let date = DateTime::parse_from_rfc3339(&record.date)?;
        Ok(Some(Self::key(date.date_naive())))
    }

    pub fn save(tx: &mut WriteTxn<'_>, record: &DocumentRecord, previous: Option<&DocumentRecord>) -> Result<()> {
        let key = Self::record_key(record)?;
        if let Some(previous) = previous {
            if let Some(old_key) = Self::record_key(previous)? {
                if key.as_ref() != Some(&old_key) {
                    release(tx, Bucket::JournalIndex, &old_key, record)?;
                }
            }
        }
        if let Some(key) = key {
            tx.put(Bucket::JournalIndex, key, encode_id(record.id));
        }
        Ok(())
    }

    pub fn delete(tx: &mut WriteTxn<'_>, record: &DocumentRecord) -> Result<()> {
        match Self::record_key(record)? {
            Some(key) => release(tx, Bucket::JournalIndex, &key, record),
            None => Ok(()),
        }
    }

    /// Journal ids for `from..=to`, in day order
    pub fn range(tx: &ReadTxn<'_>, from: NaiveDate, to: NaiveDate) -> Result<Vec<(NaiveDate, DocumentId)>> {
        if from > to {
            return Ok(Vec::new());
        }
        let (from, to) = (Self::key(from), Self::key(to));
        tx.range(Bucket::JournalIndex, from.as_bytes(), to.as_bytes())
            .map(|(key, value)| -> Result<(NaiveDate, DocumentId)> {
                let day = std::str::from_utf8(key)
                    .ok()
                    .and_then(|k| NaiveDate::parse_from_str(k, DAY_FORMAT).ok())
                    .ok_or_else(|| Error::corrupt("journal index key is not a date"))?;
                Ok((day, DocumentId(decode_id(value)?)))
            })
            .collect()
    }
}

/// Drop `key` only if it still points at this document
fn release(tx: &mut WriteTxn<'_>, bucket: Bucket, key: &str, record: &DocumentRecord) -> Result<()> {
    if let Some(owner) = tx.get(bucket, key.as_bytes()) {
        if decode_id(&owner)? == record.id {
            tx.delete(bucket, key);
        }
    }
    Ok(())
}

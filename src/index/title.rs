use crate::core::error::{Error, Result};
use crate::core::types::DocumentId;
use crate::storage::codec::{decode_id, encode_id, DocumentRecord};
use crate::storage::kv::{Bucket, ReadTxn, WriteTxn};

/// Case-insensitive `title -> document` map; a title belongs to one document
pub struct TitleIndex;

impl TitleIndex {
    pub fn key(title: &str) -> String {
        title.to_lowercase()
    }

    /// Claim `record.title` for `record.id`, releasing the title the same
    /// document held before if it changed
    pub fn save(tx: &mut WriteTxn<'_>, record: &DocumentRecord, previous: Option<&DocumentRecord>) -> Result<()> {
        let key = Self::key(&record.title);

        if let Some(owner) = tx.get(Bucket::TitleIndex, key.as_bytes()) {
            let owner = decode_id(&owner)?;
            if owner != record.id {
                return Err(Error::duplicate_title(&record.title, owner));
            }
        }

        if let Some(previous) = previous {
            let old_key = Self::key(&previous.title);
            if old_key != key {
                Self::release(tx, &old_key, record)?;
            }
        }

        tx.put(Bucket::TitleIndex, key, encode_id(record.id));
        Ok(())
    }

    pub fn delete(tx: &mut WriteTxn<'_>, record: &DocumentRecord) -> Result<()> {
        Self::release(tx, &Self::key(&record.title), record)
    }

    pub fn lookup(tx: &ReadTxn<'_>, title: &str) -> Result<Option<DocumentId>> {
        tx.get(Bucket::TitleIndex, Self::key(title).as_bytes())
            .map(|data| decode_id(data).map(DocumentId))
            .transpose()
    }

    fn release(tx: &mut WriteTxn<'_>, key: &str, record: &DocumentRecord) -> Result<()> {
        if let Some(owner) = tx.get(Bucket::TitleIndex, key.as_bytes()) {
            if decode_id(&owner)? == record.id {
                tx.delete(Bucket::TitleIndex, key);
            }
        }
        Ok(())
    }
}

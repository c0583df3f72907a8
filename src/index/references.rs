use std::collections::{BTreeSet, HashSet};
use std::sync::LazyLock;
use regex::Regex;
use tracing::debug;
use uuid::Uuid;
use crate::core::error::Result;
use crate::core::types::DocumentId;
use crate::storage::codec::{decode, decode_id_set, encode, encode_id_set, DocumentRecord};
use crate::storage::kv::{Bucket, ReadTxn, WriteTxn};

static REFERENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\[([^\[\]]+)\]\]").unwrap());

/// Titles linked with `[[Title]]` from the title and every block, in
/// first-seen order, de-duplicated case-sensitively
pub fn extract_references(record: &DocumentRecord) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut refs = Vec::new();

    let texts = std::iter::once(record.title.as_str())
        .chain(record.blocks.iter().map(|b| b.content.as_str()));

    for text in texts {
        for caps in REFERENCE_RE.captures_iter(text) {
            let title = caps[1].trim();
            if title.is_empty() || !seen.insert(title.to_string()) {
                continue;
            }
            refs.push(title.to_string());
        }
    }

    refs
}

/// Inverted `lowercased title -> referencing documents`, plus a per-document
/// snapshot of the titles it referenced at its last save
pub struct ReferencesIndex;

impl ReferencesIndex {
    pub fn save(tx: &mut WriteTxn<'_>, record: &DocumentRecord) -> Result<()> {
        let referenced = extract_references(record);
        let new_titles: BTreeSet<String> = referenced.iter()
            .map(|t| t.to_lowercase())
            .collect();
        let old_titles = Self::snapshot(tx, record.id)?;

        for stale in old_titles.difference(&new_titles) {
            Self::remove_referrer(tx, stale, record.id)?;
        }

        for title in &new_titles {
            let mut ids = decode_id_set(tx.get(Bucket::References, title.as_bytes()).as_deref())?;
            if ids.insert(record.id) {
                tx.put(Bucket::References, title.as_str(), encode_id_set(&ids)?);
            }
        }

        debug!(
            doc_id = %record.id,
            references = ?referenced,
            removed = old_titles.difference(&new_titles).count(),
            "references updated"
        );

        let key = record.id.hyphenated().to_string();
        if new_titles.is_empty() {
            tx.delete(Bucket::DocReferences, key);
        } else {
            tx.put(Bucket::DocReferences, key, encode(&new_titles)?);
        }
        Ok(())
    }

    pub fn delete(tx: &mut WriteTxn<'_>, doc_id: Uuid) -> Result<()> {
        for title in Self::snapshot(tx, doc_id)? {
            Self::remove_referrer(tx, &title, doc_id)?;
        }
        tx.delete(Bucket::DocReferences, doc_id.hyphenated().to_string());
        Ok(())
    }

    pub fn get_references(tx: &ReadTxn<'_>, title: &str) -> Result<Vec<DocumentId>> {
        let key = title.trim().to_lowercase();
        let ids = decode_id_set(tx.get(Bucket::References, key.as_bytes()))?;
        Ok(ids.into_iter().map(DocumentId).collect())
    }

    fn snapshot(tx: &WriteTxn<'_>, doc_id: Uuid) -> Result<BTreeSet<String>> {
        match tx.get(Bucket::DocReferences, doc_id.hyphenated().to_string().as_bytes()) {
            Some(data) => decode(&data, "reference snapshot"),
            None => Ok(BTreeSet::new()),
        }
    }

    fn remove_referrer(tx: &mut WriteTxn<'_>, title: &str, doc_id: Uuid) -> Result<()> {
        let Some(data) = tx.get(Bucket::References, title.as_bytes()) else {
            return Ok(());
        };
        let mut ids = decode_id_set(Some(data.as_slice()))?;
        if !ids.remove(&doc_id) {
            return Ok(());
        }
        if ids.is_empty() {
            tx.delete(Bucket::References, title);
        } else {
            tx.put(Bucket::References, title, encode_id_set(&ids)?);
        }
        Ok(())
    }
}

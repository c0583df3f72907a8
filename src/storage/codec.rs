use std::collections::BTreeSet;
use chrono::{DateTime, SecondsFormat};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use uuid::Uuid;
use crate::core::error::{Error, Result};
use crate::core::types::{Block, BlockId, Document, DocumentId};

/// Stored form of a document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: Uuid,
    pub title: String,
    pub date: String,          // RFC 3339, nanoseconds, original offset
    pub is_journal: bool,
    pub blocks: Vec<BlockRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub id: Uuid,
    pub content: String,
    pub indent: u32,
}

impl DocumentRecord {
    pub fn from_document(doc: &Document) -> Self {
        DocumentRecord {
            id: doc.id.0,
            title: doc.title.clone(),
            date: doc.date.to_rfc3339_opts(SecondsFormat::Nanos, false),
            is_journal: doc.is_journal,
            blocks: doc.blocks.iter()
                .map(|b| BlockRecord {
                    id: b.id.0,
                    content: b.content.clone(),
                    indent: b.indent,
                })
                .collect(),
        }
    }

    pub fn into_document(self) -> Result<Document> {
        let date = DateTime::parse_from_rfc3339(&self.date)?;
        Ok(Document {
            id: DocumentId(self.id),
            title: self.title,
            date,
            is_journal: self.is_journal,
            blocks: self.blocks.into_iter()
                .map(|b| Block {
                    id: BlockId(b.id),
                    content: b.content,
                    indent: b.indent,
                })
                .collect(),
        })
    }
}

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(bincode::serialize(value)?)
}

pub fn decode<T: DeserializeOwned>(data: &[u8], what: &str) -> Result<T> {
    bincode::deserialize(data)
        .map_err(|e| Error::corrupt(format!("{}: {}", what, e)))
}

pub fn encode_record(record: &DocumentRecord) -> Result<Vec<u8>> {
    encode(record)
}

pub fn decode_record(data: &[u8]) -> Result<DocumentRecord> {
    decode(data, "document record")
}

/// Identifier set, stored sorted
pub fn encode_id_set(ids: &BTreeSet<Uuid>) -> Result<Vec<u8>> {
    encode(ids)
}

pub fn decode_id_set(data: Option<&[u8]>) -> Result<BTreeSet<Uuid>> {
    match data {
        Some(data) => decode(data, "identifier set"),
        None => Ok(BTreeSet::new()),
    }
}

/// Identifier stored as a plain index value (hyphenated text)
pub fn encode_id(id: Uuid) -> Vec<u8> {
    id.hyphenated().to_string().into_bytes()
}

pub fn decode_id(data: &[u8]) -> Result<Uuid> {
    let text = std::str::from_utf8(data)
        .map_err(|_| Error::corrupt("index value is not valid UTF-8"))?;
    Ok(Uuid::parse_str(text)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, TimeZone};
    use crate::core::error::ErrorKind;

    #[test]
    fn record_keeps_offset_and_block_order() {
        let tz = FixedOffset::east_opt(2 * 3600).unwrap();
        let date = tz.with_ymd_and_hms(2024, 3, 9, 23, 30, 5).unwrap()
            + chrono::Duration::nanoseconds(123_456_789);
        let doc = Document::new("Trip", date)
            .with_block("pack", 0)
            .with_block("passport", 1)
            .with_block("tickets", 1);

        let bytes = encode_record(&DocumentRecord::from_document(&doc)).unwrap();
        let loaded = decode_record(&bytes).unwrap().into_document().unwrap();

        assert_eq!(loaded, doc);
        assert_eq!(loaded.date.offset(), &tz);
    }

    #[test]
    fn garbage_is_reported_as_corrupt() {
        let err = decode_record(&[0xff, 0x01]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Corrupt);
    }

    #[test]
    fn missing_id_set_is_empty() {
        assert!(decode_id_set(None).unwrap().is_empty());
    }
}

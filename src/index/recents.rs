use uuid::Uuid;
use crate::core::error::Result;
use crate::core::types::DocumentId;
use crate::storage::codec::{decode, encode};
use crate::storage::kv::{Bucket, ReadTxn, WriteTxn};

const RECENTS_KEY: &[u8] = b"recents_list";

/// Bounded most-recently-used list of document ids
pub struct RecentsIndex {
    pub capacity: usize,
}

impl RecentsIndex {
    pub fn new(capacity: usize) -> Self {
        RecentsIndex { capacity }
    }

    pub fn update(&self, tx: &mut WriteTxn<'_>, id: Uuid) -> Result<()> {
        let mut recents = Self::load(tx.get(Bucket::Recents, RECENTS_KEY).as_deref())?;
        recents.retain(|r| *r != id);
        recents.insert(0, id);
        recents.truncate(self.capacity);
        tx.put(Bucket::Recents, RECENTS_KEY, encode(&recents)?);
        Ok(())
    }

    pub fn delete(&self, tx: &mut WriteTxn<'_>, id: Uuid) -> Result<()> {
        let mut recents = Self::load(tx.get(Bucket::Recents, RECENTS_KEY).as_deref())?;
        let before = recents.len();
        recents.retain(|r| *r != id);
        if recents.len() != before {
            tx.put(Bucket::Recents, RECENTS_KEY, encode(&recents)?);
        }
        Ok(())
    }

    pub fn get(&self, tx: &ReadTxn<'_>) -> Result<Vec<DocumentId>> {
        let recents = Self::load(tx.get(Bucket::Recents, RECENTS_KEY))?;
        Ok(recents.into_iter().map(DocumentId).collect())
    }

    fn load(data: Option<&[u8]>) -> Result<Vec<Uuid>> {
        match data {
            Some(data) => decode(data, "recents list"),
            None => Ok(Vec::new()),
        }
    }
}

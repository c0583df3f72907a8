use std::fmt;
use std::str::FromStr;
use serde::{Serialize, Deserialize};
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                $name(Uuid::new_v4())
            }

            pub fn value(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                $name(id)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "{}", self.0.hyphenated())
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map($name)
            }
        }
    };
}

uuid_id!(
    /// Globally unique, immutable document identifier
    DocumentId
);
uuid_id!(BlockId);
uuid_id!(
    /// Minted each time a schedule mention is indexed; not stable across saves
    TaskId
);

/// One outline entry of a document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub id: BlockId,
    pub content: String,
    pub indent: u32,
}

impl Block {
    pub fn new(content: impl Into<String>, indent: u32) -> Self {
        Block {
            id: BlockId::new(),
            content: content.into(),
            indent,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub title: String,
    pub date: DateTime<FixedOffset>,
    pub is_journal: bool,
    pub blocks: Vec<Block>,
}

impl Document {
    pub fn new(title: impl Into<String>, date: DateTime<FixedOffset>) -> Self {
        Document {
            id: DocumentId::new(),
            title: title.into(),
            date,
            is_journal: false,
            blocks: Vec::new(),
        }
    }

    pub fn journal(title: impl Into<String>, date: DateTime<FixedOffset>) -> Self {
        Document {
            is_journal: true,
            ..Document::new(title, date)
        }
    }

    pub fn with_block(mut self, content: impl Into<String>, indent: u32) -> Self {
        self.blocks.push(Block::new(content, indent));
        self
    }

    pub fn push_block(&mut self, content: impl Into<String>, indent: u32) -> BlockId {
        let block = Block::new(content, indent);
        let id = block.id;
        self.blocks.push(block);
        id
    }

    pub fn block(&self, id: BlockId) -> Option<&Block> {
        self.blocks.iter().find(|b| b.id == id)
    }

    /// Calendar day in the document's own timezone
    pub fn day(&self) -> NaiveDate {
        self.date.date_naive()
    }

    pub fn summary(&self) -> DocumentSummary {
        DocumentSummary {
            id: self.id,
            title: self.title.clone(),
            date: self.date,
        }
    }
}

/// Read-only listing projection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentSummary {
    pub id: DocumentId,
    pub title: String,
    pub date: DateTime<FixedOffset>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledTask {
    pub id: TaskId,
    pub doc_id: DocumentId,
    pub block_id: BlockId,
    pub time: NaiveDate,
}

/// A scheduled task joined with the page and block it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpcomingTask {
    pub task: ScheduledTask,
    pub title: String,
    pub description: String,
}

/// Process-local search index status
#[derive(Debug, Clone, PartialEq)]
pub struct IndexHealth {
    pub is_healthy: bool,
    pub failed_documents: usize,
    pub last_health_check: DateTime<Utc>,
    pub requires_reindex: bool,
    pub message: String,
}

/// A document that links to some title, with the blocks that mention it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceContext {
    pub id: DocumentId,
    pub title: String,
    pub blocks: Vec<Block>,
}

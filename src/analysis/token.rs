use serde::{Serialize, Deserialize};

/// A term produced by analysis
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub text: String,      // Normalized term text
    pub position: u32,     // Word position within the field (for phrase matching)
    pub offset: usize,     // Byte offset in the original text
}

impl Token {
    pub fn new(text: impl Into<String>, position: u32, offset: usize) -> Self {
        Token {
            text: text.into(),
            position,
            offset,
        }
    }
}

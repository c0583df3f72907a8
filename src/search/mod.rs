//! Full-text search over document titles and contents.
//!
//! The index is kept eventually consistent with the primary store: saves
//! feed it after commit, failures are parked in a retry table, and a full
//! rebuild can always be run from the primary records.

pub mod fuzzy;
pub mod query;
pub mod inverted;
pub mod engine;
pub mod health;
pub mod coordinator;

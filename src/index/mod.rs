//! Secondary indexes maintained inside the same write transaction as the
//! document record. Each one diffs against what it stored for the document
//! last time and applies only the delta.

pub mod title;
pub mod timeline;
pub mod references;
pub mod scheduled;
pub mod recents;

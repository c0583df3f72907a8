pub mod layout;
pub mod file_lock;
pub mod wal;
pub mod kv;
pub mod codec;

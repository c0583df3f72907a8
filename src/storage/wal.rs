use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use crate::core::error::{Error, Result};

const FRAME_HEADER: usize = 8;       // len: u32 + crc32: u32
const MAX_FRAME: usize = 256 * 1024 * 1024;
const BATCH_SYNC_BYTES: u64 = 1024 * 1024;

/// Append-only log of checksummed frames
pub struct WAL {
    pub file: File,
    pub path: PathBuf,
    pub position: u64,
    pub sync_mode: SyncMode,
    unsynced: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    Immediate,  // fsync after every append
    Batch,      // fsync once per megabyte
    None,       // Let OS handle it
}

impl WAL {
    pub fn open(path: &Path, sync_mode: SyncMode) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;
        let position = file.metadata()?.len();

        Ok(WAL {
            file,
            path: path.to_path_buf(),
            position,
            sync_mode,
            unsynced: 0,
        })
    }

    pub fn append<T: Serialize>(&mut self, entry: &T) -> Result<()> {
        let frame = encode_frame(entry)?;
        if let Err(e) = self.file.write_all(&frame) {
            // Drop whatever part of the frame landed
            if let Err(trunc) = self.file.set_len(self.position) {
                warn!(path = %self.path.display(), error = %trunc, "could not cut back partial frame");
                return Err(Error::corrupt(format!(
                    "log {} has a partial frame after failed append: {}", self.path.display(), e
                )));
            }
            return Err(e.into());
        }
        self.position += frame.len() as u64;
        self.unsynced += frame.len() as u64;

        match self.sync_mode {
            SyncMode::Immediate => self.sync()?,
            SyncMode::Batch if self.unsynced >= BATCH_SYNC_BYTES => self.sync()?,
            _ => {}
        }

        Ok(())
    }

    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        self.unsynced = 0;
        Ok(())
    }

    /// Decode every frame for recovery.
    ///
    /// A torn final frame (crash mid-append) is cut off; a bad frame with
    /// data after it means the log is damaged and is reported as corrupt.
    pub fn read_entries<T: DeserializeOwned>(&mut self) -> Result<Vec<T>> {
        let data = fs::read(&self.path)?;
        let mut entries = Vec::new();
        let mut offset = 0usize;

        while offset < data.len() {
            let remaining = data.len() - offset;
            if remaining < FRAME_HEADER {
                break;
            }

            let len = u32::from_le_bytes(read_u32(&data, offset)) as usize;
            let crc = u32::from_le_bytes(read_u32(&data, offset + 4));
            let body_start = offset + FRAME_HEADER;

            if len > MAX_FRAME {
                return Err(Error::corrupt(format!(
                    "{}: frame at {} claims {} bytes",
                    self.path.display(), offset, len
                )));
            }
            if body_start + len > data.len() {
                break;
            }

            let body = &data[body_start..body_start + len];
            if crc32fast::hash(body) != crc {
                if body_start + len == data.len() {
                    break;
                }
                return Err(Error::corrupt(format!(
                    "{}: checksum mismatch in frame at {}",
                    self.path.display(), offset
                )));
            }

            let entry = bincode::deserialize::<T>(body).map_err(|e| {
                Error::corrupt(format!("{}: frame at {}: {}", self.path.display(), offset, e))
            })?;
            entries.push(entry);
            offset = body_start + len;
        }

        if offset < data.len() {
            warn!(
                path = %self.path.display(),
                valid_bytes = offset,
                dropped_bytes = data.len() - offset,
                "truncating torn tail of log"
            );
            self.file.set_len(offset as u64)?;
            self.file.sync_all()?;
        }
        self.position = offset as u64;

        debug!(path = %self.path.display(), entries = entries.len(), "log replayed");
        Ok(entries)
    }

    pub fn truncate(&mut self) -> Result<()> {
        self.file.set_len(0)?;
        self.file.sync_all()?;
        self.position = 0;
        self.unsynced = 0;
        Ok(())
    }

    /// Write `entries` as a brand new log at `path`, fsynced, replacing
    /// whatever was there
    pub fn write_fresh<T: Serialize>(path: &Path, entries: &[T]) -> Result<()> {
        let mut file = File::create(path)?;
        for entry in entries {
            file.write_all(&encode_frame(entry)?)?;
        }
        file.sync_all()?;
        Ok(())
    }
}

fn encode_frame<T: Serialize>(entry: &T) -> Result<Vec<u8>> {
    let data = bincode::serialize(entry)?;
    let mut frame = Vec::with_capacity(FRAME_HEADER + data.len());
    frame.extend_from_slice(&(data.len() as u32).to_le_bytes());
    frame.extend_from_slice(&crc32fast::hash(&data).to_le_bytes());
    frame.extend_from_slice(&data);
    Ok(frame)
}

fn read_u32(data: &[u8], at: usize) -> [u8; 4] {
    [data[at], data[at + 1], data[at + 2], data[at + 3]]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;

    #[test]
    fn entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log");

        let mut wal = WAL::open(&path, SyncMode::Immediate).unwrap();
        wal.append(&"first".to_string()).unwrap();
        wal.append(&"second".to_string()).unwrap();
        drop(wal);

        let mut wal = WAL::open(&path, SyncMode::Immediate).unwrap();
        let entries: Vec<String> = wal.read_entries().unwrap();
        assert_eq!(entries, vec!["first", "second"]);
    }

    #[test]
    fn torn_tail_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log");

        let mut wal = WAL::open(&path, SyncMode::None).unwrap();
        wal.append(&1u64).unwrap();
        wal.append(&2u64).unwrap();
        drop(wal);

        // Simulate a crash in the middle of the last append
        let len = fs::metadata(&path).unwrap().len();
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(len - 3).unwrap();
        drop(file);

        let mut wal = WAL::open(&path, SyncMode::None).unwrap();
        let entries: Vec<u64> = wal.read_entries().unwrap();
        assert_eq!(entries, vec![1]);

        wal.append(&3u64).unwrap();
        let entries: Vec<u64> = wal.read_entries().unwrap();
        assert_eq!(entries, vec![1, 3]);
    }

    #[test]
    fn damaged_middle_frame_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log");

        let mut wal = WAL::open(&path, SyncMode::None).unwrap();
        wal.append(&"aaaa".to_string()).unwrap();
        wal.append(&"bbbb".to_string()).unwrap();
        drop(wal);

        let mut bytes = fs::read(&path).unwrap();
        bytes[FRAME_HEADER + 9] ^= 0xff;
        fs::write(&path, bytes).unwrap();

        let mut wal = WAL::open(&path, SyncMode::None).unwrap();
        let err = wal.read_entries::<String>().unwrap_err();
        assert_eq!(err.kind, ErrorKind::Corrupt);
    }
}

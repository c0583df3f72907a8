use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use crate::core::error::Result;

/// File naming derived from the primary data file
#[derive(Debug, Clone)]
pub struct StorageLayout {
    pub data_path: PathBuf,     // Primary log: documents + every secondary index
    pub lock_path: PathBuf,     // Single-writer advisory lock
    pub compact_path: PathBuf,  // Scratch file for log rewrites
    pub search_dir: PathBuf,    // Full-text index directory
}

impl StorageLayout {
    pub fn new(data_path: PathBuf) -> Result<Self> {
        if let Some(parent) = data_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        Ok(StorageLayout {
            lock_path: with_suffix(&data_path, ".lock"),
            compact_path: with_suffix(&data_path, ".compact"),
            search_dir: search_dir_for(&data_path),
            data_path,
        })
    }

}

/// Make a rename inside the parent directory of `path` durable
pub fn sync_parent_dir(path: &Path) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::File::open(parent)?.sync_all()?;
    Ok(())
}

pub fn search_dir_for(data_path: &Path) -> PathBuf {
    with_suffix(data_path, ".search")
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn companion_paths_are_derived_from_data_file() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(dir.path().join("notes.db")).unwrap();

        assert_eq!(layout.search_dir, dir.path().join("notes.db.search"));
        assert_eq!(layout.lock_path, dir.path().join("notes.db.lock"));
        assert_eq!(layout.compact_path, dir.path().join("notes.db.compact"));
    }
}

// SPDX-License-Identifier: GPL-3.0-only

//! Finding recordings below a directory

use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::constants::recording::{LEGACY_METADATA_FILE, METADATA_FILE};
use crate::errors::DeviceResult;

/// Recording found by [`index_recordings`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingEntry {
    /// Directory relative to the indexed root
    pub relative_path: PathBuf,
    /// Absolute directory of the recording
    pub path: PathBuf,
}

impl RecordingEntry {
    /// Display name, using `/` separators
    pub fn name(&self) -> String {
        self.relative_path
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/")
    }
}

/// Recursively find every directory below `root` that contains recording
/// metadata, sorted by relative path
///
/// A missing `root` yields no recordings. Unreadable subdirectories are
/// logged and skipped.
pub fn index_recordings(root: &Path) -> DeviceResult<Vec<RecordingEntry>> {
    let mut entries = Vec::new();
    if !root.exists() {
        return Ok(entries);
    }
    visit(root, Path::new(""), &mut entries, true)?;
    entries.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(entries)
}

fn visit(root: &Path, relative: &Path, entries: &mut Vec<RecordingEntry>, top: bool) -> DeviceResult<()> {
    let dir = root.join(relative);
    let read = match fs::read_dir(&dir) {
        Ok(read) => read,
        Err(e) if !top => {
            warn!(path = %dir.display(), error = %e, "Skipping unreadable directory");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let mut has_metadata = false;
    for entry in read.flatten() {
        let name = entry.file_name();
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if file_type.is_dir() {
            visit(root, &relative.join(&name), entries, false)?;
        } else if name == METADATA_FILE || name == LEGACY_METADATA_FILE {
            has_metadata = true;
        }
    }
    if has_metadata && !relative.as_os_str().is_empty() {
        entries.push(RecordingEntry {
            relative_path: relative.to_path_buf(),
            path: dir,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finds_nested_recordings() {
        let dir = tempfile::tempdir().unwrap();
        for rel in ["b", "a/inner", "a/inner/deeper"] {
            fs::create_dir_all(dir.path().join(rel)).unwrap();
            fs::write(dir.path().join(rel).join(METADATA_FILE), "{}").unwrap();
        }
        fs::create_dir_all(dir.path().join("empty")).unwrap();
        fs::write(dir.path().join("b").join("notes.txt"), "x").unwrap();

        let found = index_recordings(dir.path()).unwrap();
        let names: Vec<String> = found.iter().map(RecordingEntry::name).collect();
        assert_eq!(names, vec!["a/inner", "a/inner/deeper", "b"]);
        assert_eq!(found[2].path, dir.path().join("b"));
    }

    #[test]
    fn test_legacy_metadata_name_is_indexed_once() {
        let dir = tempfile::tempdir().unwrap();
        let old = dir.path().join("old");
        fs::create_dir_all(&old).unwrap();
        fs::write(old.join(LEGACY_METADATA_FILE), "{}").unwrap();
        fs::write(old.join(METADATA_FILE), "{}").unwrap();

        let found = index_recordings(dir.path()).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name(), "old");
    }

    #[test]
    fn test_missing_root_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let found = index_recordings(&dir.path().join("nope")).unwrap();
        assert!(found.is_empty());
    }
}

//! Size accounting for a store directory.
//!
//! The directory listing is the index: there is no manifest, so every
//! question about occupancy is answered by walking the files. The walk is
//! O(entries) and meant for eviction passes and the settings screen, not for
//! the playback hot path.

use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;
use tracing::debug;

/// Suffix of in-progress downloads; such files are not entries yet.
pub const PART_SUFFIX: &str = ".part";

/// One committed entry as seen during a directory walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntrySnapshot {
    pub path: PathBuf,
    pub len: u64,
    pub modified: SystemTime,
}

/// Occupancy of a store directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirectoryUsage {
    pub bytes: u64,
    pub entries: usize,
}

/// Walks `dir` recursively and returns every committed regular file.
///
/// A missing directory is an empty store. Entries that vanish or cannot be
/// read mid-walk are skipped, so the result may sit between two consistent
/// states when writers or evictions run concurrently.
pub async fn scan_entries(dir: &Path) -> Vec<EntrySnapshot> {
    walk(dir, FileKind::Entry).await
}

/// Walks `dir` recursively and returns the part files of downloads that
/// are in progress or were abandoned without cleanup.
pub async fn scan_part_files(dir: &Path) -> Vec<EntrySnapshot> {
    walk(dir, FileKind::Part).await
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum FileKind {
    Entry,
    Part,
}

async fn walk(dir: &Path, kind: FileKind) -> Vec<EntrySnapshot> {
    let mut entries = Vec::new();
    let mut pending = vec![dir.to_path_buf()];

    while let Some(current) = pending.pop() {
        let mut listing = match fs::read_dir(&current).await {
            Ok(listing) => listing,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => {
                debug!("Skipping unreadable cache directory {}: {}", current.display(), e);
                continue;
            }
        };

        loop {
            let entry = match listing.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    debug!("Directory walk interrupted in {}: {}", current.display(), e);
                    break;
                }
            };

            let path = entry.path();
            let Ok(file_type) = entry.file_type().await else {
                continue;
            };

            if file_type.is_dir() {
                pending.push(path);
                continue;
            }
            if !file_type.is_file() {
                continue;
            }
            let found = if is_part_file(&path) { FileKind::Part } else { FileKind::Entry };
            if found != kind {
                continue;
            }

            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            entries.push(EntrySnapshot {
                path,
                len: metadata.len(),
                modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            });
        }
    }

    entries
}

/// Total bytes and entry count under `dir`.
pub async fn directory_usage(dir: &Path) -> DirectoryUsage {
    scan_entries(dir)
        .await
        .iter()
        .fold(DirectoryUsage::default(), |usage, entry| DirectoryUsage {
            bytes: usage.bytes.saturating_add(entry.len),
            entries: usage.entries + 1,
        })
}

pub async fn total_bytes(dir: &Path) -> u64 {
    directory_usage(dir).await.bytes
}

pub fn is_part_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.ends_with(PART_SUFFIX))
}

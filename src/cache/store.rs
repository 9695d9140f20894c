//! Disk-backed key to file mapping.
//!
//! Each entry lives at a canonical path derived from its key. That path only
//! ever names a complete file: writers go through a [`PartFile`] in the same
//! directory and an atomic rename, so a reader sees the old entry, the new
//! entry or nothing.

use sha2::{Digest, Sha256};
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tempfile::TempPath;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::error::Result;
use super::usage::{self, DirectoryUsage, PART_SUFFIX};

/// Hex characters of the SHA-256 digest kept in file names (128 bits).
const HASH_HEX_LEN: usize = 32;
/// Characters of the sanitized key appended for debugging.
const FRAGMENT_LEN: usize = 32;

/// Durable key to bytes mapping for one cache kind.
#[derive(Debug, Clone)]
pub struct ContentStore {
    directory: PathBuf,
    extension: &'static str,
}

/// A temporary file being written inside a store directory.
///
/// Dropping it without [`ContentStore::promote`] deletes the file, which
/// covers errors and cancelled downloads alike.
#[derive(Debug)]
pub struct PartFile {
    file: fs::File,
    path: TempPath,
    written: u64,
}

impl PartFile {
    pub fn file_mut(&mut self) -> &mut fs::File {
        &mut self.file
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.file.write_all(bytes).await?;
        self.written += bytes.len() as u64;
        Ok(())
    }

    /// Flushes buffered writes and returns the final on-disk size.
    pub async fn finish(&mut self) -> io::Result<u64> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        let len = self.file.metadata().await?.len();
        self.written = len;
        Ok(len)
    }

    pub fn len(&self) -> u64 {
        self.written
    }

    pub fn is_empty(&self) -> bool {
        self.written == 0
    }
}

impl ContentStore {
    /// Creates a store rooted at `directory`; nothing touches the disk
    /// until the first write.
    pub fn new(directory: impl Into<PathBuf>, extension: &'static str) -> Self {
        Self {
            directory: directory.into(),
            extension,
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Canonical path for `key`.
    ///
    /// `<sha256(key)[..128 bits]>-<sanitized key prefix>.<extension>`
    pub fn key_to_path(&self, key: &str) -> PathBuf {
        self.directory.join(file_name_for(key, self.extension))
    }

    pub async fn is_cached(&self, key: &str) -> bool {
        is_regular_file(&self.key_to_path(key)).await
    }

    /// Path of the cached entry, if there is one.
    pub async fn cached_file(&self, key: &str) -> Option<PathBuf> {
        let path = self.key_to_path(key);
        if is_regular_file(&path).await {
            Some(path)
        } else {
            None
        }
    }

    /// Refreshes the entry's modification time, making it the most recently
    /// used one.
    pub async fn touch(&self, path: &Path) -> Result<()> {
        set_modified(path, SystemTime::now()).await
    }

    pub async fn usage(&self) -> DirectoryUsage {
        usage::directory_usage(&self.directory).await
    }

    pub async fn size_bytes(&self) -> u64 {
        self.usage().await.bytes
    }

    /// Opens a new temporary file inside the store directory, creating the
    /// directory if the platform purged it.
    pub async fn begin_write(&self) -> Result<PartFile> {
        fs::create_dir_all(&self.directory).await?;

        let named = tempfile::Builder::new()
            .prefix(".")
            .suffix(PART_SUFFIX)
            .tempfile_in(&self.directory)?;
        let (file, path) = named.into_parts();

        Ok(PartFile {
            file: fs::File::from_std(file),
            path,
            written: 0,
        })
    }

    /// Marks a finished part file as most recently used and atomically
    /// moves it to the canonical path of `key`.
    ///
    /// A previous entry for the same key is replaced. The rename is the last
    /// step: on failure the part file is removed and the canonical path is
    /// left untouched, on success there is nothing left to fail.
    pub async fn promote(&self, part: PartFile, key: &str) -> Result<PathBuf> {
        let PartFile { file, path, .. } = part;

        // The rename keeps the mtime set through the open handle
        let file = file.into_std().await;
        tokio::task::spawn_blocking(move || file.set_modified(SystemTime::now())).await??;

        let target = self.key_to_path(key);
        path.persist(&target)?;

        debug!("Promoted cache entry {} -> {}", key, target.display());
        Ok(target)
    }

    /// Removes the entry for `key`; a missing entry is not an error.
    pub async fn remove(&self, key: &str) -> Result<bool> {
        match fs::remove_file(self.key_to_path(key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Deletes every entry and leaves an empty directory behind.
    ///
    /// Results of earlier `is_cached` calls are stale afterwards.
    pub async fn clear(&self) -> Result<()> {
        match fs::remove_dir_all(&self.directory).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        fs::create_dir_all(&self.directory).await?;

        info!("🧹 Cache cleared: {}", self.directory.display());
        Ok(())
    }
}

/// Sets the modification time of `path`.
pub(crate) async fn set_modified(path: &Path, at: SystemTime) -> Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        // Opening for write does not truncate; some platforms refuse
        // timestamp changes through a read-only handle.
        let file = std::fs::OpenOptions::new().write(true).open(&path)?;
        file.set_modified(at)
    })
    .await??;
    Ok(())
}

fn file_name_for(key: &str, extension: &str) -> String {
    let digest = hex::encode(Sha256::digest(key.as_bytes()));
    let fragment = sanitize_fragment(key);
    format!("{}-{}.{}", &digest[..HASH_HEX_LEN], fragment, extension)
}

fn sanitize_fragment(key: &str) -> String {
    let cleaned: String = key
        .chars()
        .take(FRAGMENT_LEN)
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.is_empty() {
        "empty".to_string()
    } else {
        cleaned
    }
}

async fn is_regular_file(path: &Path) -> bool {
    fs::metadata(path)
        .await
        .map(|metadata| metadata.is_file())
        .unwrap_or(false)
}

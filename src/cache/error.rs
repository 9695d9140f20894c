use std::io;
use thiserror::Error;

use crate::sources::SourceError;

/// Internal failure causes of the cache.
///
/// None of these reach the callers of the public cache surface: a failed
/// fetch, save or load is reported as absent and the reason is only logged.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("remote source error: {0}")]
    Source(#[from] SourceError),

    #[error("song list encoding error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to promote temporary file: {0}")]
    Promote(#[from] tempfile::PathPersistError),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, CacheError>;

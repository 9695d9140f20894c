//! # Sources Module
//!
//! Network collaborators consumed by the offline cache.
//!
//! The cache never talks to the Subsonic server directly. It asks a
//! [`StreamUrlBuilder`] for the canonical URL of a song and a
//! [`StreamSource`] for the bytes behind that URL. Both are traits so the
//! playback layer can plug in its own REST client and tests can swap the
//! network for a mock.
//!
//! ## Implementations
//!
//! - [`HttpSource`]: reqwest client with finite connect and read timeouts
//! - [`SubsonicUrls`]: builds `rest/stream` URLs from precomputed auth params

pub mod http;
pub mod subsonic;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use thiserror::Error;
use url::Url;

pub use http::HttpSource;
pub use subsonic::SubsonicUrls;

/// Response body of an opened stream, chunk by chunk.
pub type ByteStream = BoxStream<'static, Result<Bytes, SourceError>>;

/// Errores de las fuentes remotas
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server answered with status {0}")]
    Status(u16),

    #[error("invalid stream URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("no server configured")]
    NotConfigured,
}

/// Opens a readable byte stream for a fully formed URL.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StreamSource: Send + Sync {
    /// Opens the resource and returns its body once the server has answered
    /// with a success status.
    async fn open(&self, url: &Url) -> Result<ByteStream, SourceError>;
}

/// Builds the canonical remote URL for a song identifier.
#[cfg_attr(test, mockall::automock)]
pub trait StreamUrlBuilder: Send + Sync {
    fn stream_url(&self, song_id: &str) -> Result<Url, SourceError>;
}

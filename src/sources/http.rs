use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::{ByteStream, SourceError, StreamSource};

/// Cliente HTTP para descargar streams de audio
pub struct HttpSource {
    client: reqwest::Client,
}

impl HttpSource {
    /// Builds a client whose connect and per-read waits are bounded.
    ///
    /// There is no total request timeout: a long song on a slow link is fine
    /// as long as bytes keep arriving within `read_timeout`.
    pub fn new(connect_timeout: Duration, read_timeout: Duration) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .read_timeout(read_timeout)
            .user_agent(concat!("open-music-cache/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl StreamSource for HttpSource {
    async fn open(&self, url: &Url) -> Result<ByteStream, SourceError> {
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();

        if !status.is_success() {
            debug!("Stream request rejected with status {}", status);
            return Err(SourceError::Status(status.as_u16()));
        }

        Ok(response.bytes_stream().map_err(SourceError::from).boxed())
    }
}

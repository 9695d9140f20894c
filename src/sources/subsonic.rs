use url::Url;

use super::{SourceError, StreamUrlBuilder};

const API_VERSION: &str = "1.16.1";

/// Builds Subsonic `rest/stream` URLs.
///
/// The token and salt are computed by the REST client at login; this type
/// only places them on the query string.
#[derive(Debug, Clone)]
pub struct SubsonicUrls {
    base: Url,
    username: String,
    token: String,
    salt: String,
    client_name: String,
}

impl SubsonicUrls {
    pub fn new(
        base: &str,
        username: impl Into<String>,
        token: impl Into<String>,
        salt: impl Into<String>,
        client_name: impl Into<String>,
    ) -> Result<Self, SourceError> {
        // `Url::join` drops the last path segment unless it ends with '/'
        let mut base = Url::parse(base)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        Ok(Self {
            base,
            username: username.into(),
            token: token.into(),
            salt: salt.into(),
            client_name: client_name.into(),
        })
    }
}

impl StreamUrlBuilder for SubsonicUrls {
    fn stream_url(&self, song_id: &str) -> Result<Url, SourceError> {
        let mut url = self.base.join("rest/stream")?;
        url.query_pairs_mut()
            .append_pair("id", song_id)
            .append_pair("u", &self.username)
            .append_pair("t", &self.token)
            .append_pair("s", &self.salt)
            .append_pair("v", API_VERSION)
            .append_pair("c", &self.client_name);
        Ok(url)
    }
}

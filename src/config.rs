use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;

use crate::sources::SubsonicUrls;

const BYTES_PER_MB: u64 = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct Config {
    // Paths
    pub cache_dir: PathBuf,

    // Song cache
    pub song_cache_max_mb: u64,

    // Song list cache
    pub song_list_cache_max_mb: u64,
    pub song_list_cache_max_entries: usize,
    pub song_list_cache_ttl: Duration,

    // Red
    pub connect_timeout: Duration,
    pub read_timeout: Duration,

    // Servidor Subsonic (opcional: solo para descargas)
    pub subsonic_url: Option<String>,
    pub subsonic_user: Option<String>,
    pub subsonic_token: Option<String>,
    pub subsonic_salt: Option<String>,
    pub subsonic_client: String,
}

impl Config {
    /// Loads `.env` (if present) and the process environment.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self::from_lookup(|key| std::env::var(key).ok())?;

        // Create the cache root if it doesn't exist
        std::fs::create_dir_all(&config.cache_dir)
            .with_context(|| format!("cannot create cache dir {}", config.cache_dir.display()))?;

        Ok(config)
    }

    /// Builds the configuration from a variable lookup, applying defaults
    /// for everything that is not set.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let duration = |key: &str, default: &str| -> Result<Duration> {
            let raw = var(key, default);
            humantime::parse_duration(raw.trim()).with_context(|| format!("{key}: invalid duration '{raw}'"))
        };

        let config = Self {
            // Paths
            cache_dir: var("CACHE_DIR", "/app/cache").into(),

            // Song cache
            song_cache_max_mb: var("SONG_CACHE_MAX_MB", "500")
                .parse()
                .context("SONG_CACHE_MAX_MB")?,

            // Song list cache
            song_list_cache_max_mb: var("SONG_LIST_CACHE_MAX_MB", "5")
                .parse()
                .context("SONG_LIST_CACHE_MAX_MB")?,
            song_list_cache_max_entries: var("SONG_LIST_CACHE_MAX_ENTRIES", "100")
                .parse()
                .context("SONG_LIST_CACHE_MAX_ENTRIES")?,
            song_list_cache_ttl: duration("SONG_LIST_CACHE_TTL", "14days")?,

            // Red
            connect_timeout: duration("STREAM_CONNECT_TIMEOUT", "10s")?,
            read_timeout: duration("STREAM_READ_TIMEOUT", "20s")?,

            // Servidor
            subsonic_url: lookup("SUBSONIC_URL").filter(|s| !s.trim().is_empty()),
            subsonic_user: lookup("SUBSONIC_USER"),
            subsonic_token: lookup("SUBSONIC_TOKEN"),
            subsonic_salt: lookup("SUBSONIC_SALT"),
            subsonic_client: var("SUBSONIC_CLIENT", "open-music"),
        };

        // Validate configuration before returning
        config.validate()?;

        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - Cache budgets and the list entry cap must be greater than 0
    /// - The list TTL and both network timeouts must be greater than 0
    ///
    /// # Returns
    ///
    /// - `Ok(())`: All values are valid
    /// - `Err(anyhow::Error)`: Invalid configuration detected
    pub fn validate(&self) -> Result<()> {
        if self.song_cache_max_mb == 0 {
            anyhow::bail!("Song cache size must be greater than 0");
        }

        if self.song_list_cache_max_mb == 0 {
            anyhow::bail!("Song list cache size must be greater than 0");
        }

        if self.song_list_cache_max_entries == 0 {
            anyhow::bail!("Song list cache entry limit must be greater than 0");
        }

        if self.song_list_cache_ttl.is_zero() {
            anyhow::bail!("Song list cache TTL must be greater than 0");
        }

        // Timeouts must be finite and non-zero
        if self.connect_timeout.is_zero() || self.read_timeout.is_zero() {
            anyhow::bail!("Stream timeouts must be greater than 0");
        }

        Ok(())
    }

    pub fn song_cache_max_bytes(&self) -> u64 {
        self.song_cache_max_mb.saturating_mul(BYTES_PER_MB)
    }

    pub fn song_list_cache_max_bytes(&self) -> u64 {
        self.song_list_cache_max_mb.saturating_mul(BYTES_PER_MB)
    }

    /// Stream URL builder for the configured server.
    pub fn subsonic_urls(&self) -> Result<SubsonicUrls> {
        let base = self
            .subsonic_url
            .as_deref()
            .context("SUBSONIC_URL is required to download songs")?;
        let user = self.subsonic_user.clone().context("SUBSONIC_USER is not set")?;
        let token = self.subsonic_token.clone().context("SUBSONIC_TOKEN is not set")?;
        let salt = self.subsonic_salt.clone().context("SUBSONIC_SALT is not set")?;

        Ok(SubsonicUrls::new(base, user, token, salt, self.subsonic_client.clone())?)
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// Credentials are left out.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Cache root: {}\n  \
            Songs: {} MB\n  \
            Song lists: {} MB, {} entries, TTL {}\n  \
            Network: connect {}, read {}\n  \
            Server: {}",
            self.cache_dir.display(),
            self.song_cache_max_mb,
            self.song_list_cache_max_mb,
            self.song_list_cache_max_entries,
            humantime::format_duration(self.song_list_cache_ttl),
            humantime::format_duration(self.connect_timeout),
            humantime::format_duration(self.read_timeout),
            self.subsonic_url.as_deref().unwrap_or("not configured"),
        )
    }
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            cache_dir: "/app/cache".into(),

            song_cache_max_mb: 500,

            song_list_cache_max_mb: 5,
            song_list_cache_max_entries: 100,
            song_list_cache_ttl: Duration::from_secs(14 * 24 * 60 * 60),

            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(20),

            subsonic_url: None,
            subsonic_user: None,
            subsonic_token: None,
            subsonic_salt: None,
            subsonic_client: "open-music".to_string(),
        }
    }
}

//! # Cache Module
//!
//! Offline caching for the Open Music client.
//!
//! Two disk stores live under the application cache root:
//!
//! - **Songs** (`songs/`): audio streamed from the Subsonic server, keyed by
//!   song id, kept under a byte budget with LRU eviction.
//! - **Song lists** (`song_lists/`): JSON song lists of playlists and albums
//!   for offline browsing, bounded by size, entry count and age.
//!
//! ## Design
//!
//! - **No index**: the directory listing is the index. A key hashes to a
//!   file name, so presence is a single `stat`.
//! - **Atomic promotion**: downloads land in a `.part` file next to the
//!   entries and are renamed into place. Readers never see half a song.
//! - **Recency by mtime**: hits and writes refresh the file's modification
//!   time; eviction removes the oldest files first.
//! - **Best effort**: callers get a path or nothing. Every internal failure
//!   (network, disk, corrupt JSON) means "go to the server".
//!
//! The host platform may purge the cache root at any time; stores recreate
//! their directories on the next write.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use open_music_cache::cache::{OfflineCaches, format_size};
//! use open_music_cache::config::Config;
//! use open_music_cache::sources::{HttpSource, SubsonicUrls};
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = Config::load()?;
//! let source = Arc::new(HttpSource::new(config.connect_timeout, config.read_timeout)?);
//! let urls = Arc::new(SubsonicUrls::new("https://music.example.com", "ana", "token", "salt", "open-music")?);
//! let caches = OfflineCaches::new(&config, source, urls);
//!
//! if let Some(path) = caches.songs().fetch("song-id").await {
//!     println!("play {}", path.display());
//! }
//! println!("{}", format_size(caches.songs().size_bytes().await));
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod eviction;
pub mod fetch;
pub mod song_lists;
pub mod store;
pub mod usage;

use std::sync::Arc;
use tracing::info;

use crate::config::Config;
use crate::sources::{StreamSource, StreamUrlBuilder};

pub use error::CacheError;
pub use eviction::{Admission, EvictionPolicy, EvictionReport};
pub use fetch::SongCache;
pub use song_lists::{ListScope, SongListCache, SongSummary};
pub use store::ContentStore;
pub use usage::DirectoryUsage;

/// Subdirectory of the cache root holding song audio.
pub const SONGS_DIR: &str = "songs";
/// Subdirectory of the cache root holding song lists.
pub const SONG_LISTS_DIR: &str = "song_lists";

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Read timeouts a part file may sit idle before it counts as abandoned.
const STALE_PART_READ_TIMEOUTS: u32 = 6;

/// Formats a byte count as megabytes with one decimal, e.g. `"12.5 MB"`.
pub fn format_size(bytes: u64) -> String {
    format!("{:.1} MB", bytes as f64 / BYTES_PER_MB)
}

/// Occupancy of both stores, as shown on the settings screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheUsage {
    pub songs: DirectoryUsage,
    pub song_lists: DirectoryUsage,
}

impl std::fmt::Display for CacheUsage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "📦 Songs: {} ({} files)\n📝 Song lists: {} ({} files)",
            format_size(self.songs.bytes),
            self.songs.entries,
            format_size(self.song_lists.bytes),
            self.song_lists.entries
        )
    }
}

/// Both offline stores, built from the application configuration.
///
/// One instance per application; clone the `Arc` it lives in rather than
/// constructing a second one over the same directories.
pub struct OfflineCaches {
    songs: SongCache,
    song_lists: SongListCache,
}

impl OfflineCaches {
    pub fn new(
        config: &Config,
        source: Arc<dyn StreamSource>,
        urls: Arc<dyn StreamUrlBuilder>,
    ) -> Self {
        let stale_part_age = config.read_timeout.saturating_mul(STALE_PART_READ_TIMEOUTS);

        let songs = SongCache::new(
            ContentStore::new(config.cache_dir.join(SONGS_DIR), "audio"),
            EvictionPolicy::size_bounded(config.song_cache_max_bytes())
                .with_stale_part_age(stale_part_age),
            source,
            urls,
        );
        let song_lists = SongListCache::new(
            ContentStore::new(config.cache_dir.join(SONG_LISTS_DIR), "json"),
            EvictionPolicy::size_bounded(config.song_list_cache_max_bytes())
                .with_max_entries(config.song_list_cache_max_entries)
                .with_ttl(config.song_list_cache_ttl)
                .with_stale_part_age(stale_part_age),
        );

        Self { songs, song_lists }
    }

    pub fn songs(&self) -> &SongCache {
        &self.songs
    }

    pub fn song_lists(&self) -> &SongListCache {
        &self.song_lists
    }

    pub async fn usage(&self) -> CacheUsage {
        let (songs, song_lists) = tokio::join!(
            self.songs.store().usage(),
            self.song_lists.store().usage()
        );
        CacheUsage { songs, song_lists }
    }

    pub async fn clear_songs(&self) -> Result<(), CacheError> {
        self.songs.clear().await
    }

    pub async fn clear_song_lists(&self) -> Result<(), CacheError> {
        self.song_lists.clear().await
    }

    /// Applies both eviction policies without admitting anything new.
    pub async fn prune(&self) -> (EvictionReport, EvictionReport) {
        let reports = tokio::join!(self.songs.prune(), self.song_lists.prune());
        info!(
            "🧹 Prune finished: {} songs and {} song lists removed",
            reports.0.removed(),
            reports.1.removed()
        );
        reports
    }
}

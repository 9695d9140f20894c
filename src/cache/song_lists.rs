//! Song lists of playlists and albums kept for offline browsing.
//!
//! Same store and eviction pattern as the song cache, applied to small JSON
//! files. Entries also expire by age, measured from the last save. This is
//! a best-effort accelerator: the server is the source of truth, so every
//! failure here is logged and reported as "nothing cached".

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::time::SystemTime;
use tokio::fs;
use tracing::{debug, warn};

use super::error::Result;
use super::eviction::{Admission, EvictionPolicy, EvictionReport};
use super::store::ContentStore;

/// Id-space a song list belongs to.
///
/// Playlist and album ids may overlap on the server, so the scope is part of
/// every cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListScope {
    Playlist,
    Album,
}

impl ListScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListScope::Playlist => "playlist",
            ListScope::Album => "album",
        }
    }
}

impl fmt::Display for ListScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lightweight song record stored in cached lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SongSummary {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_art: Option<String>,
}

impl SongSummary {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            artist: None,
            album: None,
            album_id: None,
            duration_secs: None,
            track: None,
            cover_art: None,
        }
    }

    pub fn with_artist(mut self, artist: impl Into<String>) -> Self {
        self.artist = Some(artist.into());
        self
    }

    pub fn with_album(mut self, album_id: impl Into<String>, album: impl Into<String>) -> Self {
        self.album_id = Some(album_id.into());
        self.album = Some(album.into());
        self
    }

    pub fn with_duration_secs(mut self, duration_secs: u32) -> Self {
        self.duration_secs = Some(duration_secs);
        self
    }
}

/// Cache of song lists keyed by playlist or album id.
#[derive(Debug, Clone)]
pub struct SongListCache {
    store: ContentStore,
    policy: EvictionPolicy,
}

impl SongListCache {
    pub fn new(store: ContentStore, policy: EvictionPolicy) -> Self {
        Self { store, policy }
    }

    pub fn store(&self) -> &ContentStore {
        &self.store
    }

    /// Stores `items` as the list of `parent_id`.
    ///
    /// Returns `false` when nothing was written; the reason is only logged.
    pub async fn save(&self, scope: ListScope, parent_id: &str, items: &[SongSummary]) -> bool {
        match self.try_save(scope, parent_id, items).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Could not cache {} {} song list: {}", scope, parent_id, e);
                false
            }
        }
    }

    /// Cached list of `parent_id`, unless it is missing, expired or
    /// unreadable. Expired and corrupt entries are removed on the way.
    pub async fn load(&self, scope: ListScope, parent_id: &str) -> Option<Vec<SongSummary>> {
        match self.try_load(scope, parent_id).await {
            Ok(items) => items,
            Err(e) => {
                warn!("Could not read cached {} {} song list: {}", scope, parent_id, e);
                None
            }
        }
    }

    /// Runs the eviction policy without admitting anything.
    pub async fn prune(&self) -> EvictionReport {
        self.policy.enforce(self.store.directory(), None).await
    }

    pub async fn size_bytes(&self) -> u64 {
        self.store.size_bytes().await
    }

    pub async fn clear(&self) -> Result<()> {
        self.store.clear().await
    }

    async fn try_save(&self, scope: ListScope, parent_id: &str, items: &[SongSummary]) -> Result<()> {
        let key = cache_key(scope, parent_id);
        let content = serde_json::to_vec(items)?;

        let target = self.store.key_to_path(&key);
        let admission = Admission {
            bytes: content.len() as u64,
            target: &target,
        };
        self.policy
            .enforce(self.store.directory(), Some(admission))
            .await;

        let mut part = self.store.begin_write().await?;
        part.write_all(&content).await?;
        part.finish().await?;
        self.store.promote(part, &key).await?;

        debug!("Cached {} {} with {} songs", scope, parent_id, items.len());
        Ok(())
    }

    async fn try_load(&self, scope: ListScope, parent_id: &str) -> Result<Option<Vec<SongSummary>>> {
        let key = cache_key(scope, parent_id);
        let path = self.store.key_to_path(&key);

        let metadata = match fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => return Ok(None),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        if self.policy.is_expired(modified, SystemTime::now()) {
            debug!("Cached {} {} expired", scope, parent_id);
            self.store.remove(&key).await?;
            return Ok(None);
        }

        let content = match fs::read(&path).await {
            Ok(content) => content,
            // Evicted since the metadata call
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_slice(&content) {
            Ok(items) => Ok(Some(items)),
            Err(e) => {
                warn!("Dropping corrupt cached {} {} song list: {}", scope, parent_id, e);
                self.store.remove(&key).await?;
                Ok(None)
            }
        }
    }
}

fn cache_key(scope: ListScope, parent_id: &str) -> String {
    format!("{}:{}", scope.as_str(), parent_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::path::Path;
    use std::time::Duration;

    const TTL: Duration = Duration::from_secs(14 * 24 * 60 * 60);

    fn lists(dir: &Path, max_bytes: u64, max_entries: usize) -> SongListCache {
        SongListCache::new(
            ContentStore::new(dir.join("song_lists"), "json"),
            EvictionPolicy::size_bounded(max_bytes)
                .with_max_entries(max_entries)
                .with_ttl(TTL),
        )
    }

    fn songs() -> Vec<SongSummary> {
        vec![
            SongSummary::new("1", "Intro").with_artist("Band").with_duration_secs(61),
            SongSummary::new("2", "Outro").with_album("al-9", "Record"),
        ]
    }

    async fn set_age(cache: &SongListCache, scope: ListScope, id: &str, age: Duration) {
        let path = cache.store().key_to_path(&cache_key(scope, id));
        crate::cache::store::set_modified(&path, SystemTime::now() - age)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = lists(tmp.path(), 5 * 1024 * 1024, 100);

        assert!(cache.save(ListScope::Playlist, "pl-1", &songs()).await);
        assert_eq!(cache.load(ListScope::Playlist, "pl-1").await, Some(songs()));
        assert_eq!(cache.load(ListScope::Playlist, "pl-2").await, None);
    }

    #[tokio::test]
    async fn test_scopes_do_not_collide() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = lists(tmp.path(), 5 * 1024 * 1024, 100);
        let album = vec![SongSummary::new("9", "Album song")];

        cache.save(ListScope::Playlist, "42", &songs()).await;
        cache.save(ListScope::Album, "42", &album).await;

        assert_eq!(cache.load(ListScope::Playlist, "42").await, Some(songs()));
        assert_eq!(cache.load(ListScope::Album, "42").await, Some(album));
    }

    #[tokio::test]
    async fn test_expired_entry_is_removed_on_load() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = lists(tmp.path(), 5 * 1024 * 1024, 100);
        cache.save(ListScope::Album, "al-1", &songs()).await;

        set_age(&cache, ListScope::Album, "al-1", TTL + Duration::from_secs(1)).await;

        assert_eq!(cache.load(ListScope::Album, "al-1").await, None);
        let path = cache.store().key_to_path(&cache_key(ListScope::Album, "al-1"));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_entry_just_inside_ttl_is_served() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = lists(tmp.path(), 5 * 1024 * 1024, 100);
        cache.save(ListScope::Album, "al-1", &songs()).await;

        set_age(&cache, ListScope::Album, "al-1", TTL - Duration::from_secs(60)).await;
        assert_eq!(cache.load(ListScope::Album, "al-1").await, Some(songs()));
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_dropped() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = lists(tmp.path(), 5 * 1024 * 1024, 100);
        cache.save(ListScope::Playlist, "pl-1", &songs()).await;

        let path = cache.store().key_to_path(&cache_key(ListScope::Playlist, "pl-1"));
        std::fs::write(&path, b"{ not json").unwrap();

        assert_eq!(cache.load(ListScope::Playlist, "pl-1").await, None);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_entry_cap_drops_oldest() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = lists(tmp.path(), 5 * 1024 * 1024, 2);

        for (i, id) in ["p1", "p2", "p3"].iter().enumerate() {
            cache.save(ListScope::Playlist, id, &songs()).await;
            set_age(&cache, ListScope::Playlist, id, Duration::from_secs(100 - i as u64 * 10)).await;
            assert!(cache.store().usage().await.entries <= 2);
        }

        assert_eq!(cache.load(ListScope::Playlist, "p1").await, None);
        assert!(cache.load(ListScope::Playlist, "p2").await.is_some());
        assert!(cache.load(ListScope::Playlist, "p3").await.is_some());
        assert_eq!(cache.store().usage().await.entries, 2);
    }

    #[tokio::test]
    async fn test_resave_does_not_evict_other_lists() {
        let tmp = tempfile::tempdir().unwrap();
        let entry_len = serde_json::to_vec(&songs()).unwrap().len() as u64;

        // Full on bytes
        let cache = lists(&tmp.path().join("bytes"), entry_len * 2, 100);
        cache.save(ListScope::Playlist, "p1", &songs()).await;
        cache.save(ListScope::Playlist, "p2", &songs()).await;
        assert!(cache.save(ListScope::Playlist, "p2", &songs()).await);
        assert!(cache.load(ListScope::Playlist, "p1").await.is_some());
        assert_eq!(cache.store().usage().await.entries, 2);

        // Full on entries
        let cache = lists(&tmp.path().join("count"), 5 * 1024 * 1024, 2);
        cache.save(ListScope::Album, "a1", &songs()).await;
        cache.save(ListScope::Album, "a2", &songs()).await;
        assert!(cache.save(ListScope::Album, "a2", &songs()).await);
        assert!(cache.load(ListScope::Album, "a1").await.is_some());
        assert_eq!(cache.store().usage().await.entries, 2);
    }

    #[tokio::test]
    async fn test_save_prunes_expired_entries_first() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = lists(tmp.path(), 5 * 1024 * 1024, 100);

        cache.save(ListScope::Album, "stale", &songs()).await;
        set_age(&cache, ListScope::Album, "stale", TTL * 2).await;
        cache.save(ListScope::Album, "fresh", &songs()).await;

        assert_eq!(cache.store().usage().await.entries, 1);
        assert!(cache.load(ListScope::Album, "fresh").await.is_some());
    }

    #[tokio::test]
    async fn test_size_budget_applies_to_lists() {
        let tmp = tempfile::tempdir().unwrap();
        let entry_len = serde_json::to_vec(&songs()).unwrap().len() as u64;
        let cache = lists(tmp.path(), entry_len * 2, 100);

        for id in ["a", "b", "c"] {
            cache.save(ListScope::Playlist, id, &songs()).await;
            assert!(cache.size_bytes().await <= entry_len * 2);
        }
    }

    #[tokio::test]
    async fn test_clear_and_missing_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = lists(tmp.path(), 5 * 1024 * 1024, 100);
        assert_eq!(cache.load(ListScope::Album, "none").await, None);
        assert_eq!(cache.size_bytes().await, 0);

        cache.save(ListScope::Album, "a", &songs()).await;
        cache.clear().await.unwrap();
        assert_eq!(cache.size_bytes().await, 0);
        assert_eq!(cache.load(ListScope::Album, "a").await, None);
    }

    #[test]
    fn test_summary_json_shape() {
        let json = serde_json::to_value(SongSummary::new("7", "Song").with_duration_secs(200)).unwrap();
        assert_eq!(json, serde_json::json!({ "id": "7", "title": "Song", "durationSecs": 200 }));
    }
}

//! Fetch-and-populate pipeline for song audio.
//!
//! A request for a song is served from the store when possible. Otherwise
//! the body is streamed into a part file next to the entries, the eviction
//! policy makes room for its size, and the part file is renamed into place.
//! The canonical path therefore only ever names a complete download.

use dashmap::DashMap;
use futures::TryStreamExt;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::io::StreamReader;
use tracing::{debug, info, instrument, warn};

use super::error::Result;
use super::eviction::{Admission, EvictionPolicy, EvictionReport};
use super::store::ContentStore;
use crate::sources::{StreamSource, StreamUrlBuilder};

/// Offline song cache: a [`ContentStore`] fed from the network.
pub struct SongCache {
    store: ContentStore,
    policy: EvictionPolicy,
    source: Arc<dyn StreamSource>,
    urls: Arc<dyn StreamUrlBuilder>,
    in_flight: InFlight,
}

impl SongCache {
    pub fn new(
        store: ContentStore,
        policy: EvictionPolicy,
        source: Arc<dyn StreamSource>,
        urls: Arc<dyn StreamUrlBuilder>,
    ) -> Self {
        Self {
            store,
            policy,
            source,
            urls,
            in_flight: InFlight::default(),
        }
    }

    pub fn store(&self) -> &ContentStore {
        &self.store
    }

    pub fn policy(&self) -> &EvictionPolicy {
        &self.policy
    }

    /// Local path of a cached song without touching the network.
    ///
    /// A hit refreshes the entry's recency.
    pub async fn cached_path(&self, song_id: &str) -> Option<PathBuf> {
        let path = self.store.cached_file(song_id).await?;
        if let Err(e) = self.store.touch(&path).await {
            // Evicted between the check and the touch
            debug!("Could not refresh {}: {}", path.display(), e);
            return None;
        }
        Some(path)
    }

    /// Returns a usable local path for `song_id`, downloading it first when
    /// it is not cached yet.
    ///
    /// Every failure collapses into `None`; the caller falls back to
    /// streaming from the server. Concurrent calls for the same song share a
    /// single download. Dropping the returned future removes any partial
    /// download.
    #[instrument(skip(self))]
    pub async fn fetch(&self, song_id: &str) -> Option<PathBuf> {
        if let Some(path) = self.cached_path(song_id).await {
            debug!("Song cache hit");
            return Some(path);
        }

        let _slot = self.in_flight.claim(song_id).await;

        // Whoever held the slot before us may have finished the download
        if let Some(path) = self.cached_path(song_id).await {
            debug!("Song cached by a concurrent fetch");
            return Some(path);
        }

        match self.download(song_id).await {
            Ok(path) => Some(path),
            Err(e) => {
                warn!("Song download failed, not cached: {}", e);
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

    async fn download(&self, song_id: &str) -> Result<PathBuf> {
        let url = self.urls.stream_url(song_id)?;
        let body = self.source.open(&url).await?;

        let mut part = self.store.begin_write().await?;
        let mut reader = StreamReader::new(body.map_err(io::Error::other));
        tokio::io::copy(&mut reader, part.file_mut()).await?;
        let size = part.finish().await?;

        let target = self.store.key_to_path(song_id);
        let admission = Admission { bytes: size, target: &target };
        self.policy.enforce(self.store.directory(), Some(admission)).await;
        let path = self.store.promote(part, song_id).await?;

        info!("⬇️ Cached song {} ({} bytes)", song_id, size);
        Ok(path)
    }
}

/// Per-key download slots.
///
/// The first fetch of a key holds the slot while downloading; later fetches
/// wait on it and then find the entry in the store.
#[derive(Default)]
struct InFlight {
    slots: DashMap<String, Slot>,
}

#[derive(Default)]
struct Slot {
    lock: Arc<Mutex<()>>,
    /// Fetches holding or waiting for `lock`.
    users: usize,
}

/// Registration of one fetch in a slot. The last one to go removes the
/// slot, whether it held the lock or was dropped while waiting.
struct SlotTicket<'a> {
    owner: &'a InFlight,
    key: String,
}

struct SlotGuard<'a> {
    // Released before the ticket
    _held: OwnedMutexGuard<()>,
    _ticket: SlotTicket<'a>,
}

impl InFlight {
    async fn claim(&self, key: &str) -> SlotGuard<'_> {
        let lock = {
            let mut slot = self.slots.entry(key.to_owned()).or_default();
            slot.users += 1;
            Arc::clone(&slot.lock)
        };
        let ticket = SlotTicket {
            owner: self,
            key: key.to_owned(),
        };

        let held = lock.lock_owned().await;
        SlotGuard {
            _held: held,
            _ticket: ticket,
        }
    }
}

impl Drop for SlotTicket<'_> {
    fn drop(&mut self) {
        self.owner.slots.remove_if_mut(&self.key, |_, slot| {
            slot.users -= 1;
            slot.users == 0
        });
    }
}

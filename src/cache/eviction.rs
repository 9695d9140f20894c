//! Recency-based eviction under a byte budget.
//!
//! Ordering is pure LRU on file modification time: no frequency or size
//! weighting. A store may additionally cap its entry count and expire
//! entries by age, which is what the song-list cache does.
//!
//! Part files are not entries, but a download that died without unwinding
//! leaves one behind. Every pass deletes part files that have not been
//! written to for longer than the policy's stale-part age.

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs;
use tracing::{debug, info, warn};

use super::usage::{self, EntrySnapshot};

/// Idle time after which a part file counts as abandoned.
pub const DEFAULT_STALE_PART_AGE: Duration = Duration::from_secs(15 * 60);

/// Limits a store is kept under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvictionPolicy {
    max_bytes: u64,
    max_entries: Option<usize>,
    ttl: Option<Duration>,
    stale_part_age: Duration,
}

/// An entry about to be written into the store.
#[derive(Debug, Clone, Copy)]
pub struct Admission<'a> {
    pub bytes: u64,
    /// Canonical path the entry is promoted to. A file already there is
    /// replaced, so it is neither counted nor evicted.
    pub target: &'a Path,
}

/// What an eviction pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictionReport {
    /// Entries removed because they outlived the TTL.
    pub expired: usize,
    /// Entries removed to get under the size or count limit.
    pub evicted: usize,
    /// Abandoned part files removed.
    pub stale_parts: usize,
    pub freed_bytes: u64,
    /// Bytes left in the store, not counting the incoming entry.
    pub remaining_bytes: u64,
    /// Deletions that failed and were skipped.
    pub failed: usize,
}

impl EvictionReport {
    /// Entries removed; abandoned part files are not entries.
    pub fn removed(&self) -> usize {
        self.expired + self.evicted
    }
}

impl EvictionPolicy {
    pub fn size_bounded(max_bytes: u64) -> Self {
        Self {
            max_bytes,
            max_entries: None,
            ttl: None,
            stale_part_age: DEFAULT_STALE_PART_AGE,
        }
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = Some(max_entries);
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Part files idle for longer than `age` are deleted by every pass.
    /// Must comfortably exceed the stream read timeout.
    pub fn with_stale_part_age(mut self, age: Duration) -> Self {
        self.stale_part_age = age;
        self
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    pub fn stale_part_age(&self) -> Duration {
        self.stale_part_age
    }

    /// Whether an entry last written at `modified` has outlived the TTL.
    pub fn is_expired(&self, modified: SystemTime, now: SystemTime) -> bool {
        match self.ttl {
            // Timestamps in the future (clock changes) count as fresh
            Some(ttl) => now.duration_since(modified).is_ok_and(|age| age > ttl),
            None => false,
        }
    }

    /// Brings `dir` within its limits, leaving room for `incoming` when an
    /// entry is about to be admitted.
    ///
    /// When the incoming entry alone exceeds the budget the store ends up
    /// empty and the caller still admits the entry; the next pass finds
    /// nothing left to remove.
    pub async fn enforce(&self, dir: &Path, incoming: Option<Admission<'_>>) -> EvictionReport {
        let now = SystemTime::now();
        let swept = self.sweep_stale_parts(dir, now).await;

        let mut entries = usage::scan_entries(dir).await;
        let incoming = incoming.map(|admission| {
            entries.retain(|entry| entry.path != admission.target);
            admission.bytes
        });

        let mut report = self.enforce_with(entries, incoming, now, remove_entry).await;
        report.stale_parts = swept.stale_parts;
        report.freed_bytes += swept.freed_bytes;
        report.failed += swept.failed;

        if report.removed() > 0 || report.stale_parts > 0 || report.failed > 0 {
            info!(
                "🧹 Eviction in {}: {} expired, {} evicted, {} stale parts, {} bytes freed, {} failed",
                dir.display(),
                report.expired,
                report.evicted,
                report.stale_parts,
                report.freed_bytes,
                report.failed
            );
        }
        report
    }

    /// Core of [`enforce`](Self::enforce) over an already scanned listing.
    ///
    /// `incoming` is the size of an entry about to be admitted; it counts
    /// against both the byte budget and the entry cap. `remove` deletes one
    /// file. A failed deletion is skipped and does not count towards the
    /// running totals.
    pub(crate) async fn enforce_with<F, Fut>(
        &self,
        mut entries: Vec<EntrySnapshot>,
        incoming: Option<u64>,
        now: SystemTime,
        mut remove: F,
    ) -> EvictionReport
    where
        F: FnMut(PathBuf) -> Fut,
        Fut: Future<Output = io::Result<()>>,
    {
        let mut report = EvictionReport::default();
        let mut total: u64 = entries.iter().map(|entry| entry.len).sum();
        let mut count = entries.len();

        if self.ttl.is_some() {
            let mut fresh = Vec::with_capacity(entries.len());
            for entry in entries {
                if !self.is_expired(entry.modified, now) {
                    fresh.push(entry);
                    continue;
                }
                match remove(entry.path.clone()).await {
                    Ok(()) => {
                        debug!("Expired cache entry {}", entry.path.display());
                        total = total.saturating_sub(entry.len);
                        count -= 1;
                        report.expired += 1;
                        report.freed_bytes += entry.len;
                    }
                    Err(e) => {
                        warn!("Could not remove expired entry {}: {}", entry.path.display(), e);
                        report.failed += 1;
                        fresh.push(entry);
                    }
                }
            }
            entries = fresh;
        }

        if !self.over_limit(total, count, incoming) {
            report.remaining_bytes = total;
            return report;
        }

        entries.sort_by_key(|entry| entry.modified);
        for entry in entries {
            if !self.over_limit(total, count, incoming) {
                break;
            }
            match remove(entry.path.clone()).await {
                Ok(()) => {
                    debug!("Evicted cache entry {} ({} bytes)", entry.path.display(), entry.len);
                    total = total.saturating_sub(entry.len);
                    count -= 1;
                    report.evicted += 1;
                    report.freed_bytes += entry.len;
                }
                Err(e) => {
                    warn!("Could not evict {}: {}", entry.path.display(), e);
                    report.failed += 1;
                }
            }
        }

        report.remaining_bytes = total;
        report
    }

    fn over_limit(&self, total: u64, count: usize, incoming: Option<u64>) -> bool {
        let admitted = usize::from(incoming.is_some());
        total.saturating_add(incoming.unwrap_or(0)) > self.max_bytes
            || self.max_entries.is_some_and(|max| count + admitted > max)
    }

    /// Deletes part files nobody has written to for longer than the
    /// stale-part age. Live downloads keep refreshing their mtime.
    async fn sweep_stale_parts(&self, dir: &Path, now: SystemTime) -> EvictionReport {
        let mut report = EvictionReport::default();
        for part in usage::scan_part_files(dir).await {
            let stale = now
                .duration_since(part.modified)
                .is_ok_and(|idle| idle > self.stale_part_age);
            if !stale {
                continue;
            }
            match remove_entry(part.path.clone()).await {
                Ok(()) => {
                    debug!("Removed abandoned part file {} ({} bytes)", part.path.display(), part.len);
                    report.stale_parts += 1;
                    report.freed_bytes += part.len;
                }
                Err(e) => {
                    warn!("Could not remove abandoned part file {}: {}", part.path.display(), e);
                    report.failed += 1;
                }
            }
        }
        report
    }
}

/// Deletes one entry; an entry someone else already removed counts as done.
async fn remove_entry(path: PathBuf) -> io::Result<()> {
    match fs::remove_file(&path).await {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;

    fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    fn entry(name: &str, len: u64, modified: u64) -> EntrySnapshot {
        EntrySnapshot {
            path: PathBuf::from(name),
            len,
            modified: at(modified),
        }
    }

    async fn run(
        policy: EvictionPolicy,
        entries: Vec<EntrySnapshot>,
        incoming: Option<u64>,
        now: u64,
        failing: &[&str],
    ) -> (EvictionReport, Vec<String>) {
        let removed = RefCell::new(Vec::new());
        let report = policy
            .enforce_with(entries, incoming, at(now), |path| {
                let name = path.to_string_lossy().into_owned();
                let fails = failing.contains(&name.as_str());
                if !fails {
                    removed.borrow_mut().push(name);
                }
                async move {
                    if fails {
                        Err(io::Error::new(io::ErrorKind::PermissionDenied, "locked"))
                    } else {
                        Ok(())
                    }
                }
            })
            .await;
        (report, removed.into_inner())
    }

    #[tokio::test]
    async fn test_no_op_when_incoming_fits() {
        let policy = EvictionPolicy::size_bounded(500);
        let (report, removed) = run(policy, vec![entry("a", 200, 1), entry("b", 200, 2)], Some(100), 10, &[]).await;

        assert!(removed.is_empty());
        assert_eq!(report.remaining_bytes, 400);
    }

    #[tokio::test]
    async fn test_evicts_oldest_first() {
        let policy = EvictionPolicy::size_bounded(500);
        let entries = vec![entry("c", 150, 3), entry("a", 150, 1), entry("b", 150, 2)];

        let (report, removed) = run(policy, entries, Some(300), 10, &[]).await;
        assert_eq!(removed, vec!["a", "b"]);
        assert_eq!(report.evicted, 2);
        assert_eq!(report.remaining_bytes, 150);
    }

    #[tokio::test]
    async fn test_failed_deletion_is_skipped_without_credit() {
        let policy = EvictionPolicy::size_bounded(500);
        let entries = vec![entry("a", 200, 1), entry("b", 200, 2), entry("c", 200, 3)];

        let (report, removed) = run(policy, entries, Some(200), 10, &["a"]).await;
        assert_eq!(removed, vec!["b", "c"]);
        assert_eq!(report.failed, 1);
        assert_eq!(report.remaining_bytes, 200);
    }

    #[tokio::test]
    async fn test_oversized_incoming_empties_store() {
        let policy = EvictionPolicy::size_bounded(500);
        let entries = vec![entry("a", 100, 1), entry("b", 100, 2)];

        let (report, removed) = run(policy, entries, Some(900), 10, &[]).await;
        assert_eq!(removed, vec!["a", "b"]);
        assert_eq!(report.remaining_bytes, 0);
    }

    #[tokio::test]
    async fn test_ttl_runs_before_count_limit() {
        let policy = EvictionPolicy::size_bounded(10_000)
            .with_max_entries(2)
            .with_ttl(Duration::from_secs(100));
        let entries = vec![
            entry("old", 10, 1),
            entry("x", 10, 700),
            entry("y", 10, 710),
            entry("z", 10, 720),
        ];

        let (report, removed) = run(policy, entries, None, 750, &[]).await;
        assert_eq!(removed, vec!["old", "x"]);
        assert_eq!(
            report,
            EvictionReport {
                expired: 1,
                evicted: 1,
                stale_parts: 0,
                freed_bytes: 20,
                remaining_bytes: 20,
                failed: 0,
            }
        );
    }

    #[tokio::test]
    async fn test_incoming_entry_counts_against_entry_cap() {
        let policy = EvictionPolicy::size_bounded(10_000).with_max_entries(2);
        let entries = vec![entry("b", 10, 2), entry("a", 10, 1)];

        let (report, removed) = run(policy, entries.clone(), Some(10), 10, &[]).await;
        assert_eq!(removed, vec!["a"]);
        assert_eq!(report.evicted, 1);

        // A plain pass leaves a full store alone
        let (report, removed) = run(policy, entries, None, 10, &[]).await;
        assert!(removed.is_empty());
        assert_eq!(report.remaining_bytes, 20);
    }

    #[test]
    fn test_future_timestamps_are_not_expired() {
        let policy = EvictionPolicy::size_bounded(1).with_ttl(Duration::from_secs(5));
        assert!(!policy.is_expired(at(100), at(50)));
        assert!(!policy.is_expired(at(100), at(105)));
        assert!(policy.is_expired(at(100), at(106)));
    }

    fn write_at(path: &Path, len: usize, secs: u64) {
        std::fs::write(path, vec![0u8; len]).unwrap();
        std::fs::File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(at(secs))
            .unwrap();
    }

    #[tokio::test]
    async fn test_enforce_on_disk() {
        let tmp = tempfile::tempdir().unwrap();
        for (name, secs) in [("a", 1), ("b", 2), ("c", 3)] {
            write_at(&tmp.path().join(name), 200, secs);
        }

        let report = EvictionPolicy::size_bounded(500).enforce(tmp.path(), None).await;
        assert_eq!(report.evicted, 1);
        assert!(!tmp.path().join("a").exists());
        assert!(tmp.path().join("b").exists());
        assert_eq!(usage::total_bytes(tmp.path()).await, 400);
    }

    #[tokio::test]
    async fn test_replaced_entry_is_not_counted() {
        let tmp = tempfile::tempdir().unwrap();
        write_at(&tmp.path().join("a"), 200, 1);
        write_at(&tmp.path().join("b"), 200, 2);

        let target = tmp.path().join("b");
        let admission = Admission { bytes: 200, target: &target };
        let report = EvictionPolicy::size_bounded(400)
            .with_max_entries(2)
            .enforce(tmp.path(), Some(admission))
            .await;

        assert_eq!(report.removed(), 0);
        assert!(tmp.path().join("a").exists());
        assert_eq!(report.remaining_bytes, 200);
    }

    #[tokio::test]
    async fn test_abandoned_part_files_are_swept() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("a"), vec![0u8; 10]).unwrap();
        write_at(&tmp.path().join(".crashed123.part"), 4096, 1);
        std::fs::write(tmp.path().join(".live456.part"), vec![0u8; 64]).unwrap();

        let report = EvictionPolicy::size_bounded(1_000).enforce(tmp.path(), None).await;

        assert_eq!(report.stale_parts, 1);
        assert_eq!(report.freed_bytes, 4096);
        assert_eq!(report.removed(), 0);
        assert!(!tmp.path().join(".crashed123.part").exists());
        assert!(tmp.path().join(".live456.part").exists());
        assert!(tmp.path().join("a").exists());
    }
}

//! Named, TTL-bounded locks.
//!
//! A lock is the file `locks/<name>`; holding it means having created it.
//! Creation is succeed-if-absent, so at most one holder exists at a time.
//!
//! A lock file is only ever removed through a tombstone: a hard link to the
//! record named after its content hash. Linking is exclusive, so while a
//! tombstone exists the record it pins cannot be removed by anyone else,
//! and a remover that finds different content in its tombstone backs off
//! without touching the live record. Release and reclaim of an expired
//! holder both go through this path.

use crate::error::{DurableError, IoContext, Result};
use crate::layout::{create_exclusive, list_with_extension, read_optional, Layout};
use crate::receipt::sha256_hex;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Content of a held lock.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockRecord {
    pub owner: String,
    pub acquired_at: DateTime<Utc>,
    pub ttl_ms: u64,
}

impl LockRecord {
    pub fn expires_at(&self) -> DateTime<Utc> {
        after(self.acquired_at, Duration::from_millis(self.ttl_ms))
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }
}

#[derive(Clone, Copy, Debug)]
pub struct LockOptions {
    pub ttl: Duration,
    /// How long to keep retrying while the lock is held elsewhere.
    /// Zero means a single attempt.
    pub wait: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self { ttl: Duration::from_millis(60_000), wait: Duration::from_millis(30_000) }
    }
}

#[derive(Clone, Debug)]
pub struct LockManager {
    layout: Layout,
    poll_interval: Duration,
    /// TTL assumed for records that cannot be parsed, counted from their
    /// modification time.
    default_ttl: Duration,
}

/// Outcome of removing a lock file through its tombstone.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Removal {
    Removed,
    /// No lock file.
    Gone,
    /// The lock file holds a different record now.
    Changed,
    /// Another remover holds the tombstone.
    Busy,
}

/// A lock file as read: raw bytes, parsed record and expiry.
struct Snapshot {
    bytes: Vec<u8>,
    record: Option<LockRecord>,
    expires_at: DateTime<Utc>,
}

impl LockManager {
    pub fn new(layout: Layout) -> Self {
        Self {
            layout,
            poll_interval: Duration::from_millis(25),
            default_ttl: LockOptions::default().ttl,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Acquire `name`, retrying until `options.wait` has elapsed.
    pub async fn acquire(&self, name: &str, options: LockOptions) -> Result<LockGuard> {
        let deadline = tokio::time::Instant::now() + options.wait;
        loop {
            if let Some(guard) = self.try_acquire(name, options.ttl).await? {
                return Ok(guard);
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                let holder = self.holder(name).await?.map(|r| r.owner).unwrap_or_default();
                return Err(DurableError::lock(
                    name,
                    format!("held by {holder} after waiting {}ms", options.wait.as_millis()),
                ));
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    /// One attempt. `None` when another holder has it and it has not expired.
    pub async fn try_acquire(&self, name: &str, ttl: Duration) -> Result<Option<LockGuard>> {
        let path = self.layout.lock_file(name)?;
        let record = LockRecord {
            owner: format!("{}:{}", std::process::id(), uuid::Uuid::new_v4().simple()),
            acquired_at: Utc::now(),
            ttl_ms: ttl.as_millis().min(u64::MAX as u128) as u64,
        };
        let bytes = serde_json::to_vec(&record)?;
        if create_exclusive(&path, &bytes).await? {
            debug!(lock = name, owner = %record.owner, "lock acquired");
            return Ok(Some(LockGuard::new(name, path, record.owner, bytes)));
        }
        if self.reclaim_if_expired(name, &path, ttl).await? && create_exclusive(&path, &bytes).await? {
            info!(lock = name, owner = %record.owner, "lock acquired after reclaiming expired holder");
            return Ok(Some(LockGuard::new(name, path, record.owner, bytes)));
        }
        Ok(None)
    }

    /// Current holder of `name`, if any. Unparseable records report `None`.
    pub async fn holder(&self, name: &str) -> Result<Option<LockRecord>> {
        let path = self.layout.lock_file(name)?;
        Ok(read_optional(&path).await?.and_then(|bytes| serde_json::from_slice(&bytes).ok()))
    }

    async fn inspect(&self, path: &Path, fallback_ttl: Duration) -> Result<Option<Snapshot>> {
        let Some(bytes) = read_optional(path).await? else {
            return Ok(None);
        };
        let record: Option<LockRecord> = serde_json::from_slice(&bytes).ok();
        let expires_at = match &record {
            Some(r) => r.expires_at(),
            None => {
                let modified = match tokio::fs::metadata(path).await.and_then(|m| m.modified()) {
                    Ok(time) => DateTime::<Utc>::from(time),
                    Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
                    Err(e) => return Err(DurableError::io(path, e)),
                };
                after(modified, fallback_ttl)
            }
        };
        Ok(Some(Snapshot { bytes, record, expires_at }))
    }

    /// Removes the lock file if the record in it has expired. Returns true
    /// when the name is free afterwards (or already was).
    async fn reclaim_if_expired(&self, name: &str, path: &Path, fallback_ttl: Duration) -> Result<bool> {
        let Some(seen) = self.inspect(path, fallback_ttl).await? else {
            return Ok(true);
        };
        let now = Utc::now();
        if now < seen.expires_at {
            return Ok(false);
        }
        match remove_if_unchanged(path, name, &seen.bytes).await? {
            Removal::Removed => {
                let owner = seen.record.as_ref().map(|r| r.owner.as_str()).unwrap_or("<unreadable>");
                warn!(lock = name, owner, "reclaimed expired lock");
                Ok(true)
            }
            Removal::Gone => Ok(true),
            Removal::Changed => Ok(false),
            Removal::Busy => {
                // A remover that stalled for a further full TTL after the
                // record expired is taken to be dead.
                let ttl = seen.record.as_ref().map(|r| Duration::from_millis(r.ttl_ms)).unwrap_or(fallback_ttl);
                if now >= after(seen.expires_at, ttl) {
                    let tomb = tombstone(path, name, &seen.bytes);
                    warn!(lock = name, tombstone = %tomb.display(), "clearing abandoned tombstone");
                    remove_quietly(&tomb).await;
                }
                Ok(false)
            }
        }
    }

    /// Names of locks whose TTL has elapsed, released. Used by reconciliation.
    pub async fn release_expired(&self) -> Result<Vec<String>> {
        let dir = self.layout.locks_dir();
        let mut released = Vec::new();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(released),
            Err(e) => return Err(DurableError::io(&dir, e)),
        };
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.at(&dir)? {
            if let Some(name) = entry.file_name().to_str() {
                if !name.starts_with('.') {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        for name in names {
            let path = self.layout.lock_file(&name)?;
            let expired = matches!(
                self.inspect(&path, self.default_ttl).await?,
                Some(seen) if Utc::now() >= seen.expires_at
            );
            if expired && self.reclaim_if_expired(&name, &path, self.default_ttl).await? {
                released.push(name);
            }
        }
        // Tombstones left by removers that died before cleaning up. One
        // that still pins the live record is kept.
        for tomb in list_with_extension(&dir, "reclaim").await? {
            if !pins_live_record(&dir, &tomb).await? {
                remove_quietly(&tomb).await;
            }
        }
        Ok(released)
    }
}

/// `at + duration`, saturating at the latest representable instant.
fn after(at: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    ChronoDuration::from_std(duration)
        .ok()
        .and_then(|d| at.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// `locks/.<name>.<content-hash>.reclaim`
fn tombstone(path: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let digest = sha256_hex(bytes);
    path.with_file_name(format!(".{name}.{}.reclaim", &digest[..16]))
}

/// Whether `tomb` holds the same content as the lock file it was made for.
async fn pins_live_record(dir: &Path, tomb: &Path) -> Result<bool> {
    let Some(file) = tomb.file_name().and_then(|n| n.to_str()) else {
        return Ok(false);
    };
    let Some(name) = file.strip_prefix('.').and_then(|n| n.rsplitn(3, '.').nth(2)) else {
        return Ok(false);
    };
    let pinned = read_optional(tomb).await?;
    let live = read_optional(&dir.join(name)).await?;
    Ok(pinned.is_some() && pinned == live)
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "could not remove tombstone");
        }
    }
}

/// Removes `path` only if it still holds exactly `bytes`.
async fn remove_if_unchanged(path: &Path, name: &str, bytes: &[u8]) -> Result<Removal> {
    let tomb = tombstone(path, name, bytes);
    match tokio::fs::hard_link(path, &tomb).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Removal::Gone),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(Removal::Busy),
        Err(e) => return Err(DurableError::io(&tomb, e)),
    }
    let pinned = read_optional(&tomb).await?;
    let outcome = if pinned.as_deref() == Some(bytes) {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Removal::Removed,
            Err(e) if e.kind() == ErrorKind::NotFound => Removal::Gone,
            Err(e) => {
                remove_quietly(&tomb).await;
                return Err(DurableError::io(path, e));
            }
        }
    } else {
        Removal::Changed
    };
    remove_quietly(&tomb).await;
    Ok(outcome)
}

/// Blocking twin of [`remove_if_unchanged`] for use in `Drop`.
fn remove_if_unchanged_blocking(path: &Path, name: &str, bytes: &[u8]) -> Removal {
    let tomb = tombstone(path, name, bytes);
    match std::fs::hard_link(path, &tomb) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::AlreadyExists => return Removal::Busy,
        Err(_) => return Removal::Gone,
    }
    let outcome = match std::fs::read(&tomb) {
        Ok(pinned) if pinned == bytes => match std::fs::remove_file(path) {
            Ok(()) => Removal::Removed,
            Err(_) => Removal::Gone,
        },
        _ => Removal::Changed,
    };
    let _ = std::fs::remove_file(&tomb);
    outcome
}

/// A held lock. Released explicitly with [`LockGuard::release`] or, best
/// effort, on drop. Releasing twice is a no-op.
#[derive(Debug)]
pub struct LockGuard {
    name: String,
    path: PathBuf,
    owner: String,
    /// The record as written, used to recognise it on release.
    record: Vec<u8>,
    released: AtomicBool,
}

impl LockGuard {
    fn new(name: &str, path: PathBuf, owner: String, record: Vec<u8>) -> Self {
        Self { name: name.to_string(), path, owner, record, released: AtomicBool::new(false) }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Removes the lock file if this guard still owns it.
    pub async fn release(&self) -> Result<()> {
        if self.released.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        match remove_if_unchanged(&self.path, &self.name, &self.record).await? {
            Removal::Removed => debug!(lock = %self.name, "lock released"),
            // Only a reclaimer of this very record can hold its tombstone.
            Removal::Gone | Removal::Changed | Removal::Busy => {
                warn!(lock = %self.name, "lock was reclaimed before release")
            }
        }
        Ok(())
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        remove_if_unchanged_blocking(&self.path, &self.name, &self.record);
    }
}

//! Cache orchestration.
//!
//! Lookup order is memory, then disk with a freshness check, then the
//! fetcher. A miss is encoded and persisted blob-first, metadata second, so
//! an interrupted write leaves at worst an orphan blob that reads as a miss.
//!
//! Misses run in a spawned task that owns the per-key lock. A caller that
//! drops its `fetch` future abandons only its own continuation; the write
//! still completes and a later request reuses it.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{OwnedMutexGuard, Semaphore};
use tokio::task::{JoinHandle, JoinSet};

use super::compress::Compressor;
use super::connection::CacheDb;
use super::disk::DiskTier;
use super::fetcher::Fetcher;
use super::freshness::is_stale;
use super::integrity::{GuardState, IntegrityGuard};
use super::memory::MemoryTier;
use super::types::{CacheEntry, CacheStats, ImageBlob, ImageRequest, MetadataRecord, Origin};
use crate::Error;
use crate::config::AppConfig;

/// Version of the persisted image namespace. Bump whenever the meaning of
/// stored blobs or metadata changes; the next start discards everything.
pub const SCHEMA_VERSION: u32 = 1;

/// Engine settings, normally derived from [`AppConfig`].
#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub cache_dir: PathBuf,
    /// `None` keeps metadata in memory only.
    pub db_path: Option<PathBuf>,
    pub memory_slots: usize,
    pub disk_ceiling_bytes: u64,
    pub disk_target_bytes: u64,
    pub fault_threshold: u32,
    pub lossy_quality: u8,
    pub preload_concurrency: usize,
    pub schema_version: u32,
}

impl CacheSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            cache_dir: config.cache_dir.clone(),
            db_path: Some(config.db_path.clone()),
            memory_slots: config.memory_slots,
            disk_ceiling_bytes: config.disk_ceiling_bytes,
            disk_target_bytes: config.disk_target_bytes,
            fault_threshold: config.fault_threshold,
            lossy_quality: config.lossy_quality,
            preload_concurrency: config.preload_concurrency,
            schema_version: SCHEMA_VERSION,
        }
    }
}

/// Outcome of a background preload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct PreloadReport {
    pub requested: u32,
    /// Retrieved from the network and stored.
    pub fetched: u32,
    /// Already present and fresh.
    pub cached: u32,
    pub failed: u32,
}

/// Per-key serialization. Idle locks are pruned on the next acquire.
#[derive(Default)]
struct KeyLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyLocks {
    async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(key.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }
}

struct Inner {
    settings: CacheSettings,
    db: CacheDb,
    disk: DiskTier,
    memory: MemoryTier,
    guard: IntegrityGuard,
    compressor: Compressor,
    fetcher: Arc<dyn Fetcher>,
    locks: KeyLocks,
    memory_hits: AtomicU64,
    disk_hits: AtomicU64,
    misses: AtomicU64,
}

/// Image cache shared by every display surface.
///
/// Cheap to clone; all clones share one set of tiers.
#[derive(Clone)]
pub struct CacheEngine {
    inner: Arc<Inner>,
}

impl CacheEngine {
    /// Open the tiers and run the cold-start integrity check.
    ///
    /// Unusable persisted state never fails the open: the namespace is
    /// invalidated, and if even that is impossible the engine runs as a
    /// pass-through for this session.
    pub async fn open(settings: CacheSettings, fetcher: Arc<dyn Fetcher>) -> Result<Self, Error> {
        let disk = DiskTier::new(&settings.cache_dir);
        let mut degraded = None;

        if let Some(db_path) = &settings.db_path
            && db_path.starts_with(&settings.cache_dir)
        {
            tracing::warn!(
                db_path = ?db_path,
                cache_dir = ?settings.cache_dir,
                "metadata database inside blob directory; blob tier will skip it"
            );
        }

        if let Err(e) = disk.init().await {
            degraded = Some(format!("blob directory unusable: {e}"));
        }

        let db = match &settings.db_path {
            Some(path) => match CacheDb::open_or_recreate(path).await {
                Ok(db) => db,
                Err(e) => {
                    degraded = Some(format!("metadata database unusable: {e}"));
                    CacheDb::open_in_memory().await?
                }
            },
            None => CacheDb::open_in_memory().await?,
        };

        let guard = IntegrityGuard::new(settings.schema_version, settings.fault_threshold);
        let outcome = guard.start(&db, &disk).await;
        if let Some(reason) = degraded {
            guard.force_passthrough(&reason);
        }
        tracing::info!(
            ?outcome,
            passthrough = guard.is_passthrough(),
            cache_dir = ?settings.cache_dir,
            "image cache started"
        );

        let inner = Inner {
            memory: MemoryTier::new(settings.memory_slots),
            compressor: Compressor::new(settings.lossy_quality),
            settings,
            db,
            disk,
            guard,
            fetcher,
            locks: KeyLocks::default(),
            memory_hits: AtomicU64::new(0),
            disk_hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        };

        Ok(Self { inner: Arc::new(inner) })
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.inner.settings
    }

    pub fn guard_state(&self) -> GuardState {
        self.inner.guard.state()
    }

    /// Return the image for `request`, fetching it only when no fresh copy exists.
    ///
    /// Only fetch and encode failures are returned as errors.
    pub async fn fetch(&self, request: &ImageRequest) -> Result<ImageBlob, Error> {
        let inner = &self.inner;
        let key = request.key();

        if inner.guard.is_passthrough() {
            return inner.passthrough(key, &request.remote_url).await;
        }

        if let Some(blob) = inner.memory_lookup(&key, request).await {
            return Ok(blob);
        }

        let key_guard = inner.locks.acquire(&key).await;

        // Another request for the same key may have filled the tiers while we waited.
        if let Some(blob) = inner.memory_lookup(&key, request).await {
            return Ok(blob);
        }
        if let Some(blob) = inner.disk_lookup(&key, request).await {
            return Ok(blob);
        }
        if inner.guard.is_passthrough() {
            drop(key_guard);
            return inner.passthrough(key, &request.remote_url).await;
        }

        inner.misses.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(key = %key, url = %request.remote_url, "cache miss");

        let task_inner = Arc::clone(inner);
        let request = request.clone();
        tokio::spawn(async move {
            let _key_guard = key_guard;
            task_inner.fetch_and_store(key, &request).await
        })
        .await
        .map_err(|e| Error::Fetch(format!("fetch task failed: {e}")))?
    }

    /// Convenience wrapper for a plain URL request.
    pub async fn fetch_url(&self, url: &str) -> Result<ImageBlob, Error> {
        self.fetch(&ImageRequest::new(url)).await
    }

    /// Warm several entries in the background.
    ///
    /// Returns immediately; awaiting the handle is optional. Individual
    /// failures are counted and otherwise ignored.
    pub fn preload(&self, requests: Vec<ImageRequest>) -> JoinHandle<PreloadReport> {
        let engine = self.clone();
        let limit = self.inner.settings.preload_concurrency.max(1);

        tokio::spawn(async move {
            let semaphore = Arc::new(Semaphore::new(limit));
            let mut join_set = JoinSet::new();
            let requested = u32::try_from(requests.len()).unwrap_or(u32::MAX);
            let mut report = PreloadReport { requested, ..Default::default() };

            for request in requests {
                let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                    break;
                };
                let engine = engine.clone();
                join_set.spawn(async move {
                    let _permit = permit;
                    let result = engine.fetch(&request).await;
                    (request.remote_url, result.map(|blob| blob.origin))
                });
            }

            while let Some(joined) = join_set.join_next().await {
                match joined {
                    Ok((_, Ok(Origin::Network | Origin::Passthrough))) => report.fetched += 1,
                    Ok((_, Ok(_))) => report.cached += 1,
                    Ok((url, Err(e))) => {
                        tracing::debug!(url = %url, error = %e, "preload item failed");
                        report.failed += 1;
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "preload task failed");
                        report.failed += 1;
                    }
                }
            }

            tracing::info!(?report, "preload finished");
            report
        })
    }

    /// Whether `request` would need a network fetch.
    pub async fn is_stale(&self, request: &ImageRequest) -> bool {
        let key = request.key();
        let record = self.inner.load_record(&key).await;
        is_stale(record.as_ref(), &request.remote_url, request.last_modified)
    }

    /// Drop every cached image and all metadata.
    ///
    /// Also clears a tripped kill switch.
    pub async fn invalidate_all(&self) -> Result<(), Error> {
        let inner = &self.inner;
        inner.memory.clear().await;
        inner.guard.invalidate(&inner.db, &inner.disk).await?;
        inner.memory.clear().await;
        tracing::info!("image cache invalidated on request");
        Ok(())
    }

    /// Bytes currently used by the blob directory.
    pub async fn disk_size(&self) -> Result<u64, Error> {
        self.inner.disk.total_size().await
    }

    /// Number of metadata records.
    pub async fn entry_count(&self) -> Result<u64, Error> {
        self.inner.db.record_count().await
    }

    pub async fn stats(&self) -> CacheStats {
        let inner = &self.inner;
        CacheStats {
            entries: self.entry_count().await.unwrap_or(0),
            disk_bytes: self.disk_size().await.unwrap_or(0),
            memory_entries: inner.memory.len().await,
            memory_hits: inner.memory_hits.load(Ordering::Relaxed),
            disk_hits: inner.disk_hits.load(Ordering::Relaxed),
            misses: inner.misses.load(Ordering::Relaxed),
            session_faults: inner.guard.session_faults(),
            passthrough: inner.guard.is_passthrough(),
        }
    }
}

impl Inner {
    async fn passthrough(&self, key: String, url: &str) -> Result<ImageBlob, Error> {
        let bytes = self.fetcher.get(url).await?;
        tracing::debug!(key = %key, "pass-through fetch");
        Ok(ImageBlob { key, bytes, format: None, origin: Origin::Passthrough })
    }

    async fn memory_lookup(&self, key: &str, request: &ImageRequest) -> Option<ImageBlob> {
        let entry = self.memory.get(key).await?;
        if is_stale(Some(&entry.record()), &request.remote_url, request.last_modified) {
            return None;
        }
        self.memory_hits.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(key = %key, "memory hit");
        Some(ImageBlob { key: entry.key, bytes: entry.bytes, format: Some(entry.format), origin: Origin::Memory })
    }

    /// Read and decode a metadata record, absorbing every failure as a miss.
    async fn load_record(&self, key: &str) -> Option<MetadataRecord> {
        match self.db.get_record(key).await {
            Ok(record) => record,
            Err(Error::Decode { reason, .. }) => {
                let disabled = self.guard.record_fault(&self.db, key, &reason).await;
                if !disabled {
                    self.discard(key).await;
                }
                None
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "metadata read failed; treating as miss");
                None
            }
        }
    }

    async fn disk_lookup(&self, key: &str, request: &ImageRequest) -> Option<ImageBlob> {
        let record = self.load_record(key).await?;
        if is_stale(Some(&record), &request.remote_url, request.last_modified) {
            return None;
        }

        let bytes = match self.disk.read(key, record.format).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                tracing::debug!(key = %key, "metadata without blob; treating as miss");
                return None;
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "blob read failed; treating as miss");
                return None;
            }
        };

        self.disk_hits.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(key = %key, "disk hit");

        let entry = CacheEntry {
            key: key.to_string(),
            remote_url: record.remote_url,
            bytes: bytes.clone(),
            format: record.format,
            fetched_at: record.fetched_at,
        };
        self.memory.put(entry).await;

        Some(ImageBlob { key: key.to_string(), bytes, format: Some(record.format), origin: Origin::Disk })
    }

    async fn fetch_and_store(&self, key: String, request: &ImageRequest) -> Result<ImageBlob, Error> {
        let raw = self.fetcher.get(&request.remote_url).await?;
        let (bytes, format) = self.compressor.encode_blocking(raw).await?;

        let entry = CacheEntry {
            key: key.clone(),
            remote_url: request.remote_url.clone(),
            bytes: bytes.clone(),
            format,
            fetched_at: Utc::now(),
        };

        if self.guard.is_passthrough() {
            tracing::debug!(key = %key, "cache disabled; not storing");
        } else {
            match self.persist(&entry).await {
                Ok(()) => {
                    self.memory.put(entry).await;
                    self.enforce_ceiling().await;
                }
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "failed to persist image; serving uncached");
                }
            }
        }

        Ok(ImageBlob { key, bytes, format: Some(format), origin: Origin::Network })
    }

    /// Blob first, then metadata.
    async fn persist(&self, entry: &CacheEntry) -> Result<(), Error> {
        self.disk.write(&entry.key, &entry.bytes, entry.format).await?;
        if let Err(e) = self.db.set_record(&entry.key, &entry.record()).await {
            let _ = self.disk.delete(&entry.key).await;
            return Err(Error::Persist(format!("metadata write: {e}")));
        }
        Ok(())
    }

    /// Remove a key from every tier without decoding anything.
    async fn discard(&self, key: &str) {
        self.memory.remove(key).await;
        if let Err(e) = self.db.remove_record(key).await {
            tracing::warn!(key = %key, error = %e, "failed to remove metadata");
        }
        if let Err(e) = self.disk.delete(key).await {
            tracing::warn!(key = %key, error = %e, "failed to remove blob");
        }
    }

    async fn enforce_ceiling(&self) {
        let ceiling = self.settings.disk_ceiling_bytes;
        let total = match self.disk.total_size().await {
            Ok(total) => total,
            Err(e) => {
                tracing::warn!(error = %e, "failed to measure blob directory");
                return;
            }
        };
        if total <= ceiling {
            return;
        }

        tracing::info!(total, ceiling, target = self.settings.disk_target_bytes, "disk ceiling exceeded; purging");
        let cutoff = Utc::now();
        let removed = match self.disk.purge_oldest(self.settings.disk_target_bytes).await {
            Ok(removed) => removed,
            Err(e) => {
                tracing::warn!(error = %e, "disk purge failed");
                return;
            }
        };

        for key in &removed {
            self.memory.remove(key).await;
        }
        // A key refetched during the purge keeps its new record.
        if let Err(e) = self.db.remove_records_before(removed, cutoff).await {
            tracing::warn!(error = %e, "failed to drop metadata for purged blobs");
        }
    }
}

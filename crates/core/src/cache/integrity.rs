//! Cold-start corruption detection and the runtime kill switch.
//!
//! State machine: `Unchecked → Checking → {Clean, Invalidated} → Active`.
//!
//! The start check reads only the storage class of a few scalars and the
//! shape of the metadata table. It never decodes a persisted record. If
//! anything is off, the whole namespace is dropped: every blob and every
//! metadata row, with no attempt at partial repair.
//!
//! During operation, each failed per-key decode counts as a fault. Once a
//! session's count reaches the threshold the persisted kill switch is set
//! and the engine runs as a pass-through until a later invalidation clears it.

use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Error;

pub const SCHEMA_VERSION: &str = "schema_version";
pub const FAULT_COUNT: &str = "fault_count";
pub const KILL_SWITCH: &str = "kill_switch";

/// Storage class of a persisted scalar, observed without decoding it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoredScalar {
    Absent,
    Integer(i64),
    /// Present but not an integer.
    Foreign,
}

/// Scalar and metadata side of the namespace.
#[async_trait]
pub trait NamespaceStore: Send + Sync {
    /// Report the storage class of a guard scalar.
    async fn probe_scalar(&self, name: &'static str) -> Result<StoredScalar, Error>;

    /// Check the metadata table's shape without reading any row.
    async fn probe_namespace(&self) -> Result<bool, Error>;

    /// Drop all metadata and scalars, leaving empty tables behind.
    async fn reset_namespace(&self) -> Result<(), Error>;

    async fn write_scalar(&self, name: &'static str, value: i64) -> Result<(), Error>;
}

/// Blob side of the namespace.
#[async_trait]
pub trait BlobNamespace: Send + Sync {
    /// Remove every blob without reading any. Returns the number removed.
    async fn clear_blobs(&self) -> Result<u64, Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum GuardState {
    Unchecked,
    Checking,
    Clean,
    Invalidated,
    Active,
}

/// How the cold-start check concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Clean,
    Invalidated,
    /// Invalidation itself failed; pass-through for this session only.
    Degraded,
}

pub struct IntegrityGuard {
    expected_version: u32,
    fault_threshold: u32,
    state: RwLock<GuardState>,
    session_faults: AtomicU32,
    passthrough: AtomicBool,
}

impl IntegrityGuard {
    pub fn new(expected_version: u32, fault_threshold: u32) -> Self {
        Self {
            expected_version,
            fault_threshold: fault_threshold.max(1),
            state: RwLock::new(GuardState::Unchecked),
            session_faults: AtomicU32::new(0),
            passthrough: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> GuardState {
        *self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, next: GuardState) {
        *self.state.write().unwrap_or_else(|e| e.into_inner()) = next;
        tracing::debug!(state = ?next, "integrity guard transition");
    }

    /// Whether the engine must bypass both persistent tiers.
    pub fn is_passthrough(&self) -> bool {
        self.passthrough.load(Ordering::SeqCst)
    }

    pub fn session_faults(&self) -> u32 {
        self.session_faults.load(Ordering::SeqCst)
    }

    /// Disable caching for this session without touching persisted state.
    pub fn force_passthrough(&self, reason: &str) {
        self.passthrough.store(true, Ordering::SeqCst);
        tracing::error!(reason, "image cache running pass-through for this session");
    }

    /// Run the cold-start check. Never fails; the worst case is a degraded session.
    pub async fn start<S, B>(&self, store: &S, blobs: &B) -> StartOutcome
    where
        S: NamespaceStore + ?Sized,
        B: BlobNamespace + ?Sized,
    {
        self.set_state(GuardState::Checking);

        match self.precheck(store).await {
            Ok(kill_switch) => {
                self.set_state(GuardState::Clean);
                self.session_faults.store(0, Ordering::SeqCst);
                if let Err(e) = store.write_scalar(FAULT_COUNT, 0).await {
                    tracing::warn!(error = %e, "failed to reset fault counter");
                }
                self.passthrough.store(kill_switch, Ordering::SeqCst);
                if kill_switch {
                    tracing::warn!("kill switch set by an earlier session; image cache disabled");
                }
                self.set_state(GuardState::Active);
                StartOutcome::Clean
            }
            Err(reason) => {
                tracing::info!(reason = %reason, "invalidating image namespace");
                self.set_state(GuardState::Invalidated);
                let outcome = match self.invalidate(store, blobs).await {
                    Ok(()) => StartOutcome::Invalidated,
                    Err(_) => StartOutcome::Degraded,
                };
                self.set_state(GuardState::Active);
                outcome
            }
        }
    }

    /// Decode-free precheck. `Ok` carries the persisted kill switch.
    async fn precheck<S: NamespaceStore + ?Sized>(&self, store: &S) -> Result<bool, Error> {
        let expected = i64::from(self.expected_version);
        match store.probe_scalar(SCHEMA_VERSION).await? {
            StoredScalar::Integer(v) if v == expected => {}
            StoredScalar::Integer(v) => {
                return Err(Error::IntegrityFault(format!("schema version {v}, expected {expected}")));
            }
            StoredScalar::Absent => return Err(Error::IntegrityFault("schema version absent".into())),
            StoredScalar::Foreign => {
                return Err(Error::IntegrityFault("schema version is not an integer".into()));
            }
        }

        if !store.probe_namespace().await? {
            return Err(Error::IntegrityFault("metadata table shape mismatch".into()));
        }

        match store.probe_scalar(KILL_SWITCH).await? {
            StoredScalar::Absent | StoredScalar::Integer(0) => Ok(false),
            StoredScalar::Integer(1) => Ok(true),
            other => Err(Error::IntegrityFault(format!("kill switch unreadable: {other:?}"))),
        }
    }

    /// Drop the whole namespace and stamp the current version.
    ///
    /// The version is written last, so an interrupted invalidation is
    /// simply repeated on the next start. On failure the session falls back
    /// to pass-through.
    pub async fn invalidate<S, B>(&self, store: &S, blobs: &B) -> Result<(), Error>
    where
        S: NamespaceStore + ?Sized,
        B: BlobNamespace + ?Sized,
    {
        let result = async {
            store.reset_namespace().await?;
            let removed = blobs.clear_blobs().await?;
            store.write_scalar(FAULT_COUNT, 0).await?;
            store.write_scalar(KILL_SWITCH, 0).await?;
            store.write_scalar(SCHEMA_VERSION, i64::from(self.expected_version)).await?;
            Ok::<u64, Error>(removed)
        }
        .await;

        match result {
            Ok(removed) => {
                self.session_faults.store(0, Ordering::SeqCst);
                self.passthrough.store(false, Ordering::SeqCst);
                tracing::info!(removed_blobs = removed, version = self.expected_version, "namespace invalidated");
                Ok(())
            }
            Err(e) => {
                self.force_passthrough(&format!("namespace invalidation failed: {e}"));
                Err(e)
            }
        }
    }

    /// Count a per-key decode fault. Returns whether the cache is now disabled.
    pub async fn record_fault<S: NamespaceStore + ?Sized>(&self, store: &S, key: &str, reason: &str) -> bool {
        let count = self.session_faults.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::warn!(key, count, threshold = self.fault_threshold, reason, "metadata decode fault");

        if let Err(e) = store.write_scalar(FAULT_COUNT, i64::from(count)).await {
            tracing::warn!(error = %e, "failed to persist fault counter");
        }

        if count >= self.fault_threshold && !self.passthrough.swap(true, Ordering::SeqCst) {
            tracing::error!(count, "repeated decode faults; kill switch set, image cache disabled");
            if let Err(e) = store.write_scalar(KILL_SWITCH, 1).await {
                tracing::error!(error = %e, "failed to persist kill switch");
            }
        }

        self.is_passthrough()
    }
}

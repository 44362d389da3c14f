//! Two-tier image cache.
//!
//! Blobs live in a bounded in-memory slot table and in a file directory;
//! per-entry metadata lives in SQLite, accessed through tokio-rusqlite.
//! The pieces:
//!
//! - Content addressing with SHA-256 keys
//! - URL-based freshness, optionally backed by a modification time
//! - Transparency-aware re-encoding before persistence
//! - A cold-start integrity check and a runtime kill switch
//! - Size-bounded disk eviction, oldest first

pub mod compress;
pub mod connection;
pub mod disk;
pub mod engine;
pub mod fetcher;
pub mod freshness;
pub mod hash;
pub mod integrity;
pub mod memory;
pub mod metadata;
pub mod migrations;
pub mod types;

pub use crate::Error;

pub use compress::Compressor;
pub use connection::CacheDb;
pub use disk::DiskTier;
pub use engine::{CacheEngine, CacheSettings, PreloadReport, SCHEMA_VERSION};
pub use fetcher::Fetcher;
pub use integrity::{GuardState, IntegrityGuard, StartOutcome};
pub use memory::MemoryTier;
pub use types::{BlobFormat, CacheEntry, CacheStats, ImageBlob, ImageRequest, MetadataRecord, Origin};

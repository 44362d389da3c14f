//! Core types and shared functionality for vitrine.
//!
//! This crate provides:
//! - The image cache engine and its storage tiers
//! - Unified error types
//! - Configuration structures

pub mod cache;
pub mod config;
pub mod error;

pub use cache::{
    BlobFormat, CacheDb, CacheEngine, CacheSettings, CacheStats, Fetcher, ImageBlob, ImageRequest, Origin,
    PreloadReport,
};
pub use config::AppConfig;
pub use error::Error;

//! Cache-related MCP tools.
//!
//! This module provides tools for inspecting and resetting the image cache.

pub mod invalidate;
pub mod stats;

pub use invalidate::{CacheInvalidateParams, invalidate_impl};
pub use stats::{CacheStatsParams, stats_impl};

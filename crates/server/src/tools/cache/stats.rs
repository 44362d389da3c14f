//! cache_stats tool implementation.

use rmcp::{
    ErrorData as McpError,
    model::{CallToolResult, Content},
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use vitrine_core::cache::GuardState;
use vitrine_core::{CacheEngine, CacheStats, Error};

/// Parameters for the cache_stats tool (none).
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct CacheStatsParams {}

/// Output from the cache_stats tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheStatsOutput {
    pub stats: CacheStats,
    /// Integrity guard state for this session.
    pub guard: GuardState,
    pub disk_ceiling_bytes: u64,
    pub memory_slots: usize,
}

/// Implementation of the cache_stats tool.
pub async fn stats_impl(engine: &CacheEngine, _params: CacheStatsParams) -> Result<CallToolResult, McpError> {
    let settings = engine.settings();
    let output = CacheStatsOutput {
        stats: engine.stats().await,
        guard: engine.guard_state(),
        disk_ceiling_bytes: settings.disk_ceiling_bytes,
        memory_slots: settings.memory_slots,
    };
    let json = serde_json::to_string_pretty(&output)
        .map_err(|e| Error::InvalidInput(format!("Failed to serialize stats: {e}")))?;

    Ok(CallToolResult::success(vec![Content::text(json)]))
}

//! cache_invalidate tool implementation.
//!
//! Drops every cached image and metadata record. Also clears a tripped kill
//! switch, so it doubles as the manual recovery path.

use rmcp::{
    ErrorData as McpError,
    model::{CallToolResult, Content},
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use vitrine_core::{CacheEngine, Error};

/// Parameters for the cache_invalidate tool (none).
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct CacheInvalidateParams {}

/// Output from the cache_invalidate tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheInvalidateOutput {
    /// Records present before invalidation.
    pub removed_entries: u64,
    /// Bytes freed from the blob directory.
    pub freed_bytes: u64,
}

/// Implementation of the cache_invalidate tool.
pub async fn invalidate_impl(engine: &CacheEngine, _params: CacheInvalidateParams) -> Result<CallToolResult, McpError> {
    let before = engine.stats().await;
    engine.invalidate_all().await?;

    let output = CacheInvalidateOutput { removed_entries: before.entries, freed_bytes: before.disk_bytes };
    let json = serde_json::to_string_pretty(&output)
        .map_err(|e| Error::InvalidInput(format!("Failed to serialize output: {e}")))?;

    Ok(CallToolResult::success(vec![Content::text(json)]))
}

//! MCP server handler implementation.
//!
//! This module defines the main server handler that
//! routes tool calls to the appropriate implementations.
use crate::tools::cache::{CacheInvalidateParams, CacheStatsParams, invalidate_impl, stats_impl};
use crate::tools::image::{ImageFetchParams, ImagePreloadParams, fetch_impl, preload_impl};

use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::{
        tool::{ToolCallContext, ToolRouter},
        wrapper::Parameters,
    },
    model::{
        CallToolRequestParam, CallToolResult, Implementation, ListToolsResult, PaginatedRequestParam, ProtocolVersion,
        ServerCapabilities, ServerInfo,
    },
    service::{RequestContext, RoleServer},
    tool, tool_router,
};
use vitrine_core::CacheEngine;

/// The main MCP server handler for vitrine.
#[derive(Clone)]
pub struct VitrineServer {
    engine: CacheEngine,
    tool_router: ToolRouter<Self>,
}

/// Tool router implementation using the #[tool_router] macro.
///
/// This macro generates the routing logic that maps tool names to handler methods.
#[tool_router]
impl VitrineServer {
    /// Create a new server handler around a shared cache engine.
    pub fn new(engine: CacheEngine) -> Self {
        Self { engine, tool_router: Self::tool_router() }
    }

    /// Fetch an image through the cache.
    ///
    /// Returns the cached copy when the upstream URL is unchanged, otherwise
    /// downloads, re-encodes and stores it.
    #[tool(description = "Fetch an image through the cache. Returns key, format, size and origin; \
                          set include_data to receive the image itself.")]
    async fn image_fetch(&self, params: Parameters<ImageFetchParams>) -> Result<CallToolResult, McpError> {
        fetch_impl(&self.engine, params.0).await
    }

    #[tool(description = "Warm the cache for a list of image URLs in the background. Set wait to get a report.")]
    async fn image_preload(&self, params: Parameters<ImagePreloadParams>) -> Result<CallToolResult, McpError> {
        preload_impl(&self.engine, params.0).await
    }

    #[tool(description = "Report cache entry count, disk usage, hit counters and kill-switch state.")]
    async fn cache_stats(&self, params: Parameters<CacheStatsParams>) -> Result<CallToolResult, McpError> {
        stats_impl(&self.engine, params.0).await
    }

    /// Drop every cached image.
    #[tool(description = "Drop every cached image and metadata record. Also re-enables a disabled cache.")]
    async fn cache_invalidate(&self, params: Parameters<CacheInvalidateParams>) -> Result<CallToolResult, McpError> {
        invalidate_impl(&self.engine, params.0).await
    }
}

impl ServerHandler for VitrineServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: Implementation {
                name: "vitrine".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Default::default()
            },
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self, _request: Option<PaginatedRequestParam>, _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, rmcp::model::ErrorData> {
        Ok(ListToolsResult { meta: None, tools: self.tool_router.list_all(), next_cursor: None })
    }

    async fn call_tool(
        &self, request: CallToolRequestParam, context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, rmcp::model::ErrorData> {
        self.tool_router
            .call(ToolCallContext::new(self, request, context))
            .await
    }
}

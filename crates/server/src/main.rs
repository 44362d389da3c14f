//! vitrine server entry point.
//!
//! Loads configuration, opens the image cache and serves it over MCP on stdio.
//! Logging goes to stderr to avoid interfering with the JSON-RPC protocol on stdout.

use std::sync::Arc;

use anyhow::{Context, Result};
use rmcp::service::serve_server;
use rmcp::transport::io::stdio;
use tracing_subscriber::EnvFilter;
use vitrine_client::{FetchClient, FetchConfig};
use vitrine_core::{AppConfig, CacheEngine, CacheSettings};

mod handler;
mod tools;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let config = AppConfig::load().context("loading configuration")?;
    tracing::info!(cache_dir = ?config.cache_dir, db_path = ?config.db_path, "starting vitrine on stdio transport");

    let fetcher = FetchClient::new(FetchConfig::from(&config))?;
    let engine = CacheEngine::open(CacheSettings::from_config(&config), Arc::new(fetcher)).await?;

    let handler = handler::VitrineServer::new(engine);
    let transport = stdio();
    let server = serve_server(handler, transport).await?;

    server.waiting().await?;

    Ok(())
}

//! Network retrieval seam.
//!
//! The cache never performs transport itself. Timeouts and retries belong
//! to the implementation; any error it returns is a fetch failure.

use async_trait::async_trait;
use bytes::Bytes;

use crate::Error;

/// Retrieves the raw bytes behind a remote URL.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn get(&self, url: &str) -> Result<Bytes, Error>;
}

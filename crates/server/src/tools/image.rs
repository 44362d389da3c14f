//! image_fetch and image_preload tool implementations.
//!
//! Both canonicalize URLs before they reach the engine, so the same image
//! requested with a fragment or an uppercase host maps to one cache key.

use base64::Engine;
use chrono::{DateTime, Utc};
use rmcp::{
    ErrorData as McpError,
    model::{CallToolResult, Content},
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use vitrine_client::canonicalize;
use vitrine_core::{BlobFormat, CacheEngine, Error, ImageRequest, Origin, PreloadReport};

/// Parameters for the image_fetch tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ImageFetchParams {
    /// Remote image URL.
    pub url: String,

    /// Stable identifier for a display slot whose upstream URL changes over time.
    #[serde(default)]
    pub cache_id: Option<String>,

    /// RFC 3339 modification time of the upstream object, if known.
    #[serde(default)]
    pub last_modified: Option<String>,

    /// Include the image itself as base64 content (default: false).
    #[serde(default)]
    pub include_data: bool,
}

/// Output from the image_fetch tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ImageFetchOutput {
    pub key: String,
    /// Canonical URL that was requested.
    pub url: String,
    /// Stored encoding; absent when the cache is bypassed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<BlobFormat>,
    pub mime_type: String,
    pub size: u64,
    pub origin: Origin,
}

fn parse_last_modified(raw: Option<&str>) -> Result<Option<DateTime<Utc>>, Error> {
    raw.map(|s| {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| Error::InvalidInput(format!("last_modified: {e}")))
    })
    .transpose()
}

/// Implementation of the image_fetch tool.
pub async fn fetch_impl(engine: &CacheEngine, params: ImageFetchParams) -> Result<CallToolResult, McpError> {
    let url = canonicalize(&params.url).map_err(|e| Error::InvalidUrl(e.to_string()))?;

    let mut request = ImageRequest::new(url.as_str());
    if let Some(cache_id) = params.cache_id.filter(|id| !id.trim().is_empty()) {
        request = request.with_cache_id(cache_id);
    }
    if let Some(modified) = parse_last_modified(params.last_modified.as_deref())? {
        request = request.with_last_modified(modified);
    }

    let blob = engine.fetch(&request).await?;

    let output = ImageFetchOutput {
        key: blob.key.clone(),
        url: request.remote_url.clone(),
        format: blob.format,
        mime_type: blob.mime_type().to_string(),
        size: blob.bytes.len() as u64,
        origin: blob.origin,
    };
    let json = serde_json::to_string_pretty(&output)
        .map_err(|e| Error::InvalidInput(format!("Failed to serialize output: {e}")))?;

    let mut content = vec![Content::text(json)];
    if params.include_data {
        let data = base64::engine::general_purpose::STANDARD.encode(&blob.bytes);
        content.push(Content::image(data, blob.mime_type()));
    }

    Ok(CallToolResult::success(content))
}

/// Parameters for the image_preload tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ImagePreloadParams {
    /// URLs to warm.
    pub urls: Vec<String>,

    /// Wait for the preload to finish and report the outcome (default: false).
    #[serde(default)]
    pub wait: bool,
}

/// Output from the image_preload tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ImagePreloadOutput {
    /// Number of URLs handed to the engine.
    pub scheduled: u32,
    /// URLs rejected before scheduling.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rejected: Vec<String>,
    /// Present only when `wait` was set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<PreloadReport>,
}

/// Implementation of the image_preload tool.
pub async fn preload_impl(engine: &CacheEngine, params: ImagePreloadParams) -> Result<CallToolResult, McpError> {
    if params.urls.is_empty() {
        return Err(Error::InvalidInput("urls cannot be empty".into()).into());
    }

    let mut requests = Vec::with_capacity(params.urls.len());
    let mut rejected = Vec::new();
    for raw in params.urls {
        match canonicalize(&raw) {
            Ok(url) => requests.push(ImageRequest::new(url.as_str())),
            Err(e) => {
                tracing::debug!(url = %raw, error = %e, "preload url rejected");
                rejected.push(raw);
            }
        }
    }

    let scheduled = u32::try_from(requests.len()).unwrap_or(u32::MAX);
    let handle = engine.preload(requests);

    let report = if params.wait {
        Some(handle.await.map_err(|e| McpError::internal_error(e.to_string(), None))?)
    } else {
        None
    };

    let output = ImagePreloadOutput { scheduled, rejected, report };
    let json = serde_json::to_string_pretty(&output)
        .map_err(|e| Error::InvalidInput(format!("Failed to serialize output: {e}")))?;

    Ok(CallToolResult::success(vec![Content::text(json)]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testing::{TestFetcher, open_engine, png};

    fn output_json(result: &CallToolResult) -> serde_json::Value {
        let text = result.content[0].as_text().unwrap();
        serde_json::from_str(&text.text).unwrap()
    }

    #[test]
    fn test_parse_last_modified() {
        assert!(parse_last_modified(None).unwrap().is_none());
        assert!(parse_last_modified(Some("2026-03-01T12:00:00Z")).unwrap().is_some());
        assert!(matches!(parse_last_modified(Some("yesterday")), Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_fetch_impl_miss_then_hit() {
        let fetcher = TestFetcher::serving(&[("https://cdn.example.com/a.png", png(true))]);
        let (_dir, engine) = open_engine(fetcher.clone()).await;

        let params = ImageFetchParams { url: "https://CDN.example.com/a.png#top".into(), ..Default::default() };
        let first = output_json(&fetch_impl(&engine, params.clone()).await.unwrap());
        assert_eq!(first["origin"], "network");
        assert_eq!(first["format"], "lossless");
        assert_eq!(first["url"], "https://cdn.example.com/a.png");

        let second = output_json(&fetch_impl(&engine, params).await.unwrap());
        assert_eq!(second["origin"], "memory");
        assert_eq!(second["key"], first["key"]);
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_fetch_impl_includes_image_content() {
        let fetcher = TestFetcher::serving(&[("https://cdn.example.com/photo.png", png(false))]);
        let (_dir, engine) = open_engine(fetcher).await;

        let params = ImageFetchParams {
            url: "https://cdn.example.com/photo.png".into(),
            include_data: true,
            ..Default::default()
        };
        let result = fetch_impl(&engine, params).await.unwrap();

        assert_eq!(result.content.len(), 2);
        let image = result.content[1].as_image().unwrap();
        assert_eq!(image.mime_type, "image/jpeg");
        assert!(!image.data.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_impl_rejects_bad_input() {
        let (_dir, engine) = open_engine(TestFetcher::serving(&[])).await;

        let bad_url = ImageFetchParams { url: "file:///etc/hosts".into(), ..Default::default() };
        assert!(fetch_impl(&engine, bad_url).await.is_err());

        let bad_time = ImageFetchParams {
            url: "https://cdn.example.com/a.png".into(),
            last_modified: Some("not a time".into()),
            ..Default::default()
        };
        let err = fetch_impl(&engine, bad_time).await.unwrap_err();
        assert_eq!(err.code.0, -32602);
    }

    #[tokio::test]
    async fn test_fetch_impl_surfaces_fetch_failure() {
        let (_dir, engine) = open_engine(TestFetcher::serving(&[])).await;
        let params = ImageFetchParams { url: "https://cdn.example.com/gone.png".into(), ..Default::default() };

        let err = fetch_impl(&engine, params).await.unwrap_err();
        assert_eq!(err.code.0, -32008);
    }

    #[tokio::test]
    async fn test_preload_impl_waits_for_report() {
        let fetcher = TestFetcher::serving(&[
            ("https://cdn.example.com/1.png", png(false)),
            ("https://cdn.example.com/2.png", png(true)),
        ]);
        let (_dir, engine) = open_engine(fetcher.clone()).await;

        let params = ImagePreloadParams {
            urls: vec![
                "https://cdn.example.com/1.png".into(),
                "https://cdn.example.com/2.png".into(),
                "ftp://cdn.example.com/3.png".into(),
            ],
            wait: true,
        };
        let output = output_json(&preload_impl(&engine, params).await.unwrap());

        assert_eq!(output["scheduled"], 2);
        assert_eq!(output["rejected"][0], "ftp://cdn.example.com/3.png");
        assert_eq!(output["report"]["fetched"], 2);
        assert_eq!(engine.entry_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_preload_impl_requires_urls() {
        let (_dir, engine) = open_engine(TestFetcher::serving(&[])).await;
        let result = preload_impl(&engine, ImagePreloadParams::default()).await;
        assert!(result.is_err());
    }
}

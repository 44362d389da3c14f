//! Cache types

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::hash::derive_key;

/// Encoding chosen by the compressor for a persisted blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum BlobFormat {
    /// PNG, keeps the alpha channel bit-exact.
    Lossless,
    /// JPEG at the configured quality.
    Lossy,
}

impl BlobFormat {
    pub const ALL: [BlobFormat; 2] = [BlobFormat::Lossless, BlobFormat::Lossy];

    /// File extension used for blobs in this format.
    pub fn extension(self) -> &'static str {
        match self {
            BlobFormat::Lossless => "png",
            BlobFormat::Lossy => "jpg",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            BlobFormat::Lossless => "image/png",
            BlobFormat::Lossy => "image/jpeg",
        }
    }

    /// Name stored in the metadata table.
    pub fn as_str(self) -> &'static str {
        match self {
            BlobFormat::Lossless => "lossless",
            BlobFormat::Lossy => "lossy",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "lossless" => Some(BlobFormat::Lossless),
            "lossy" => Some(BlobFormat::Lossy),
            _ => None,
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.extension() == ext)
    }
}

/// Provenance of a cached blob, persisted separately from the blob itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub remote_url: String,
    pub fetched_at: DateTime<Utc>,
    pub format: BlobFormat,
    pub size: u64,
}

/// A decoded, cached image held by the memory tier.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub remote_url: String,
    pub bytes: Bytes,
    pub format: BlobFormat,
    pub fetched_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn record(&self) -> MetadataRecord {
        MetadataRecord {
            remote_url: self.remote_url.clone(),
            fetched_at: self.fetched_at,
            format: self.format,
            size: self.bytes.len() as u64,
        }
    }
}

/// A request from a display layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRequest {
    /// Current upstream pointer for the image.
    pub remote_url: String,
    /// Stable identifier for a logical slot whose URL may change upstream.
    pub cache_id: Option<String>,
    /// Upstream modification time, when the caller knows it.
    pub last_modified: Option<DateTime<Utc>>,
}

impl ImageRequest {
    pub fn new(remote_url: impl Into<String>) -> Self {
        Self { remote_url: remote_url.into(), cache_id: None, last_modified: None }
    }

    pub fn with_cache_id(mut self, cache_id: impl Into<String>) -> Self {
        self.cache_id = Some(cache_id.into());
        self
    }

    pub fn with_last_modified(mut self, last_modified: DateTime<Utc>) -> Self {
        self.last_modified = Some(last_modified);
        self
    }

    /// Storage key: the stable slot identifier if given, else the URL.
    pub fn key(&self) -> String {
        derive_key(self.cache_id.as_deref().unwrap_or(&self.remote_url))
    }
}

/// Where a returned blob came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Memory,
    Disk,
    Network,
    /// Kill switch is set; raw bytes straight from the fetcher.
    Passthrough,
}

/// Result of `CacheEngine::fetch`.
#[derive(Debug, Clone)]
pub struct ImageBlob {
    pub key: String,
    pub bytes: Bytes,
    /// `None` for pass-through blobs, which are not re-encoded.
    pub format: Option<BlobFormat>,
    pub origin: Origin,
}

impl ImageBlob {
    /// MIME type of `bytes`. Pass-through blobs are sniffed from their header.
    pub fn mime_type(&self) -> &'static str {
        match self.format {
            Some(format) => format.mime_type(),
            None => image::guess_format(&self.bytes).map_or("application/octet-stream", |f| f.to_mime_type()),
        }
    }
}

/// Statistics about the cache
#[derive(Debug, Clone, Default, Serialize, Deserialize, schemars::JsonSchema)]
pub struct CacheStats {
    pub entries: u64,
    pub disk_bytes: u64,
    pub memory_entries: usize,
    pub memory_hits: u64,
    pub disk_hits: u64,
    pub misses: u64,
    pub session_faults: u32,
    pub passthrough: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_names_round_trip() {
        for format in BlobFormat::ALL {
            assert_eq!(BlobFormat::parse(format.as_str()), Some(format));
            assert_eq!(BlobFormat::from_extension(format.extension()), Some(format));
        }
        assert_eq!(BlobFormat::parse("webp"), None);
    }

    #[test]
    fn test_request_key_prefers_cache_id() {
        let plain = ImageRequest::new("https://cdn.example.com/a.png?token=1");
        assert_eq!(plain.key(), derive_key("https://cdn.example.com/a.png?token=1"));

        let v1 = ImageRequest::new("https://cdn.example.com/a.png?token=1").with_cache_id("catalog/42");
        let v2 = ImageRequest::new("https://cdn.example.com/a.png?token=2").with_cache_id("catalog/42");
        assert_eq!(v1.key(), v2.key());
        assert_ne!(v1.key(), plain.key());
    }

    #[test]
    fn test_cache_stats_default() {
        let stats = CacheStats::default();
        assert_eq!(stats.entries, 0);
        assert_eq!(stats.disk_bytes, 0);
        assert!(!stats.passthrough);
    }

    #[test]
    fn test_blob_mime_type_sniffs_passthrough_bytes() {
        let png = ImageBlob {
            key: derive_key("a"),
            bytes: Bytes::from_static(b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR"),
            format: None,
            origin: Origin::Passthrough,
        };
        assert_eq!(png.mime_type(), "image/png");

        let unknown = ImageBlob { bytes: Bytes::from_static(b"GIF?"), ..png.clone() };
        assert_eq!(unknown.mime_type(), "application/octet-stream");

        let lossy = ImageBlob { format: Some(BlobFormat::Lossy), origin: Origin::Disk, ..png };
        assert_eq!(lossy.mime_type(), "image/jpeg");
    }

    #[test]
    fn test_format_serialization() {
        let json = serde_json::to_string(&BlobFormat::Lossless).unwrap();
        assert_eq!(json, "\"lossless\"");
    }
}

//! Shared fixtures for tool tests.

use async_trait::async_trait;
use bytes::Bytes;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;
use vitrine_core::{CacheEngine, CacheSettings, Error, Fetcher, cache::SCHEMA_VERSION};

/// Serves canned bodies by URL and counts calls.
#[derive(Default)]
pub struct TestFetcher {
    bodies: HashMap<String, Bytes>,
    calls: AtomicUsize,
}

impl TestFetcher {
    pub fn serving(bodies: &[(&str, Vec<u8>)]) -> Arc<Self> {
        let bodies = bodies.iter().map(|(url, body)| (url.to_string(), Bytes::from(body.clone()))).collect();
        Arc::new(Self { bodies, calls: AtomicUsize::new(0) })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for TestFetcher {
    async fn get(&self, url: &str) -> Result<Bytes, Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.bodies.get(url).cloned().ok_or_else(|| Error::HttpError("status 404".into()))
    }
}

/// PNG source image, with or without an alpha channel.
pub fn png(transparent: bool) -> Vec<u8> {
    let img = if transparent {
        DynamicImage::ImageRgba8(RgbaImage::from_fn(32, 32, |x, y| Rgba([x as u8 * 8, y as u8 * 8, 90, (x * y) as u8])))
    } else {
        DynamicImage::ImageRgb8(RgbImage::from_fn(64, 48, |x, y| Rgb([x as u8 * 4, y as u8 * 5, (x ^ y) as u8])))
    };
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

/// Engine over a scratch directory. Keep the `TempDir` alive for the test.
pub async fn open_engine(fetcher: Arc<TestFetcher>) -> (TempDir, CacheEngine) {
    let dir = tempfile::tempdir().unwrap();
    let settings = CacheSettings {
        cache_dir: dir.path().join("images"),
        db_path: Some(dir.path().join("metadata.sqlite")),
        memory_slots: 8,
        disk_ceiling_bytes: 8 * 1024 * 1024,
        disk_target_bytes: 6 * 1024 * 1024,
        fault_threshold: 3,
        lossy_quality: 70,
        preload_concurrency: 2,
        schema_version: SCHEMA_VERSION,
    };
    let engine = CacheEngine::open(settings, fetcher).await.unwrap();
    (dir, engine)
}

//! Application configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (VITRINE_*)
//! 2. TOML config file (if VITRINE_CONFIG_FILE set)
//! 3. Built-in defaults

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

mod validation;

pub use validation::ConfigError;

/// Application configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (VITRINE_*)
/// 2. TOML config file (if VITRINE_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Directory holding one blob file per cached image.
    ///
    /// Set via VITRINE_CACHE_DIR environment variable.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Path to the SQLite metadata database.
    ///
    /// Set via VITRINE_DB_PATH environment variable.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Number of entries kept in the in-process memory tier.
    ///
    /// Set via VITRINE_MEMORY_SLOTS environment variable.
    #[serde(default = "default_memory_slots")]
    pub memory_slots: usize,

    /// Disk usage that triggers a purge, in bytes.
    ///
    /// Set via VITRINE_DISK_CEILING_BYTES environment variable.
    #[serde(default = "default_disk_ceiling_bytes")]
    pub disk_ceiling_bytes: u64,

    /// Disk usage a purge settles at, in bytes.
    ///
    /// Set via VITRINE_DISK_TARGET_BYTES environment variable.
    #[serde(default = "default_disk_target_bytes")]
    pub disk_target_bytes: u64,

    /// Decode faults per session before the kill switch trips.
    ///
    /// Set via VITRINE_FAULT_THRESHOLD environment variable.
    #[serde(default = "default_fault_threshold")]
    pub fault_threshold: u32,

    /// JPEG quality for opaque images (1-100).
    ///
    /// Set via VITRINE_LOSSY_QUALITY environment variable.
    #[serde(default = "default_lossy_quality")]
    pub lossy_quality: u8,

    /// Maximum concurrent preload workers.
    ///
    /// Set via VITRINE_PRELOAD_CONCURRENCY environment variable.
    #[serde(default = "default_preload_concurrency")]
    pub preload_concurrency: usize,

    /// User-Agent string for HTTP requests.
    ///
    /// Set via VITRINE_USER_AGENT environment variable.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Maximum bytes to fetch per image.
    ///
    /// Set via VITRINE_MAX_BYTES environment variable.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,

    /// HTTP request timeout in milliseconds.
    ///
    /// Set via VITRINE_TIMEOUT_MS environment variable.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("./vitrine-cache/images")
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./vitrine-cache/metadata.sqlite")
}

fn default_memory_slots() -> usize {
    20
}

fn default_disk_ceiling_bytes() -> u64 {
    50 * 1024 * 1024
}

fn default_disk_target_bytes() -> u64 {
    40 * 1024 * 1024
}

fn default_fault_threshold() -> u32 {
    3
}

fn default_lossy_quality() -> u8 {
    70
}

fn default_preload_concurrency() -> usize {
    8
}

fn default_user_agent() -> String {
    "vitrine/0.1".into()
}

fn default_max_bytes() -> usize {
    10_485_760 // 10MB
}

fn default_timeout_ms() -> u64 {
    20_000
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            db_path: default_db_path(),
            memory_slots: default_memory_slots(),
            disk_ceiling_bytes: default_disk_ceiling_bytes(),
            disk_target_bytes: default_disk_target_bytes(),
            fault_threshold: default_fault_threshold(),
            lossy_quality: default_lossy_quality(),
            preload_concurrency: default_preload_concurrency(),
            user_agent: default_user_agent(),
            max_bytes: default_max_bytes(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl AppConfig {
    /// Timeout as Duration for use with reqwest/tokio.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `VITRINE_`
    /// 2. TOML file from `VITRINE_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("VITRINE_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("VITRINE_")
                .ignore(&["CONFIG_FILE"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.cache_dir, PathBuf::from("./vitrine-cache/images"));
        assert_eq!(config.db_path, PathBuf::from("./vitrine-cache/metadata.sqlite"));
        assert_eq!(config.memory_slots, 20);
        assert_eq!(config.disk_ceiling_bytes, 50 * 1024 * 1024);
        assert_eq!(config.disk_target_bytes, 40 * 1024 * 1024);
        assert_eq!(config.fault_threshold, 3);
        assert_eq!(config.lossy_quality, 70);
        assert_eq!(config.preload_concurrency, 8);
        assert_eq!(config.user_agent, "vitrine/0.1");
        assert_eq!(config.timeout_ms, 20_000);
    }

    #[test]
    fn test_timeout_duration() {
        let config = AppConfig::default();
        assert_eq!(config.timeout(), Duration::from_millis(20_000));
    }

    #[test]
    fn test_load_from_toml_and_env() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("vitrine.toml", "memory_slots = 12\nlossy_quality = 80\n")?;
            jail.set_env("VITRINE_CONFIG_FILE", "vitrine.toml");
            jail.set_env("VITRINE_LOSSY_QUALITY", "65");

            let config = AppConfig::load().map_err(|e| e.to_string())?;
            assert_eq!(config.memory_slots, 12);
            assert_eq!(config.lossy_quality, 65);
            assert_eq!(config.fault_threshold, 3);
            Ok(())
        });
    }

    #[test]
    fn test_load_rejects_invalid_env() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("VITRINE_MEMORY_SLOTS", "0");
            assert!(matches!(AppConfig::load(), Err(ConfigError::Invalid { .. })));
            Ok(())
        });
    }
}

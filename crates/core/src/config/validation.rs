//! Configuration validation rules.
//!
//! This module provides validation logic for `AppConfig` values
//! after they have been loaded from environment, files, or defaults.

use crate::config::AppConfig;
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid { field: field.into(), reason: reason.into() }
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `memory_slots` is 0 or exceeds 1024
    /// - `disk_target_bytes` is 0 or not below `disk_ceiling_bytes`
    /// - `fault_threshold` is 0
    /// - `lossy_quality` is outside 1-100
    /// - `preload_concurrency` is outside 1-32
    /// - `max_bytes` is 0 or exceeds 50MB
    /// - `timeout_ms` is less than 100ms or exceeds 5 minutes
    /// - `user_agent` is empty
    /// - `db_path` is `cache_dir` itself or lies inside it
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.memory_slots == 0 || self.memory_slots > 1024 {
            return Err(invalid("memory_slots", "must be between 1 and 1024"));
        }

        if self.disk_target_bytes == 0 {
            return Err(invalid("disk_target_bytes", "must be greater than 0"));
        }
        if self.disk_target_bytes >= self.disk_ceiling_bytes {
            return Err(invalid("disk_target_bytes", "must be below disk_ceiling_bytes"));
        }

        if self.fault_threshold == 0 {
            return Err(invalid("fault_threshold", "must be at least 1"));
        }

        if self.lossy_quality == 0 || self.lossy_quality > 100 {
            return Err(invalid("lossy_quality", "must be between 1 and 100"));
        }

        if self.preload_concurrency == 0 || self.preload_concurrency > 32 {
            return Err(invalid("preload_concurrency", "must be between 1 and 32"));
        }

        if self.max_bytes == 0 {
            return Err(invalid("max_bytes", "must be greater than 0"));
        }
        if self.max_bytes > 50 * 1024 * 1024 {
            return Err(invalid("max_bytes", "must not exceed 50MB"));
        }

        if self.timeout_ms < 100 {
            return Err(invalid("timeout_ms", "must be at least 100ms"));
        }
        if self.timeout_ms > 300_000 {
            return Err(invalid("timeout_ms", "must not exceed 5 minutes (300000ms)"));
        }

        if self.user_agent.is_empty() {
            return Err(invalid("user_agent", "must not be empty"));
        }

        if self.db_path.starts_with(&self.cache_dir) {
            return Err(invalid("db_path", "must not be inside cache_dir"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field_of(result: Result<(), ConfigError>) -> Option<String> {
        match result {
            Err(ConfigError::Invalid { field, .. }) => Some(field),
            _ => None,
        }
    }

    #[test]
    fn test_validate_default_config() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_memory_slots() {
        let config = AppConfig { memory_slots: 0, ..Default::default() };
        assert_eq!(field_of(config.validate()).as_deref(), Some("memory_slots"));

        let config = AppConfig { memory_slots: 1025, ..Default::default() };
        assert_eq!(field_of(config.validate()).as_deref(), Some("memory_slots"));
    }

    #[test]
    fn test_validate_disk_target_must_be_below_ceiling() {
        let config = AppConfig { disk_ceiling_bytes: 1000, disk_target_bytes: 1000, ..Default::default() };
        assert_eq!(field_of(config.validate()).as_deref(), Some("disk_target_bytes"));

        let config = AppConfig { disk_target_bytes: 0, ..Default::default() };
        assert_eq!(field_of(config.validate()).as_deref(), Some("disk_target_bytes"));
    }

    #[test]
    fn test_validate_fault_threshold_zero() {
        let config = AppConfig { fault_threshold: 0, ..Default::default() };
        assert_eq!(field_of(config.validate()).as_deref(), Some("fault_threshold"));
    }

    #[test]
    fn test_validate_lossy_quality() {
        let config = AppConfig { lossy_quality: 0, ..Default::default() };
        assert_eq!(field_of(config.validate()).as_deref(), Some("lossy_quality"));

        let config = AppConfig { lossy_quality: 101, ..Default::default() };
        assert_eq!(field_of(config.validate()).as_deref(), Some("lossy_quality"));
    }

    #[test]
    fn test_validate_preload_concurrency() {
        let config = AppConfig { preload_concurrency: 33, ..Default::default() };
        assert_eq!(field_of(config.validate()).as_deref(), Some("preload_concurrency"));
    }

    #[test]
    fn test_validate_timeout_bounds() {
        let config = AppConfig { timeout_ms: 50, ..Default::default() };
        assert_eq!(field_of(config.validate()).as_deref(), Some("timeout_ms"));

        let config = AppConfig { timeout_ms: 301_000, ..Default::default() };
        assert_eq!(field_of(config.validate()).as_deref(), Some("timeout_ms"));
    }

    #[test]
    fn test_validate_empty_user_agent() {
        let config = AppConfig { user_agent: String::new(), ..Default::default() };
        assert_eq!(field_of(config.validate()).as_deref(), Some("user_agent"));
    }

    #[test]
    fn test_validate_db_path_outside_cache_dir() {
        let config = AppConfig { cache_dir: "./cache".into(), db_path: "./cache".into(), ..Default::default() };
        assert_eq!(field_of(config.validate()).as_deref(), Some("db_path"));

        let config =
            AppConfig { cache_dir: "./cache".into(), db_path: "./cache/metadata.sqlite".into(), ..Default::default() };
        assert_eq!(field_of(config.validate()).as_deref(), Some("db_path"));

        let config = AppConfig {
            cache_dir: "./cache".into(),
            db_path: "./cache-meta/metadata.sqlite".into(),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_edge_case_values() {
        let config = AppConfig {
            memory_slots: 1,
            disk_ceiling_bytes: 2,
            disk_target_bytes: 1,
            fault_threshold: 1,
            lossy_quality: 100,
            preload_concurrency: 32,
            max_bytes: 1,
            timeout_ms: 100,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }
}

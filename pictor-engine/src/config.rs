//! Configuration types for the loader.

use crate::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Complete loader configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Memory cache settings.
    #[serde(default)]
    pub memory_cache: MemoryCacheConfig,
    /// Disk cache settings.
    #[serde(default)]
    pub disk_cache: DiskCacheConfig,
    /// Worker pool settings.
    #[serde(default)]
    pub executors: ExecutorConfig,
    /// Active resource tracking settings.
    #[serde(default)]
    pub active_resources: ActiveResourcesConfig,
    /// Maximum number of idle decode job states kept for reuse.
    #[serde(default = "default_decode_job_pool_size")]
    pub decode_job_pool_size: usize,
}

fn default_decode_job_pool_size() -> usize {
    150
}

impl Default for Config {
    fn default() -> Self {
        Self {
            memory_cache: MemoryCacheConfig::default(),
            disk_cache: DiskCacheConfig::default(),
            executors: ExecutorConfig::default(),
            active_resources: ActiveResourcesConfig::default(),
            decode_job_pool_size: default_decode_job_pool_size(),
        }
    }
}

/// Memory cache configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryCacheConfig {
    /// Maximum accounted size of inactive resources in bytes.
    #[serde(default = "default_memory_cache_size")]
    pub max_size_bytes: u64,
}

fn default_memory_cache_size() -> u64 {
    64 * 1024 * 1024
}

impl Default for MemoryCacheConfig {
    fn default() -> Self {
        Self { max_size_bytes: default_memory_cache_size() }
    }
}

/// Disk cache configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskCacheConfig {
    /// Enable the disk cache. When disabled every disk lookup misses.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Directory holding cache entries.
    #[serde(default = "default_disk_cache_directory")]
    pub directory: PathBuf,
    /// Maximum total size of cache entries in bytes.
    #[serde(default = "default_disk_cache_size")]
    pub max_size_bytes: u64,
}

fn default_true() -> bool {
    true
}

fn default_disk_cache_directory() -> PathBuf {
    std::env::temp_dir().join("pictor_disk_cache")
}

fn default_disk_cache_size() -> u64 {
    250 * 1024 * 1024
}

impl Default for DiskCacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            directory: default_disk_cache_directory(),
            max_size_bytes: default_disk_cache_size(),
        }
    }
}

/// Worker pool configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Threads reading from the disk cache.
    #[serde(default = "default_disk_cache_threads")]
    pub disk_cache_threads: usize,
    /// Threads fetching from sources.
    #[serde(default = "default_source_threads")]
    pub source_threads: usize,
    /// Threads decoding animations.
    #[serde(default = "default_animation_threads")]
    pub animation_threads: usize,
    /// Idle time after which an unlimited source pool thread exits.
    #[serde(default = "default_unlimited_keep_alive_ms")]
    pub unlimited_keep_alive_ms: u64,
}

fn default_disk_cache_threads() -> usize {
    1
}

fn default_source_threads() -> usize {
    num_cpus::get().clamp(1, 4)
}

fn default_animation_threads() -> usize {
    if num_cpus::get() >= 4 {
        2
    } else {
        1
    }
}

fn default_unlimited_keep_alive_ms() -> u64 {
    10_000
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            disk_cache_threads: default_disk_cache_threads(),
            source_threads: default_source_threads(),
            animation_threads: default_animation_threads(),
            unlimited_keep_alive_ms: default_unlimited_keep_alive_ms(),
        }
    }
}

/// Active resource tracking configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveResourcesConfig {
    /// Keep the payload of an active resource alive until a forgotten release
    /// is detected, so it can still move into the memory cache.
    #[serde(default)]
    pub retention_allowed: bool,
    /// Interval between sweeps for forgotten releases.
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
}

fn default_sweep_interval_ms() -> u64 {
    1_000
}

impl Default for ActiveResourcesConfig {
    fn default() -> Self {
        Self { retention_allowed: false, sweep_interval_ms: default_sweep_interval_ms() }
    }
}

impl Config {
    /// Creates a new configuration builder.
    #[must_use]
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Parse a TOML document. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is malformed or the result is invalid.
    pub fn from_toml_str(text: &str) -> Result<Self, EngineError> {
        let config: Config =
            toml::from_str(text).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is invalid.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Cannot read {}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.memory_cache.max_size_bytes == 0 {
            return Err(EngineError::Config("Memory cache size cannot be 0".to_string()));
        }

        if self.disk_cache.enabled {
            if self.disk_cache.max_size_bytes == 0 {
                return Err(EngineError::Config(
                    "Disk cache size cannot be 0 when enabled".to_string(),
                ));
            }
            if self.disk_cache.directory.as_os_str().is_empty() {
                return Err(EngineError::Config(
                    "Disk cache directory cannot be empty when enabled".to_string(),
                ));
            }
        }

        let threads = [
            ("disk_cache_threads", self.executors.disk_cache_threads),
            ("source_threads", self.executors.source_threads),
            ("animation_threads", self.executors.animation_threads),
        ];
        for (name, count) in threads {
            if count == 0 {
                return Err(EngineError::Config(format!("{name} cannot be 0")));
            }
        }

        if self.executors.unlimited_keep_alive_ms == 0 {
            return Err(EngineError::Config("Unlimited pool keep-alive cannot be 0".to_string()));
        }

        if self.active_resources.sweep_interval_ms == 0 {
            return Err(EngineError::Config("Sweep interval cannot be 0".to_string()));
        }

        Ok(())
    }

    /// Interval between sweeps for forgotten releases.
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.active_resources.sweep_interval_ms)
    }

    /// Idle time after which an unlimited pool thread exits.
    #[must_use]
    pub fn unlimited_keep_alive(&self) -> Duration {
        Duration::from_millis(self.executors.unlimited_keep_alive_ms)
    }
}

/// Builder for creating a `Config`.
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Sets the memory cache size in bytes.
    #[must_use]
    pub fn memory_cache_size(mut self, bytes: u64) -> Self {
        self.config.memory_cache.max_size_bytes = bytes;
        self
    }

    /// Sets the disk cache directory.
    #[must_use]
    pub fn disk_cache_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.config.disk_cache.directory = directory.into();
        self
    }

    /// Sets the disk cache size in bytes.
    #[must_use]
    pub fn disk_cache_size(mut self, bytes: u64) -> Self {
        self.config.disk_cache.max_size_bytes = bytes;
        self
    }

    /// Enables or disables the disk cache.
    #[must_use]
    pub fn disk_cache_enabled(mut self, enabled: bool) -> Self {
        self.config.disk_cache.enabled = enabled;
        self
    }

    /// Sets the number of source threads.
    #[must_use]
    pub fn source_threads(mut self, threads: usize) -> Self {
        self.config.executors.source_threads = threads;
        self
    }

    /// Allows retaining active payloads until forgotten releases are detected.
    #[must_use]
    pub fn retention_allowed(mut self, allowed: bool) -> Self {
        self.config.active_resources.retention_allowed = allowed;
        self
    }

    /// Sets the sweep interval for forgotten releases.
    #[must_use]
    pub fn sweep_interval_ms(mut self, millis: u64) -> Self {
        self.config.active_resources.sweep_interval_ms = millis;
        self
    }

    /// Builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn build(self) -> Result<Config, EngineError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.memory_cache.max_size_bytes, 64 * 1024 * 1024);
        assert_eq!(config.disk_cache.max_size_bytes, 250 * 1024 * 1024);
        assert_eq!(config.executors.disk_cache_threads, 1);
        assert!(config.executors.source_threads <= 4);
        assert_eq!(config.decode_job_pool_size, 150);
        assert!(!config.active_resources.retention_allowed);
    }

    #[test]
    fn test_config_builder() {
        let config = Config::builder()
            .memory_cache_size(1024)
            .disk_cache_directory("/tmp/pictor-test")
            .retention_allowed(true)
            .build()
            .unwrap();
        assert_eq!(config.memory_cache.max_size_bytes, 1024);
        assert_eq!(config.disk_cache.directory, PathBuf::from("/tmp/pictor-test"));
        assert!(config.active_resources.retention_allowed);
    }

    #[test]
    fn test_config_validation_rejects_zero_values() {
        assert!(Config::builder().memory_cache_size(0).build().is_err());
        assert!(Config::builder().source_threads(0).build().is_err());
        assert!(Config::builder().sweep_interval_ms(0).build().is_err());
        assert!(Config::builder().disk_cache_size(0).build().is_err());
        assert!(Config::builder().disk_cache_enabled(false).disk_cache_size(0).build().is_ok());
    }

    #[test]
    fn test_from_toml_fills_defaults() {
        let config = Config::from_toml_str(
            r#"
            decode_job_pool_size = 10

            [memory_cache]
            max_size_bytes = 2048

            [disk_cache]
            enabled = false
            "#,
        )
        .unwrap();
        assert_eq!(config.memory_cache.max_size_bytes, 2048);
        assert!(!config.disk_cache.enabled);
        assert_eq!(config.disk_cache.max_size_bytes, 250 * 1024 * 1024);
        assert_eq!(config.decode_job_pool_size, 10);
        assert_eq!(config.active_resources.sweep_interval_ms, 1_000);
    }

    #[test]
    fn test_from_toml_rejects_invalid() {
        assert!(Config::from_toml_str("[memory_cache]\nmax_size_bytes = 0\n").is_err());
        assert!(Config::from_toml_str("memory_cache = 3").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pictor.toml");
        std::fs::write(&path, "[executors]\nsource_threads = 2\n").unwrap();
        assert_eq!(Config::load(&path).unwrap().executors.source_threads, 2);
        assert!(Config::load(dir.path().join("missing.toml")).is_err());
    }
}

use crate::resource::compression::CompressionAlgorithm;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Resource subsystem settings, usually loaded from the `[resources]` table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceConfig {
    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub compression: CompressionConfig,

    #[serde(default)]
    pub streaming: StreamConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Upper bound on the sum of all cached content, in bytes
    #[serde(default = "default_cache_max_size")]
    pub max_size: usize,

    /// Larger resources are served but never cached
    #[serde(default = "default_cache_max_size_per_resource")]
    pub max_size_per_resource: usize,

    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_cache_max_size() -> usize {
    50 * 1024 * 1024
}

fn default_cache_max_size_per_resource() -> usize {
    5 * 1024 * 1024
}

fn default_ttl_secs() -> u64 {
    300
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            max_size: default_cache_max_size(),
            max_size_per_resource: default_cache_max_size_per_resource(),
            default_ttl_secs: default_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Content at or below this many bytes is sent uncompressed
    #[serde(default = "default_min_size")]
    pub min_size: usize,

    /// Preferred algorithm when the client accepts several
    #[serde(default)]
    pub algorithm: CompressionAlgorithm,

    #[serde(default = "default_level")]
    pub level: u32,
}

fn default_min_size() -> usize {
    1024
}

fn default_level() -> u32 {
    6
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            min_size: default_min_size(),
            algorithm: CompressionAlgorithm::default(),
            level: default_level(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_chunk_size")]
    pub default_chunk_size: usize,

    /// Producers untouched for this long are released
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

fn default_chunk_size() -> usize {
    64 * 1024
}

fn default_idle_timeout_secs() -> u64 {
    300
}

impl StreamConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            default_chunk_size: default_chunk_size(),
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ResourceConfig::default();
        assert!(config.cache.enabled);
        assert_eq!(config.cache.default_ttl(), Duration::from_secs(300));
        assert_eq!(config.compression.min_size, 1024);
        assert_eq!(config.compression.algorithm, CompressionAlgorithm::Gzip);
        assert_eq!(config.streaming.default_chunk_size, 65536);
        assert_eq!(config.streaming.idle_timeout(), Duration::from_secs(300));
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: ResourceConfig = serde_json::from_value(serde_json::json!({
            "cache": {"max_size": 2048},
            "compression": {"algorithm": "zlib"}
        }))
        .unwrap();
        assert_eq!(config.cache.max_size, 2048);
        assert_eq!(config.cache.max_size_per_resource, 5 * 1024 * 1024);
        assert_eq!(config.compression.algorithm, CompressionAlgorithm::Zlib);
        assert!(config.compression.enabled);
    }
}

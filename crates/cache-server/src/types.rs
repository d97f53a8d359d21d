//! Core types for the cache server

use blob_cache::{CacheConfig, CacheStats, DEFAULT_INLINE_THRESHOLD, DEFAULT_PRUNE_INTERVAL};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the cache server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub cache_dir: PathBuf,
    pub inline_threshold: usize,
    pub prune_interval: Duration,
    /// Used when a request omits `namespace` and namespaces are optional
    pub default_namespace: String,
    pub require_namespace: bool,
    pub request_timeout: Duration,
    pub max_body_bytes: usize,
    pub db_max_connections: u32,
}

impl ServerConfig {
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            root_dir: self.cache_dir.clone(),
            inline_threshold: self.inline_threshold,
            max_connections: self.db_max_connections,
            ..CacheConfig::default()
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 5001,
            cache_dir: PathBuf::from("./cache"),
            inline_threshold: DEFAULT_INLINE_THRESHOLD,
            prune_interval: DEFAULT_PRUNE_INTERVAL,
            default_namespace: "default".to_string(),
            require_namespace: false,
            request_timeout: Duration::from_secs(30),
            max_body_bytes: 150 * 1024 * 1024, // 150MB
            db_max_connections: 4,
        }
    }
}

/// `{"success": true}`
#[derive(Debug, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub success: bool,
}

impl SuccessResponse {
    pub fn ok() -> Self {
        Self { success: true }
    }
}

/// `{"success": true, "deleted": ...}` for delete-family endpoints
#[derive(Debug, Serialize, Deserialize)]
pub struct DeletedResponse<T> {
    pub success: bool,
    pub deleted: T,
}

impl<T> DeletedResponse<T> {
    pub fn new(deleted: T) -> Self {
        Self {
            success: true,
            deleted,
        }
    }
}

/// Text cache lookup result; `value` is null when absent or expired
#[derive(Debug, Serialize, Deserialize)]
pub struct TextValueResponse {
    pub key: String,
    pub value: Option<String>,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
    pub cache: CacheStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 5001);
        assert_eq!(config.cache_dir, PathBuf::from("./cache"));
        assert_eq!(config.inline_threshold, 100 * 1024);
        assert_eq!(config.prune_interval, Duration::from_secs(7200));
        assert_eq!(config.default_namespace, "default");
        assert!(!config.require_namespace);
    }

    #[test]
    fn test_cache_config_from_server_config() {
        let config = ServerConfig {
            cache_dir: PathBuf::from("/data/cache"),
            inline_threshold: 4096,
            db_max_connections: 8,
            ..ServerConfig::default()
        };
        let cache_config = config.cache_config();
        assert_eq!(cache_config.root_dir, PathBuf::from("/data/cache"));
        assert_eq!(cache_config.inline_threshold, 4096);
        assert_eq!(cache_config.max_connections, 8);
    }

    #[test]
    fn test_deleted_response_serialization() {
        let json = serde_json::to_string(&DeletedResponse::new(true)).unwrap();
        assert_eq!(json, r#"{"success":true,"deleted":true}"#);

        let json = serde_json::to_string(&DeletedResponse::new(3u64)).unwrap();
        assert_eq!(json, r#"{"success":true,"deleted":3}"#);
    }

    #[test]
    fn test_text_value_response_serialization() {
        let response = TextValueResponse {
            key: "missing".to_string(),
            value: None,
        };
        let json = serde_json::to_string(&response).unwrap();
        assert_eq!(json, r#"{"key":"missing","value":null}"#);
    }

    #[test]
    fn test_health_response_serialization() {
        let response = HealthResponse {
            status: "ok".to_string(),
            uptime_secs: 3600,
            cache: CacheStats {
                entries: 100,
                hits: 500,
                ..CacheStats::default()
            },
        };

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"status\":\"ok\""));
        assert!(json.contains("3600"));
        assert!(json.contains("500"));
    }
}

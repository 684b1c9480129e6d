//! Worker configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use swkit_common::{ResultExt, SwKitError};
use swkit_net::FetcherConfig;

use crate::classify::ClassifierConfig;

/// Resources pre-warmed into the static cache on install.
pub const DEFAULT_CRITICAL_RESOURCES: &[&str] = &[
    "/",
    "/about",
    "/services",
    "/contact",
    "/blog",
    "/styles/critical.css",
    "/styles/loading.css",
    "/fonts/inter-tight-400.woff2",
    "/fonts/inter-tight-600.woff2",
    "/images/logo.webp",
    "/images/hero-bg.webp",
];

/// Worker configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Prefix shared by every cache name
    pub cache_prefix: String,

    /// Version tag embedded in cache names
    pub version: String,

    /// Paths (relative to the origin) that must be cached before install completes
    pub critical_resources: Vec<String>,

    /// Request classification settings
    pub classifier: ClassifierConfig,

    /// Network settings
    pub network: FetcherConfig,

    /// Upper bound for the whole pre-warm batch, in seconds
    pub install_timeout_secs: u64,

    /// Cache storage settings
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Persist caches under this directory; `None` keeps them in memory
    pub directory: Option<PathBuf>,

    /// Maximum total body bytes across all caches
    pub quota_bytes: Option<u64>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            cache_prefix: "fascinante".to_string(),
            version: "v1".to_string(),
            critical_resources: DEFAULT_CRITICAL_RESOURCES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            classifier: ClassifierConfig::default(),
            network: FetcherConfig::default(),
            install_timeout_secs: 60,
            storage: StorageConfig::default(),
        }
    }
}

impl StorageConfig {
    /// `<platform cache dir>/swkit`, or `./.swkit-cache` when unknown.
    pub fn default_directory() -> PathBuf {
        dirs::cache_dir()
            .map(|dir| dir.join("swkit"))
            .unwrap_or_else(|| PathBuf::from(".swkit-cache"))
    }
}

impl WorkerConfig {
    /// Parse a JSON document; missing fields keep their defaults.
    pub fn from_json(json: &str) -> swkit_common::Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| SwKitError::config_with_source("invalid worker config", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file.
    pub fn load(path: &Path) -> swkit_common::Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Pretty JSON, e.g. for writing a starter config.
    pub fn to_json(&self) -> swkit_common::Result<String> {
        serde_json::to_string_pretty(self).context("serializing worker config")
    }

    pub fn validate(&self) -> swkit_common::Result<()> {
        if self.version.trim().is_empty() {
            return Err(SwKitError::config("version tag must not be empty"));
        }
        if self.cache_prefix.trim().is_empty() {
            return Err(SwKitError::config("cache prefix must not be empty"));
        }
        if let Some(bad) = self
            .critical_resources
            .iter()
            .find(|path| !path.starts_with('/'))
        {
            return Err(SwKitError::config(format!(
                "critical resource must be an absolute path: {bad}"
            )));
        }
        Ok(())
    }

    pub fn cache_names(&self) -> CacheNames {
        CacheNames::new(&self.cache_prefix, &self.version)
    }

    pub fn install_timeout(&self) -> Duration {
        Duration::from_secs(self.install_timeout_secs)
    }
}

/// The two long-lived caches of one version.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheNames {
    pub static_cache: String,
    pub dynamic_cache: String,
}

impl CacheNames {
    pub fn new(prefix: &str, version: &str) -> Self {
        Self {
            static_cache: format!("{prefix}-static-{version}"),
            dynamic_cache: format!("{prefix}-dynamic-{version}"),
        }
    }

    /// Names that survive activation.
    pub fn allow_list(&self) -> [&str; 2] {
        [&self.static_cache, &self.dynamic_cache]
    }

    pub fn is_current(&self, name: &str) -> bool {
        self.allow_list().contains(&name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_cache_names() {
        let names = WorkerConfig::default().cache_names();
        assert_eq!(names.static_cache, "fascinante-static-v1");
        assert_eq!(names.dynamic_cache, "fascinante-dynamic-v1");
        assert!(names.is_current("fascinante-static-v1"));
        assert!(!names.is_current("fascinante-digital-v1"));
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = WorkerConfig::from_json(r#"{ "version": "v2" }"#).unwrap();
        assert_eq!(config.version, "v2");
        assert_eq!(config.cache_prefix, "fascinante");
        assert_eq!(config.critical_resources.len(), 11);
        assert_eq!(config.classifier.api_prefix, "/api/");
    }

    #[test]
    fn test_rejects_relative_critical_resource() {
        let err = WorkerConfig::from_json(r#"{ "critical_resources": ["about"] }"#).unwrap_err();
        assert_eq!(err.category(), "config");
    }

    #[test]
    fn test_rejects_malformed_json() {
        assert!(WorkerConfig::from_json("{ version: ").is_err());
    }

    #[test]
    fn test_json_round_trip() {
        let mut config = WorkerConfig::default();
        config.storage.quota_bytes = Some(1024);
        let json = config.to_json().unwrap();
        assert_eq!(WorkerConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("worker.json");
        std::fs::write(&path, r#"{ "cache_prefix": "agency" }"#).unwrap();

        let config = WorkerConfig::load(&path).unwrap();
        assert_eq!(config.cache_names().static_cache, "agency-static-v1");
    }
}

use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::{application::BackendErrorPolicy, storage::etcd::EtcdConfig};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/registry/config.yaml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Log level of the registry crate.
    /// Default: info
    pub log_level: String,
    pub etcd: EtcdConfig,
    pub lookup: LookupConfig,
    pub validation: ValidationConfig,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        RegistryConfig {
            log_level: "info".to_string(),
            etcd: EtcdConfig::default(),
            lookup: LookupConfig::default(),
            validation: ValidationConfig::default(),
        }
    }
}

/// Where referenced resources are looked up.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LookupConfig {
    pub api_server_url: String,
    /// Per-request timeout of a single lookup.
    /// In seconds. Default: 10 sec
    pub timeout_secs: u64,
}

impl Default for LookupConfig {
    fn default() -> Self {
        LookupConfig {
            api_server_url: "http://localhost:8080".to_string(),
            timeout_secs: 10,
        }
    }
}

impl LookupConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// How lookup failures other than not-found are treated.
    pub backend_errors: BackendErrorPolicy,
}

fn env_overrides() -> Environment {
    Environment::with_prefix("REGISTRY")
        .prefix_separator("_")
        .separator("__")
}

impl RegistryConfig {
    /// Reads `path` if it exists, then applies `REGISTRY_` environment
    /// overrides, e.g. `REGISTRY_ETCD__POOL_SIZE=4`.
    pub fn load(path: &str) -> Result<Self> {
        Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(env_overrides())
            .build()
            .with_context(|| format!("Failed to read config {}", path))?
            .try_deserialize::<RegistryConfig>()
            .with_context(|| "Failed to parse config".to_string())
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()?
            .try_deserialize::<RegistryConfig>()
            .with_context(|| "Failed to parse config".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let config = RegistryConfig::from_yaml(
            r#"
log_level: debug
etcd:
  endpoints:
    - http://etcd-0:2379
    - http://etcd-1:2379
validation:
  backend_errors: failClosed
"#,
        )
        .unwrap();

        assert_eq!(config.log_level, "debug");
        assert_eq!(config.etcd.endpoints.len(), 2);
        assert_eq!(config.etcd.pool_size, 16);
        assert_eq!(config.etcd.prefix, "/registry");
        assert_eq!(config.lookup.api_server_url, "http://localhost:8080");
        assert_eq!(config.lookup.timeout(), Duration::from_secs(10));
        assert_eq!(config.validation.backend_errors, BackendErrorPolicy::FailClosed);
    }

    #[test]
    fn missing_file_uses_defaults() {
        let config = RegistryConfig::load("/nonexistent/registry/config.yaml").unwrap();
        assert_eq!(config.validation.backend_errors, BackendErrorPolicy::FailOpen);
        assert_eq!(config.etcd.endpoints, vec!["http://localhost:2379".to_string()]);
    }

    #[test]
    fn unknown_policy_is_rejected() {
        assert!(RegistryConfig::from_yaml("validation:\n  backend_errors: ignore\n").is_err());
    }
}

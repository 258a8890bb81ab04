use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::store::StoreConfig;

// Controller configuration sourced from environment variables.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub cluster_name: String,
    pub metrics_bind: SocketAddr,
    pub store_timeout: Duration,
    pub sync_interval: Duration,
    pub retry_max_attempts: u32,
    pub changes_limit: u64,
    pub change_retention_max_rows: Option<i64>,
    pub manifest: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct ControllerConfigOverride {
    cluster_name: Option<String>,
    metrics_bind: Option<String>,
    store_timeout_ms: Option<u64>,
    sync_interval_ms: Option<u64>,
    retry_max_attempts: Option<u32>,
    changes_limit: Option<u64>,
    change_retention_max_rows: Option<i64>,
    manifest: Option<PathBuf>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            cluster_name: "local".to_string(),
            metrics_bind: SocketAddr::from(([0, 0, 0, 0], 8080)),
            store_timeout: Duration::from_millis(5000),
            sync_interval: Duration::from_millis(1000),
            retry_max_attempts: 10,
            changes_limit: 1000,
            change_retention_max_rows: Some(10_000),
            manifest: None,
        }
    }
}

fn env_parse<T>(key: &str, default: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    std::env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .with_context(|| format!("parse {key}"))
}

impl ControllerConfig {
    pub fn from_env() -> Result<Self> {
        let cluster_name =
            std::env::var("VESTA_CLUSTER_NAME").unwrap_or_else(|_| "local".to_string());
        let metrics_bind = env_parse("VESTA_METRICS_BIND", "0.0.0.0:8080")?;
        let store_timeout_ms: u64 = env_parse("VESTA_STORE_TIMEOUT_MS", "5000")?;
        let sync_interval_ms: u64 = env_parse("VESTA_SYNC_INTERVAL_MS", "1000")?;
        let retry_max_attempts = env_parse("VESTA_RETRY_MAX_ATTEMPTS", "10")?;
        let changes_limit = env_parse("VESTA_CHANGES_LIMIT", "1000")?;
        let change_retention_max_rows = match std::env::var("VESTA_CHANGE_RETENTION_MAX_ROWS") {
            Ok(value) => Some(
                value
                    .parse()
                    .with_context(|| "parse VESTA_CHANGE_RETENTION_MAX_ROWS")?,
            ),
            Err(_) => Some(10_000),
        };
        let manifest = std::env::var("VESTA_MANIFEST").ok().map(PathBuf::from);
        let config = Self {
            cluster_name,
            metrics_bind,
            store_timeout: Duration::from_millis(store_timeout_ms),
            sync_interval: Duration::from_millis(sync_interval_ms),
            retry_max_attempts,
            changes_limit,
            change_retention_max_rows,
            manifest,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_env_or_yaml() -> Result<Self> {
        let mut config = Self::from_env()?;
        if let Ok(path) = std::env::var("VESTA_CONFIG") {
            let contents =
                fs::read_to_string(&path).with_context(|| format!("read VESTA_CONFIG: {path}"))?;
            let override_cfg: ControllerConfigOverride =
                serde_yaml::from_str(&contents).with_context(|| "parse controller config yaml")?;
            if let Some(value) = override_cfg.cluster_name {
                config.cluster_name = value;
            }
            if let Some(value) = override_cfg.metrics_bind {
                config.metrics_bind = value.parse().with_context(|| "parse metrics_bind")?;
            }
            if let Some(value) = override_cfg.store_timeout_ms {
                config.store_timeout = Duration::from_millis(value);
            }
            if let Some(value) = override_cfg.sync_interval_ms {
                config.sync_interval = Duration::from_millis(value);
            }
            if let Some(value) = override_cfg.retry_max_attempts {
                config.retry_max_attempts = value;
            }
            if let Some(value) = override_cfg.changes_limit {
                config.changes_limit = value;
            }
            if let Some(value) = override_cfg.change_retention_max_rows {
                config.change_retention_max_rows = Some(value);
            }
            if let Some(value) = override_cfg.manifest {
                config.manifest = Some(value);
            }
            config.validate()?;
        }
        Ok(config)
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            changes_limit: self.changes_limit,
            change_retention_max_rows: self.change_retention_max_rows,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.cluster_name.trim().is_empty() {
            anyhow::bail!("cluster name must not be empty");
        }
        if self.store_timeout.is_zero() {
            anyhow::bail!("store timeout must be positive");
        }
        if self.changes_limit == 0 {
            anyhow::bail!("changes limit must be positive");
        }
        Ok(())
    }
}

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{AppError, AppResult};
use crate::key_config::KeyConfig;

/// String key-value store holding one configuration blob per upstream API URL.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: String) -> Result<()>;
}

#[derive(Clone)]
pub struct RedisConfigStore {
    conn: ConnectionManager,
}

impl RedisConfigStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let client =
            redis::Client::open(url).with_context(|| format!("invalid REDIS_URL {url}"))?;
        let conn = ConnectionManager::new(client)
            .await
            .with_context(|| format!("failed to connect to redis at {url}"))?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl ConfigStore for RedisConfigStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn
            .get(key)
            .await
            .with_context(|| format!("redis GET failed for {key}"))?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(key, value)
            .await
            .with_context(|| format!("redis SET failed for {key}"))?;
        Ok(())
    }
}

/// Process-local store used when no redis is configured, and by tests.
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("memory config store lock poisoned"))?;
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("memory config store lock poisoned"))?;
        entries.insert(key.to_string(), value);
        Ok(())
    }
}

#[derive(Clone)]
pub struct ConfigGateway {
    store: Arc<dyn ConfigStore>,
    timeout: Duration,
}

impl ConfigGateway {
    pub fn new(store: Arc<dyn ConfigStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Loads the configuration for `api_url`; absent means empty.
    pub async fn get_config(&self, api_url: &str) -> AppResult<KeyConfig> {
        let raw = tokio::time::timeout(self.timeout, self.store.get(api_url))
            .await
            .map_err(|_| {
                AppError::upstream(format!(
                    "config store read timed out after {}ms",
                    self.timeout.as_millis()
                ))
            })?
            .map_err(|err| AppError::upstream(format!("{err:#}")))?;

        match raw {
            Some(raw) => parse_stored_config(&raw),
            None => Ok(KeyConfig::default()),
        }
    }

    /// Stores `config` under `api_url`, last write wins.
    pub async fn set_config(&self, api_url: &str, config: &JsonValue) -> AppResult<KeyConfig> {
        let parsed = validate_config_payload(config)?;
        let serialized = serde_json::to_string(config).map_err(AppError::unexpected)?;

        tokio::time::timeout(self.timeout, self.store.set(api_url, serialized))
            .await
            .map_err(|_| {
                AppError::upstream(format!(
                    "config store write timed out after {}ms",
                    self.timeout.as_millis()
                ))
            })?
            .map_err(|err| AppError::upstream(format!("{err:#}")))?;

        tracing::info!(api_url, "stored key configuration");
        Ok(parsed)
    }
}

fn parse_stored_config(raw: &str) -> AppResult<KeyConfig> {
    serde_json::from_str(raw).map_err(AppError::config_corrupt)
}

fn validate_config_payload(config: &JsonValue) -> AppResult<KeyConfig> {
    if !config.is_object() {
        return Err(AppError::invalid_config("Configuration must be a JSON object"));
    }
    KeyConfig::deserialize(config)
        .map_err(|err| AppError::invalid_config(format!("Invalid configuration: {err}")))
}

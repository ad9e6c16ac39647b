use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

const DEFAULT_TSDB_API_URL: &str = "http://gtsdb-web.abby.md";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub redis_url: Option<String>,
    pub default_api_url: String,
    pub upstream_timeout: Duration,
    pub config_store_timeout: Duration,
    pub rate_limit_per_second: u64,
    pub rate_limit_burst: u32,
    pub static_root: Option<PathBuf>,
}

impl ServerConfig {
    pub fn from_env(cli_static_root: Option<PathBuf>) -> Result<Self> {
        Self::from_lookup(cli_static_root, |key| std::env::var(key).ok())
    }

    fn from_lookup(
        cli_static_root: Option<PathBuf>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let env = Env(lookup);

        let redis_url = env.optional_string("REDIS_URL");
        let default_api_url = env.string("TSDB_DEFAULT_API_URL", DEFAULT_TSDB_API_URL);
        Url::parse(&default_api_url)
            .with_context(|| format!("TSDB_DEFAULT_API_URL is not a valid URL: {default_api_url}"))?;

        let upstream_timeout = Duration::from_millis(
            env.number("TSDB_UPSTREAM_TIMEOUT_MS", 15_000).clamp(100, 120_000),
        );
        let config_store_timeout = Duration::from_millis(
            env.number("TSDB_CONFIG_STORE_TIMEOUT_MS", 3_000).clamp(50, 60_000),
        );
        let rate_limit_per_second = env.number("TSDB_RATE_LIMIT_PER_SECOND", 20).max(1);
        let rate_limit_burst = env.number("TSDB_RATE_LIMIT_BURST", 60).clamp(1, u32::MAX as u64) as u32;
        let static_root = cli_static_root.or_else(|| env.optional_string("TSDB_STATIC_ROOT").map(PathBuf::from));

        Ok(Self {
            redis_url,
            default_api_url,
            upstream_timeout,
            config_store_timeout,
            rate_limit_per_second,
            rate_limit_burst,
            static_root,
        })
    }
}

struct Env<F>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn optional_string(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.optional_string(key)
            .unwrap_or_else(|| default.to_string())
    }

    fn number(&self, key: &str, default: u64) -> u64 {
        match self.optional_string(key) {
            Some(value) => match value.parse::<u64>() {
                Ok(parsed) => parsed,
                Err(_) => {
                    tracing::warn!(key, value = %value, default, "invalid numeric setting; using default");
                    default
                }
            },
            None => default,
        }
    }
}

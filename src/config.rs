use anyhow::{anyhow, Context, Result};
use config::{Environment, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;

const CONFIG_FILE: &str = "config/payments";
const ENV_PREFIX: &str = "PAYBRIDGE";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub payments: PaymentsConfig,
    #[serde(default)]
    pub redis: Option<RedisConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
}

#[derive(Clone, Deserialize)]
pub struct PaymentsConfig {
    /// Mount point of the payment routes
    pub route_prefix: String,
    #[serde(default)]
    pub default_adapter: Option<String>,
    pub http_timeout_secs: u64,
    /// Adapter name -> credential object; each adapter parses its own
    #[serde(default)]
    pub adapters: HashMap<String, serde_json::Value>,
}

impl std::fmt::Debug for PaymentsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.adapters.keys().collect();
        names.sort();
        f.debug_struct("PaymentsConfig")
            .field("route_prefix", &self.route_prefix)
            .field("default_adapter", &self.default_adapter)
            .field("http_timeout_secs", &self.http_timeout_secs)
            .field("adapters", &names)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

impl Config {
    /// Defaults, then `config/payments.*` if present, then `PAYBRIDGE__*`
    /// environment variables (`__` separates nesting levels).
    pub fn from_env() -> Result<Self> {
        let port = match env::var("PORT") {
            Ok(port) => Some(port.parse::<u16>().context("PORT must be a valid number")?),
            Err(_) => None,
        };

        let settings = config::Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("server.environment", "development")?
            .set_default("payments.route_prefix", "/payments")?
            .set_default("payments.http_timeout_secs", 30)?
            .set_override_option("server.port", port.map(i64::from))?
            .add_source(File::with_name(CONFIG_FILE).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("failed to load configuration")?;

        let mut config: Config = settings
            .try_deserialize()
            .context("configuration has an unexpected shape")?;
        config.apply_http_timeout();

        config.validate()?;
        Ok(config)
    }

    /// Adapters without their own timeout inherit the global one.
    fn apply_http_timeout(&mut self) {
        let timeout = self.payments.http_timeout_secs;
        for settings in self.payments.adapters.values_mut() {
            if let Some(map) = settings.as_object_mut() {
                map.entry("timeout_secs")
                    .or_insert_with(|| serde_json::Value::from(timeout));
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.port < 1024 {
            return Err(anyhow!(
                "Port must be at least 1024, got {}",
                self.server.port
            ));
        }

        let valid_environments = ["development", "staging", "production"];
        if !valid_environments.contains(&self.server.environment.as_str()) {
            return Err(anyhow!(
                "Environment must be one of: {:?}, got {}",
                valid_environments,
                self.server.environment
            ));
        }

        let prefix = &self.payments.route_prefix;
        if !prefix.starts_with('/') || (prefix.len() > 1 && prefix.ends_with('/')) {
            return Err(anyhow!(
                "payments.route_prefix must start with '/' and not end with one, got {}",
                prefix
            ));
        }

        if self.payments.http_timeout_secs == 0 {
            return Err(anyhow!("payments.http_timeout_secs must be greater than 0"));
        }

        if let Some(default) = &self.payments.default_adapter {
            if !self.payments.adapters.contains_key(default) {
                return Err(anyhow!(
                    "payments.default_adapter '{}' is not configured",
                    default
                ));
            }
        }

        if let Some(redis) = &self.redis {
            if redis.url.trim().is_empty() {
                return Err(anyhow!("redis.url cannot be empty"));
            }
        }

        Ok(())
    }
}

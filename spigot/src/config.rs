//! Configuration loading and validation.
//!
//! Settings come from a YAML file merged with `SPIGOT_`-prefixed environment
//! variables (`__` nests, e.g. `SPIGOT_ENGINE__URL`). `DATABASE_URL` is
//! honored as a conventional override for the Postgres connection string.

use std::time::Duration;

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::auth::is_secret_shaped;
use crate::store::models::{EndpointMethod, OperationKind, ParameterSpec};

#[derive(Parser, Debug)]
#[command(name = "spigot", about = "Publish stored operations as secret-gated HTTP endpoints")]
pub struct Args {
    /// Path to the YAML configuration file
    #[arg(short = 'f', long, env = "SPIGOT_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate the configuration and exit
    #[arg(long)]
    pub validate: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Conventional `DATABASE_URL` override, merged in by [`Config::load`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,

    pub storage: StorageConfig,

    pub engine: EngineConfig,

    /// Endpoints seeded at startup. Seeding is idempotent per custom path.
    #[serde(default)]
    pub publish: Vec<PublishSpec>,

    #[serde(default)]
    pub usage: UsageConfig,

    #[serde(default)]
    pub cors: CorsConfig,

    #[serde(default)]
    pub enable_metrics: bool,

    #[serde(default)]
    pub enable_otel_export: bool,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3200
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase", deny_unknown_fields)]
pub enum StorageConfig {
    Postgres {
        url: String,
        #[serde(default)]
        pool: PoolSettings,
    },
    /// Volatile storage; everything is lost on restart. Meant for tests and
    /// throwaway deployments.
    Memory,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PoolSettings {
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default)]
    pub min_connections: u32,
    #[serde(default = "default_acquire_timeout", with = "humantime_serde")]
    pub acquire_timeout: Duration,
}

fn default_max_connections() -> u32 {
    10
}

fn default_acquire_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            min_connections: 0,
            acquire_timeout: default_acquire_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Base URL of the query engine's HTTP API.
    pub url: Url,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearer_token: Option<String>,

    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PublishSpec {
    pub name: String,
    pub custom_path: String,
    pub kind: OperationKind,
    pub target: String,
    pub method: EndpointMethod,
    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_rate_limit")]
    pub rate_limit: i32,
    /// Opaque key-value bag attached to the endpoint as-is.
    #[serde(default = "default_metadata")]
    pub metadata: serde_json::Value,
}

fn default_rate_limit() -> i32 {
    60
}

fn default_metadata() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct UsageConfig {
    /// Records queued ahead of the background writer before loss kicks in.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_flush_interval", with = "humantime_serde")]
    pub flush_interval: Duration,
}

fn default_queue_capacity() -> usize {
    10_000
}

fn default_batch_size() -> usize {
    100
}

fn default_flush_interval() -> Duration {
    Duration::from_secs(1)
}

impl Default for UsageConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            batch_size: default_batch_size(),
            flush_interval: default_flush_interval(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CorsConfig {
    #[serde(default)]
    pub allowed_origins: Vec<CorsOrigin>,

    #[serde(default)]
    pub allow_credentials: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorsOrigin {
    Wildcard,
    Origin(String),
}

impl Serialize for CorsOrigin {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            CorsOrigin::Wildcard => serializer.serialize_str("*"),
            CorsOrigin::Origin(origin) => serializer.serialize_str(origin),
        }
    }
}

impl<'de> Deserialize<'de> for CorsOrigin {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        if raw == "*" {
            return Ok(CorsOrigin::Wildcard);
        }
        let url: Url = raw.parse().map_err(serde::de::Error::custom)?;
        // Normalize away any trailing slash Url parsing adds.
        Ok(CorsOrigin::Origin(url.origin().ascii_serialization()))
    }
}

impl Config {
    pub fn load(args: &Args) -> anyhow::Result<Config> {
        let mut config: Config = Figment::new()
            .merge(Yaml::file(&args.config))
            .merge(Env::prefixed("SPIGOT_").split("__"))
            .merge(Env::raw().only(&["DATABASE_URL"]))
            .extract()?;

        if let Some(database_url) = config.database_url.take() {
            config.storage = match config.storage {
                StorageConfig::Postgres { pool, .. } => StorageConfig::Postgres {
                    url: database_url,
                    pool,
                },
                StorageConfig::Memory => StorageConfig::Postgres {
                    url: database_url,
                    pool: PoolSettings::default(),
                },
            };
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let mut seen_paths = std::collections::HashSet::new();
        for spec in &self.publish {
            if spec.custom_path.is_empty() {
                anyhow::bail!("published endpoint '{}' has an empty custom_path", spec.name);
            }
            if !spec
                .custom_path
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            {
                anyhow::bail!(
                    "published endpoint '{}' has a custom_path that is not URL-safe: '{}'",
                    spec.name,
                    spec.custom_path
                );
            }
            // A secret-shaped path would be consumed by token extraction and
            // the endpoint would become unreachable by path.
            if is_secret_shaped(&spec.custom_path) {
                anyhow::bail!(
                    "published endpoint '{}' has a custom_path that looks like a secret: '{}'",
                    spec.name,
                    spec.custom_path
                );
            }
            if !seen_paths.insert(spec.custom_path.as_str()) {
                anyhow::bail!("custom_path '{}' is published more than once", spec.custom_path);
            }
        }

        if self.usage.queue_capacity == 0 {
            anyhow::bail!("usage.queue_capacity must be at least 1");
        }
        if self.usage.batch_size == 0 {
            anyhow::bail!("usage.batch_size must be at least 1");
        }

        if self.cors.allow_credentials && self.cors.allowed_origins.contains(&CorsOrigin::Wildcard) {
            anyhow::bail!("cors.allow_credentials cannot be combined with a wildcard origin");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL_CONFIG: &str = r#"
storage:
  type: memory
engine:
  url: "http://engine.internal:8047"
"#;

    fn load_from_jail(_jail: &mut figment::Jail) -> anyhow::Result<Config> {
        let args = Args {
            config: "config.yaml".to_string(),
            validate: false,
        };
        Config::load(&args)
    }

    #[test]
    fn minimal_config_gets_defaults() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("config.yaml", MINIMAL_CONFIG)?;
            let config = load_from_jail(jail).expect("config should load");

            assert_eq!(config.port, 3200);
            assert_eq!(config.usage.queue_capacity, 10_000);
            assert_eq!(config.usage.batch_size, 100);
            assert_eq!(config.usage.flush_interval, Duration::from_secs(1));
            assert_eq!(config.engine.request_timeout, Duration::from_secs(30));
            assert!(matches!(config.storage, StorageConfig::Memory));
            assert!(config.publish.is_empty());
            Ok(())
        });
    }

    #[test]
    fn env_vars_override_yaml() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("config.yaml", MINIMAL_CONFIG)?;
            jail.set_env("SPIGOT_PORT", "9000");
            jail.set_env("SPIGOT_ENGINE__REQUEST_TIMEOUT", "5s");
            let config = load_from_jail(jail).expect("config should load");

            assert_eq!(config.port, 9000);
            assert_eq!(config.engine.request_timeout, Duration::from_secs(5));
            Ok(())
        });
    }

    #[test]
    fn database_url_forces_postgres_storage() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("config.yaml", MINIMAL_CONFIG)?;
            jail.set_env("DATABASE_URL", "postgres://spigot:pw@db/spigot");
            let config = load_from_jail(jail).expect("config should load");

            match config.storage {
                StorageConfig::Postgres { url, .. } => assert_eq!(url, "postgres://spigot:pw@db/spigot"),
                other => panic!("expected postgres storage, got {other:?}"),
            }
            Ok(())
        });
    }

    #[test]
    fn secret_shaped_publish_path_is_rejected() {
        figment::Jail::expect_with(|jail| {
            let config = format!(
                r#"
storage:
  type: memory
engine:
  url: "http://engine.internal:8047"
publish:
  - name: sneaky
    custom_path: "{}"
    kind: table
    target: orders
    method: GET
"#,
                "a".repeat(64)
            );
            jail.create_file("config.yaml", &config)?;
            assert!(load_from_jail(jail).is_err());
            Ok(())
        });
    }

    #[test]
    fn duplicate_publish_paths_are_rejected() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "config.yaml",
                r#"
storage:
  type: memory
engine:
  url: "http://engine.internal:8047"
publish:
  - name: one
    custom_path: orders
    kind: table
    target: orders
    method: GET
  - name: two
    custom_path: orders
    kind: table
    target: orders_v2
    method: GET
"#,
            )?;
            assert!(load_from_jail(jail).is_err());
            Ok(())
        });
    }

    #[test]
    fn wildcard_origin_with_credentials_is_rejected() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "config.yaml",
                r#"
storage:
  type: memory
engine:
  url: "http://engine.internal:8047"
cors:
  allowed_origins: ["*"]
  allow_credentials: true
"#,
            )?;
            assert!(load_from_jail(jail).is_err());
            Ok(())
        });
    }
}

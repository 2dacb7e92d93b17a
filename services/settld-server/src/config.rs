//! Server configuration
//!
//! Environment-driven, with CLI flags for the common local overrides.
//! The env surface matches the deployment manifests:
//! `STORE`, `DATABASE_URL`, `PROXY_PG_SCHEMA`, `PROXY_MIGRATE_ON_STARTUP`,
//! `PROXY_OPS_TOKENS`, `PROXY_API_KEYS`, `PROXY_AUTOTICK`,
//! `PROXY_AUTOTICK_INTERVAL_MS`, `PROXY_DELIVERY_HTTP_TIMEOUT_MS`,
//! `PROXY_EXPORT_DESTINATIONS`, `PROXY_SIGNER_SEED`,
//! `PROXY_REQUIRE_SIGNER_KEY`, `PROXY_HOST`, `PROXY_PORT`.

use anyhow::{bail, Context};
use serde::Deserialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

/// Which store backs the process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Mem,
    Pg,
}

/// One configured webhook destination
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DestinationConfig {
    #[serde(default)]
    pub destination_id: Option<String>,
    pub url: String,
    pub secret: String,
    #[serde(default)]
    pub topics: Vec<String>,
}

/// Full server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub store: StoreKind,
    pub database_url: Option<String>,
    pub pg_schema: String,
    pub migrate_on_startup: bool,
    pub ops_tokens: Vec<String>,
    pub static_api_keys: HashMap<String, Vec<String>>,
    pub autotick: bool,
    pub autotick_interval: Duration,
    pub delivery_http_timeout: Duration,
    /// tenantId → destinations
    pub export_destinations: HashMap<String, Vec<DestinationConfig>>,
    pub signer_seed: Option<String>,
    pub require_signer_key: bool,
}

fn env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_bool(name: &str, default: bool) -> bool {
    match env(name).as_deref() {
        Some("1") | Some("true") | Some("yes") => true,
        Some("0") | Some("false") | Some("no") => false,
        _ => default,
    }
}

fn env_millis(name: &str, default_ms: u64) -> Duration {
    Duration::from_millis(
        env(name)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default_ms),
    )
}

impl ServerConfig {
    /// Load from the process environment
    pub fn from_env() -> anyhow::Result<Self> {
        let store = match env("STORE").as_deref() {
            None | Some("mem") => StoreKind::Mem,
            Some("pg") => StoreKind::Pg,
            Some(other) => bail!("STORE must be mem or pg, got {other:?}"),
        };
        let database_url = env("DATABASE_URL");
        if store == StoreKind::Pg && database_url.is_none() {
            bail!("STORE=pg requires DATABASE_URL");
        }

        let ops_tokens = env("PROXY_OPS_TOKENS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let static_api_keys = match env("PROXY_API_KEYS") {
            Some(raw) => {
                serde_json::from_str(&raw).context("PROXY_API_KEYS must be a JSON map")?
            }
            None => HashMap::new(),
        };

        let export_destinations = match env("PROXY_EXPORT_DESTINATIONS") {
            Some(raw) => serde_json::from_str(&raw)
                .context("PROXY_EXPORT_DESTINATIONS must be a JSON map")?,
            None => HashMap::new(),
        };

        Ok(Self {
            host: env("PROXY_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: env("PROXY_PORT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(8080),
            store,
            database_url,
            pg_schema: env("PROXY_PG_SCHEMA").unwrap_or_else(|| "proxy".to_string()),
            migrate_on_startup: env_bool("PROXY_MIGRATE_ON_STARTUP", true),
            ops_tokens,
            static_api_keys,
            autotick: env_bool("PROXY_AUTOTICK", true),
            autotick_interval: env_millis("PROXY_AUTOTICK_INTERVAL_MS", 1000),
            delivery_http_timeout: env_millis("PROXY_DELIVERY_HTTP_TIMEOUT_MS", 5000),
            export_destinations,
            signer_seed: env("PROXY_SIGNER_SEED"),
            require_signer_key: env_bool("PROXY_REQUIRE_SIGNER_KEY", false),
        })
    }

    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .context("invalid host/port")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destination_config_parses_the_env_shape() {
        let raw = r#"{
            "tenant_a": [
                { "url": "https://receiver.example/hook", "secret": "s1", "topics": ["settlement.released"] }
            ]
        }"#;
        let parsed: HashMap<String, Vec<DestinationConfig>> = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed["tenant_a"].len(), 1);
        assert!(parsed["tenant_a"][0].topics.contains(&"settlement.released".to_string()));
    }
}

//! Runtime configuration loaded from environment variables.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

impl ConfigError {
    fn invalid(key: &'static str, message: impl Into<String>) -> Self {
        ConfigError::Invalid {
            key,
            message: message.into(),
        }
    }
}

/// When the dispatcher announces a low-stock condition.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertPolicy {
    /// Every mutation that leaves the entry at or below its threshold re-announces it.
    #[default]
    EveryMutation,
    /// Only OK -> LOW transitions are announced.
    EdgeTriggered,
}

impl FromStr for AlertPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "every_mutation" | "every-mutation" => Ok(AlertPolicy::EveryMutation),
            "edge_triggered" | "edge-triggered" => Ok(AlertPolicy::EdgeTriggered),
            other => Err(ConfigError::invalid(
                "ALERT_POLICY",
                format!("expected every_mutation or edge_triggered, got '{other}'"),
            )),
        }
    }
}

/// Service configuration.
///
/// `Default` gives the documented defaults; `from_env` overlays environment
/// variables on top of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    pub bind_addr: SocketAddr,
    /// Postgres connection string; the in-memory store is used when unset.
    pub database_url: Option<String>,
    pub max_conflict_retries: u32,
    pub alert_policy: AlertPolicy,
    pub sse_keepalive: Duration,
    /// Per-connection buffer of undelivered notifications.
    pub client_channel_capacity: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            database_url: None,
            max_conflict_retries: 5,
            alert_policy: AlertPolicy::EveryMutation,
            sse_keepalive: Duration::from_secs(15),
            client_channel_capacity: 64,
        }
    }
}

impl LedgerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (used by `from_env` and tests).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut cfg = Self::default();

        if let Some(v) = lookup("BIND_ADDR") {
            cfg.bind_addr = parse("BIND_ADDR", &v)?;
        }
        if let Some(v) = lookup("DATABASE_URL") {
            let v = v.trim();
            if !v.is_empty() {
                cfg.database_url = Some(v.to_string());
            }
        }
        if let Some(v) = lookup("MAX_CONFLICT_RETRIES") {
            cfg.max_conflict_retries = parse("MAX_CONFLICT_RETRIES", &v)?;
        }
        if let Some(v) = lookup("ALERT_POLICY") {
            cfg.alert_policy = v.parse()?;
        }
        if let Some(v) = lookup("SSE_KEEPALIVE_SECS") {
            let secs: u64 = parse("SSE_KEEPALIVE_SECS", &v)?;
            if secs == 0 {
                return Err(ConfigError::invalid("SSE_KEEPALIVE_SECS", "must be at least 1"));
            }
            cfg.sse_keepalive = Duration::from_secs(secs);
        }
        if let Some(v) = lookup("CLIENT_CHANNEL_CAPACITY") {
            let capacity: usize = parse("CLIENT_CHANNEL_CAPACITY", &v)?;
            if capacity == 0 {
                return Err(ConfigError::invalid("CLIENT_CHANNEL_CAPACITY", "must be at least 1"));
            }
            cfg.client_channel_capacity = capacity;
        }

        Ok(cfg)
    }

    pub fn with_alert_policy(mut self, policy: AlertPolicy) -> Self {
        self.alert_policy = policy;
        self
    }

    pub fn with_max_conflict_retries(mut self, retries: u32) -> Self {
        self.max_conflict_retries = retries;
        self
    }
}

fn parse<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: core::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::invalid(key, format!("'{raw}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let cfg = LedgerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg, LedgerConfig::default());
        assert_eq!(cfg.max_conflict_retries, 5);
        assert_eq!(cfg.alert_policy, AlertPolicy::EveryMutation);
        assert_eq!(cfg.bind_addr.port(), 8080);
    }

    #[test]
    fn overrides_are_applied() {
        let cfg = LedgerConfig::from_lookup(lookup(&[
            ("BIND_ADDR", "127.0.0.1:9000"),
            ("DATABASE_URL", "postgres://localhost/stock"),
            ("MAX_CONFLICT_RETRIES", "2"),
            ("ALERT_POLICY", "edge_triggered"),
            ("SSE_KEEPALIVE_SECS", "30"),
            ("CLIENT_CHANNEL_CAPACITY", "8"),
        ]))
        .unwrap();

        assert_eq!(cfg.bind_addr, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(cfg.database_url.as_deref(), Some("postgres://localhost/stock"));
        assert_eq!(cfg.max_conflict_retries, 2);
        assert_eq!(cfg.alert_policy, AlertPolicy::EdgeTriggered);
        assert_eq!(cfg.sse_keepalive, Duration::from_secs(30));
        assert_eq!(cfg.client_channel_capacity, 8);
    }

    #[test]
    fn blank_database_url_means_in_memory() {
        let cfg = LedgerConfig::from_lookup(lookup(&[("DATABASE_URL", "  ")])).unwrap();
        assert!(cfg.database_url.is_none());
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = LedgerConfig::from_lookup(lookup(&[("MAX_CONFLICT_RETRIES", "many")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "MAX_CONFLICT_RETRIES", .. }));

        let err = LedgerConfig::from_lookup(lookup(&[("ALERT_POLICY", "sometimes")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "ALERT_POLICY", .. }));

        let err = LedgerConfig::from_lookup(lookup(&[("CLIENT_CHANNEL_CAPACITY", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "CLIENT_CHANNEL_CAPACITY", .. }));
    }
}

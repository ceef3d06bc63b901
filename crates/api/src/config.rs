//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use saga::{ForceOutcome, SagaConfig};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Server and saga configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST` — bind address (default: `"0.0.0.0"`)
/// - `PORT` — listen port (default: `3000`)
/// - `RUST_LOG` — tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT` — `text` or `json` (default: `text`)
/// - `DATABASE_URL` — PostgreSQL URL; in-memory stores when unset
/// - `EVENT_NS` — topic namespace (default: `"orders.v1"`)
/// - `CONSUMER_WORKERS` — partition workers per consumer group (default: `4`)
/// - `PAYMENT_BASE_URL` — remote payment adapter; in-process when unset
/// - `PAYMENT_TIMEOUT_MS` — payment call bound (default: `3000`)
/// - `PAYMENT_DECLINE_RATE` — in-process decline percentage (default: `0`)
/// - `PAYMENT_FORCE` — `success` or `fail` to force every decision
/// - `RESERVATION_TTL_SECS` — advisory reservation lifetime (default: `300`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub event_namespace: String,
    pub consumer_workers: usize,
    pub payment_base_url: Option<String>,
    pub payment_timeout: Duration,
    pub payment_decline_rate: u8,
    pub payment_force: Option<ForceOutcome>,
    pub reservation_ttl: Duration,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from any key lookup. Unparsable values fall back
    /// to the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: parse(lookup("PORT")).unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: match lookup("LOG_FORMAT").as_deref().map(str::trim) {
                Some(f) if f.eq_ignore_ascii_case("json") => LogFormat::Json,
                _ => LogFormat::Text,
            },
            database_url: non_empty("DATABASE_URL"),
            event_namespace: non_empty("EVENT_NS").unwrap_or(defaults.event_namespace),
            consumer_workers: parse(lookup("CONSUMER_WORKERS"))
                .filter(|w: &usize| *w > 0)
                .unwrap_or(defaults.consumer_workers),
            payment_base_url: non_empty("PAYMENT_BASE_URL"),
            payment_timeout: parse(lookup("PAYMENT_TIMEOUT_MS"))
                .map(Duration::from_millis)
                .unwrap_or(defaults.payment_timeout),
            payment_decline_rate: parse(lookup("PAYMENT_DECLINE_RATE"))
                .map(|r: u8| r.min(100))
                .unwrap_or(defaults.payment_decline_rate),
            payment_force: lookup("PAYMENT_FORCE").and_then(|v| ForceOutcome::parse(&v)),
            reservation_ttl: parse(lookup("RESERVATION_TTL_SECS"))
                .map(Duration::from_secs)
                .unwrap_or(defaults.reservation_ttl),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Returns the saga settings.
    pub fn saga_config(&self) -> SagaConfig {
        SagaConfig {
            namespace: self.event_namespace.clone(),
            workers: self.consumer_workers,
            payment_timeout: self.payment_timeout,
            force_payment: self.payment_force,
            reservation_ttl: self.reservation_ttl,
            ..SagaConfig::default()
        }
    }
}

fn parse<T: FromStr>(value: Option<String>) -> Option<T> {
    value.and_then(|v| v.trim().parse().ok())
}

impl Default for Config {
    fn default() -> Self {
        let saga = SagaConfig::default();
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            event_namespace: saga.namespace,
            consumer_workers: saga.workers,
            payment_base_url: None,
            payment_timeout: saga.payment_timeout,
            payment_decline_rate: 0,
            payment_force: None,
            reservation_ttl: saga.reservation_ttl,
        }
    }
}

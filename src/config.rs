//! Configuration module

use std::env;
use std::str::FromStr;
use std::time::Duration;
use validator::Validate;

use crate::engine::{BackendKind, DispatcherConfig, FeatureSchema, MultiplexerConfig};

/// Request body allowance per sample in a batch
const BODY_BYTES_PER_SAMPLE: usize = 1024;

/// Allowance for the request envelope
const BODY_BYTES_BASE: usize = 64 * 1024;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{}'", other)),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Validate)]
pub struct Config {
    /// Server port
    pub port: u16,

    /// Environment (development, production)
    pub environment: String,

    /// Model identifier reported in predict responses
    #[validate(length(min = 1))]
    pub model_id: String,

    pub scoring_backend: BackendKind,

    /// Seed for the synthetic backend and flow generator
    pub synthetic_seed: Option<u64>,

    #[validate(range(min = 1, max = 100_000))]
    pub max_batch_size: usize,

    /// Features every sample must carry
    pub required_features: Vec<String>,

    /// Concurrent scoring calls
    #[validate(range(min = 1, max = 10_000))]
    pub max_concurrency: usize,

    /// Max wait for a scoring slot before `Overloaded`
    #[validate(range(min = 1))]
    pub queue_timeout_ms: u64,

    #[validate(range(min = 1))]
    pub score_timeout_ms: u64,

    /// Stream tick interval
    #[validate(range(min = 10))]
    pub tick_interval_ms: u64,

    #[validate(range(min = 1, max = 65_536))]
    pub subscriber_queue_capacity: usize,

    pub shutdown_grace_secs: u64,

    /// Upstream prediction service for `/proxy/predict`
    #[validate(url)]
    pub upstream_base: Option<String>,

    pub upstream_token: Option<String>,

    #[validate(range(min = 1, max = 300))]
    pub upstream_timeout_secs: u64,

    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8000,
            environment: "development".to_string(),
            model_id: "netguard-heuristic-v1".to_string(),
            scoring_backend: BackendKind::Heuristic,
            synthetic_seed: None,
            max_batch_size: 10_000,
            required_features: Vec::new(),
            max_concurrency: 64,
            queue_timeout_ms: 2_000,
            score_timeout_ms: 5_000,
            tick_interval_ms: 1_500,
            subscriber_queue_capacity: 64,
            shutdown_grace_secs: 10,
            upstream_base: None,
            upstream_token: None,
            upstream_timeout_secs: 10,
            log_format: LogFormat::Pretty,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            port: parse_var("PORT").unwrap_or(defaults.port),

            environment: env::var("ENVIRONMENT").unwrap_or(defaults.environment),

            model_id: env::var("MODEL_ID").unwrap_or(defaults.model_id),

            scoring_backend: parse_var("SCORING_BACKEND").unwrap_or(defaults.scoring_backend),

            synthetic_seed: parse_var("SYNTHETIC_SEED"),

            max_batch_size: parse_var("MAX_BATCH_SIZE").unwrap_or(defaults.max_batch_size),

            required_features: env::var("REQUIRED_FEATURES")
                .map(|v| split_list(&v))
                .unwrap_or_default(),

            max_concurrency: parse_var("MAX_CONCURRENCY").unwrap_or(defaults.max_concurrency),

            queue_timeout_ms: parse_var("QUEUE_TIMEOUT_MS").unwrap_or(defaults.queue_timeout_ms),

            score_timeout_ms: parse_var("SCORE_TIMEOUT_MS").unwrap_or(defaults.score_timeout_ms),

            tick_interval_ms: parse_var("TICK_INTERVAL_MS").unwrap_or(defaults.tick_interval_ms),

            subscriber_queue_capacity: parse_var("SUBSCRIBER_QUEUE_CAPACITY")
                .unwrap_or(defaults.subscriber_queue_capacity),

            shutdown_grace_secs: parse_var("SHUTDOWN_GRACE_SECS").unwrap_or(defaults.shutdown_grace_secs),

            upstream_base: non_empty_var("UPSTREAM_BASE"),

            upstream_token: non_empty_var("UPSTREAM_TOKEN"),

            upstream_timeout_secs: parse_var("UPSTREAM_TIMEOUT_SECS").unwrap_or(defaults.upstream_timeout_secs),

            log_format: parse_var("LOG_FORMAT").unwrap_or(defaults.log_format),
        }
    }

    /// Proxy is usable only with both base URL and token
    pub fn upstream(&self) -> Option<(&str, &str)> {
        match (&self.upstream_base, &self.upstream_token) {
            (Some(base), Some(token)) => Some((base.as_str(), token.as_str())),
            _ => None,
        }
    }

    /// Largest accepted request body, scaled with `max_batch_size`
    pub fn body_limit(&self) -> usize {
        self.max_batch_size
            .saturating_mul(BODY_BYTES_PER_SAMPLE)
            .saturating_add(BODY_BYTES_BASE)
    }

    pub fn feature_schema(&self) -> FeatureSchema {
        FeatureSchema::flow_default().require(&self.required_features)
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            max_concurrency: self.max_concurrency,
            queue_timeout: Duration::from_millis(self.queue_timeout_ms),
            score_timeout: Duration::from_millis(self.score_timeout_ms),
        }
    }

    pub fn multiplexer_config(&self) -> MultiplexerConfig {
        MultiplexerConfig {
            tick_interval: Duration::from_millis(self.tick_interval_ms),
            queue_capacity: self.subscriber_queue_capacity,
        }
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }
}

fn parse_var<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

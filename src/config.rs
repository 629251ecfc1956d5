use crate::application::middleware::{MiddlewareChain, RetryPolicy};
use crate::application::router::RouterConfig;
use crate::error::ConfigError;
use crate::infrastructure::in_memory::BrokerConfig;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const ENV_PREFIX: &str = "PAYCLAIM";

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub topics: TopicsConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub router: RouterSettings,
    #[serde(default)]
    pub broker: BrokerSettings,
    #[serde(default)]
    pub processor: ProcessorConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error); `RUST_LOG` takes precedence
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of human readable output
    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HttpConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TopicsConfig {
    /// Claims awaiting processing
    #[serde(default = "default_commands_topic")]
    pub commands: String,
    /// Processing outcomes
    #[serde(default = "default_events_topic")]
    pub events: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_interval_ms")]
    pub initial_interval_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default)]
    pub max_interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RateLimitConfig {
    #[serde(default = "default_max_invocations")]
    pub max_invocations: usize,
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RouterSettings {
    /// In-flight envelopes per binding
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    #[serde(default = "default_poison_suffix")]
    pub poison_suffix: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BrokerSettings {
    #[serde(default = "default_max_deliveries")]
    pub max_deliveries: u32,
    #[serde(default = "default_visibility_timeout_ms")]
    pub visibility_timeout_ms: u64,
    #[serde(default = "default_dead_letter_suffix")]
    pub dead_letter_suffix: String,
    /// Acknowledged ids retained per topic for inspection
    #[serde(default = "default_ack_log_capacity")]
    pub ack_log_capacity: usize,
}

/// Payment provider selection.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ProcessorConfig {
    Http {
        endpoint: String,
        #[serde(default = "default_processor_timeout_ms")]
        timeout_ms: u64,
    },
    Stub {
        #[serde(default)]
        decline_cards: Vec<String>,
    },
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        ProcessorConfig::Stub {
            decline_cards: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Loads the configuration from an optional file, overridden by
    /// `PAYCLAIM__SECTION__KEY` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        let config: AppConfig = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.topics.commands.is_empty() || self.topics.events.is_empty() {
            return invalid("topic names must not be empty");
        }
        if self.topics.commands == self.topics.events {
            return invalid("command and event topics must differ");
        }
        if self.router.parallelism == 0 {
            return invalid("router.parallelism must be at least 1");
        }
        if self.rate_limit.max_invocations == 0 || self.rate_limit.window_ms == 0 {
            return invalid("rate_limit.max_invocations and rate_limit.window_ms must be positive");
        }
        if !self.retry.multiplier.is_finite() || self.retry.multiplier < 1.0 {
            return invalid("retry.multiplier must be a finite number of at least 1.0");
        }
        if self.broker.max_deliveries == 0 {
            return invalid("broker.max_deliveries must be at least 1");
        }
        if self.broker.visibility_timeout_ms == 0 {
            return invalid("broker.visibility_timeout_ms must be positive");
        }
        if let ProcessorConfig::Http { endpoint, .. } = &self.processor
            && endpoint.is_empty()
        {
            return invalid("processor.endpoint must be set for the http processor");
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.retry.max_retries,
            initial_interval: Duration::from_millis(self.retry.initial_interval_ms),
            multiplier: self.retry.multiplier,
            max_interval: self.retry.max_interval_ms.map(Duration::from_millis),
        }
    }

    pub fn middleware_chain(&self) -> MiddlewareChain {
        MiddlewareChain::builder()
            .retry(self.retry_policy())
            .rate_limit(
                self.rate_limit.max_invocations,
                Duration::from_millis(self.rate_limit.window_ms),
            )
            .build()
    }

    pub fn router_config(&self) -> RouterConfig {
        RouterConfig {
            parallelism: self.router.parallelism,
            poison_suffix: self.router.poison_suffix.clone(),
        }
    }

    pub fn broker_config(&self) -> BrokerConfig {
        BrokerConfig {
            max_deliveries: self.broker.max_deliveries,
            visibility_timeout: Duration::from_millis(self.broker.visibility_timeout_ms),
            dead_letter_suffix: self.broker.dead_letter_suffix.clone(),
            ack_log_capacity: self.broker.ack_log_capacity,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

impl Default for TopicsConfig {
    fn default() -> Self {
        Self {
            commands: default_commands_topic(),
            events: default_events_topic(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_interval_ms: default_initial_interval_ms(),
            multiplier: default_multiplier(),
            max_interval_ms: None,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_invocations: default_max_invocations(),
            window_ms: default_window_ms(),
        }
    }
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            poison_suffix: default_poison_suffix(),
        }
    }
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            max_deliveries: default_max_deliveries(),
            visibility_timeout_ms: default_visibility_timeout_ms(),
            dead_letter_suffix: default_dead_letter_suffix(),
            ack_log_capacity: default_ack_log_capacity(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_bind_addr() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_commands_topic() -> String {
    "payments.claims".to_string()
}

fn default_events_topic() -> String {
    "payments.outcomes".to_string()
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_interval_ms() -> u64 {
    1000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_invocations() -> usize {
    10
}

fn default_window_ms() -> u64 {
    1000
}

fn default_parallelism() -> usize {
    1
}

fn default_poison_suffix() -> String {
    ".poison".to_string()
}

fn default_max_deliveries() -> u32 {
    5
}

fn default_visibility_timeout_ms() -> u64 {
    30_000
}

fn default_dead_letter_suffix() -> String {
    ".dead_letter".to_string()
}

fn default_ack_log_capacity() -> usize {
    1024
}

fn default_processor_timeout_ms() -> u64 {
    3000
}

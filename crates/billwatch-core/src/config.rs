//! Configuration management for billwatch
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! `BILLWATCH__`-prefixed environment variables (for example
//! `BILLWATCH__NOTIFY__WEBHOOK_URL`).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "BILLWATCH";

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Metrics backend configuration
    pub metrics: MetricsConfig,

    /// Notification webhook configuration
    pub notify: NotifyConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from defaults, an optional file and the environment
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Self::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values no run could succeed with
    pub fn validate(&self) -> Result<()> {
        if self.metrics.region.trim().is_empty() {
            return Err(Error::config("metrics.region must not be empty"));
        }
        if self.metrics.period_secs <= 0 {
            return Err(Error::config("metrics.period_secs must be positive"));
        }
        if self.metrics.lookback.is_zero() {
            return Err(Error::config("metrics.lookback must be positive"));
        }
        if self.metrics.max_in_flight == Some(0) {
            return Err(Error::config("metrics.max_in_flight must be at least 1"));
        }
        if url::Url::parse(&self.notify.webhook_url).is_err() {
            return Err(Error::config(format!(
                "notify.webhook_url is not a valid URL: {}",
                self.notify.webhook_url
            )));
        }
        if self.notify.message_field.is_empty() {
            return Err(Error::config("notify.message_field must not be empty"));
        }
        Ok(())
    }
}

/// Billing metrics backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Region hosting the billing metrics
    pub region: String,
    /// Metric namespace
    pub namespace: String,
    /// Metric name for estimated charges
    pub metric_name: String,
    /// Name of the currency dimension
    pub currency_dimension: String,
    /// Fixed currency dimension value
    pub currency: String,
    /// Name of the per-service dimension
    pub service_dimension: String,
    /// Aggregation period in seconds
    pub period_secs: i32,
    /// How far back from now the query window starts
    #[serde(with = "humantime_serde")]
    pub lookback: Duration,
    /// Timeout applied to every backend call
    #[serde(with = "humantime_serde")]
    pub call_timeout: Duration,
    /// Upper bound on concurrent per-service fetches (unbounded if unset)
    pub max_in_flight: Option<usize>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            namespace: "AWS/Billing".to_string(),
            metric_name: "EstimatedCharges".to_string(),
            currency_dimension: "Currency".to_string(),
            currency: "USD".to_string(),
            service_dimension: "ServiceName".to_string(),
            period_secs: 86_400,
            lookback: Duration::from_secs(24 * 60 * 60),
            call_timeout: Duration::from_secs(10),
            max_in_flight: None,
        }
    }
}

/// Notification webhook configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Webhook endpoint receiving the report
    pub webhook_url: String,
    /// Form field carrying the message text
    pub message_field: String,
    /// Request timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            webhook_url: "https://notify-api.line.me/api/notify".to_string(),
            message_field: "message".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Log format (json or pretty)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

//! Application configuration
//!
//! Settings are layered with the `config` crate: built-in defaults, then an
//! optional TOML file, then `ALERTWIRE__<SECTION>__<KEY>` environment
//! variables, then the legacy deployment variables (`ELASTIC_HOST`,
//! `ELASTIC_USER`, `ELASTIC_PASS`, `TELEGRAM_BOT_TOKEN`, `TELEGRAM_CHAT_ID`).

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::api::ServerConfig;
use crate::dispatch::{DispatchConfig, ScheduleConfig};
use crate::error::{RetryableCodes, TransientFaultClassifier};
use crate::integrations::{ElasticConfig, TelegramConfig};

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "ALERTWIRE";

const REDACTED: &str = "***";

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// The configuration path is not valid UTF-8.
    #[error("invalid configuration path: {0}")]
    InvalidPath(String),

    /// A source could not be read or deserialized.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] config::ConfigError),

    /// The merged configuration is unusable.
    #[error("invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

/// Dispatch run settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchSettings {
    pub max_in_flight: usize,
    pub fetch_limit: usize,
    pub window_secs: u64,
    pub ledger_namespace: String,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        let defaults = DispatchConfig::default();
        Self {
            max_in_flight: defaults.max_in_flight,
            fetch_limit: defaults.fetch_limit,
            window_secs: defaults.window.as_secs(),
            ledger_namespace: defaults.ledger_namespace,
        }
    }
}

/// Scheduler settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleSettings {
    pub interval_secs: u64,
    pub run_on_start: bool,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        let defaults = ScheduleConfig::default();
        Self {
            interval_secs: defaults.interval.as_secs(),
            run_on_start: defaults.run_on_start,
        }
    }
}

/// Adjustments to the retryable code table.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierSettings {
    /// Codes added to the table. HTTP statuses reported by the
    /// Elasticsearch adapter (429, 502, 503, 504) go here.
    pub extra_retryable_codes: Vec<i32>,
    /// Start from an empty table instead of the documented defaults.
    pub replace_defaults: bool,
}

/// Root configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub elasticsearch: ElasticConfig,
    pub telegram: TelegramConfig,
    pub dispatch: DispatchSettings,
    pub schedule: ScheduleSettings,
    pub server: ServerConfig,
    pub classifier: ClassifierSettings,
}

impl AppConfig {
    /// Loads configuration from the process environment and an optional file.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `path` is given but does not exist or is not valid UTF-8
    /// - a source cannot be parsed into the expected shape
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use alertwire::settings::AppConfig;
    ///
    /// let config = AppConfig::load(Some("alertwire.toml".as_ref()))?;
    /// # Ok::<(), alertwire::settings::ConfigError>(())
    /// ```
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_env(path, None)
    }

    /// Like [`AppConfig::load`], reading variables from `env` instead of the
    /// process environment when it is given.
    pub fn load_with_env(
        path: Option<&Path>,
        env: Option<HashMap<String, String>>,
    ) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            let path_str = path
                .to_str()
                .ok_or_else(|| ConfigError::InvalidPath(format!("{:?}", path)))?;
            if !path.exists() {
                return Err(ConfigError::FileNotFound(path_str.to_string()));
            }
            builder = builder.add_source(File::with_name(path_str));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("elasticsearch.hosts")
                .with_list_parse_key("classifier.extra_retryable_codes")
                .try_parsing(true)
                .source(env.clone()),
        );

        let lookup = |name: &str| match &env {
            Some(vars) => vars.get(name).cloned(),
            None => std::env::var(name).ok(),
        };
        for (key, value) in legacy_overrides(lookup) {
            builder = builder.set_override(key, value)?;
        }

        Ok(builder.build()?.try_deserialize()?)
    }

    /// Checks the merged values. The notifier settings are only checked when
    /// `require_notifier` is set, so dry runs work without bot credentials.
    pub fn validate(&self, require_notifier: bool) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        if self.elasticsearch.hosts.iter().all(|h| h.trim().is_empty()) {
            problems.push("elasticsearch.hosts must contain at least one host".to_string());
        }
        if self.elasticsearch.alerts_index.trim().is_empty() {
            problems.push("elasticsearch.alerts_index must not be empty".to_string());
        }
        if require_notifier && self.telegram.bot_token.trim().is_empty() {
            problems.push("telegram.bot_token is required".to_string());
        }
        if require_notifier && self.telegram.chat_id.trim().is_empty() {
            problems.push("telegram.chat_id is required".to_string());
        }
        if self.dispatch.max_in_flight == 0 {
            problems.push("dispatch.max_in_flight must be greater than 0".to_string());
        }
        if self.dispatch.fetch_limit == 0 {
            problems.push("dispatch.fetch_limit must be greater than 0".to_string());
        }
        if self.dispatch.ledger_namespace.trim().is_empty() {
            problems.push("dispatch.ledger_namespace must not be empty".to_string());
        }
        if self.schedule.interval_secs == 0 {
            problems.push("schedule.interval_secs must be greater than 0".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems))
        }
    }

    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig::default()
            .with_max_in_flight(self.dispatch.max_in_flight)
            .with_fetch_limit(self.dispatch.fetch_limit)
            .with_window(Duration::from_secs(self.dispatch.window_secs))
            .with_ledger_namespace(self.dispatch.ledger_namespace.clone())
            .with_destination(self.telegram.chat_id.clone())
    }

    pub fn schedule_config(&self) -> ScheduleConfig {
        ScheduleConfig::new(Duration::from_secs(self.schedule.interval_secs))
            .with_run_on_start(self.schedule.run_on_start)
    }

    pub fn classifier(&self) -> TransientFaultClassifier {
        let mut codes = if self.classifier.replace_defaults {
            RetryableCodes::empty()
        } else {
            RetryableCodes::default()
        };
        codes.extend(self.classifier.extra_retryable_codes.iter().copied());
        TransientFaultClassifier::with_codes(codes)
    }

    /// A copy with credentials masked, for printing.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.elasticsearch.password.is_some() {
            copy.elasticsearch.password = Some(REDACTED.to_string());
        }
        if !copy.telegram.bot_token.is_empty() {
            copy.telegram.bot_token = REDACTED.to_string();
        }
        copy
    }
}

/// Maps the legacy deployment variables to configuration keys.
fn legacy_overrides(lookup: impl Fn(&str) -> Option<String>) -> Vec<(&'static str, config::Value)> {
    let mut overrides = Vec::new();

    if let Some(hosts) = lookup("ELASTIC_HOST") {
        let hosts: Vec<String> = hosts
            .split(',')
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .map(String::from)
            .collect();
        if !hosts.is_empty() {
            overrides.push(("elasticsearch.hosts", config::Value::from(hosts)));
        }
    }

    let scalars = [
        ("ELASTIC_USER", "elasticsearch.username"),
        ("ELASTIC_PASS", "elasticsearch.password"),
        ("TELEGRAM_BOT_TOKEN", "telegram.bot_token"),
        ("TELEGRAM_CHAT_ID", "telegram.chat_id"),
    ];
    for (var, key) in scalars {
        if let Some(value) = lookup(var).filter(|v| !v.is_empty()) {
            overrides.push((key, config::Value::from(value)));
        }
    }

    overrides
}

pub mod log_level;

use std::path::Path;

use figment::providers::{Format, Yaml};
use figment::{Figment, providers::Env};
use serde::{Deserialize, Deserializer};
use serde_aux::field_attributes::deserialize_bool_from_anything;
use serde_json::Value;

use crate::config::log_level::LogLevel;
use crate::sampling::adaptive_sampler::MAX_TARGET;

/// Agent settings that drive distributed tracing.
#[derive(Debug, PartialEq, Deserialize, Clone)]
#[serde(default)]
#[allow(clippy::module_name_repetitions)]
#[allow(clippy::struct_excessive_bools)]
pub struct Config {
    pub log_level: LogLevel,
    #[serde(deserialize_with = "deserialize_bool_from_anything")]
    pub distributed_tracing_enabled: bool,
    #[serde(deserialize_with = "deserialize_bool_from_anything")]
    pub span_events_enabled: bool,
    #[serde(deserialize_with = "deserialize_bool_from_anything")]
    pub transaction_events_enabled: bool,
    #[serde(deserialize_with = "deserialize_string_or_int")]
    pub account_id: String,
    #[serde(deserialize_with = "deserialize_string_or_int")]
    pub primary_application_id: String,
    #[serde(deserialize_with = "deserialize_string_or_int")]
    pub trusted_account_key: String,
    /// Sampled transactions per interval. `None` keeps the sampler's default.
    pub sampling_target: Option<i64>,
    #[serde(deserialize_with = "deserialize_bool_from_anything")]
    pub exclude_newrelic_header: bool,
    #[serde(deserialize_with = "deserialize_bool_from_anything")]
    pub payload_success_metrics_enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            log_level: LogLevel::default(),
            distributed_tracing_enabled: true,
            span_events_enabled: true,
            transaction_events_enabled: true,
            account_id: String::default(),
            primary_application_id: String::default(),
            trusted_account_key: String::default(),
            sampling_target: None,
            exclude_newrelic_header: false,
            payload_success_metrics_enabled: true,
        }
    }
}

impl Config {
    /// The key inbound payloads must carry, the account id when unset.
    #[must_use]
    pub fn trusted_account_key(&self) -> &str {
        if self.trusted_account_key.is_empty() {
            &self.account_id
        } else {
            &self.trusted_account_key
        }
    }
}

#[derive(Debug, PartialEq, thiserror::Error)]
#[allow(clippy::module_name_repetitions)]
pub enum ConfigError {
    #[error("failed to parse config: {0}")]
    ParseError(String),
    #[error("invalid config field: {0}")]
    InvalidField(String),
}

/// Loads `newrelic.yaml` from `config_directory`, overridden by
/// `NEW_RELIC_` environment variables.
pub fn get_config(config_directory: &Path) -> Result<Config, ConfigError> {
    let path = config_directory.join("newrelic.yaml");

    let figment = Figment::new()
        .merge(Yaml::file(&path))
        .merge(Env::prefixed("NEW_RELIC_"));

    let config: Config = figment
        .extract()
        .map_err(|err| ConfigError::ParseError(err.to_string()))?;

    if let Some(target) = config.sampling_target {
        if !(0..=i64::from(MAX_TARGET)).contains(&target) {
            return Err(ConfigError::InvalidField("sampling_target".to_string()));
        }
    }

    Ok(config)
}

fn deserialize_string_or_int<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::String(s) => Ok(s.trim().to_string()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Null => Ok(String::new()),
        _ => Err(serde::de::Error::custom("expected a string or an integer")),
    }
}

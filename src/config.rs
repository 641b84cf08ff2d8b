//! Process configuration
//!
//! Settings come from the environment (after `.env` is loaded by the
//! binaries) with the defaults below.

use crate::error::{AnalystError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_LLM_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_ORG: &str = "myorg";
pub const DEFAULT_BUCKET: &str = "testexecution";
pub const DEFAULT_MEASUREMENT: &str = "testmethod";
pub const DEFAULT_EXECUTION_NUMBER: &str = "1";
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_LOG_PATH: &str = "query_logs.json";
pub const DEFAULT_LOG_CAPACITY: usize = 1000;
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_SERVER_ADDR: &str = "0.0.0.0:8080";

/// Bucket and measurement the Flux templates and prompts refer to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaConfig {
    pub bucket: String,
    pub measurement: String,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            bucket: DEFAULT_BUCKET.to_string(),
            measurement: DEFAULT_MEASUREMENT.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub openai_base_url: String,
    pub influx_url: Option<String>,
    pub influx_token: Option<String>,
    pub influx_org: String,
    pub schema: SchemaConfig,
    pub default_execution_number: String,
    pub max_retries: u32,
    pub query_log_path: PathBuf,
    pub query_log_capacity: usize,
    pub request_timeout: Duration,
    pub server_addr: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            openai_model: DEFAULT_MODEL.to_string(),
            openai_base_url: DEFAULT_LLM_BASE_URL.to_string(),
            influx_url: None,
            influx_token: None,
            influx_org: DEFAULT_ORG.to_string(),
            schema: SchemaConfig::default(),
            default_execution_number: DEFAULT_EXECUTION_NUMBER.to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
            query_log_path: PathBuf::from(DEFAULT_LOG_PATH),
            query_log_capacity: DEFAULT_LOG_CAPACITY,
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            server_addr: DEFAULT_SERVER_ADDR.to_string(),
        }
    }
}

impl AppConfig {
    /// Read settings from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through an arbitrary lookup (used by tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Ok(Self {
            openai_api_key: get("OPENAI_API_KEY"),
            openai_model: get("OPENAI_MODEL").unwrap_or(defaults.openai_model),
            openai_base_url: get("OPENAI_BASE_URL").unwrap_or(defaults.openai_base_url),
            influx_url: get("INFLUX_URL"),
            influx_token: get("INFLUX_TOKEN"),
            influx_org: get("INFLUX_ORG").unwrap_or(defaults.influx_org),
            schema: SchemaConfig {
                bucket: get("INFLUX_BUCKET").unwrap_or(defaults.schema.bucket),
                measurement: get("INFLUX_MEASUREMENT").unwrap_or(defaults.schema.measurement),
            },
            default_execution_number: get("DEFAULT_EXECUTION_NUMBER")
                .unwrap_or(defaults.default_execution_number),
            max_retries: parse_var(get("MAX_RETRIES"), "MAX_RETRIES", defaults.max_retries)?,
            query_log_path: get("QUERY_LOG_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.query_log_path),
            query_log_capacity: parse_var(
                get("QUERY_LOG_CAPACITY"),
                "QUERY_LOG_CAPACITY",
                defaults.query_log_capacity,
            )?,
            request_timeout: Duration::from_secs(parse_var(
                get("REQUEST_TIMEOUT_SECS"),
                "REQUEST_TIMEOUT_SECS",
                DEFAULT_TIMEOUT_SECS,
            )?),
            server_addr: get("SERVER_ADDR").unwrap_or(defaults.server_addr),
        })
    }

    /// Check that every credential needed to reach the collaborators is set.
    pub fn validate(&self) -> Result<()> {
        require("OPENAI_API_KEY", self.openai_api_key.as_deref())?;
        require("INFLUX_URL", self.influx_url.as_deref())?;
        require("INFLUX_TOKEN", self.influx_token.as_deref())?;
        require("INFLUX_ORG", Some(self.influx_org.as_str()))?;
        if self.max_retries == 0 {
            return Err(AnalystError::Config("MAX_RETRIES must be at least 1".to_string()));
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(raw: Option<String>, key: &str, default: T) -> Result<T> {
    match raw {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| AnalystError::Config(format!("{} is not a valid number: {}", key, value))),
        None => Ok(default),
    }
}

fn require(key: &str, value: Option<&str>) -> Result<()> {
    match value {
        Some(v) if !v.starts_with("your_") => Ok(()),
        _ => Err(AnalystError::Config(format!(
            "{} is not set or is using placeholder value",
            key
        ))),
    }
}

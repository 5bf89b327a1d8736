use std::{fs, time::Duration};

use log::{debug, trace};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::core::{ErrorContext, ManagerError, ManagerResult};

static HOST_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:(?:\d{1,3}\.){3}\d{1,3}|\[[0-9a-f:]+\]|[a-z0-9.-]+)(?::\d+)?$")
        .expect("host pattern is valid")
});

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct Config {
    #[validate(nested)]
    pub ad_server: AdServer,

    /// Process-wide default customer identifier
    #[validate(length(min = 1))]
    pub customer_id: Option<String>,

    /// How long an adapter may take to report its load outcome
    #[serde(default = "Config::default_adapter_timeout_ms")]
    #[validate(range(min = 1))]
    pub adapter_timeout_ms: u64,

    pub log: Option<Log>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ad_server: AdServer::default(),
            customer_id: None,
            adapter_timeout_ms: Self::default_adapter_timeout_ms(),
            log: None,
        }
    }
}

// Config file load and validation
impl Config {
    pub fn load_from_yaml<P>(path: P) -> ManagerResult<Self>
    where
        P: AsRef<std::path::Path> + std::fmt::Display,
    {
        let conf_str = fs::read_to_string(&path)
            .with_context(&format!("Unable to read conf file from {path}"))?;
        debug!("Conf file read from {path}");
        Self::from_yaml(&conf_str)
    }

    pub fn from_yaml(conf_str: &str) -> ManagerResult<Self> {
        trace!("Read conf file: {conf_str}");
        let conf: Config =
            serde_yaml::from_str(conf_str).with_context("Unable to parse yaml conf")?;

        trace!("Loaded conf: {conf:?}");

        conf.validate()
            .map_err(|e| ManagerError::Configuration(format!("Conf file valid failed: {e}")))?;

        Ok(conf)
    }

    pub fn to_yaml(&self) -> ManagerResult<String> {
        serde_yaml::to_string(self).with_context("Unable to serialize conf")
    }

    fn default_adapter_timeout_ms() -> u64 {
        30_000
    }

    pub fn adapter_timeout(&self) -> Duration {
        Duration::from_millis(self.adapter_timeout_ms)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
pub struct AdServer {
    #[serde(default)]
    pub scheme: Scheme,
    #[validate(length(min = 1), custom(function = "AdServer::validate_host"))]
    pub host: String,
    #[serde(default = "AdServer::default_path")]
    #[validate(custom(function = "AdServer::validate_path"))]
    pub path: String,
    /// How long an ad request may stay unanswered before the load fails
    #[serde(default = "AdServer::default_timeout_ms")]
    #[validate(range(min = 1))]
    pub timeout_ms: u64,
}

impl Default for AdServer {
    fn default() -> Self {
        Self {
            scheme: Scheme::default(),
            host: "localhost".to_string(),
            path: Self::default_path(),
            timeout_ms: Self::default_timeout_ms(),
        }
    }
}

impl AdServer {
    fn default_path() -> String {
        "/m/ad".to_string()
    }

    fn default_timeout_ms() -> u64 {
        10_000
    }

    /// Base URL that ad requests are built on
    pub fn base_url(&self) -> String {
        format!("{}://{}{}", self.scheme, self.host, self.path)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    fn validate_host(host: &str) -> Result<(), ValidationError> {
        if HOST_PATTERN.is_match(host) {
            Ok(())
        } else {
            let mut err = ValidationError::new("invalid_host");
            err.add_param("host".into(), &host.to_string());
            Err(err)
        }
    }

    fn validate_path(path: &str) -> Result<(), ValidationError> {
        if path.starts_with('/') {
            Ok(())
        } else {
            Err(ValidationError::new("path_must_start_with_slash"))
        }
    }
}

#[derive(Copy, Clone, Default, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    HTTP,
    #[default]
    HTTPS,
}

impl std::fmt::Display for Scheme {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Scheme::HTTP => write!(f, "http"),
            Scheme::HTTPS => write!(f, "https"),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Log {
    /// Append log records to this file instead of stderr
    pub path: Option<String>,
    #[serde(default)]
    pub level: LogLevel,
}

#[derive(Copy, Clone, Default, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for log::LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

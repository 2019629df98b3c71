//! Configuration management for the monitoring engine

use crate::errors::{MonitorError, Result};
use reqwest::header::{HeaderName, HeaderValue};
use reqwest::{Method, Url};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_INTERVAL_SECONDS: u64 = 5;
pub const DEFAULT_PROBE_TIMEOUT_SECONDS: u64 = 5;
pub const DEFAULT_DATABASE_FILE: &str = "statter.journal";
pub const DEFAULT_PORT: u16 = 8080;

/// A single request header, applied in declaration order
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
}

/// Static description of one monitored service
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct ServiceDefinition {
    /// Unique key for the service
    pub name: String,

    /// Human readable label
    pub label: String,

    pub description: String,

    /// Target URL of the probe
    pub url: String,

    /// HTTP method, GET when empty
    pub method: String,

    /// Request body sent with every probe
    pub body: String,

    /// Request headers; later duplicates replace earlier ones
    pub headers: Vec<Header>,

    /// Polling interval in seconds, the process default when zero or absent
    pub interval: Option<u64>,
}

impl ServiceDefinition {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(Header {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    pub fn with_interval(mut self, seconds: u64) -> Self {
        self.interval = Some(seconds);
        self
    }

    /// Method used for the probe request, upper-cased and defaulted to GET
    pub fn effective_method(&self) -> String {
        let method = self.method.trim();
        if method.is_empty() {
            "GET".to_string()
        } else {
            method.to_uppercase()
        }
    }

    /// Polling interval, falling back to `default` when unset or zero
    pub fn effective_interval(&self, default: Duration) -> Duration {
        match self.interval {
            Some(seconds) if seconds > 0 => Duration::from_secs(seconds),
            _ => default,
        }
    }
}

/// What a service timer does when its previous probe is still in flight
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OverlapPolicy {
    /// Dispatch anyway; probes for one service may run concurrently
    #[default]
    Allow,
    /// Skip the tick until the outstanding probe finishes
    Skip,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Append-only JSON lines file at `database_file`
    #[default]
    Journal,
    /// Process-local history, lost on exit
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Journal file backing the result store
    pub database_file: PathBuf,

    pub storage: StorageBackend,

    /// Default polling interval in seconds
    pub interval: u64,

    /// Probe request timeout in seconds
    pub probe_timeout: u64,

    /// Upper bound on draining in-flight probes at shutdown, unbounded when absent
    pub drain_timeout: Option<u64>,

    pub overlap: OverlapPolicy,

    /// Port of the read API
    pub port: u16,

    pub services: Vec<ServiceDefinition>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_file: PathBuf::from(DEFAULT_DATABASE_FILE),
            storage: StorageBackend::Journal,
            interval: DEFAULT_INTERVAL_SECONDS,
            probe_timeout: DEFAULT_PROBE_TIMEOUT_SECONDS,
            drain_timeout: None,
            overlap: OverlapPolicy::Allow,
            port: DEFAULT_PORT,
            services: Vec::new(),
        }
    }
}

/// On-disk configuration formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Json,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|s| s.to_str()) {
            Some("json") => ConfigFormat::Json,
            _ => ConfigFormat::Yaml,
        }
    }
}

impl Config {
    /// Load, apply environment overrides and validate in one step
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Read a configuration file, picking the format from its extension
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            MonitorError::Config(format!("unable to read {}: {}", path.display(), e))
        })?;

        Self::parse(&content, ConfigFormat::from_path(path))
    }

    pub fn parse(content: &str, format: ConfigFormat) -> Result<Self> {
        let mut config: Config = match format {
            ConfigFormat::Yaml => serde_yaml::from_str(content)?,
            ConfigFormat::Json => serde_json::from_str(content)?,
        };

        if config.interval == 0 {
            config.interval = DEFAULT_INTERVAL_SECONDS;
        }

        if config.database_file.as_os_str().is_empty() {
            config.database_file = PathBuf::from(DEFAULT_DATABASE_FILE);
        }

        Ok(config)
    }

    /// Apply overrides from environment variables
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| env::var(key).ok());
    }

    /// Apply overrides from an arbitrary variable lookup
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(database_file) = lookup("STATTER_DATABASE_FILE") {
            self.database_file = PathBuf::from(database_file);
        }

        if let Some(interval) = lookup("STATTER_INTERVAL") {
            if let Ok(seconds) = interval.parse::<u64>() {
                if seconds > 0 {
                    self.interval = seconds;
                }
            }
        }

        if let Some(timeout) = lookup("STATTER_PROBE_TIMEOUT_SECONDS") {
            if let Ok(seconds) = timeout.parse::<u64>() {
                self.probe_timeout = seconds;
            }
        }

        if let Some(port) = lookup("STATTER_PORT") {
            if let Ok(port) = port.parse() {
                self.port = port;
            }
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.services.is_empty() {
            return Err(MonitorError::Config("no services to monitor".to_string()));
        }

        if self.interval == 0 {
            return Err(MonitorError::Config("interval must be greater than 0".to_string()));
        }

        if self.probe_timeout == 0 {
            return Err(MonitorError::Config(
                "probe_timeout must be greater than 0".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for service in &self.services {
            if service.name.trim().is_empty() {
                return Err(MonitorError::Config("service name cannot be empty".to_string()));
            }

            if !seen.insert(service.name.as_str()) {
                return Err(MonitorError::Config(format!(
                    "duplicate service name: {}",
                    service.name
                )));
            }

            validate_service(service)?;
        }

        Ok(())
    }

    pub fn default_interval(&self) -> Duration {
        Duration::from_secs(self.interval)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout)
    }

    pub fn drain_timeout(&self) -> Option<Duration> {
        self.drain_timeout.map(Duration::from_secs)
    }

    /// Effective polling interval for a service
    pub fn interval_for(&self, service: &ServiceDefinition) -> Duration {
        service.effective_interval(self.default_interval())
    }
}

fn validate_service(service: &ServiceDefinition) -> Result<()> {
    let url = Url::parse(&service.url).map_err(|e| {
        MonitorError::Config(format!(
            "service {}: invalid url {:?}: {}",
            service.name, service.url, e
        ))
    })?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(MonitorError::Config(format!(
            "service {}: unsupported scheme {}",
            service.name,
            url.scheme()
        )));
    }

    Method::from_bytes(service.effective_method().as_bytes()).map_err(|_| {
        MonitorError::Config(format!(
            "service {}: invalid method {:?}",
            service.name, service.method
        ))
    })?;

    for header in &service.headers {
        HeaderName::from_bytes(header.name.as_bytes()).map_err(|_| {
            MonitorError::Config(format!(
                "service {}: invalid header name {:?}",
                service.name, header.name
            ))
        })?;
        HeaderValue::from_str(&header.value).map_err(|_| {
            MonitorError::Config(format!(
                "service {}: invalid value for header {}",
                service.name, header.name
            ))
        })?;
    }

    Ok(())
}

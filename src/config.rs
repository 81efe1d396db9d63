//! Agent configuration
//!
//! A single YAML file holds settings shared by every environment plus one
//! block per environment (dev, staging, a particular fleet...). The active
//! environment is chosen by `current_environment`, or by the `--env` flag.

use crate::connection::{ConnectionConfig, TlsPaths};
use iot_jobs_shared::DeviceTopics;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("environment {0} does not exist")]
    UnknownEnvironment(String),

    #[error("{0} must be set")]
    MissingField(&'static str),

    #[error("certificate file {} does not exist", .0.display())]
    MissingCertificate(PathBuf),
}

/// Settings that may be given once and overridden per environment
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CommonConfig {
    /// Seconds between job polls; zero means unset
    #[serde(default)]
    pub polling_interval: u64,
}

impl CommonConfig {
    /// Overlay the values `other` sets onto `self`
    pub fn merge(&mut self, other: &CommonConfig) {
        if other.polling_interval != 0 {
            self.polling_interval = other.polling_interval;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Environment {
    #[serde(flatten)]
    pub common: CommonConfig,
    #[serde(default)]
    pub thing_name: String,
    #[serde(default)]
    pub iot_endpoint: String,
    #[serde(default)]
    pub cert_path: PathBuf,
    #[serde(default)]
    pub key_path: PathBuf,
    #[serde(default)]
    pub root_ca_path: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub common: CommonConfig,
    #[serde(default)]
    pub environments: HashMap<String, Environment>,
    #[serde(default)]
    pub current_environment: String,
}

impl Config {
    /// Load and parse a config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Resolve the active environment with common settings merged in.
    ///
    /// A non-empty `override_env` takes precedence over `current_environment`.
    pub fn environment(&self, override_env: Option<&str>) -> Result<Environment, ConfigError> {
        let name = match override_env {
            Some(name) if !name.is_empty() => name,
            _ => self.current_environment.as_str(),
        };

        let env = self
            .environments
            .get(name)
            .ok_or_else(|| ConfigError::UnknownEnvironment(name.to_string()))?;

        let mut common = self.common.clone();
        common.merge(&env.common);

        Ok(Environment {
            common,
            ..env.clone()
        })
    }
}

impl Environment {
    /// Check required settings and that the certificate files exist
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required: [(&'static str, bool); 5] = [
            ("thing_name", self.thing_name.is_empty()),
            ("iot_endpoint", self.iot_endpoint.is_empty()),
            ("cert_path", self.cert_path.as_os_str().is_empty()),
            ("key_path", self.key_path.as_os_str().is_empty()),
            ("root_ca_path", self.root_ca_path.as_os_str().is_empty()),
        ];
        if let Some((name, _)) = required.iter().find(|(_, missing)| *missing) {
            return Err(ConfigError::MissingField(*name));
        }

        for file in [&self.cert_path, &self.key_path, &self.root_ca_path] {
            if !file.exists() {
                return Err(ConfigError::MissingCertificate(file.clone()));
            }
        }

        Ok(())
    }

    pub fn topics(&self) -> DeviceTopics {
        DeviceTopics::new(&self.thing_name)
    }

    /// Broker session settings for this environment
    pub fn connection_config(&self) -> ConnectionConfig {
        let mut config = ConnectionConfig::new(
            &self.thing_name,
            &self.iot_endpoint,
            TlsPaths {
                root_ca: self.root_ca_path.clone(),
                certificate: self.cert_path.clone(),
                private_key: self.key_path.clone(),
            },
        );
        config.subscriptions = vec![self.topics().jobs_filter()];
        config
    }
}

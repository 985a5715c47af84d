// Copyright 2025 Aktuell Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

//! Server Configuration
//!
//! Loaded from an optional TOML file (`config.toml`, then
//! `config/config.toml`), with `AKTUELL_*` environment variables taking
//! precedence over file values. A legacy single-database form
//! (`mongodb.database` + `mongodb.collections`) is still accepted and
//! normalized into the multi-database list.

use aktuell_core::validator::DatabaseConfig;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Paths probed for a config file, in order.
const CONFIG_PATHS: &[&str] = &["config.toml", "config/config.toml"];

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file exists but could not be read
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid TOML
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// An environment override carries an unusable value
    #[error("invalid value for {name}: '{value}'")]
    InvalidEnvVar { name: &'static str, value: String },

    /// Validation failure
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AktuellConfig {
    #[serde(default)]
    pub mongodb: MongoSettings,

    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub logging: LoggingSettings,
}

/// MongoDB connection and whitelist settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoSettings {
    /// Connection string
    #[serde(default = "default_mongodb_uri")]
    pub uri: String,

    /// Databases exposed to subscribers
    #[serde(default)]
    pub databases: Vec<DatabaseConfig>,

    /// Legacy single-database form
    #[serde(default = "default_database")]
    pub database: String,

    /// Legacy collection list for the single database
    #[serde(default)]
    pub collections: Vec<String>,
}

impl Default for MongoSettings {
    fn default() -> Self {
        Self {
            uri: default_mongodb_uri(),
            databases: Vec::new(),
            database: default_database(),
            collections: Vec::new(),
        }
    }
}

/// Bind address settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// One of debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_mongodb_uri() -> String {
    "mongodb://localhost:27017".to_string()
}

fn default_database() -> String {
    "aktuell".to_string()
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AktuellConfig {
    /// Loads configuration from the first config file found, falling back
    /// to defaults, then applies environment overrides and validates.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match CONFIG_PATHS.iter().find(|p| Path::new(p).exists()) {
            Some(path) => Self::parse_file(path)?,
            None => Self::default(),
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from an explicit file path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::parse_file(path)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    fn parse_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref()).map_err(|source| ConfigError::Read {
            path: path.as_ref().display().to_string(),
            source,
        })?;
        Ok(toml::from_str(&content)?)
    }

    /// Applies `AKTUELL_*` environment overrides.
    ///
    /// Recognized variables: `AKTUELL_MONGODB_URI`, `AKTUELL_SERVER_HOST`,
    /// `AKTUELL_SERVER_PORT`, `AKTUELL_LOG_LEVEL`.
    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(uri) = env::var("AKTUELL_MONGODB_URI") {
            self.mongodb.uri = uri;
        }

        if let Ok(host) = env::var("AKTUELL_SERVER_HOST") {
            self.server.host = host;
        }

        if let Ok(port) = env::var("AKTUELL_SERVER_PORT") {
            self.server.port = port.parse().map_err(|_| ConfigError::InvalidEnvVar {
                name: "AKTUELL_SERVER_PORT",
                value: port,
            })?;
        }

        if let Ok(level) = env::var("AKTUELL_LOG_LEVEL") {
            self.logging.level = level;
        }

        Ok(())
    }

    /// Validates field values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Invalid("server port cannot be 0".to_string()));
        }

        match self.logging.level.as_str() {
            "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(ConfigError::Invalid(format!(
                    "unknown log level '{other}' (expected debug, info, warn, or error)"
                )));
            }
        }

        Ok(())
    }

    /// The configured whitelist, with the legacy single-database form
    /// folded in when the multi-database list is absent.
    #[must_use]
    pub fn database_configs(&self) -> Vec<DatabaseConfig> {
        if !self.mongodb.databases.is_empty() {
            return self.mongodb.databases.clone();
        }

        if !self.mongodb.database.is_empty() {
            return vec![DatabaseConfig::new(
                self.mongodb.database.clone(),
                self.mongodb.collections.clone(),
            )];
        }

        Vec::new()
    }

    /// The address the server binds to.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = AktuellConfig::default();
        assert_eq!(config.mongodb.uri, "mongodb://localhost:27017");
        assert_eq!(config.server.host, "localhost");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parses_multi_database_config() {
        let config: AktuellConfig = toml::from_str(
            r#"
            [mongodb]
            uri = "mongodb://db:27017"

            [[mongodb.databases]]
            name = "inventory"
            collections = ["orders"]

            [[mongodb.databases]]
            name = "metrics"
            collections = []

            [server]
            host = "0.0.0.0"
            port = 9000
            "#,
        )
        .unwrap();

        let databases = config.database_configs();
        assert_eq!(databases.len(), 2);
        assert_eq!(databases[0].name, "inventory");
        assert_eq!(databases[0].collections, vec!["orders".to_string()]);
        assert!(databases[1].collections.is_empty());
        assert_eq!(config.bind_addr(), "0.0.0.0:9000");
    }

    #[test]
    fn legacy_single_database_is_normalized() {
        let config: AktuellConfig = toml::from_str(
            r#"
            [mongodb]
            database = "legacy"
            collections = ["a", "b"]
            "#,
        )
        .unwrap();

        let databases = config.database_configs();
        assert_eq!(databases.len(), 1);
        assert_eq!(databases[0].name, "legacy");
        assert_eq!(databases[0].collections, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn multi_database_config_wins_over_legacy() {
        let config: AktuellConfig = toml::from_str(
            r#"
            [mongodb]
            database = "legacy"

            [[mongodb.databases]]
            name = "modern"
            "#,
        )
        .unwrap();

        let databases = config.database_configs();
        assert_eq!(databases.len(), 1);
        assert_eq!(databases[0].name, "modern");
    }

    #[test]
    fn rejects_zero_port() {
        let mut config = AktuellConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_unknown_log_level() {
        let mut config = AktuellConfig::default();
        config.logging.level = "verbose".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn env_overrides_take_precedence() {
        env::set_var("AKTUELL_SERVER_PORT", "9301");
        env::set_var("AKTUELL_LOG_LEVEL", "debug");

        let mut config = AktuellConfig::default();
        config.apply_env_overrides().unwrap();

        assert_eq!(config.server.port, 9301);
        assert_eq!(config.logging.level, "debug");

        env::remove_var("AKTUELL_SERVER_PORT");
        env::remove_var("AKTUELL_LOG_LEVEL");
    }
}

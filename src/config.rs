use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::{Error, Result};
use crate::executor::{ExecutorMode, DEFAULT_BATCH_SIZE};

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Json,
    Text,
}

impl Default for LogFormat {
    fn default() -> Self {
        Self::Text
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MalformedRowPolicy {
    #[default]
    Abort,
    Skip,
}

/// How source file columns are matched to the target table on ingest.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ColumnMatching {
    /// Only the column count is checked; fields bind in table order.
    #[default]
    Positional,
    /// Header names must equal the table's column names; rows are reordered to table order.
    ByName,
}

#[derive(Clone, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default)]
    pub backend: ExecutorMode,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub secure: bool,
    /// DuckDB database file; in-memory when unset.
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    8123
}

fn default_database() -> String {
    "default".to_string()
}

fn default_user() -> String {
    "default".to_string()
}

fn default_timeout_secs() -> u64 {
    300
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            backend: ExecutorMode::default(),
            host: default_host(),
            port: default_port(),
            database: default_database(),
            user: default_user(),
            password: String::new(),
            secure: false,
            path: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("backend", &self.backend)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"***")
            .field("secure", &self.secure)
            .field("path", &self.path)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl ConnectionConfig {
    pub fn base_url(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{}://{}:{}/", scheme, self.host, self.port)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransferConfig {
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub malformed_rows: MalformedRowPolicy,
    #[serde(default)]
    pub column_matching: ColumnMatching,
    #[serde(default = "default_preview_limit")]
    pub preview_limit: u64,
}

fn default_delimiter() -> char {
    ','
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_preview_limit() -> u64 {
    100
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            delimiter: default_delimiter(),
            batch_size: default_batch_size(),
            malformed_rows: MalformedRowPolicy::default(),
            column_matching: ColumnMatching::default(),
            preview_limit: default_preview_limit(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub transfer: TransferConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => {
                let contents = std::fs::read_to_string(p)
                    .map_err(|e| Error::Config(format!("Cannot read config file: {}", e)))?;
                Self::from_toml(&contents)?
            }
            None => Config::default(),
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| Error::Config(format!("Invalid config file: {}", e)))
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(host) = std::env::var("FLATBRIDGE_HOST") {
            self.connection.host = host;
        }
        if let Ok(port) = std::env::var("FLATBRIDGE_PORT") {
            self.connection.port = port
                .parse()
                .map_err(|_| Error::Config(format!("Invalid FLATBRIDGE_PORT: {}", port)))?;
        }
        if let Ok(database) = std::env::var("FLATBRIDGE_DATABASE") {
            self.connection.database = database;
        }
        if let Ok(user) = std::env::var("FLATBRIDGE_USER") {
            self.connection.user = user;
        }
        if let Ok(password) = std::env::var("FLATBRIDGE_PASSWORD") {
            self.connection.password = password;
        }
        if let Ok(size) = std::env::var("FLATBRIDGE_BATCH_SIZE") {
            self.transfer.batch_size = size
                .parse()
                .map_err(|_| Error::Config(format!("Invalid FLATBRIDGE_BATCH_SIZE: {}", size)))?;
        }
        if let Ok(val) = std::env::var("FLATBRIDGE_LOG_FORMAT") {
            self.logging.format = match val.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                _ => LogFormat::Text,
            };
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.transfer.batch_size == 0 {
            return Err(Error::Config("batch_size must be at least 1".into()));
        }
        if !self.transfer.delimiter.is_ascii() {
            return Err(Error::Config(format!(
                "delimiter must be a single-byte character, got {:?}",
                self.transfer.delimiter
            )));
        }
        if self.connection.backend == ExecutorMode::ClickHouse && self.connection.password.is_empty()
        {
            warn!("No password configured for ClickHouse user '{}'", self.connection.user);
        }
        Ok(())
    }
}

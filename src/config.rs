//! Configuration manager for onboard.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::FromRef;
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::AppState;

const DEFAULT_CONFIG_PATH: &str = "config.yaml";
const CONFIG_PATH_ENV: &str = "CONFIG_PATH";
const SESSION_SECRET_ENV: &str = "SESSION_SECRET";
const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const DEFAULT_PORT: u16 = 8080;
/// Upper bound for every lifetime read from the configuration: one year.
const MAX_MINUTES: i64 = 60 * 24 * 365;

/// Values that parse but cannot be used.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("`{field}` must be between 1 and {max} minutes, got {value}", max = MAX_MINUTES)]
    OutOfRange { field: &'static str, value: i64 },
    #[error("`token.purge_interval_minutes` is too large: {0}")]
    PurgeInterval(u64),
}

fn minutes(field: &'static str, value: i64) -> Result<TimeDelta, ConfigError> {
    if !(1..=MAX_MINUTES).contains(&value) {
        return Err(ConfigError::OutOfRange { field, value });
    }
    TimeDelta::try_minutes(value).ok_or(ConfigError::OutOfRange { field, value })
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    /// Instance name.
    pub name: String,
    /// Public URL of current instance, used in emailed links.
    pub url: String,
    /// Listening port.
    pub port: Option<u16>,
    #[serde(default)]
    pub version: String,
    #[serde(skip)]
    pub(crate) path: PathBuf,
    /// Related to PostgreSQL configuration.
    #[serde(skip_serializing)]
    pub postgres: Option<Postgres>,
    /// Related to Argon2 configuration.
    #[serde(skip_serializing)]
    pub argon2: Option<Argon2>,
    /// Related to SMTP delivery.
    #[serde(skip_serializing)]
    pub mail: Option<Mail>,
    /// Related to verification tokens.
    #[serde(default, skip_serializing)]
    pub token: Token,
    /// Related to login sessions.
    #[serde(default, skip_serializing)]
    pub session: Session,
}

/// PostgreSQL configuration.
#[derive(Debug, Default, PartialEq, Clone, Serialize, Deserialize)]
pub struct Postgres {
    /// Hostname:(?port) for PostgreSQL instance.
    pub address: String,
    /// Database name.
    pub database: Option<String>,
    /// Username credential to connect.
    pub username: Option<String>,
    /// Password credential to connect.
    pub password: Option<String>,
    /// Maximum pool connections.
    pub pool_size: Option<u32>,
}

/// Argon2 configuration.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Argon2 {
    /// Memory used while hashing, in KiB.
    pub memory_cost: u32,
    /// Iterations of hash.
    pub iterations: u32,
    /// Parallelism degree.
    pub parallelism: u32,
    /// Output hash length.
    pub hash_length: usize,
}

impl Default for Argon2 {
    fn default() -> Self {
        Self {
            memory_cost: 1024 * 64, // 64 MiB.
            iterations: 4,
            parallelism: 2,
            hash_length: 32,
        }
    }
}

/// SMTP configuration.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mail {
    /// SMTP relay hostname.
    pub host: String,
    /// Defaults to 587.
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Sender mailbox, e.g. `Onboard <no-reply@example.com>`.
    pub from: String,
    /// Upgrade the connection with STARTTLS.
    #[serde(default)]
    pub starttls: bool,
}

/// Verification token configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Token {
    /// Lifetime of activation and reset links.
    pub ttl_minutes: i64,
    /// Delay between two purges of expired tokens. `0` disables purging.
    pub purge_interval_minutes: u64,
}

impl Token {
    /// Lifetime of emailed links.
    pub fn ttl(&self) -> Result<TimeDelta, ConfigError> {
        minutes("token.ttl_minutes", self.ttl_minutes)
    }

    /// Delay between two purges, `None` when purging is disabled.
    pub fn purge_interval(&self) -> Result<Option<Duration>, ConfigError> {
        if self.purge_interval_minutes == 0 {
            return Ok(None);
        }
        self.purge_interval_minutes
            .checked_mul(60)
            .map(|secs| Some(Duration::from_secs(secs)))
            .ok_or(ConfigError::PurgeInterval(self.purge_interval_minutes))
    }
}

impl Default for Token {
    fn default() -> Self {
        Self {
            ttl_minutes: 30,
            purge_interval_minutes: 60,
        }
    }
}

/// Session (JSON Web Token) configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Session {
    /// HMAC secret. Overridden by `SESSION_SECRET`.
    pub secret: Option<String>,
    pub ttl_minutes: i64,
    /// Default is the instance URL.
    pub audience: Option<String>,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            secret: None,
            ttl_minutes: 60,
            audience: None,
        }
    }
}

impl FromRef<AppState> for Arc<Configuration> {
    fn from_ref(state: &AppState) -> Arc<Configuration> {
        Arc::clone(&state.config)
    }
}

impl Configuration {
    pub fn path(mut self, path: PathBuf) -> Self {
        self.path = path;
        self
    }

    /// Check lifetimes before anything is built from them.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.token.ttl()?;
        self.token.purge_interval()?;
        minutes("session.ttl_minutes", self.session.ttl_minutes)?;
        Ok(())
    }

    /// Parsed public URL.
    pub fn base_url(&self) -> Result<Url, url::ParseError> {
        Url::parse(&self.url)
    }

    /// Normalizes a URL string by ensuring it starts with a valid scheme
    /// (`http` or `https`).
    fn normalize_url(&self, url: &str) -> Result<String, url::ParseError> {
        let url_with_scheme =
            if url.starts_with("http://") || url.starts_with("https://") {
                url.to_string()
            } else {
                format!("https://{url}")
            };

        let parsed_url = Url::parse(&url_with_scheme)?;
        Ok(parsed_url.to_string())
    }

    /// Reads the `config.yaml` file from the specified path, `CONFIG_PATH`
    /// or the default location.
    pub fn read(self) -> Result<Arc<Self>, url::ParseError> {
        let file_path = if self.path.is_file() {
            self.path.clone()
        } else if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            PathBuf::from(path)
        } else {
            Path::new(DEFAULT_CONFIG_PATH).to_path_buf()
        };

        let mut config = match File::open(&file_path) {
            Ok(file) => match serde_yaml::from_reader::<_, Configuration>(file)
            {
                Ok(config) => config,
                Err(err) => self.error(err),
            },
            Err(err) => self.error(err),
        };

        // set app version.
        config.version = VERSION.to_owned();
        config.path = file_path;

        // normalize URLs.
        config.url = self.normalize_url(&config.url)?;

        if let Ok(secret) = std::env::var(SESSION_SECRET_ENV) {
            config.session.secret = Some(secret);
        }

        Ok(Arc::new(config))
    }

    /// Return a default configuration as fallback.
    fn error(&self, err: impl std::error::Error) -> Self {
        tracing::error!(error = %err, "cannot read `config.yaml` file, using defaults");
        Self {
            url: format!("http://localhost:{DEFAULT_PORT}"),
            ..Default::default()
        }
    }
}

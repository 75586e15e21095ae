use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DbError, Result};

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 3306;
pub const DEFAULT_CHARSET: &str = "utf8";
pub const DEFAULT_MIN_SIZE: usize = 1;
pub const DEFAULT_MAX_SIZE: usize = 10;
pub const DEFAULT_ACQUIRE_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Postgres,
    /// `db` is a file path; host, port and credentials are ignored.
    Sqlite,
}

/// Connection pool parameters. Everything except `user`, `password` and `db`
/// has a default.
#[derive(Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    #[serde(default)]
    pub backend: Backend,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub user: String,
    pub password: String,
    pub db: String,
    #[serde(default = "default_charset")]
    pub charset: String,
    #[serde(default = "default_autocommit")]
    pub autocommit: bool,
    #[serde(default = "default_min_size", alias = "minsize")]
    pub min_size: usize,
    #[serde(default = "default_max_size", alias = "maxsize")]
    pub max_size: usize,
    /// `None` waits for a free connection indefinitely.
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: Option<u64>,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_charset() -> String {
    DEFAULT_CHARSET.to_string()
}

fn default_autocommit() -> bool {
    true
}

fn default_min_size() -> usize {
    DEFAULT_MIN_SIZE
}

fn default_max_size() -> usize {
    DEFAULT_MAX_SIZE
}

fn default_acquire_timeout_ms() -> Option<u64> {
    Some(DEFAULT_ACQUIRE_TIMEOUT_MS)
}

fn default_connect_timeout_ms() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}

impl PoolConfig {
    pub fn new(
        user: impl Into<String>,
        password: impl Into<String>,
        db: impl Into<String>,
    ) -> Self {
        Self {
            backend: Backend::default(),
            host: default_host(),
            port: DEFAULT_PORT,
            user: user.into(),
            password: password.into(),
            db: db.into(),
            charset: default_charset(),
            autocommit: true,
            min_size: DEFAULT_MIN_SIZE,
            max_size: DEFAULT_MAX_SIZE,
            acquire_timeout_ms: default_acquire_timeout_ms(),
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
        }
    }

    pub fn sqlite(path: impl Into<String>) -> Self {
        Self {
            backend: Backend::Sqlite,
            ..Self::new("", "", path)
        }
    }

    pub fn acquire_timeout(&self) -> Option<Duration> {
        self.acquire_timeout_ms.map(Duration::from_millis)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_size == 0 {
            return Err(DbError::InvalidArgument(
                "max_size must be at least 1".to_string(),
            ));
        }
        if self.min_size > self.max_size {
            return Err(DbError::InvalidArgument(format!(
                "min_size {} exceeds max_size {}",
                self.min_size, self.max_size
            )));
        }
        if self.db.is_empty() {
            return Err(DbError::InvalidArgument(
                "database name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for PoolConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolConfig")
            .field("backend", &self.backend)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"***")
            .field("db", &self.db)
            .field("charset", &self.charset)
            .field("autocommit", &self.autocommit)
            .field("min_size", &self.min_size)
            .field("max_size", &self.max_size)
            .field("acquire_timeout_ms", &self.acquire_timeout_ms)
            .finish_non_exhaustive()
    }
}

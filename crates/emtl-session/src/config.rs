//! Configuration for the session manager.
//!
//! # Configuration
//!
//! ```toml
//! default_ttl = 1800      # seconds
//! max_retries = 3
//! retry_delay = 0         # milliseconds
//! login_duration = 180    # minutes
//! storage_dir = "~/.emtl"
//! ```
//!
//! # Environment Variables
//!
//! - `EMTL_STORAGE_DIR` - Override the directory session records are stored in
//! - `EM_USERNAME` / `EM_PASSWORD` - Default credential when none is supplied

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default TTL for cached sessions (30 minutes).
pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);

/// Default number of login attempts before giving up.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default session duration requested from the remote service, in minutes.
pub const DEFAULT_LOGIN_DURATION_MINS: u64 = 180;

/// Environment variable overriding the storage directory.
pub const STORAGE_DIR_ENV: &str = "EMTL_STORAGE_DIR";

/// Environment variable holding the default username.
pub const USERNAME_ENV: &str = "EM_USERNAME";

/// Environment variable holding the default password.
pub const PASSWORD_ENV: &str = "EM_PASSWORD";

/// Directory name used under the home directory when nothing else is set.
const DEFAULT_DIR_NAME: &str = ".emtl";

/// Configuration for the session manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// TTL applied to new records when `get_session` is given none, in seconds.
    pub default_ttl: u64,

    /// Maximum number of login attempts per fresh-login cycle.
    pub max_retries: u32,

    /// Fixed pause between login attempts, in milliseconds.
    pub retry_delay: u64,

    /// Session duration requested from the remote service, in minutes.
    pub login_duration: u64,

    /// Directory for persisted records.
    ///
    /// Can be overridden by the `EMTL_STORAGE_DIR` environment variable.
    pub storage_dir: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_ttl: DEFAULT_TTL.as_secs(),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: 0,
            login_duration: DEFAULT_LOGIN_DURATION_MINS,
            storage_dir: None,
        }
    }
}

impl SessionConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from TOML text.
    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| Error::Config(format!("failed to parse config: {e}")))
    }

    /// Load a configuration file.
    pub fn load_config_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "failed to read config file '{}': {e}",
                path.display()
            ))
        })?;
        Self::from_toml(&contents)
    }

    /// Set the default TTL.
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl.as_secs();
        self
    }

    /// Set the maximum number of login attempts.
    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    /// Set the pause between login attempts.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the session duration requested at login.
    pub fn with_login_duration(mut self, duration: Duration) -> Self {
        self.login_duration = duration.as_secs() / 60;
        self
    }

    /// Set the storage directory.
    pub fn with_storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.storage_dir = Some(dir.into());
        self
    }

    /// Default TTL as a [`Duration`].
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl)
    }

    /// Attempt bound for the login loop; never less than one.
    pub fn max_retries(&self) -> u32 {
        self.max_retries.max(1)
    }

    /// Pause between login attempts as a [`Duration`].
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay)
    }

    /// Requested remote session duration as a [`Duration`].
    pub fn login_duration(&self) -> Duration {
        Duration::from_secs(self.login_duration.saturating_mul(60))
    }

    /// Get the effective storage directory.
    ///
    /// Resolution order:
    /// 1. `EMTL_STORAGE_DIR` environment variable
    /// 2. Configured `storage_dir` value
    /// 3. Default: `~/.emtl`
    pub fn storage_dir(&self) -> PathBuf {
        resolve_storage_dir(self.storage_dir.as_deref())
    }
}

/// Resolve a storage directory with the environment override applied.
pub fn resolve_storage_dir(configured: Option<&Path>) -> PathBuf {
    if let Ok(env_path) = std::env::var(STORAGE_DIR_ENV) {
        if !env_path.trim().is_empty() {
            return expand_home(Path::new(env_path.trim()));
        }
    }

    match configured {
        Some(path) => expand_home(path),
        None => home_dir().join(DEFAULT_DIR_NAME),
    }
}

fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

/// Expand a leading `~` to the home directory.
fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => home_dir().join(rest),
        Err(_) => path.to_path_buf(),
    }
}

/// Username and password used to log in.
///
/// The cache layer never persists a credential; only the authenticated
/// session it produces is stored.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    username: String,
    password: String,
}

impl Credential {
    /// Create a credential. Surrounding whitespace is trimmed.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into().trim().to_string(),
            password: password.into().trim().to_string(),
        }
    }

    /// Resolve a credential once.
    ///
    /// Resolution order:
    /// 1. The explicit credential, if given
    /// 2. `EM_USERNAME` / `EM_PASSWORD` environment variables
    pub fn resolve(explicit: Option<Credential>) -> Result<Self> {
        if let Some(credential) = explicit {
            return Ok(credential);
        }

        let username = std::env::var(USERNAME_ENV).unwrap_or_default();
        let password = std::env::var(PASSWORD_ENV).unwrap_or_default();
        if username.trim().is_empty() {
            return Err(Error::Config(format!(
                "no credential supplied and {USERNAME_ENV} is not set"
            )));
        }
        Ok(Self::new(username, password))
    }

    /// The username, which is also the cache identity.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// The plaintext password.
    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

//! Cached, validated trading sessions.
//!
//! This crate turns a username and password into a live session object:
//! - Persisted session records with a TTL, one per identity
//! - A live remote check before a cached session is reused
//! - A bounded login loop when the cache misses or the session is dead
//! - Pluggable storage ([`FileStore`], [`MemoryStore`]) and time ([`Clock`])
//!
//! # Example
//!
//! ```rust,ignore
//! use emtl_session::{Credential, FileStore, SessionConfig, SessionManager};
//!
//! let config = SessionConfig::default().with_max_retries(5);
//! let store = FileStore::open(config.storage_dir.as_ref())?;
//! let manager = SessionManager::new(factory, Arc::new(store), config);
//!
//! let session = manager.get_session("540975189038", &credential, None)?;
//! ```

mod clock;
mod config;
mod error;
mod manager;
mod persistence;
mod record;
mod session;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    Credential, DEFAULT_LOGIN_DURATION_MINS, DEFAULT_MAX_RETRIES, DEFAULT_TTL, PASSWORD_ENV,
    STORAGE_DIR_ENV, SessionConfig, USERNAME_ENV, resolve_storage_dir,
};
pub use error::{Error, Result};
pub use manager::SessionManager;
pub use persistence::{FileStore, MemoryStore, SessionStore, SharedSessionStore};
pub use record::SessionRecord;
pub use session::{SessionFactory, TradingSession};

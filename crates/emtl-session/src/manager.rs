//! Session cache manager: load, validate, re-login, persist.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::{Credential, SessionConfig};
use crate::error::{Error, Result};
use crate::persistence::SharedSessionStore;
use crate::record::SessionRecord;
use crate::session::{SessionFactory, TradingSession};

/// Hands out live, validated trading sessions keyed by identity.
///
/// This manager provides:
/// - Reuse of persisted sessions until their TTL lapses
/// - A live remote check before any cached session is trusted
/// - A bounded login loop when the cache misses or the session is dead
/// - Lazy expiry: nothing is swept in the background
///
/// The store is the only authority; the manager keeps no in-memory copy.
/// There is no per-identity locking, so concurrent calls for the same
/// identity race on the store and the last writer wins.
pub struct SessionManager<F: SessionFactory> {
    factory: F,
    store: SharedSessionStore,
    clock: Arc<dyn Clock>,
    config: SessionConfig,
    default_credential: Option<Credential>,
}

impl<F: SessionFactory> SessionManager<F> {
    /// Create a manager over `store` using the wall clock.
    pub fn new(factory: F, store: SharedSessionStore, config: SessionConfig) -> Self {
        Self {
            factory,
            store,
            clock: Arc::new(SystemClock),
            config,
            default_credential: None,
        }
    }

    /// Use a different time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Remember a credential for [`get_default_session`](Self::get_default_session).
    pub fn with_default_credential(mut self, credential: Credential) -> Self {
        self.default_credential = Some(credential);
        self
    }

    /// Get the manager configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Get the backing store.
    pub fn store(&self) -> &SharedSessionStore {
        &self.store
    }

    /// The credential resolved at construction, if any.
    pub fn default_credential(&self) -> Option<&Credential> {
        self.default_credential.as_ref()
    }

    /// Get a live session for `identity`.
    ///
    /// An unexpired cached session is returned only after the remote service
    /// confirms it. Otherwise a fresh login cycle runs and its result is
    /// persisted with `ttl`, or the configured default TTL.
    ///
    /// # Errors
    ///
    /// - [`Error::Serializer`] if the stored record cannot be decoded or the
    ///   new record cannot be written
    /// - [`Error::LoginFailed`] once every login attempt has been rejected
    /// - [`Error::CredentialsRejected`] for a credential that cannot log in as
    ///   `identity`
    /// - [`Error::Api`] for remote failures that are not ordinary rejections
    pub fn get_session(
        &self,
        identity: &str,
        credential: &Credential,
        ttl: Option<Duration>,
    ) -> Result<F::Session> {
        check_credential(identity, credential)?;

        match self.store.load(identity)? {
            None => {
                debug!(identity = %identity, "Session cache miss");
            }
            Some(record) if record.is_expired(self.clock.now()) => {
                debug!(
                    identity = %identity,
                    expires_at = %record.expires_at,
                    "Cached session expired"
                );
            }
            Some(record) => {
                if let Some(session) = self.revive(&record)? {
                    return Ok(session);
                }
            }
        }

        self.login(identity, credential, ttl)
    }

    /// Get a live session for the credential resolved at construction.
    pub fn get_default_session(&self, ttl: Option<Duration>) -> Result<F::Session> {
        let credential = self
            .default_credential
            .as_ref()
            .ok_or_else(|| Error::Config("no default credential configured".to_string()))?;
        self.get_session(credential.username(), credential, ttl)
    }

    /// Delete the cached session for `identity`. Returns whether one existed.
    pub fn invalidate(&self, identity: &str) -> Result<bool> {
        let existed = self.store.delete(identity)?;
        debug!(identity = %identity, existed, "Session invalidated");
        Ok(existed)
    }

    /// Identities whose stored record has not yet expired.
    ///
    /// Expired records are filtered out at read time but left in place.
    /// Records that cannot be decoded are skipped.
    pub fn list_cached_identities(&self) -> Result<BTreeSet<String>> {
        let now = self.clock.now();
        let mut live = BTreeSet::new();

        for identity in self.store.list_identities()? {
            match self.store.load(&identity) {
                Ok(Some(record)) if !record.is_expired(now) => {
                    live.insert(identity);
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(identity = %identity, error = %e, "Skipping unreadable session record");
                }
            }
        }

        Ok(live)
    }

    /// Peek at the stored record without validating or expiring it.
    pub fn cached_record(&self, identity: &str) -> Result<Option<SessionRecord>> {
        self.store.load(identity)
    }

    /// Restore a cached session and confirm it with the remote service.
    fn revive(&self, record: &SessionRecord) -> Result<Option<F::Session>> {
        let state = record.state()?;
        let mut session = self.factory.restore(state)?;

        match session.validate() {
            Ok(true) => {
                debug!(identity = %record.identity, "Cached session validated");
                Ok(Some(session))
            }
            Ok(false) => {
                info!(identity = %record.identity, "Cached session rejected by remote, logging in again");
                Ok(None)
            }
            Err(Error::SessionExpired(reason)) => {
                info!(identity = %record.identity, reason = %reason, "Cached session expired remotely, logging in again");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Bounded login loop. Persists the session on the first success.
    fn login(
        &self,
        identity: &str,
        credential: &Credential,
        ttl: Option<Duration>,
    ) -> Result<F::Session> {
        let max_retries = self.config.max_retries();
        let duration = self.config.login_duration();
        let delay = self.config.retry_delay();
        let mut session = self.factory.create()?;

        for attempt in 1..=max_retries {
            debug!(identity = %identity, attempt, max_retries, "Attempting login");

            // An expired-session answer during login counts as a rejection.
            let key = match session.login(credential, duration) {
                Ok(key) => key,
                Err(Error::SessionExpired(reason)) => {
                    debug!(identity = %identity, attempt, reason = %reason, "Login hit an expired session");
                    None
                }
                Err(e) => return Err(e),
            };

            if key.is_some() {
                let now = self.clock.now();
                let ttl = ttl.unwrap_or_else(|| self.config.default_ttl());
                let record = SessionRecord::from_state(identity, &session.snapshot(), now, ttl)?;
                self.store.save(identity, &record)?;

                info!(
                    identity = %identity,
                    attempt,
                    expires_at = %record.expires_at,
                    "Login succeeded, session cached"
                );
                return Ok(session);
            }

            warn!(identity = %identity, attempt, max_retries, "Login attempt rejected");
            if attempt < max_retries && !delay.is_zero() {
                std::thread::sleep(delay);
            }
        }

        Err(Error::LoginFailed {
            identity: identity.to_string(),
            attempts: max_retries,
        })
    }
}

impl<F: SessionFactory> std::fmt::Debug for SessionManager<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("store", &self.store)
            .field("clock", &self.clock)
            .field("config", &self.config)
            .field("default_credential", &self.default_credential)
            .finish_non_exhaustive()
    }
}

/// Reject credentials that can never produce a session for `identity`.
fn check_credential(identity: &str, credential: &Credential) -> Result<()> {
    let reason = if credential.username().is_empty() {
        "username is empty"
    } else if credential.username() != identity {
        "username does not match the requested identity"
    } else if credential.password().is_empty() {
        "password is empty"
    } else {
        return Ok(());
    };

    Err(Error::CredentialsRejected {
        identity: identity.to_string(),
        reason: reason.to_string(),
    })
}

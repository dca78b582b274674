//! The seam between the cache and a concrete trading session.

use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::config::Credential;
use crate::error::Result;

/// An authenticated (or authenticatable) connection to the trading service.
///
/// A session is not safe for concurrent use; the manager hands out owned
/// sessions and never shares state between identities.
pub trait TradingSession {
    /// Serializable snapshot that fully restores the session.
    type State: Serialize + DeserializeOwned;

    /// Attempt to log in.
    ///
    /// Returns the remote validation key on success and `Ok(None)` for an
    /// ordinary rejection such as a misread captcha or a bad password.
    /// Only unexpected transport or protocol failures are `Err`.
    fn login(&mut self, credential: &Credential, duration: Duration) -> Result<Option<String>>;

    /// Check with the remote service that the held key is still accepted.
    ///
    /// Has no side effects beyond the probe.
    fn validate(&mut self) -> Result<bool>;

    /// Snapshot the state needed to restore this session later.
    fn snapshot(&self) -> Self::State;
}

/// Creates fresh sessions and rehydrates persisted ones.
pub trait SessionFactory {
    /// The session type produced.
    type Session: TradingSession;

    /// A new, unauthenticated session.
    fn create(&self) -> Result<Self::Session>;

    /// Rebuild a session from a persisted snapshot.
    fn restore(
        &self,
        state: <Self::Session as TradingSession>::State,
    ) -> Result<Self::Session>;
}

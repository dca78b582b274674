//! Persisted session records.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// An authenticated session as stored by a [`SessionStore`](crate::SessionStore).
///
/// The payload is the session's own snapshot; the record only adds the
/// identity it belongs to and when it stops being trusted locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Identity (username) this record belongs to.
    pub identity: String,

    /// Opaque session snapshot.
    pub payload: serde_json::Value,

    /// When the login that produced this record succeeded.
    pub created_at: DateTime<Utc>,

    /// When the record stops being served from cache.
    pub expires_at: DateTime<Utc>,
}

impl SessionRecord {
    /// Create a record that expires `ttl` after `created_at`.
    ///
    /// A TTL too large to represent is clamped to the latest representable
    /// instant, so `expires_at >= created_at` always holds.
    pub fn new(
        identity: impl Into<String>,
        payload: serde_json::Value,
        created_at: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        let expires_at = TimeDelta::from_std(ttl)
            .ok()
            .and_then(|delta| created_at.checked_add_signed(delta))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        Self {
            identity: identity.into(),
            payload,
            created_at,
            expires_at,
        }
    }

    /// Build a record from a serializable session snapshot.
    pub fn from_state<T: Serialize>(
        identity: impl Into<String>,
        state: &T,
        created_at: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<Self> {
        let payload = serde_json::to_value(state)
            .map_err(|e| Error::Serializer(format!("failed to encode session: {e}")))?;
        Ok(Self::new(identity, payload, created_at, ttl))
    }

    /// Decode the payload back into a session snapshot.
    pub fn state<T: for<'de> Deserialize<'de>>(&self) -> Result<T> {
        serde_json::from_value(self.payload.clone()).map_err(|e| {
            Error::Serializer(format!(
                "failed to decode session for '{}': {e}",
                self.identity
            ))
        })
    }

    /// Whether the record has reached its expiry at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Time left before expiry; zero once expired.
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).to_std().unwrap_or(Duration::ZERO)
    }

    /// Encode to the on-disk representation.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
            .map_err(|e| Error::Serializer(format!("failed to encode record: {e}")))
    }

    /// Decode from the on-disk representation.
    ///
    /// Rejects records whose `expires_at` precedes `created_at`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let record: SessionRecord = serde_json::from_slice(bytes)
            .map_err(|e| Error::Serializer(format!("failed to decode record: {e}")))?;
        if record.expires_at < record.created_at {
            return Err(Error::Serializer(format!(
                "record for '{}' expires before it was created",
                record.identity
            )));
        }
        Ok(record)
    }
}

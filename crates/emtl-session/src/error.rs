//! Error types for session cache operations.

/// Error type for session cache operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Every login attempt for the identity was rejected.
    #[error("Login failed for '{identity}' after {attempts} attempt(s)")]
    LoginFailed {
        /// Identity (username) that could not log in.
        identity: String,
        /// Number of attempts made before giving up.
        attempts: u32,
    },

    /// Credentials were rejected outright; retrying cannot help.
    #[error("Credentials rejected for '{identity}': {reason}")]
    CredentialsRejected {
        /// Identity (username) the credential was supplied for.
        identity: String,
        /// Why the credential was rejected.
        reason: String,
    },

    /// The remote service returned an erroneous response or the transport failed.
    #[error("API error: status={status:?}, message={message}")]
    Api {
        /// HTTP status code, if a response was received.
        status: Option<u16>,
        /// Human-readable error message.
        message: String,
        /// Raw response body for diagnostics.
        response: Option<String>,
    },

    /// Persistence read, write or decode failure.
    #[error("Serializer error: {0}")]
    Serializer(String),

    /// The remote service reports the held session as expired.
    #[error("Session expired: {0}")]
    SessionExpired(String),

    /// Invalid or unreadable configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Create an API error from a non-success response.
    pub fn api(status: Option<u16>, message: impl Into<String>, response: Option<String>) -> Self {
        Error::Api {
            status,
            message: message.into(),
            response,
        }
    }

    /// Returns `true` if this error means a session could not be obtained
    /// because login did not succeed.
    pub fn is_login_failure(&self) -> bool {
        matches!(
            self,
            Error::LoginFailed { .. } | Error::CredentialsRejected { .. }
        )
    }

    /// Returns `true` if this error came from the remote service.
    pub fn is_api_error(&self) -> bool {
        matches!(self, Error::Api { .. } | Error::SessionExpired(_))
    }

    /// Returns `true` if a later call could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::LoginFailed { .. } | Error::SessionExpired(_) => true,
            Error::Api { status, .. } => status.is_none_or(|s| s >= 500 || s == 429),
            Error::CredentialsRejected { .. } | Error::Serializer(_) | Error::Config(_) => false,
        }
    }
}

/// Result type for session cache operations.
pub type Result<T> = std::result::Result<T, Error>;

//! Cloud sync error types.

use thiserror::Error;

/// Result type for cloud operations.
pub type CloudResult<T> = Result<T, CloudError>;

/// Identity provider errno: the session or key-fetch token is no longer valid.
pub const ERRNO_INVALID_AUTHENTICATION_TOKEN: u32 = 110;
/// Identity provider errno: the account has not been verified yet.
pub const ERRNO_UNVERIFIED_ACCOUNT: u32 = 104;
/// Identity provider errno: the endpoint was retired and the client must upgrade.
pub const ERRNO_ENDPOINT_RETIRED: u32 = 116;

/// Errors that can occur in cloud sync operations.
#[derive(Debug, Error)]
pub enum CloudError {
    #[error("identity provider error {status} (errno {errno}): {message}")]
    Remote {
        status: u16,
        errno: u32,
        message: String,
    },

    #[error("token server rejected credentials: {0}")]
    TokenServerInvalidCredentials(String),

    #[error("token server error {status}: {message}")]
    TokenServer { status: u16, message: String },

    #[error("authentication required")]
    AuthRequired,

    #[error("account is in state {actual}, expected {expected}")]
    InvalidState { expected: String, actual: String },

    #[error("account store error: {0}")]
    Storage(String),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("crypto error: {0}")]
    Crypto(#[from] driftsync_crypto::CryptoError),

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl CloudError {
    /// The server says our credentials are no longer any good.
    pub fn is_invalid_authentication(&self) -> bool {
        match self {
            CloudError::Remote { status, errno, .. } => {
                *status == 401 || *errno == ERRNO_INVALID_AUTHENTICATION_TOKEN
            }
            CloudError::TokenServerInvalidCredentials(_) => true,
            _ => false,
        }
    }

    /// The account exists but has not been verified.
    pub fn is_unverified(&self) -> bool {
        matches!(self, CloudError::Remote { errno, .. } if *errno == ERRNO_UNVERIFIED_ACCOUNT)
    }

    /// The server no longer speaks the protocol version this client uses.
    pub fn is_upgrade_required(&self) -> bool {
        matches!(self, CloudError::Remote { errno, .. } if *errno == ERRNO_ENDPOINT_RETIRED)
    }

    /// Transport-level failure (connect, timeout, body read).
    pub fn is_network(&self) -> bool {
        matches!(self, CloudError::Http(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, CloudError::Http(e) if e.is_timeout())
    }
}

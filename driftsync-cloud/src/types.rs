//! Shared types for login, token exchange and sync outcomes.

use crate::account::{NeededAction, StateLabel};
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ── Identity provider wire types ──

/// `POST /account/login` response.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub uid: String,
    pub session_token: String,
    pub key_fetch_token: String,
    #[serde(default)]
    pub verified: bool,
}

/// `GET /account/keys` response. Both values are hex encoded.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KeysResponse {
    #[serde(rename = "kA")]
    pub ka: String,
    #[serde(rename = "wrapKB")]
    pub wrap_kb: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CertificateResponse {
    pub cert: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecoveryEmailStatus {
    #[serde(default)]
    pub email: Option<String>,
    pub verified: bool,
}

/// Error body returned by the identity provider.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RemoteErrorBody {
    #[serde(default)]
    pub code: Option<u16>,
    #[serde(default)]
    pub errno: Option<u32>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

// ── Token server wire types ──

/// Short-lived storage credentials handed out by the token server.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenServerToken {
    pub id: String,
    pub key: String,
    /// The server returns this as a number; older deployments send a string.
    #[serde(deserialize_with = "deserialize_string_from_str_or_num")]
    pub uid: String,
    #[serde(alias = "endpoint")]
    pub api_endpoint: String,
    /// Lifetime in seconds, when the server says.
    #[serde(default)]
    pub duration: Option<u64>,
}

impl std::fmt::Debug for TokenServerToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenServerToken")
            .field("id", &self.id)
            .field("uid", &self.uid)
            .field("api_endpoint", &self.api_endpoint)
            .field("duration", &self.duration)
            .finish_non_exhaustive()
    }
}

/// Error body returned by the token server.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TokenServerErrorBody {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub errors: Vec<TokenServerErrorDetail>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TokenServerErrorDetail {
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl TokenServerErrorBody {
    /// Joins the error descriptions into one line for logs and error values.
    pub fn summary(&self) -> String {
        let parts: Vec<String> = self
            .errors
            .iter()
            .filter_map(|e| e.description.clone().or_else(|| e.name.clone()))
            .collect();
        if parts.is_empty() {
            self.status.clone().unwrap_or_else(|| "unknown error".to_string())
        } else {
            parts.join("; ")
        }
    }
}

/// Accepts either a JSON number or a string.
fn deserialize_string_from_str_or_num<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de;

    struct StringVisitor;
    impl<'de> de::Visitor<'de> for StringVisitor {
        type Value = String;
        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            f.write_str("a string or a number")
        }
        fn visit_u64<E: de::Error>(self, v: u64) -> Result<String, E> { Ok(v.to_string()) }
        fn visit_i64<E: de::Error>(self, v: i64) -> Result<String, E> { Ok(v.to_string()) }
        fn visit_str<E: de::Error>(self, v: &str) -> Result<String, E> { Ok(v.to_string()) }
    }
    deserializer.deserialize_any(StringVisitor)
}

// ── Sync attempt ──

/// Per-attempt options supplied by whoever triggered the sync.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SyncExtras {
    /// User-initiated: ignore the scheduler and storage backoff windows.
    #[serde(default)]
    pub forced: bool,
}

impl SyncExtras {
    pub fn forced() -> Self {
        Self { forced: true }
    }
}

/// The single verdict produced by one sync attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncOutcome {
    Success,
    /// A backoff window is active; try again after `delay`.
    Postponed { delay: Duration },
    /// The account needs user action before it can sync.
    CannotSync {
        label: StateLabel,
        action: NeededAction,
    },
    /// Transient failure; a later attempt may succeed.
    Recoverable { reason: String },
    /// Will not succeed without user action.
    Unrecoverable { reason: String },
}

impl SyncOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SyncOutcome::Success)
    }

    /// True for outcomes that should be reported as a failed attempt.
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            SyncOutcome::Recoverable { .. } | SyncOutcome::Unrecoverable { .. }
        )
    }

    /// Whether the caller's scheduler should retry on its own cadence.
    pub fn should_retry(&self) -> bool {
        matches!(
            self,
            SyncOutcome::Postponed { .. } | SyncOutcome::Recoverable { .. }
        )
    }
}

impl std::fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncOutcome::Success => write!(f, "success"),
            SyncOutcome::Postponed { delay } => write!(f, "postponed for {}ms", delay.as_millis()),
            SyncOutcome::CannotSync { label, action } => {
                write!(f, "cannot sync in state {label}: {action}")
            }
            SyncOutcome::Recoverable { reason } => write!(f, "recoverable error: {reason}"),
            SyncOutcome::Unrecoverable { reason } => write!(f, "unrecoverable error: {reason}"),
        }
    }
}

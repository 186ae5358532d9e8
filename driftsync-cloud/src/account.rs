//! Account login states.
//!
//! An account moves Engaged → Cohabiting → Married as keys are fetched and a
//! certificate is signed; it falls back to Separated (password needed) or
//! Doghouse (client upgrade needed) when the server says so. Each variant
//! carries exactly the material it needs: only [`Married`] can mint
//! assertions or derive storage keys.

use crate::error::CloudResult;
use driftsync_crypto::{
    certificate_expires_at, client_state, derive_key_bundle, generate_assertion, KeyBundle,
    SigningKeyPair, DEFAULT_ASSERTION_ISSUER,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Discriminant of [`AccountState`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StateLabel {
    Engaged,
    Cohabiting,
    Married,
    Separated,
    Doghouse,
}

impl fmt::Display for StateLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StateLabel::Engaged => "Engaged",
            StateLabel::Cohabiting => "Cohabiting",
            StateLabel::Married => "Married",
            StateLabel::Separated => "Separated",
            StateLabel::Doghouse => "Doghouse",
        };
        f.write_str(name)
    }
}

/// What the user has to do before the account can sync.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NeededAction {
    None,
    NeedsVerification,
    NeedsPassword,
    NeedsUpgrade,
}

impl fmt::Display for NeededAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NeededAction::None => "none",
            NeededAction::NeedsVerification => "verify account email",
            NeededAction::NeedsPassword => "re-enter password",
            NeededAction::NeedsUpgrade => "upgrade client",
        };
        f.write_str(name)
    }
}

/// 32 bytes of key material, hex on the wire and redacted in logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret32(pub [u8; 32]);

impl Secret32 {
    pub fn from_hex(value: &str) -> Option<Self> {
        let bytes = hex::decode(value).ok()?;
        let array: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(array))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for Secret32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret32(..)")
    }
}

impl Serialize for Secret32 {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for Secret32 {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Secret32::from_hex(&value)
            .ok_or_else(|| serde::de::Error::custom("expected 64 hex characters"))
    }
}

// ── States ──

/// Logged in; keys not fetched yet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Engaged {
    pub email: String,
    pub uid: String,
    pub verified: bool,
    pub session_token: String,
    pub key_fetch_token: String,
    pub unwrap_kb: Secret32,
}

/// Keys fetched and a signing keypair generated; no certificate yet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cohabiting {
    pub email: String,
    pub uid: String,
    pub session_token: String,
    #[serde(rename = "kA")]
    pub ka: Secret32,
    #[serde(rename = "kB")]
    pub kb: Secret32,
    pub key_pair: SigningKeyPair,
}

impl Cohabiting {
    pub fn with_certificate(self, certificate: String) -> Married {
        Married {
            account: self,
            certificate,
        }
    }
}

/// Fully authenticated: holds a certificate for the signing keypair.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Married {
    pub account: Cohabiting,
    pub certificate: String,
}

impl Married {
    pub fn email(&self) -> &str {
        &self.account.email
    }

    pub fn uid(&self) -> &str {
        &self.account.uid
    }

    /// Drops the certificate, keeping keys and keypair.
    pub fn make_cohabiting(self) -> Cohabiting {
        self.account
    }

    pub fn certificate_expires_at(&self) -> CloudResult<u64> {
        Ok(certificate_expires_at(&self.certificate)?)
    }

    /// A certificate is usable while `now_ms` is strictly before its expiry.
    pub fn has_valid_certificate(&self, now_ms: u64) -> bool {
        self.certificate_expires_at()
            .map(|exp| now_ms < exp)
            .unwrap_or(false)
    }

    /// Mints `certificate~assertion` for `audience`, valid for `duration_ms`
    /// starting at `issued_at_ms`.
    pub fn generate_assertion(
        &self,
        audience: &str,
        issued_at_ms: u64,
        duration_ms: u64,
    ) -> CloudResult<String> {
        Ok(generate_assertion(
            &self.account.key_pair,
            &self.certificate,
            audience,
            DEFAULT_ASSERTION_ISSUER,
            issued_at_ms,
            duration_ms,
        )?)
    }

    /// Encryption and HMAC keys for storage collections, derived from kB.
    pub fn key_bundle(&self) -> CloudResult<KeyBundle> {
        Ok(derive_key_bundle(self.account.kb.as_bytes())?)
    }

    /// Token server `X-Client-State`: a short digest of kB.
    pub fn client_state(&self) -> String {
        client_state(self.account.kb.as_bytes())
    }
}

/// Session is gone; the user must sign in again.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Separated {
    pub email: String,
    pub uid: String,
}

/// The server refuses this client version.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Doghouse {
    pub email: String,
    pub uid: String,
}

/// Persistent login state of one account.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "label", content = "state")]
pub enum AccountState {
    Engaged(Engaged),
    Cohabiting(Cohabiting),
    Married(Married),
    Separated(Separated),
    Doghouse(Doghouse),
}

impl AccountState {
    pub fn label(&self) -> StateLabel {
        match self {
            AccountState::Engaged(_) => StateLabel::Engaged,
            AccountState::Cohabiting(_) => StateLabel::Cohabiting,
            AccountState::Married(_) => StateLabel::Married,
            AccountState::Separated(_) => StateLabel::Separated,
            AccountState::Doghouse(_) => StateLabel::Doghouse,
        }
    }

    pub fn email(&self) -> &str {
        match self {
            AccountState::Engaged(s) => &s.email,
            AccountState::Cohabiting(s) => &s.email,
            AccountState::Married(s) => s.email(),
            AccountState::Separated(s) => &s.email,
            AccountState::Doghouse(s) => &s.email,
        }
    }

    pub fn uid(&self) -> &str {
        match self {
            AccountState::Engaged(s) => &s.uid,
            AccountState::Cohabiting(s) => &s.uid,
            AccountState::Married(s) => s.uid(),
            AccountState::Separated(s) => &s.uid,
            AccountState::Doghouse(s) => &s.uid,
        }
    }

    pub fn session_token(&self) -> Option<&str> {
        match self {
            AccountState::Engaged(s) => Some(&s.session_token),
            AccountState::Cohabiting(s) => Some(&s.session_token),
            AccountState::Married(s) => Some(&s.account.session_token),
            AccountState::Separated(_) | AccountState::Doghouse(_) => None,
        }
    }

    pub fn needed_action(&self) -> NeededAction {
        match self {
            AccountState::Engaged(s) if !s.verified => NeededAction::NeedsVerification,
            AccountState::Engaged(_) | AccountState::Cohabiting(_) | AccountState::Married(_) => {
                NeededAction::None
            }
            AccountState::Separated(_) => NeededAction::NeedsPassword,
            AccountState::Doghouse(_) => NeededAction::NeedsUpgrade,
        }
    }

    /// Demotes to Separated, discarding every credential.
    pub fn separated(&self) -> AccountState {
        AccountState::Separated(Separated {
            email: self.email().to_string(),
            uid: self.uid().to_string(),
        })
    }

    pub fn doghouse(&self) -> AccountState {
        AccountState::Doghouse(Doghouse {
            email: self.email().to_string(),
            uid: self.uid().to_string(),
        })
    }

    pub fn as_married(&self) -> Option<&Married> {
        match self {
            AccountState::Married(m) => Some(m),
            _ => None,
        }
    }
}

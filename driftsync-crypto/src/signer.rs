//! Per-request MAC signing for storage requests.
//!
//! The token server hands out a token id and a MAC key; every storage request
//! carries an `Authorization: Hawk ...` header whose MAC covers the timestamp,
//! nonce, method and request target. Timestamps are shifted by a fixed skew
//! chosen once per sync attempt.

use base64::{engine::general_purpose::STANDARD, Engine};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use zeroize::Zeroizing;

type HmacSha256 = Hmac<Sha256>;

/// Signs storage requests with a token's id/key pair.
#[derive(Clone)]
pub struct RequestSigner {
    id: String,
    key: Zeroizing<Vec<u8>>,
    skew_secs: i64,
}

impl std::fmt::Debug for RequestSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestSigner")
            .field("id", &self.id)
            .field("skew_secs", &self.skew_secs)
            .finish_non_exhaustive()
    }
}

impl RequestSigner {
    pub fn new(id: impl Into<String>, key: &[u8], skew_secs: i64) -> Self {
        Self {
            id: id.into(),
            key: Zeroizing::new(key.to_vec()),
            skew_secs,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn skew_secs(&self) -> i64 {
        self.skew_secs
    }

    /// Builds the authorization header for a request at local time `now_secs`.
    pub fn authorization_header(
        &self,
        method: &str,
        path_and_query: &str,
        host: &str,
        port: u16,
        now_secs: i64,
    ) -> String {
        let mut nonce = [0u8; 8];
        rand::rng().fill_bytes(&mut nonce);
        self.authorization_header_with_nonce(
            method,
            path_and_query,
            host,
            port,
            now_secs,
            &hex::encode(nonce),
        )
    }

    /// Deterministic variant of [`Self::authorization_header`].
    pub fn authorization_header_with_nonce(
        &self,
        method: &str,
        path_and_query: &str,
        host: &str,
        port: u16,
        now_secs: i64,
        nonce: &str,
    ) -> String {
        let ts = now_secs + self.skew_secs;
        let mac = self.mac(ts, nonce, method, path_and_query, host, port);
        format!(r#"Hawk id="{}", ts="{ts}", nonce="{nonce}", mac="{mac}""#, self.id)
    }

    fn mac(
        &self,
        ts: i64,
        nonce: &str,
        method: &str,
        path_and_query: &str,
        host: &str,
        port: u16,
    ) -> String {
        let normalized = format!(
            "hawk.1.header\n{ts}\n{nonce}\n{}\n{path_and_query}\n{}\n{port}\n\n\n",
            method.to_uppercase(),
            host.to_lowercase(),
        );
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.key)
            .expect("HMAC accepts keys of any length");
        mac.update(normalized.as_bytes());
        STANDARD.encode(mac.finalize().into_bytes())
    }
}

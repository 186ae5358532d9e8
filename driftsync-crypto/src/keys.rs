//! Account key derivation.
//!
//! `kB` is the account's class-B key: it never leaves the client in the clear
//! and is recovered by unwrapping the server-held `wrapKB` with a key derived
//! from the password. Storage encryption keys and the client-state tag are
//! derived from it with HKDF-SHA256.

use crate::error::{CryptoError, CryptoResult};
use hkdf::Hkdf;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of every symmetric key handled here.
pub const KEY_SIZE: usize = 32;

const STORAGE_INFO: &[u8] = b"driftsync/v1/storage";
const AUTH_PW_INFO: &[u8] = b"driftsync/v1/authPW";
const UNWRAP_KB_INFO: &[u8] = b"driftsync/v1/unwrapBkey";

/// Encryption + HMAC key pair handed to the storage engine.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct KeyBundle {
    #[serde(with = "hex_key")]
    pub encryption_key: [u8; KEY_SIZE],
    #[serde(with = "hex_key")]
    pub hmac_key: [u8; KEY_SIZE],
}

impl std::fmt::Debug for KeyBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("KeyBundle { .. }")
    }
}

/// Output of password quick-stretching.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct StretchedCredentials {
    /// Sent to the identity provider in place of the password.
    pub auth_pw: [u8; KEY_SIZE],
    /// Kept locally to unwrap `wrapKB`.
    pub unwrap_kb: [u8; KEY_SIZE],
}

fn hkdf_expand<const N: usize>(salt: &[u8], ikm: &[u8], info: &[u8]) -> CryptoResult<[u8; N]> {
    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
    let mut out = [0u8; N];
    hk.expand(info, &mut out)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok(out)
}

/// Derives the storage key bundle from `kB`.
pub fn derive_key_bundle(kb: &[u8; KEY_SIZE]) -> CryptoResult<KeyBundle> {
    let mut okm: [u8; 2 * KEY_SIZE] = hkdf_expand(&[], kb, STORAGE_INFO)?;
    let mut bundle = KeyBundle {
        encryption_key: [0u8; KEY_SIZE],
        hmac_key: [0u8; KEY_SIZE],
    };
    bundle.encryption_key.copy_from_slice(&okm[..KEY_SIZE]);
    bundle.hmac_key.copy_from_slice(&okm[KEY_SIZE..]);
    okm.zeroize();
    Ok(bundle)
}

/// Client-state tag sent to the token server: hex of the first 16 bytes of
/// `SHA-256(kB)`. A changed tag tells the server the client's keys changed.
pub fn client_state(kb: &[u8; KEY_SIZE]) -> String {
    let digest = Sha256::digest(kb);
    hex::encode(&digest[..16])
}

/// Stretches `password` (salted by the normalized email) into the
/// authentication value and the local unwrap key.
pub fn quick_stretch_password(email: &str, password: &str) -> CryptoResult<StretchedCredentials> {
    let salt = email.trim().to_lowercase();
    Ok(StretchedCredentials {
        auth_pw: hkdf_expand(salt.as_bytes(), password.as_bytes(), AUTH_PW_INFO)?,
        unwrap_kb: hkdf_expand(salt.as_bytes(), password.as_bytes(), UNWRAP_KB_INFO)?,
    })
}

/// Recovers `kB` from the server-held `wrapKB`.
pub fn unwrap_kb(wrap_kb: &[u8; KEY_SIZE], unwrap_key: &[u8; KEY_SIZE]) -> [u8; KEY_SIZE] {
    let mut kb = [0u8; KEY_SIZE];
    for (i, byte) in kb.iter_mut().enumerate() {
        *byte = wrap_kb[i] ^ unwrap_key[i];
    }
    kb
}

/// Serde adapter storing fixed-size keys as hex strings.
pub mod hex_key {
    use super::KEY_SIZE;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(key: &[u8; KEY_SIZE], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(key))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; KEY_SIZE], D::Error> {
        use serde::de::Error;

        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(D::Error::custom)?;
        bytes.try_into().map_err(|b: Vec<u8>| {
            D::Error::custom(format!("expected {KEY_SIZE} bytes, got {}", b.len()))
        })
    }
}

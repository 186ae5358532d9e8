//! Ed25519 signing key pairs used for certificate binding and assertions.

use crate::error::{CryptoError, CryptoResult};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Algorithm name advertised in public key descriptors and JWS headers.
pub const ALGORITHM: &str = "EdDSA";

/// Ed25519 keypair held by a Cohabiting or Married account.
///
/// The secret key is zeroized on drop (from ed25519-dalek).
#[derive(Clone)]
pub struct SigningKeyPair {
    secret: SigningKey,
}

impl SigningKeyPair {
    /// Returns the public key as raw 32-byte array.
    pub fn public_bytes(&self) -> [u8; 32] {
        self.secret.verifying_key().to_bytes()
    }

    /// Returns the secret key as raw 32-byte array.
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.secret.to_bytes()
    }

    /// Reconstructs a keypair from raw secret key bytes.
    pub fn from_secret_bytes(bytes: [u8; 32]) -> Self {
        Self {
            secret: SigningKey::from_bytes(&bytes),
        }
    }

    /// Public key descriptor sent to the identity provider when asking for a
    /// certificate.
    pub fn public_key_json(&self) -> serde_json::Value {
        serde_json::json!({
            "algorithm": ALGORITHM,
            "publicKey": URL_SAFE_NO_PAD.encode(self.public_bytes()),
        })
    }

    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.secret.sign(message).to_bytes().to_vec()
    }

    pub fn verify(&self, message: &[u8], signature: &[u8]) -> CryptoResult<()> {
        verify_with_public_key(&self.public_bytes(), message, signature)
    }
}

impl std::fmt::Debug for SigningKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKeyPair")
            .field("public", &hex::encode(self.public_bytes()))
            .finish_non_exhaustive()
    }
}

impl PartialEq for SigningKeyPair {
    fn eq(&self, other: &Self) -> bool {
        self.public_bytes() == other.public_bytes()
    }
}

impl Eq for SigningKeyPair {}

#[derive(Serialize, Deserialize)]
struct StoredKeyPair {
    algorithm: String,
    secret: String,
}

impl Serialize for SigningKeyPair {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        StoredKeyPair {
            algorithm: ALGORITHM.to_string(),
            secret: hex::encode(self.secret_bytes()),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SigningKeyPair {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use serde::de::Error;

        let stored = StoredKeyPair::deserialize(deserializer)?;
        if stored.algorithm != ALGORITHM {
            return Err(D::Error::custom(format!(
                "unsupported key algorithm: {}",
                stored.algorithm
            )));
        }
        let bytes = hex::decode(&stored.secret).map_err(D::Error::custom)?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| D::Error::custom("secret key must be 32 bytes"))?;
        Ok(Self::from_secret_bytes(bytes))
    }
}

/// Generates a new Ed25519 keypair from the OS random source.
pub fn generate_signing_keypair() -> SigningKeyPair {
    let mut seed = [0u8; 32];
    rand::rng().fill_bytes(&mut seed);
    let keypair = SigningKeyPair::from_secret_bytes(seed);
    zeroize::Zeroize::zeroize(&mut seed);
    keypair
}

/// Parses a public key descriptor produced by [`SigningKeyPair::public_key_json`].
pub fn public_key_from_json(value: &serde_json::Value) -> CryptoResult<[u8; 32]> {
    let algorithm = value
        .get("algorithm")
        .and_then(|a| a.as_str())
        .ok_or_else(|| CryptoError::InvalidKey("public key missing algorithm".to_string()))?;
    if algorithm != ALGORITHM {
        return Err(CryptoError::InvalidKey(format!(
            "unsupported public key algorithm: {algorithm}"
        )));
    }
    let encoded = value
        .get("publicKey")
        .and_then(|k| k.as_str())
        .ok_or_else(|| CryptoError::InvalidKey("public key missing key bytes".to_string()))?;
    let bytes = URL_SAFE_NO_PAD.decode(encoded)?;
    bytes.try_into().map_err(|b: Vec<u8>| {
        CryptoError::InvalidKey(format!(
            "invalid public key length: expected 32, got {}",
            b.len()
        ))
    })
}

/// Verifies an Ed25519 signature against raw public key bytes.
pub fn verify_with_public_key(
    public_key: &[u8; 32],
    message: &[u8],
    signature: &[u8],
) -> CryptoResult<()> {
    let key = VerifyingKey::from_bytes(public_key)
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    let signature = Signature::from_slice(signature)
        .map_err(|e| CryptoError::Verification(e.to_string()))?;
    key.verify(message, &signature)
        .map_err(|e| CryptoError::Verification(e.to_string()))
}

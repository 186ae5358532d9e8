//! Identity certificates and backed assertions.
//!
//! Both are compact JWS tokens (`header.payload.signature`, base64url without
//! padding) signed with Ed25519. A backed assertion is the certificate and
//! the assertion joined with `~`.

use crate::error::{CryptoError, CryptoResult};
use crate::keypair::{public_key_from_json, verify_with_public_key, SigningKeyPair, ALGORITHM};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Issuer claimed by client-generated assertions.
pub const DEFAULT_ASSERTION_ISSUER: &str = "127.0.0.1";

/// Claims of a certificate issued by the identity provider.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CertificateClaims {
    pub iss: String,
    pub principal: String,
    #[serde(rename = "public-key")]
    pub public_key: serde_json::Value,
    /// Issued-at, milliseconds since epoch.
    pub iat: u64,
    /// Expiry, milliseconds since epoch.
    pub exp: u64,
}

/// Claims of a client-signed assertion.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssertionClaims {
    pub aud: String,
    pub iss: String,
    pub iat: u64,
    pub exp: u64,
}

/// A decoded `certificate~assertion` pair.
#[derive(Clone, Debug, PartialEq)]
pub struct BackedAssertion {
    pub certificate: CertificateClaims,
    pub assertion: AssertionClaims,
}

#[derive(Serialize, Deserialize)]
struct JwsHeader {
    alg: String,
}

fn encode_jws(keypair: &SigningKeyPair, claims: &impl Serialize) -> CryptoResult<String> {
    let header = serde_json::to_vec(&JwsHeader {
        alg: ALGORITHM.to_string(),
    })?;
    let payload = serde_json::to_vec(claims)?;
    let signing_input = format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(header),
        URL_SAFE_NO_PAD.encode(payload)
    );
    let signature = keypair.sign(signing_input.as_bytes());
    Ok(format!("{signing_input}.{}", URL_SAFE_NO_PAD.encode(signature)))
}

struct DecodedJws<T> {
    claims: T,
    signing_input: String,
    signature: Vec<u8>,
}

fn decode_jws<T: DeserializeOwned>(token: &str) -> CryptoResult<DecodedJws<T>> {
    let mut parts = token.split('.');
    let (Some(header), Some(payload), Some(signature), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(CryptoError::MalformedAssertion(
            "expected three dot-separated segments".to_string(),
        ));
    };

    let header: JwsHeader = serde_json::from_slice(&URL_SAFE_NO_PAD.decode(header)?)?;
    if header.alg != ALGORITHM {
        return Err(CryptoError::MalformedAssertion(format!(
            "unsupported algorithm: {}",
            header.alg
        )));
    }

    Ok(DecodedJws {
        claims: serde_json::from_slice(&URL_SAFE_NO_PAD.decode(payload)?)?,
        signing_input: token[..token.len() - signature.len() - 1].to_string(),
        signature: URL_SAFE_NO_PAD.decode(signature)?,
    })
}

/// Issues a certificate binding `subject_public_key` to `principal`.
///
/// This is the identity provider's half of the protocol; clients only hold
/// certificates they were given.
pub fn issue_certificate(
    issuer_key: &SigningKeyPair,
    issuer: &str,
    principal: &str,
    subject_public_key: &serde_json::Value,
    issued_at_ms: u64,
    duration_ms: u64,
) -> CryptoResult<String> {
    public_key_from_json(subject_public_key)?;
    encode_jws(
        issuer_key,
        &CertificateClaims {
            iss: issuer.to_string(),
            principal: principal.to_string(),
            public_key: subject_public_key.clone(),
            iat: issued_at_ms,
            exp: issued_at_ms.saturating_add(duration_ms),
        },
    )
}

/// Signs an assertion for `audience` and bundles it with `certificate`.
///
/// The caller picks `issued_at_ms`; clock skew against the relying party is
/// applied there.
pub fn generate_assertion(
    keypair: &SigningKeyPair,
    certificate: &str,
    audience: &str,
    issuer: &str,
    issued_at_ms: u64,
    duration_ms: u64,
) -> CryptoResult<String> {
    if certificate.is_empty() {
        return Err(CryptoError::MalformedAssertion(
            "certificate must not be empty".to_string(),
        ));
    }
    let assertion = encode_jws(
        keypair,
        &AssertionClaims {
            aud: audience.to_string(),
            iss: issuer.to_string(),
            iat: issued_at_ms,
            exp: issued_at_ms.saturating_add(duration_ms),
        },
    )?;
    Ok(format!("{certificate}~{assertion}"))
}

/// Returns the expiry of a certificate in milliseconds since epoch, without
/// verifying its signature.
pub fn certificate_expires_at(certificate: &str) -> CryptoResult<u64> {
    let decoded: DecodedJws<CertificateClaims> = decode_jws(certificate)?;
    Ok(decoded.claims.exp)
}

fn split_backed(backed: &str) -> CryptoResult<(&str, &str)> {
    backed.split_once('~').ok_or_else(|| {
        CryptoError::MalformedAssertion("missing certificate separator".to_string())
    })
}

/// Decodes a backed assertion without checking any signature.
pub fn decode_backed_assertion(backed: &str) -> CryptoResult<BackedAssertion> {
    let (certificate, assertion) = split_backed(backed)?;
    let certificate: DecodedJws<CertificateClaims> = decode_jws(certificate)?;
    let assertion: DecodedJws<AssertionClaims> = decode_jws(assertion)?;
    Ok(BackedAssertion {
        certificate: certificate.claims,
        assertion: assertion.claims,
    })
}

/// Fully verifies a backed assertion: certificate signature against the
/// issuer key, assertion signature against the certified key, audience and
/// both validity windows.
pub fn verify_backed_assertion(
    backed: &str,
    issuer_public_key: &[u8; 32],
    audience: &str,
    now_ms: u64,
) -> CryptoResult<BackedAssertion> {
    let (certificate, assertion) = split_backed(backed)?;

    let certificate: DecodedJws<CertificateClaims> = decode_jws(certificate)?;
    verify_with_public_key(
        issuer_public_key,
        certificate.signing_input.as_bytes(),
        &certificate.signature,
    )?;
    if now_ms >= certificate.claims.exp {
        return Err(CryptoError::Expired {
            expired_at_ms: certificate.claims.exp,
            now_ms,
        });
    }

    let subject_key = public_key_from_json(&certificate.claims.public_key)?;
    let assertion: DecodedJws<AssertionClaims> = decode_jws(assertion)?;
    verify_with_public_key(
        &subject_key,
        assertion.signing_input.as_bytes(),
        &assertion.signature,
    )?;
    if assertion.claims.aud != audience {
        return Err(CryptoError::AudienceMismatch {
            expected: audience.to_string(),
            actual: assertion.claims.aud,
        });
    }
    if now_ms >= assertion.claims.exp {
        return Err(CryptoError::Expired {
            expired_at_ms: assertion.claims.exp,
            now_ms,
        });
    }

    Ok(BackedAssertion {
        certificate: certificate.claims,
        assertion: assertion.claims,
    })
}

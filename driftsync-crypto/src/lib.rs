//! Cryptographic building blocks for driftsync.
//!
//! Provides the key material an authenticated account carries around:
//! - Ed25519 signing key pairs for proof-of-possession
//! - Identity certificates and backed assertions (compact JWS, base64url)
//! - Storage key bundles and client-state derivation (HKDF-SHA256)
//! - Password quick-stretching for sign-in
//! - Per-request MAC signing with skew-adjusted timestamps
//!
//! # Assertions
//!
//! An identity provider signs a certificate binding the account's public key
//! to its principal. The client then signs a short-lived assertion for a
//! relying party (the token server) with the matching secret key, and presents
//! `certificate~assertion` instead of raw credentials.

pub mod assertion;
mod error;
pub mod keypair;
pub mod keys;
pub mod signer;

pub use assertion::{
    certificate_expires_at, decode_backed_assertion, generate_assertion, issue_certificate,
    verify_backed_assertion, AssertionClaims, BackedAssertion, CertificateClaims,
    DEFAULT_ASSERTION_ISSUER,
};
pub use error::{CryptoError, CryptoResult};
pub use keypair::{generate_signing_keypair, SigningKeyPair};
pub use keys::{
    client_state, derive_key_bundle, quick_stretch_password, unwrap_kb, KeyBundle,
    StretchedCredentials, KEY_SIZE,
};
pub use signer::RequestSigner;

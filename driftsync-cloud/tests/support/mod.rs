//! Shared fakes for login, token and orchestrator tests.

#![allow(dead_code)]

use async_trait::async_trait;
use driftsync_cloud::account::{AccountState, Cohabiting, Engaged, Married, Secret32};
use driftsync_cloud::auth_client::AuthClient;
use driftsync_cloud::clock::{Clock, ManualClock};
use driftsync_cloud::error::{
    CloudError, CloudResult, ERRNO_ENDPOINT_RETIRED, ERRNO_INVALID_AUTHENTICATION_TOKEN,
    ERRNO_UNVERIFIED_ACCOUNT,
};
use driftsync_cloud::storage::{StorageEngine, StorageOutcome, StorageSession};
use driftsync_cloud::types::{KeysResponse, LoginResponse, RecoveryEmailStatus};
use driftsync_crypto::{generate_signing_keypair, issue_certificate, SigningKeyPair};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const NOW_MS: u64 = 1_700_000_000_000;
pub const HOUR_MS: u64 = 60 * 60 * 1000;
pub const EMAIL: &str = "alice@example.com";
pub const UID: &str = "0f7aa5d1c0a34b8e";
pub const UNWRAP_KB: [u8; 32] = [9; 32];
pub const KA: [u8; 32] = [1; 32];
pub const KB: [u8; 32] = [2; 32];

pub fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(NOW_MS))
}

// ── Account fixtures ──

pub fn engaged(verified: bool) -> AccountState {
    AccountState::Engaged(Engaged {
        email: EMAIL.into(),
        uid: UID.into(),
        verified,
        session_token: "session-token".into(),
        key_fetch_token: "key-fetch-token".into(),
        unwrap_kb: Secret32(UNWRAP_KB),
    })
}

pub fn cohabiting() -> Cohabiting {
    Cohabiting {
        email: EMAIL.into(),
        uid: UID.into(),
        session_token: "session-token".into(),
        ka: Secret32(KA),
        kb: Secret32(KB),
        key_pair: generate_signing_keypair(),
    }
}

/// A Married account whose certificate runs from `issued_at_ms` for `duration_ms`.
pub fn married(issuer: &SigningKeyPair, issued_at_ms: u64, duration_ms: u64) -> Married {
    let account = cohabiting();
    let cert = issue_certificate(
        issuer,
        "id.example.com",
        &format!("{UID}@id.example.com"),
        &account.key_pair.public_key_json(),
        issued_at_ms,
        duration_ms,
    )
    .expect("certificate");
    account.with_certificate(cert)
}

// ── Identity provider fake ──

/// Canned identity provider failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fail {
    InvalidToken,
    Unverified,
    UpgradeRequired,
    ServerError,
}

impl Fail {
    pub fn to_error(self) -> CloudError {
        let (status, errno) = match self {
            Fail::InvalidToken => (401, ERRNO_INVALID_AUTHENTICATION_TOKEN),
            Fail::Unverified => (400, ERRNO_UNVERIFIED_ACCOUNT),
            Fail::UpgradeRequired => (410, ERRNO_ENDPOINT_RETIRED),
            Fail::ServerError => (503, 999),
        };
        CloudError::Remote {
            status,
            errno,
            message: format!("{self:?}"),
        }
    }
}

pub struct FakeAuthClient {
    pub issuer: SigningKeyPair,
    clock: Arc<dyn Clock>,
    pub verified: AtomicBool,
    keys_failure: Mutex<Option<Fail>>,
    sign_failure: Mutex<Option<Fail>>,
    calls: Mutex<Vec<&'static str>>,
}

impl FakeAuthClient {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            issuer: generate_signing_keypair(),
            clock,
            verified: AtomicBool::new(true),
            keys_failure: Mutex::new(None),
            sign_failure: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_keys(&self, fail: Fail) {
        *self.keys_failure.lock().unwrap() = Some(fail);
    }

    pub fn fail_sign(&self, fail: Fail) {
        *self.sign_failure.lock().unwrap() = Some(fail);
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: &'static str) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl AuthClient for FakeAuthClient {
    async fn login(&self, _email: &str, _auth_pw: &[u8; 32]) -> CloudResult<LoginResponse> {
        self.record("login");
        Ok(LoginResponse {
            uid: UID.into(),
            session_token: "session-token".into(),
            key_fetch_token: "key-fetch-token".into(),
            verified: self.verified.load(Ordering::SeqCst),
        })
    }

    async fn fetch_keys(&self, _key_fetch_token: &str) -> CloudResult<KeysResponse> {
        self.record("fetch_keys");
        if let Some(fail) = *self.keys_failure.lock().unwrap() {
            return Err(fail.to_error());
        }
        let wrap_kb: Vec<u8> = KB.iter().zip(UNWRAP_KB.iter()).map(|(a, b)| a ^ b).collect();
        Ok(KeysResponse {
            ka: hex::encode(KA),
            wrap_kb: hex::encode(wrap_kb),
        })
    }

    async fn sign_certificate(
        &self,
        _session_token: &str,
        public_key: &serde_json::Value,
        duration_ms: u64,
    ) -> CloudResult<String> {
        self.record("sign_certificate");
        if let Some(fail) = *self.sign_failure.lock().unwrap() {
            return Err(fail.to_error());
        }
        Ok(issue_certificate(
            &self.issuer,
            "id.example.com",
            &format!("{UID}@id.example.com"),
            public_key,
            self.clock.now_millis(),
            duration_ms,
        )?)
    }

    async fn recovery_email_status(&self, _session_token: &str) -> CloudResult<RecoveryEmailStatus> {
        self.record("recovery_email_status");
        Ok(RecoveryEmailStatus {
            email: Some(EMAIL.into()),
            verified: self.verified.load(Ordering::SeqCst),
        })
    }

    async fn resend_verification_code(&self, _session_token: &str) -> CloudResult<()> {
        self.record("resend_verification_code");
        Ok(())
    }
}

// ── Storage engine fake ──

#[derive(Clone, Debug)]
pub enum Script {
    Success { other_clients: usize },
    Error(String),
    Abort(String),
    Unauthorized,
    UpgradeRequired,
    /// Records a storage backoff through the session, then aborts.
    BackOff(Duration),
    Panic,
}

#[derive(Clone, Debug, Default)]
pub struct SeenSession {
    pub uid: String,
    pub host: String,
    pub skew_secs: i64,
    pub forced: bool,
}

pub struct ScriptedStorage {
    script: Script,
    calls: AtomicUsize,
    last: Mutex<Option<SeenSession>>,
}

impl ScriptedStorage {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            calls: AtomicUsize::new(0),
            last: Mutex::new(None),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_session(&self) -> Option<SeenSession> {
        self.last.lock().unwrap().clone()
    }
}

#[async_trait]
impl StorageEngine for ScriptedStorage {
    async fn sync(&self, session: StorageSession) -> StorageOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last.lock().unwrap() = Some(SeenSession {
            uid: session.uid.clone(),
            host: session.host().to_string(),
            skew_secs: session.skew_secs(),
            forced: session.forced,
        });
        match &self.script {
            Script::Success { other_clients } => StorageOutcome::Success {
                other_clients: *other_clients,
            },
            Script::Error(msg) => StorageOutcome::Error(anyhow::anyhow!(msg.clone())),
            Script::Abort(reason) => StorageOutcome::Aborted {
                reason: reason.clone(),
            },
            Script::Unauthorized => StorageOutcome::Unauthorized,
            Script::UpgradeRequired => StorageOutcome::UpgradeRequired,
            Script::BackOff(delay) => {
                session.request_backoff(*delay).expect("ledger write");
                StorageOutcome::Aborted {
                    reason: "server requested backoff".into(),
                }
            }
            Script::Panic => panic!("storage engine exploded"),
        }
    }
}

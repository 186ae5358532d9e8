//! Seam between authentication and the storage sync engine.
//!
//! Once the orchestrator holds a token it builds a [`StorageSession`] and
//! hands it to a [`StorageEngine`]. The engine never sees account state; it
//! gets signed-request credentials, the key bundle for its collections, and
//! a way to report server backoff.

use crate::backoff::{purpose, BackoffLedger};
use crate::error::CloudResult;
use crate::response::{server_timestamp_millis, ResponseBackoffSignal};
use crate::schedule::SchedulePolicy;
use async_trait::async_trait;
use driftsync_crypto::{KeyBundle, RequestSigner};
use reqwest::header::HeaderMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// How a storage sync ended.
#[derive(Debug)]
pub enum StorageOutcome {
    /// Finished; `other_clients` counts the other devices seen on the account.
    Success { other_clients: usize },
    Error(anyhow::Error),
    /// Stopped early without a server verdict (backoff, shutdown, ...).
    Aborted { reason: String },
    /// The storage server rejected the token.
    Unauthorized,
    /// The storage server refuses this client version.
    UpgradeRequired,
}

/// Credentials and context for one storage sync.
pub struct StorageSession {
    pub uid: String,
    pub endpoint: Url,
    pub signer: RequestSigner,
    pub key_bundle: KeyBundle,
    pub forced: bool,
    host: String,
    ledger: Arc<BackoffLedger>,
    schedule: SchedulePolicy,
}

impl std::fmt::Debug for StorageSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageSession")
            .field("uid", &self.uid)
            .field("endpoint", &self.endpoint.as_str())
            .field("signer", &self.signer)
            .field("forced", &self.forced)
            .finish_non_exhaustive()
    }
}

impl StorageSession {
    pub(crate) fn new(
        uid: String,
        endpoint: Url,
        signer: RequestSigner,
        key_bundle: KeyBundle,
        forced: bool,
        ledger: Arc<BackoffLedger>,
        schedule: SchedulePolicy,
    ) -> Self {
        let host = endpoint.host_str().unwrap_or_default().to_ascii_lowercase();
        Self {
            uid,
            endpoint,
            signer,
            key_bundle,
            forced,
            host,
            ledger,
            schedule,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn skew_secs(&self) -> i64 {
        self.signer.skew_secs()
    }

    /// True while a storage backoff set during this sync is still running.
    pub fn should_back_off(&self) -> CloudResult<bool> {
        Ok(!self.ledger.should_proceed(&purpose::storage(&self.host), false)?)
    }

    /// Records a server-requested delay against this storage host and the scheduler.
    pub fn request_backoff(&self, delay: Duration) -> CloudResult<()> {
        debug!("storage host {} requested backoff of {}s", self.host, delay.as_secs());
        self.ledger.extend(&purpose::storage(&self.host), delay)?;
        self.schedule.configure_backoff_on_backoff(delay)
    }

    /// Feeds one storage response's headers into the ledger: backoff
    /// directives and the server clock. Returns the backoff applied, if any.
    pub fn observe_response(&self, status: u16, headers: &HeaderMap) -> CloudResult<Option<Duration>> {
        if let Some(server_ms) = server_timestamp_millis(headers) {
            self.ledger.record_skew_from_timestamp(&self.host, server_ms);
        }
        let signal = ResponseBackoffSignal::parse(status, headers, self.ledger.now_millis());
        match signal.total_backoff() {
            Some(delay) if !delay.is_zero() => {
                self.request_backoff(delay)?;
                Ok(Some(delay))
            }
            _ => Ok(None),
        }
    }
}

/// The storage sync that runs once authentication succeeded.
#[async_trait]
pub trait StorageEngine: Send + Sync {
    async fn sync(&self, session: StorageSession) -> StorageOutcome;
}

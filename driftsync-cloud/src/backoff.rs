//! Backoff and clock-skew ledger.
//!
//! Each purpose (scheduler, token server, one storage host) owns an
//! "earliest next request" deadline in wall-clock milliseconds. Deadlines are
//! persisted through a [`KeyValueStore`] so they survive restarts, and only
//! ever move forward through [`BackoffLedger::extend`]. Skew estimates are
//! per host and kept in memory.

use crate::clock::{duration_millis, Clock};
use crate::error::{CloudError, CloudResult};
use crate::store::KeyValueStore;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

/// Ledger purpose keys.
pub mod purpose {
    /// Rate limit between sync attempts.
    pub const SCHEDULER: &str = "scheduler";
    /// Backoff requested by the token server.
    pub const TOKEN_SERVER: &str = "token";

    /// Backoff requested by a storage host. Host names compare case-insensitively.
    pub fn storage(host: &str) -> String {
        format!("storage:{}", host.to_ascii_lowercase())
    }
}

const LAST_STORAGE_HOST_KEY: &str = "storage.last_host";

fn deadline_key(purpose: &str) -> String {
    format!("backoff.{purpose}.earliest_next_request")
}

/// Owner of every backoff deadline and skew estimate for one account.
pub struct BackoffLedger {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    /// Serializes read-modify-write of deadlines.
    write_lock: Mutex<()>,
    skews: Mutex<HashMap<String, i64>>,
}

impl std::fmt::Debug for BackoffLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackoffLedger").field("clock", &self.clock).finish_non_exhaustive()
    }
}

impl BackoffLedger {
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            write_lock: Mutex::new(()),
            skews: Mutex::new(HashMap::new()),
        }
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    pub fn now_millis(&self) -> u64 {
        self.clock.now_millis()
    }

    // ── Deadlines ──

    /// Persisted deadline for `purpose`, if any. Unparseable values count as absent.
    pub fn earliest_next_request(&self, purpose: &str) -> CloudResult<Option<u64>> {
        let Some(raw) = self.store.get(&deadline_key(purpose))? else {
            return Ok(None);
        };
        match raw.parse::<u64>() {
            Ok(at) => Ok(Some(at)),
            Err(_) => {
                warn!("ignoring malformed backoff deadline for {purpose}: {raw:?}");
                Ok(None)
            }
        }
    }

    /// Time left before `purpose` may be contacted again; zero when free.
    pub fn delay_remaining(&self, purpose: &str) -> CloudResult<Duration> {
        let now = self.clock.now_millis();
        Ok(match self.earliest_next_request(purpose)? {
            Some(at) if at > now => Duration::from_millis(at - now),
            _ => Duration::ZERO,
        })
    }

    /// True once the deadline is reached (a deadline equal to now allows the
    /// request). A `forced` request always proceeds.
    pub fn should_proceed(&self, purpose: &str, forced: bool) -> CloudResult<bool> {
        if forced {
            return Ok(true);
        }
        Ok(self.delay_remaining(purpose)?.is_zero())
    }

    /// Pushes the deadline to at least `now + delay`. Never shortens it.
    pub fn extend(&self, purpose: &str, delay: Duration) -> CloudResult<u64> {
        let _guard = self.write_lock.lock().map_err(|e| CloudError::Storage(e.to_string()))?;
        let proposed = self.clock.now_millis().saturating_add(duration_millis(delay));
        let current = self.earliest_next_request(purpose)?.unwrap_or(0);
        if proposed <= current {
            return Ok(current);
        }
        self.store.set(&deadline_key(purpose), &proposed.to_string())?;
        debug!("backoff for {purpose} extended to {proposed} (+{}ms)", delay.as_millis());
        Ok(proposed)
    }

    pub fn clear(&self, purpose: &str) -> CloudResult<()> {
        let _guard = self.write_lock.lock().map_err(|e| CloudError::Storage(e.to_string()))?;
        self.store.remove(&deadline_key(purpose))
    }

    // ── Storage host tracking ──

    pub fn last_storage_host(&self) -> CloudResult<Option<String>> {
        self.store.get(LAST_STORAGE_HOST_KEY)
    }

    pub fn set_last_storage_host(&self, host: &str) -> CloudResult<()> {
        self.store.set(LAST_STORAGE_HOST_KEY, &host.to_ascii_lowercase())
    }

    /// Records `host` as the current storage host. When it differs from the
    /// previous one, the previous host's backoff is dropped. Returns whether
    /// the host changed.
    pub fn switch_storage_host(&self, host: &str) -> CloudResult<bool> {
        let previous = self.last_storage_host()?;
        match previous {
            Some(prev) if prev.eq_ignore_ascii_case(host) => Ok(false),
            Some(prev) => {
                debug!("storage host changed from {prev} to {host}; dropping old backoff");
                self.clear(&purpose::storage(&prev))?;
                self.set_last_storage_host(host)?;
                Ok(true)
            }
            None => {
                self.set_last_storage_host(host)?;
                Ok(true)
            }
        }
    }

    // ── Clock skew ──

    /// Stores `server - local` in seconds for `host`.
    pub fn record_skew(&self, host: &str, skew_secs: i64) {
        if let Ok(mut skews) = self.skews.lock() {
            skews.insert(host.to_ascii_lowercase(), skew_secs);
        }
    }

    /// Derives skew from a server timestamp observed now and records it.
    /// Timestamps that do not fit an `i64` are ignored and the previous skew
    /// is kept.
    pub fn record_skew_from_timestamp(&self, host: &str, server_millis: u64) -> i64 {
        let delta_ms = i64::try_from(server_millis)
            .ok()
            .zip(i64::try_from(self.clock.now_millis()).ok())
            .and_then(|(server, local)| server.checked_sub(local));
        let Some(delta_ms) = delta_ms else {
            warn!("ignoring out-of-range server timestamp {server_millis} from {host}");
            return self.skew_secs(host);
        };
        let skew_secs = delta_ms / 1000;
        self.record_skew(host, skew_secs);
        skew_secs
    }

    /// Last recorded skew for `host`, or zero.
    pub fn skew_secs(&self, host: &str) -> i64 {
        self.skews
            .lock()
            .ok()
            .and_then(|skews| skews.get(&host.to_ascii_lowercase()).copied())
            .unwrap_or(0)
    }

    pub fn skew_millis(&self, host: &str) -> i64 {
        self.skew_secs(host).saturating_mul(1000)
    }

    /// Local time corrected by the skew recorded for `host`.
    pub fn adjusted_now_millis(&self, host: &str) -> u64 {
        let now = self.clock.now_millis();
        let skew = self.skew_millis(host);
        if skew >= 0 {
            now.saturating_add(skew.unsigned_abs())
        } else {
            now.saturating_sub(skew.unsigned_abs())
        }
    }
}

//! When the next sync may and should happen.
//!
//! [`SchedulePolicy`] writes rate limits and server-requested backoff into the
//! [`BackoffLedger`], and tells the host's [`PeriodicScheduler`] how often to
//! wake us up based on how the last attempt went.

use crate::account::NeededAction;
use crate::backoff::{purpose, BackoffLedger};
use crate::config::SyncConfig;
use crate::error::CloudResult;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

/// Host-side periodic trigger. `None` disables periodic syncs.
pub trait PeriodicScheduler: Send + Sync {
    fn set_periodic_interval(&self, interval: Option<Duration>);
}

/// Scheduler that only logs.
#[derive(Debug, Default)]
pub struct LoggingScheduler;

impl PeriodicScheduler for LoggingScheduler {
    fn set_periodic_interval(&self, interval: Option<Duration>) {
        debug!("periodic sync interval requested: {interval:?}");
    }
}

/// Scheduler that remembers every request; handy for assertions.
#[derive(Debug, Default)]
pub struct RecordingScheduler {
    requests: Mutex<Vec<Option<Duration>>>,
}

impl RecordingScheduler {
    pub fn requests(&self) -> Vec<Option<Duration>> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl PeriodicScheduler for RecordingScheduler {
    fn set_periodic_interval(&self, interval: Option<Duration>) {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(interval);
        }
    }
}

#[derive(Clone)]
pub struct SchedulePolicy {
    ledger: Arc<BackoffLedger>,
    scheduler: Arc<dyn PeriodicScheduler>,
    rate_limit: Duration,
    single_device_interval: Duration,
    multi_device_interval: Duration,
    unverified_interval: Duration,
}

impl SchedulePolicy {
    pub fn new(config: &SyncConfig, ledger: Arc<BackoffLedger>, scheduler: Arc<dyn PeriodicScheduler>) -> Self {
        Self {
            ledger,
            scheduler,
            rate_limit: config.scheduler_rate_limit(),
            single_device_interval: Duration::from_secs(config.single_device_interval_secs),
            multi_device_interval: Duration::from_secs(config.multi_device_interval_secs),
            unverified_interval: Duration::from_secs(config.unverified_interval_secs),
        }
    }

    /// Forward-dates the scheduler deadline so the next attempt waits at least
    /// the rate limit, whatever this attempt's outcome.
    pub fn configure_backoff_before_syncing(&self) -> CloudResult<()> {
        self.ledger.extend(purpose::SCHEDULER, self.rate_limit)?;
        Ok(())
    }

    /// A server asked us to back off; the scheduler honours it too.
    pub fn configure_backoff_on_backoff(&self, requested: Duration) -> CloudResult<()> {
        self.ledger.extend(purpose::SCHEDULER, requested)?;
        Ok(())
    }

    pub fn on_successful_sync(&self, other_clients: usize) {
        let interval = if other_clients > 0 {
            self.multi_device_interval
        } else {
            self.single_device_interval
        };
        self.scheduler.set_periodic_interval(Some(interval));
    }

    /// The server refuses this client version; periodic syncs are pointless.
    pub fn on_upgrade_required(&self) {
        info!("client upgrade required; disabling periodic sync");
        self.scheduler.set_periodic_interval(None);
    }

    /// The storage server rejected our token. Keep syncing, but only at the
    /// single-device cadence until a sync succeeds again.
    pub fn on_unauthorized(&self) {
        info!("storage token rejected; falling back to the slow sync interval");
        self.scheduler.set_periodic_interval(Some(self.single_device_interval));
    }

    /// Reacts to where the login state machine left the account.
    pub fn on_handle_final(&self, action: NeededAction) {
        match action {
            NeededAction::NeedsVerification => {
                self.scheduler.set_periodic_interval(Some(self.unverified_interval));
            }
            NeededAction::NeedsPassword | NeededAction::NeedsUpgrade => {
                self.scheduler.set_periodic_interval(None);
            }
            NeededAction::None => {}
        }
    }
}

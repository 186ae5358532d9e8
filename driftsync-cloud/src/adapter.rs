//! Blocking front end for hosts that need a synchronous verdict.
//!
//! The adapter owns a tokio runtime. `perform_sync` spawns one attempt on it
//! and parks the calling thread until the attempt reports its outcome.
//! Attempts for the account are serialized.

use crate::account::AccountState;
use crate::completion::{completion, Abandoned};
use crate::error::{CloudError, CloudResult};
use crate::logging::init_tracing;
use crate::orchestrator::SyncOrchestrator;
use crate::types::{SyncExtras, SyncOutcome};
use std::sync::{Arc, Mutex};
use tokio::runtime::Runtime;
use tracing::error;

pub struct SyncAdapter {
    runtime: Runtime,
    orchestrator: Arc<SyncOrchestrator>,
    serial: Mutex<()>,
}

impl SyncAdapter {
    pub fn new(orchestrator: SyncOrchestrator) -> CloudResult<Self> {
        init_tracing();
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("driftsync-sync")
            .build()
            .map_err(|e| CloudError::Config(format!("failed to start runtime: {e}")))?;
        Ok(Self {
            runtime,
            orchestrator: Arc::new(orchestrator),
            serial: Mutex::new(()),
        })
    }

    pub fn orchestrator(&self) -> &Arc<SyncOrchestrator> {
        &self.orchestrator
    }

    /// Runs one attempt and blocks until it finishes.
    ///
    /// Must not be called from inside an async context.
    pub fn perform_sync(&self, extras: SyncExtras) -> SyncOutcome {
        let _serial = self.serial.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let (done, waiter) = completion();
        let orchestrator = Arc::clone(&self.orchestrator);
        self.runtime.spawn(async move {
            let outcome = orchestrator.run_once(&extras).await;
            done.complete(outcome);
        });

        match waiter.wait_blocking() {
            Ok(outcome) => outcome,
            Err(Abandoned) => {
                error!("sync task ended without reporting an outcome");
                SyncOutcome::Recoverable {
                    reason: "sync task ended without reporting an outcome".to_string(),
                }
            }
        }
    }

    pub fn sign_in(&self, email: &str, password: &str) -> CloudResult<AccountState> {
        self.runtime.block_on(self.orchestrator.sign_in(email, password))
    }

    pub fn resend_verification(&self) -> CloudResult<()> {
        self.runtime.block_on(self.orchestrator.resend_verification())
    }
}

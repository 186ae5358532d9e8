//! User-facing "action needed" notifications.

use crate::account::{NeededAction, StateLabel};
use crate::logging::obfuscate_email;
use std::sync::Mutex;
use tracing::info;

pub trait SyncNotifier: Send + Sync {
    /// The account needs `action` before it can sync again.
    fn notify_needs_action(&self, email: &str, label: StateLabel, action: NeededAction);

    /// The account is healthy; withdraw any outstanding notice.
    fn clear(&self);
}

#[derive(Debug, Default)]
pub struct LoggingNotifier;

impl SyncNotifier for LoggingNotifier {
    fn notify_needs_action(&self, email: &str, label: StateLabel, action: NeededAction) {
        info!("{} ({label}) needs action: {action}", obfuscate_email(email));
    }

    fn clear(&self) {}
}

/// Keeps the current notice in memory.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    current: Mutex<Option<(StateLabel, NeededAction)>>,
}

impl RecordingNotifier {
    pub fn current(&self) -> Option<(StateLabel, NeededAction)> {
        self.current.lock().ok().and_then(|c| *c)
    }
}

impl SyncNotifier for RecordingNotifier {
    fn notify_needs_action(&self, _email: &str, label: StateLabel, action: NeededAction) {
        if let Ok(mut current) = self.current.lock() {
            *current = Some((label, action));
        }
    }

    fn clear(&self) {
        if let Ok(mut current) = self.current.lock() {
            *current = None;
        }
    }
}

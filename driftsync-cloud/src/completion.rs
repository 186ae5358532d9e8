//! One-shot completion signal.
//!
//! A [`Completion`] can be completed at most once; later calls are ignored.
//! If it is dropped without completing, the waiting side sees
//! [`Abandoned`] instead of hanging.

use std::sync::Mutex;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::warn;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("completion dropped without a value")]
pub struct Abandoned;

pub struct Completion<T> {
    tx: Mutex<Option<oneshot::Sender<T>>>,
}

pub struct CompletionWaiter<T> {
    rx: oneshot::Receiver<T>,
}

pub fn completion<T>() -> (Completion<T>, CompletionWaiter<T>) {
    let (tx, rx) = oneshot::channel();
    (
        Completion {
            tx: Mutex::new(Some(tx)),
        },
        CompletionWaiter { rx },
    )
}

impl<T> Completion<T> {
    /// Delivers `value`. Returns false if already completed.
    pub fn complete(&self, value: T) -> bool {
        let sender = match self.tx.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        match sender {
            Some(tx) => {
                // The waiter may have gone away; that's fine.
                let _ = tx.send(value);
                true
            }
            None => {
                warn!("completion signalled twice; ignoring the second value");
                false
            }
        }
    }

    pub fn is_completed(&self) -> bool {
        self.tx.lock().map(|slot| slot.is_none()).unwrap_or(true)
    }
}

impl<T> CompletionWaiter<T> {
    pub async fn wait(self) -> Result<T, Abandoned> {
        self.rx.await.map_err(|_| Abandoned)
    }

    /// Blocks the current thread. Must not be called from inside a runtime.
    pub fn wait_blocking(self) -> Result<T, Abandoned> {
        self.rx.blocking_recv().map_err(|_| Abandoned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_value_wins() {
        let (done, waiter) = completion();
        assert!(done.complete(1));
        assert!(!done.complete(2));
        assert!(done.is_completed());
        assert_eq!(waiter.wait().await, Ok(1));
    }

    #[tokio::test]
    async fn dropping_signals_abandonment() {
        let (done, waiter) = completion::<u8>();
        drop(done);
        assert_eq!(waiter.wait().await, Err(Abandoned));
    }

    #[test]
    fn blocking_wait_across_threads() {
        let (done, waiter) = completion();
        let handle = std::thread::spawn(move || {
            done.complete("finished");
        });
        assert_eq!(waiter.wait_blocking(), Ok("finished"));
        handle.join().unwrap();
    }
}

//! Account login, token exchange and sync orchestration for driftsync.
//!
//! Provides the authentication half of cloud sync:
//! - Login state machine (Engaged → Cohabiting → Married) driven by a delegate
//! - Identity provider, token server and assertion verifier HTTP clients
//! - Backoff/skew ledger keyed by purpose (scheduler, token server, storage host)
//! - Response header parsing for `Retry-After` / `X-Backoff` / `X-Weave-*`
//! - A sync orchestrator that turns one attempt into exactly one outcome
//! - A blocking adapter for callers that need a synchronous verdict

pub mod account;
pub mod adapter;
pub mod auth_client;
pub mod backoff;
pub mod clock;
pub mod completion;
pub mod config;
pub mod error;
pub mod logging;
pub mod login;
pub mod notifier;
pub mod orchestrator;
pub mod response;
pub mod schedule;
pub mod storage;
pub mod store;
pub mod token_client;
pub mod types;
pub mod verifier;

pub use account::{AccountState, NeededAction, StateLabel};
pub use backoff::BackoffLedger;
pub use config::SyncConfig;
pub use error::{CloudError, CloudResult};
pub use orchestrator::SyncOrchestrator;
pub use store::{AccountStore, KeyValueStore};
pub use types::*;

mod support;

use driftsync_cloud::account::{AccountState, NeededAction, StateLabel};
use driftsync_cloud::adapter::SyncAdapter;
use driftsync_cloud::backoff::{purpose, BackoffLedger};
use driftsync_cloud::config::SyncConfig;
use driftsync_cloud::store::{AccountStore, MemoryAccountStore, MemoryStore};
use driftsync_cloud::types::{SyncExtras, SyncOutcome};
use driftsync_cloud::SyncOrchestrator;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use support::*;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Fixture {
    adapter: SyncAdapter,
    accounts: Arc<MemoryAccountStore>,
    ledger: Arc<BackoffLedger>,
    storage: Arc<ScriptedStorage>,
}

fn fixture(config: SyncConfig, initial: impl FnOnce(&FakeAuthClient) -> Option<AccountState>) -> Fixture {
    let clock = manual_clock();
    let auth = Arc::new(FakeAuthClient::new(clock.clone()));
    let accounts = Arc::new(MemoryAccountStore::new(initial(&auth)));
    let ledger = Arc::new(BackoffLedger::new(Arc::new(MemoryStore::new()), clock));
    let storage = Arc::new(ScriptedStorage::new(Script::Success { other_clients: 1 }));

    let orchestrator = SyncOrchestrator::new(config, accounts.clone(), ledger.clone(), storage.clone())
        .unwrap()
        .with_auth_client(auth);
    Fixture {
        adapter: SyncAdapter::new(orchestrator).unwrap(),
        accounts,
        ledger,
        storage,
    }
}

#[test]
fn perform_sync_blocks_until_outcome() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let server = rt.block_on(async {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/1.0/sync/1.5"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "id", "key": "key", "uid": 7,
                "api_endpoint": "https://storage.example.com/1.5/7",
            })))
            .mount(&server)
            .await;
        server
    });

    let f = fixture(SyncConfig::for_base_url(&server.uri()), |auth| {
        Some(AccountState::Married(married(&auth.issuer, NOW_MS, HOUR_MS)))
    });

    assert_eq!(f.adapter.perform_sync(SyncExtras::default()), SyncOutcome::Success);
    assert_eq!(f.storage.calls(), 1);
    assert_eq!(f.storage.last_session().unwrap().uid, "7");
}

#[test]
fn separated_account_reports_cannot_sync() {
    let f = fixture(SyncConfig::default(), |_| Some(engaged(true).separated()));
    assert_eq!(
        f.adapter.perform_sync(SyncExtras::default()),
        SyncOutcome::CannotSync {
            label: StateLabel::Separated,
            action: NeededAction::NeedsPassword,
        }
    );
}

#[test]
fn backoff_is_reported_as_postponed() {
    let f = fixture(SyncConfig::default(), |_| Some(engaged(true)));
    f.ledger.extend(purpose::SCHEDULER, Duration::from_secs(45)).unwrap();

    assert_eq!(
        f.adapter.perform_sync(SyncExtras::default()),
        SyncOutcome::Postponed { delay: Duration::from_secs(45) }
    );
    assert_eq!(f.storage.calls(), 0);
}

#[test]
fn consecutive_syncs_are_serialized() {
    let f = fixture(SyncConfig::default(), |_| None);
    for _ in 0..3 {
        let outcome = f.adapter.perform_sync(SyncExtras::forced());
        assert!(matches!(outcome, SyncOutcome::Unrecoverable { .. }));
    }
}

#[test]
fn sign_in_and_resend_block() {
    let f = fixture(SyncConfig::default(), |_| None);

    let state = f.adapter.sign_in(EMAIL, "hunter2").unwrap();
    assert_eq!(state.label(), StateLabel::Engaged);
    assert_eq!(f.accounts.load_state().unwrap(), Some(state));

    f.adapter.resend_verification().unwrap();
}

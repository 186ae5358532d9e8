use driftsync_cloud::backoff::{purpose, BackoffLedger};
use driftsync_cloud::clock::ManualClock;
use driftsync_cloud::store::{JsonFileStore, KeyValueStore, MemoryStore};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

const NOW_MS: u64 = 1_700_000_000_000;

fn ledger() -> (Arc<ManualClock>, BackoffLedger) {
    let clock = Arc::new(ManualClock::new(NOW_MS));
    let ledger = BackoffLedger::new(Arc::new(MemoryStore::new()), clock.clone());
    (clock, ledger)
}

// ── Deadlines ──

#[test]
fn fresh_purpose_may_proceed() {
    let (_, ledger) = ledger();
    assert!(ledger.should_proceed(purpose::SCHEDULER, false).unwrap());
    assert_eq!(ledger.delay_remaining(purpose::TOKEN_SERVER).unwrap(), Duration::ZERO);
    assert_eq!(ledger.earliest_next_request(purpose::TOKEN_SERVER).unwrap(), None);
}

#[test]
fn extend_sets_deadline_and_counts_down() {
    let (clock, ledger) = ledger();
    ledger.extend(purpose::TOKEN_SERVER, Duration::from_secs(60)).unwrap();
    assert!(!ledger.should_proceed(purpose::TOKEN_SERVER, false).unwrap());
    assert_eq!(ledger.delay_remaining(purpose::TOKEN_SERVER).unwrap(), Duration::from_secs(60));

    clock.advance(Duration::from_secs(59));
    assert_eq!(ledger.delay_remaining(purpose::TOKEN_SERVER).unwrap(), Duration::from_secs(1));

    clock.advance(Duration::from_secs(1));
    assert!(ledger.should_proceed(purpose::TOKEN_SERVER, false).unwrap(), "deadline equal to now proceeds");
}

#[test]
fn forced_request_proceeds_through_backoff() {
    let (_, ledger) = ledger();
    ledger.extend(purpose::TOKEN_SERVER, Duration::from_secs(90)).unwrap();
    assert!(ledger.should_proceed(purpose::TOKEN_SERVER, true).unwrap());
    assert!(!ledger.should_proceed(purpose::TOKEN_SERVER, false).unwrap());
    assert_eq!(
        ledger.delay_remaining(purpose::TOKEN_SERVER).unwrap(),
        Duration::from_secs(90),
        "forcing does not clear the deadline"
    );
}

#[test]
fn huge_delay_saturates_instead_of_wrapping() {
    let (_, ledger) = ledger();
    let deadline = ledger
        .extend(purpose::TOKEN_SERVER, Duration::from_secs(18_446_744_073_709_552))
        .unwrap();
    assert_eq!(deadline, u64::MAX);
    assert!(!ledger.should_proceed(purpose::TOKEN_SERVER, false).unwrap());
    assert_eq!(ledger.earliest_next_request(purpose::TOKEN_SERVER).unwrap(), Some(u64::MAX));
}

#[test]
fn extend_never_shortens() {
    let (_, ledger) = ledger();
    let long = ledger.extend(purpose::SCHEDULER, Duration::from_secs(600)).unwrap();
    let after_short = ledger.extend(purpose::SCHEDULER, Duration::from_secs(5)).unwrap();
    assert_eq!(long, after_short);
    assert_eq!(ledger.delay_remaining(purpose::SCHEDULER).unwrap(), Duration::from_secs(600));
}

#[test]
fn purposes_are_independent() {
    let (_, ledger) = ledger();
    ledger.extend(purpose::TOKEN_SERVER, Duration::from_secs(30)).unwrap();
    assert!(ledger.should_proceed(purpose::SCHEDULER, false).unwrap());
    assert!(ledger.should_proceed(&purpose::storage("storage.example.com"), false).unwrap());
}

#[test]
fn clear_removes_deadline() {
    let (_, ledger) = ledger();
    ledger.extend(purpose::SCHEDULER, Duration::from_secs(30)).unwrap();
    ledger.clear(purpose::SCHEDULER).unwrap();
    assert!(ledger.should_proceed(purpose::SCHEDULER, false).unwrap());
}

#[test]
fn malformed_persisted_deadline_is_ignored() {
    let store = Arc::new(MemoryStore::new());
    store.set("backoff.token.earliest_next_request", "garbage").unwrap();
    let ledger = BackoffLedger::new(store, Arc::new(ManualClock::new(NOW_MS)));
    assert!(ledger.should_proceed(purpose::TOKEN_SERVER, false).unwrap());
}

#[test]
fn deadlines_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("backoff.json");
    let clock = Arc::new(ManualClock::new(NOW_MS));

    {
        let ledger = BackoffLedger::new(Arc::new(JsonFileStore::open(&path).unwrap()), clock.clone());
        ledger.extend(purpose::TOKEN_SERVER, Duration::from_secs(120)).unwrap();
    }

    let reopened = BackoffLedger::new(Arc::new(JsonFileStore::open(&path).unwrap()), clock);
    assert_eq!(
        reopened.delay_remaining(purpose::TOKEN_SERVER).unwrap(),
        Duration::from_secs(120)
    );
}

// ── Storage host ──

#[test]
fn storage_host_change_drops_old_backoff() {
    let (_, ledger) = ledger();
    assert!(ledger.switch_storage_host("a.example.com").unwrap());
    ledger.extend(&purpose::storage("a.example.com"), Duration::from_secs(300)).unwrap();

    assert!(!ledger.switch_storage_host("A.EXAMPLE.COM").unwrap(), "hosts compare case-insensitively");
    assert!(!ledger.should_proceed(&purpose::storage("a.example.com"), false).unwrap());

    assert!(ledger.switch_storage_host("b.example.com").unwrap());
    assert!(ledger.should_proceed(&purpose::storage("a.example.com"), false).unwrap());
    assert_eq!(ledger.last_storage_host().unwrap().as_deref(), Some("b.example.com"));
}

// ── Skew ──

#[test]
fn skew_is_per_host() {
    let (_, ledger) = ledger();
    let skew = ledger.record_skew_from_timestamp("token.example.com", NOW_MS + 42_500);
    assert_eq!(skew, 42);
    assert_eq!(ledger.skew_secs("TOKEN.example.com"), 42);
    assert_eq!(ledger.skew_secs("storage.example.com"), 0);
    assert_eq!(ledger.adjusted_now_millis("token.example.com"), NOW_MS + 42_000);
}

#[test]
fn out_of_range_server_timestamp_keeps_previous_skew() {
    let (_, ledger) = ledger();
    ledger.record_skew("token.example.com", 7);
    assert_eq!(ledger.record_skew_from_timestamp("token.example.com", u64::MAX), 7);
    assert_eq!(ledger.skew_secs("token.example.com"), 7);

    assert_eq!(ledger.record_skew_from_timestamp("fresh.example.com", u64::MAX), 0);
    assert_eq!(ledger.adjusted_now_millis("fresh.example.com"), NOW_MS);
}

#[test]
fn negative_skew() {
    let (_, ledger) = ledger();
    ledger.record_skew("h", -30);
    assert_eq!(ledger.skew_millis("h"), -30_000);
    assert_eq!(ledger.adjusted_now_millis("h"), NOW_MS - 30_000);
}

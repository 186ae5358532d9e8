mod support;

use driftsync_cloud::account::{AccountState, StateLabel};
use driftsync_cloud::store::{AccountStore, FileAccountStore, JsonFileStore, KeyValueStore, MemoryStore};
use pretty_assertions::assert_eq;
use support::*;

// ── Key/value stores ──

#[test]
fn memory_store_get_set_remove() {
    let store = MemoryStore::new();
    assert_eq!(store.get("k").unwrap(), None);
    store.set("k", "v").unwrap();
    assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));
    store.remove("k").unwrap();
    assert_eq!(store.get("k").unwrap(), None);
    store.remove("k").unwrap();
}

#[test]
fn json_file_store_persists_across_opens() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("prefs.json");

    let store = JsonFileStore::open(&path).unwrap();
    store.set("a", "1").unwrap();
    store.set("b", "2").unwrap();
    store.remove("a").unwrap();
    assert!(path.exists());
    assert!(!path.with_extension("tmp").exists());

    let reopened = JsonFileStore::open(&path).unwrap();
    assert_eq!(reopened.get("a").unwrap(), None);
    assert_eq!(reopened.get("b").unwrap().as_deref(), Some("2"));
}

#[test]
fn json_file_store_treats_empty_file_as_empty() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("prefs.json");
    std::fs::write(&path, "  \n").unwrap();
    let store = JsonFileStore::open(&path).unwrap();
    assert_eq!(store.get("anything").unwrap(), None);
}

#[test]
fn json_file_store_rejects_corrupt_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("prefs.json");
    std::fs::write(&path, "{ not json").unwrap();
    assert!(JsonFileStore::open(&path).is_err());
}

// ── Account store ──

#[test]
fn file_account_store_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileAccountStore::new(dir.path().join("account.json"));
    assert_eq!(store.load_state().unwrap(), None);

    let issuer = driftsync_crypto::generate_signing_keypair();
    let state = AccountState::Married(married(&issuer, NOW_MS, HOUR_MS));
    store.save_state(&state).unwrap();

    let loaded = store.load_state().unwrap().unwrap();
    assert_eq!(loaded, state);
    assert_eq!(loaded.label(), StateLabel::Married);
}

#[test]
fn stored_account_uses_label_tag() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileAccountStore::new(dir.path().join("account.json"));
    store.save_state(&engaged(false)).unwrap();

    let raw: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(store.path()).unwrap()).unwrap();
    assert_eq!(raw["label"], "Engaged");
    assert_eq!(raw["state"]["email"], EMAIL);
}

#[test]
fn clear_removes_account() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileAccountStore::new(dir.path().join("account.json"));
    store.save_state(&engaged(true)).unwrap();
    store.clear().unwrap();
    assert_eq!(store.load_state().unwrap(), None);
    store.clear().unwrap();
}

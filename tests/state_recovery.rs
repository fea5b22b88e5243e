// tests/state_recovery.rs
use chrono::NaiveDate;
use feed_freshness_monitor::state::{SampleValue, Snapshot, StateStore, Status};

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 11, 19).unwrap()
}

fn saved_snapshot(store: &StateStore) -> Snapshot {
    let mut snap = Snapshot::with_defaults(day(), ["idx"]);
    let rec = snap.entry("idx");
    rec.last_value = Some(SampleValue::Text("As on 19 Nov 2025 | 12:05".into()));
    rec.status = Status::Ok;
    store.save(&snap).unwrap();
    snap
}

#[test]
fn interrupted_write_leaves_previous_snapshot_readable() {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::new(dir.path(), "monitor_state");
    let snap = saved_snapshot(&store);

    // A crash between writing the temp file and renaming it.
    let tmp = dir.path().join("monitor_state_2025-11-19.json.tmp");
    std::fs::write(&tmp, b"{\"idx\": {\"last_value\": \"half").unwrap();

    assert_eq!(store.load(day()), snap);

    // The next save simply replaces the leftover.
    store.save(&snap).unwrap();
    assert!(!tmp.exists());
    assert_eq!(store.load(day()), snap);
}

#[test]
fn truncated_snapshot_starts_the_day_empty() {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::new(dir.path(), "monitor_state");
    std::fs::write(store.path_for(day()), b"{\"idx\": {").unwrap();
    assert!(store.load(day()).sources.is_empty());
}

#[test]
fn snapshot_file_is_plain_keyed_json() {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::new(dir.path(), "monitor_state");
    saved_snapshot(&store);

    let raw = std::fs::read_to_string(store.path_for(day())).unwrap();
    let v: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(v["idx"]["last_value"], "As on 19 Nov 2025 | 12:05");
    assert_eq!(v["idx"]["status"], "ok");
    assert_eq!(v["idx"]["stale_count"], 0);
    assert!(v["idx"]["last_changed"].is_null());
}

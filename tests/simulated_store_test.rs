//! Simulated store integration tests over file-backed storage

use std::sync::Arc;

use serde_json::json;

use vibe_data::simulated::{MemoryPost, SimulatedStore, StoreMode};
use vibe_data::storage::{FileStore, KeyValueStore};

struct Fixture {
    _dir: tempfile::TempDir,
    durable: Arc<FileStore>,
    session: Arc<FileStore>,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let durable = Arc::new(FileStore::open(dir.path().join("durable.json")).unwrap());
        let session = Arc::new(FileStore::open(dir.path().join("session.json")).unwrap());
        Self {
            _dir: dir,
            durable,
            session,
        }
    }

    fn store(&self) -> SimulatedStore {
        SimulatedStore::new(self.durable.clone(), self.session.clone())
    }

    /// Reopen both files, as a fresh process would
    fn reopen(&self) -> SimulatedStore {
        let durable = FileStore::open(self.durable.path()).unwrap();
        let session = FileStore::open(self.session.path()).unwrap();
        SimulatedStore::new(Arc::new(durable), Arc::new(session))
    }
}

#[test]
fn test_session_teardown_preserves_elevated_records() {
    let fixture = Fixture::new();
    let store = fixture.store();

    store.enter_elevated().unwrap();
    store.delete_event("evt-admin").unwrap();
    store.exit().unwrap();

    store.enter_session().unwrap();
    store.delete_event("evt-demo").unwrap();
    assert_eq!(store.get_deleted_event_ids(), vec!["evt-admin", "evt-demo"]);

    store.clear_simulated_session().unwrap();
    assert_eq!(store.mode(), StoreMode::Off);
    assert!(store.get_deleted_event_ids().is_empty());

    store.enter_elevated().unwrap();
    assert_eq!(store.get_deleted_event_ids(), vec!["evt-admin"]);
}

#[test]
fn test_elevated_writes_survive_reopen() {
    let fixture = Fixture::new();
    let store = fixture.store();

    store.enter_elevated().unwrap();
    store.join_group("g-hikers").unwrap();
    store.cancel_event("evt-1", "rained out").unwrap();
    store
        .save_memory_post(MemoryPost::new(
            "p1",
            json!({"caption": "night market"}).as_object().cloned().unwrap(),
        ))
        .unwrap();

    let reopened = fixture.reopen();
    assert!(reopened.is_elevated_mode());
    assert_eq!(reopened.get_joined_groups(), vec!["g-hikers"]);
    assert_eq!(reopened.get_cancelled_events()["evt-1"].message, "rained out");
    assert_eq!(reopened.get_memory_posts()[0].id, "p1");
}

#[test]
fn test_session_writes_never_reach_durable_storage() {
    let fixture = Fixture::new();
    let store = fixture.store();

    store.enter_session().unwrap();
    store.join_group("g1").unwrap();
    store.add_pending_group_request("g2").unwrap();

    let durable_keys = fixture.durable.keys();
    assert!(durable_keys.iter().all(|k| !k.contains("groups")));
    assert!(fixture
        .session
        .get_item("simulated_joined_groups")
        .is_some());
}

#[test]
fn test_exactly_one_mode_for_any_flags() {
    let fixture = Fixture::new();
    let store = fixture.store();

    let cases = [
        (None, None, StoreMode::Off),
        (Some("true"), None, StoreMode::Off),
        (None, Some("admin"), StoreMode::Off),
        (Some("true"), Some("admin"), StoreMode::Elevated),
        (Some("true"), Some("demo"), StoreMode::Session),
        (Some("false"), Some("demo"), StoreMode::Off),
        (Some("true"), Some("guest"), StoreMode::Off),
    ];

    for (bypass, tag, expected) in cases {
        match bypass {
            Some(v) => fixture.durable.set_item("simulated_auth_bypass", v).unwrap(),
            None => fixture.durable.remove_item("simulated_auth_bypass").unwrap(),
        }
        match tag {
            Some(v) => fixture.durable.set_item("simulated_mode", v).unwrap(),
            None => fixture.durable.remove_item("simulated_mode").unwrap(),
        }

        let mode = store.mode();
        assert_eq!(mode, expected, "bypass={:?} tag={:?}", bypass, tag);
        let active = [
            mode == StoreMode::Off,
            store.is_elevated_mode(),
            store.is_session_mode(),
        ];
        assert_eq!(active.iter().filter(|on| **on).count(), 1);
    }
}

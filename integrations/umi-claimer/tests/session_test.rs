use umi_claimer::session::{ClaimLease, FileSessionStore, Session, SessionStore};

#[test]
fn missing_session_file_loads_empty() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileSessionStore::new(dir.path().join("session.json"));
    assert_eq!(store.load().unwrap(), Session::default());
}

#[test]
fn saved_session_survives_reload_and_clear() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("session.json");
    let store = FileSessionStore::new(&path);

    let session = Session {
        user_token: Some("token-alice".to_string()),
        wallet_address: Some("0xa11ce".to_string()),
    };
    store.save(&session).unwrap();
    assert!(path.exists());

    let reloaded = FileSessionStore::new(&path).load().unwrap();
    assert_eq!(reloaded.credentials(), Some(("token-alice", "0xa11ce")));

    store.clear().unwrap();
    assert!(!path.exists());
    // Clearing twice is fine.
    store.clear().unwrap();
}

#[test]
fn corrupt_session_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.json");
    std::fs::write(&path, "not json").unwrap();
    assert!(FileSessionStore::new(&path).load().is_err());
}

#[test]
fn second_claim_is_refused_while_lease_is_held() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileSessionStore::new(dir.path().join("session.json"));

    let first = store.try_lock_claim(60_000).unwrap();
    assert!(first.is_some());
    assert!(store.lock_path().exists());

    // Another process sharing the same session file.
    let other = FileSessionStore::new(dir.path().join("session.json"));
    assert!(other.try_lock_claim(60_000).unwrap().is_none());

    drop(first);
    assert!(!store.lock_path().exists());
    assert!(other.try_lock_claim(60_000).unwrap().is_some());
}

#[test]
fn expired_lease_from_a_crashed_run_is_taken_over() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.json.lock");

    let stale = ClaimLease::try_acquire(path.clone(), 1_000, 1_000).unwrap().unwrap();
    // Simulate a crash: the holder never releases.
    std::mem::forget(stale);

    assert!(ClaimLease::try_acquire(path.clone(), 1_000, 1_500).unwrap().is_none());
    let taken = ClaimLease::try_acquire(path.clone(), 1_000, 2_000).unwrap().unwrap();
    assert_eq!(taken.record().acquired_at_ms, 2_000);
}

#[test]
fn half_written_lease_is_respected_until_it_ages_out() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.json.lock");
    std::fs::write(&path, "").unwrap();

    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64;
    assert!(ClaimLease::try_acquire(path.clone(), 60_000, now).unwrap().is_none());
    assert!(ClaimLease::try_acquire(path.clone(), 60_000, now + 3_600_000)
        .unwrap()
        .is_some());
}

//! File-backed ledger behaviour across reopen and concurrent handles.

use std::sync::Arc;

use vehicle_ledger::{EventKind, LedgerAnomaly, ManualClock, ParkingLedger};

const T0: u64 = 1_700_000_000;

fn db_path(dir: &tempfile::TempDir) -> String {
    dir.path().join("ledger.db").to_string_lossy().into_owned()
}

#[test]
fn session_survives_reopen() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = db_path(&dir);
    let clock = Arc::new(ManualClock::new(T0));

    {
        let ledger = ParkingLedger::open_sqlite(&path, clock.clone()).expect("open ledger");
        let out = ledger
            .apply_entry("XYZ-001", 3, Some("Honda"), Some("GRIS"))
            .expect("entry");
        assert!(out.created);
    }

    clock.advance(125 * 60);
    let ledger = ParkingLedger::open_sqlite(&path, clock.clone()).expect("reopen ledger");
    assert_eq!(ledger.occupancy().unwrap(), 1);

    let session = ledger
        .apply_exit("XYZ-001")
        .expect("exit")
        .session
        .expect("closed session");
    assert_eq!(session.duration_minutes, 125);
    assert_eq!(session.brand.as_deref(), Some("Honda"));
    assert_eq!(session.color.as_deref(), Some("GRIS"));
    assert!(ledger.active_vehicles().unwrap().is_empty());

    let record = ledger.registry_entry("XYZ-001").unwrap().expect("registry row");
    assert_eq!(record.total_visits, 1);
    assert_eq!(record.avg_duration_minutes, 125.0);
    assert_eq!(record.first_seen_s, T0);
    assert_eq!(record.last_seen_s, T0 + 125 * 60);
}

#[test]
fn duplicate_entry_keeps_one_row() {
    let dir = tempfile::tempdir().expect("tempdir");
    let ledger = ParkingLedger::open_sqlite(&db_path(&dir), Arc::new(ManualClock::new(T0)))
        .expect("open ledger");

    ledger.apply_entry("ABC-123", 5, None, None).unwrap();
    let dup = ledger.apply_entry("ABC-123", 9, Some("Kia"), None).unwrap();
    assert!(!dup.created);
    assert_eq!(dup.anomaly, Some(LedgerAnomaly::DuplicateEntry));

    let active = ledger.active_vehicles().unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].track_id, 9);
    assert_eq!(active[0].brand.as_deref(), Some("Kia"));
}

#[test]
fn exit_without_entry_writes_nothing() {
    let dir = tempfile::tempdir().expect("tempdir");
    let ledger = ParkingLedger::open_sqlite(&db_path(&dir), Arc::new(ManualClock::new(T0)))
        .expect("open ledger");

    let out = ledger.apply_exit("ZZZ-999").unwrap();
    assert_eq!(out.anomaly, Some(LedgerAnomaly::ExitWithoutEntry));
    assert!(out.session.is_none());
    assert!(ledger.recent_sessions(10).unwrap().is_empty());
    assert!(ledger.registry_entry("ZZZ-999").unwrap().is_none());
}

#[test]
fn two_handles_on_one_file_never_duplicate_a_plate() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = db_path(&dir);
    let clock = Arc::new(ManualClock::new(T0));
    let a = Arc::new(ParkingLedger::open_sqlite(&path, clock.clone()).expect("open a"));
    let b = Arc::new(ParkingLedger::open_sqlite(&path, clock.clone()).expect("open b"));

    let handles: Vec<_> = [a.clone(), b.clone()]
        .into_iter()
        .enumerate()
        .map(|(i, ledger)| {
            std::thread::spawn(move || {
                let mut created = 0;
                for _ in 0..20 {
                    if ledger.apply_entry("SAME-1", i as u64, None, None).unwrap().created {
                        created += 1;
                    }
                }
                created
            })
        })
        .collect();
    let created: u32 = handles.into_iter().map(|h| h.join().unwrap()).sum();

    assert_eq!(created, 1);
    assert_eq!(a.occupancy().unwrap(), 1);
    assert_eq!(b.registry_entry("SAME-1").unwrap().unwrap().total_visits, 1);
}

#[test]
fn recent_sessions_are_newest_first() {
    let dir = tempfile::tempdir().expect("tempdir");
    let clock = Arc::new(ManualClock::new(T0));
    let ledger = ParkingLedger::open_sqlite(&db_path(&dir), clock.clone()).expect("open ledger");

    for (i, plate) in ["AAA-111", "BBB-222", "CCC-333"].iter().enumerate() {
        ledger.apply_entry(plate, i as u64 + 1, None, None).unwrap();
        clock.advance(60 * (i as u64 + 1));
        ledger.apply_exit(plate).unwrap();
    }

    let recent = ledger.recent_sessions(2).unwrap();
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].plate, "CCC-333");
    assert_eq!(recent[1].plate, "BBB-222");
    assert_eq!(ledger.sessions_for("AAA-111").unwrap()[0].duration_minutes, 1);
}

#[test]
fn read_only_handle_queries_without_writing() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = db_path(&dir);
    let clock = Arc::new(ManualClock::new(T0));
    let writer = ParkingLedger::open_sqlite(&path, clock.clone()).expect("open writer");
    writer
        .apply_entry_from("gate-a", "RO-0001", 2, None, None)
        .unwrap();

    let reader = ParkingLedger::open_sqlite_read_only(&path, clock.clone()).expect("open reader");
    assert_eq!(reader.occupancy().unwrap(), 1);
    let log = reader.events_between(T0, T0).unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].source_id, "gate-a");
    assert_eq!(log[0].kind, EventKind::Entry);

    assert!(reader.apply_entry("RO-0002", 3, None, None).is_err());
    assert!(reader.apply_exit("RO-0001").is_err());

    // The writer is not blocked by the reader.
    clock.advance(120);
    writer.apply_exit("RO-0001").unwrap();
    assert_eq!(reader.occupancy().unwrap(), 0);
    assert_eq!(reader.events_between(T0, T0 + 120).unwrap().len(), 2);
}

#[test]
fn read_only_open_does_not_create_a_database() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = db_path(&dir);
    let clock = Arc::new(ManualClock::new(T0));
    assert!(ParkingLedger::open_sqlite_read_only(&path, clock).is_err());
    assert!(!std::path::Path::new(&path).exists());
}

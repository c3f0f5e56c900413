//! Integration tests for add / update / correct / remove and the history
//! they leave behind.

use chrono::{DateTime, Duration, TimeZone, Utc};
use secmaster::{
    ChangeEvent, ChangeType, Error, ExternalId, FixedTimeSource, HistoryRequest, ObjectId,
    Security, SecurityMaster, TimeSource, UniqueId, VersionCorrection,
};
use secmaster_core::schema::{Dialect, SqliteDialect};
use secmaster_core::Store;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
}

fn master() -> (SecurityMaster, Arc<FixedTimeSource>) {
    let clock = Arc::new(FixedTimeSource::new(t0()));
    let master = SecurityMaster::open_in_memory()
        .expect("Failed to open master")
        .with_time_source(Arc::clone(&clock) as Arc<dyn TimeSource>);
    (master, clock)
}

fn equity(name: &str) -> Security {
    Security::new(name, "EQUITY").with_identifier(ExternalId::of("TICKER", name))
}

fn history_len(master: &SecurityMaster, object_id: &ObjectId) -> usize {
    master
        .history(&HistoryRequest::new(object_id.clone()))
        .expect("history")
        .documents
        .len()
}

/// Added documents read back identically through every id form
#[test]
fn test_add_round_trip() {
    let (mut master, _clock) = master();
    let security = equity("ACME").with_attribute("currency", "USD");

    let added = master.add(&security).unwrap();
    assert_eq!(added.unique_id.to_string(), format!("{}~0-0", added.object_id()));
    assert_eq!(added.version_from_instant, t0());
    assert_eq!(added.correction_from_instant, t0());
    assert!(added.is_latest_version());
    assert!(added.is_latest_correction());

    let latest = master.get(&added.object_id().at_latest_version()).unwrap();
    assert_eq!(latest, added);
    assert_eq!(master.get(&added.unique_id).unwrap().security, security);
    assert_eq!(master.get(&added.object_id().at_version(0)).unwrap(), added);
}

/// Each update adds exactly one version, numbered one above the last
#[test]
fn test_version_monotonicity() {
    let (mut master, clock) = master();
    let mut current = master.add(&equity("V0")).unwrap();
    let object_id = current.object_id().clone();

    for n in 1..=3 {
        clock.advance(Duration::hours(1));
        let before = history_len(&master, &object_id);
        let next = master
            .update(&current.unique_id, &equity(&format!("V{n}")))
            .unwrap();
        assert_eq!(next.unique_id.version(), Some(n));
        assert_eq!(next.unique_id.correction(), Some(0));
        assert_eq!(history_len(&master, &object_id), before + 1);

        let closed = master.get(&current.unique_id).unwrap();
        assert_eq!(closed.version_to_instant, Some(next.version_from_instant));
        current = next;
    }

    let history = master
        .history(&HistoryRequest::new(object_id.clone()))
        .unwrap();
    let versions: Vec<Option<u32>> = history
        .documents
        .iter()
        .map(|d| d.unique_id.version())
        .collect();
    assert_eq!(versions, vec![Some(3), Some(2), Some(1), Some(0)]);
    assert_eq!(history.paging.total_items, 4);
}

/// Updating TestSecurity101 yields a new id, closes the old one, and leaves
/// two documents of history
#[test]
fn test_update_scenario() {
    let (mut master, clock) = master();
    let original = master.add(&equity("TestSecurity101")).unwrap();

    let now = clock.advance(Duration::seconds(30));
    let updated = master.update(&original.unique_id, &equity("Name")).unwrap();
    assert_ne!(updated.unique_id, original.unique_id);
    assert_eq!(updated.name(), "Name");

    let old = master.get(&original.unique_id).unwrap();
    assert_eq!(old.name(), "TestSecurity101");
    assert_eq!(old.version_to_instant, Some(now));

    let history = master
        .history(&HistoryRequest::new(original.object_id().clone()))
        .unwrap();
    assert_eq!(history.documents.len(), 2);
    assert_eq!(history.first().unwrap().unique_id, updated.unique_id);
}

/// A correction replaces knowledge, never the version interval
#[test]
fn test_correction_preserves_version_window() {
    let (mut master, clock) = master();
    let v0 = master.add(&equity("Acme")).unwrap();
    let t1 = clock.advance(Duration::hours(1));
    let v1 = master.update(&v0.unique_id, &equity("Acme Inc")).unwrap();

    let t2 = clock.advance(Duration::hours(1));
    let corrected = master.correct(&v1.unique_id, &equity("ACME Inc")).unwrap();
    assert_eq!(corrected.unique_id.version(), Some(1));
    assert_eq!(corrected.unique_id.correction(), Some(1));
    assert_eq!(corrected.version_from_instant, t1);
    assert_eq!(corrected.version_to_instant, None);
    assert_eq!(corrected.correction_from_instant, t2);

    let superseded = master.get(&v1.unique_id).unwrap();
    assert_eq!(superseded.correction_to_instant, Some(t2));
    assert_eq!(superseded.version_from_instant, t1);
    assert!(superseded.is_latest_version());

    // the version-only id follows the correction
    let by_version = master.get(&v1.object_id().at_version(1)).unwrap();
    assert_eq!(by_version.unique_id, corrected.unique_id);

    // a closed version may be corrected too; its window is kept
    let t3 = clock.advance(Duration::hours(1));
    let fixed_v0 = master
        .correct(&v0.object_id().at_version(0), &equity("ACME"))
        .unwrap();
    assert_eq!(fixed_v0.version_from_instant, t0());
    assert_eq!(fixed_v0.version_to_instant, Some(t1));
    assert_eq!(fixed_v0.correction_from_instant, t3);

    // as known before the fix, version 0 still had its original name
    let as_known = master
        .get_at(v0.object_id(), VersionCorrection::of(t0(), t2))
        .unwrap();
    assert_eq!(as_known.name(), "Acme");
    let now_known = master
        .get_at(v0.object_id(), VersionCorrection::of_version_as_of(t0()))
        .unwrap();
    assert_eq!(now_known.name(), "ACME");
}

/// Stale ids are rejected and leave storage untouched
#[test]
fn test_conflict_rejection() {
    let (mut master, clock) = master();
    let v0 = master.add(&equity("A")).unwrap();
    clock.advance(Duration::minutes(1));
    let v1 = master.update(&v0.unique_id, &equity("B")).unwrap();
    clock.advance(Duration::minutes(1));

    let err = master.update(&v0.unique_id, &equity("C")).unwrap_err();
    assert!(err.is_conflict(), "unexpected {err}");
    assert_eq!(history_len(&master, v0.object_id()), 2);

    let c1 = master.correct(&v1.unique_id, &equity("B1")).unwrap();
    clock.advance(Duration::minutes(1));
    let err = master.correct(&v1.unique_id, &equity("B2")).unwrap_err();
    assert!(err.is_conflict(), "unexpected {err}");

    let err = master.remove(&v0.unique_id).unwrap_err();
    assert!(err.is_conflict(), "unexpected {err}");

    let latest = master.get(&v0.object_id().at_latest_version()).unwrap();
    assert_eq!(latest, c1);
    assert_eq!(history_len(&master, v0.object_id()), 3);
}

/// Removal closes the version without a successor
#[test]
fn test_remove_leaves_tombstone() {
    let (mut master, clock) = master();
    let added = master.add(&equity("Gone")).unwrap();
    let removed_at = clock.advance(Duration::days(1));

    let removed = master.remove(&added.object_id().at_latest_version()).unwrap();
    assert_eq!(removed.unique_id, added.unique_id);
    assert_eq!(removed.version_to_instant, Some(removed_at));

    let err = master.get(&added.object_id().at_latest_version()).unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(
        master.get(&added.unique_id).unwrap().version_to_instant,
        Some(removed_at)
    );
    assert_eq!(history_len(&master, added.object_id()), 1);

    assert!(master.remove(&added.unique_id).unwrap_err().is_not_found());
    assert!(master
        .update(&added.unique_id, &equity("Back"))
        .unwrap_err()
        .is_not_found());

    let before_removal = master
        .get_at(
            added.object_id(),
            VersionCorrection::of_version_as_of(removed_at - Duration::seconds(1)),
        )
        .unwrap();
    assert_eq!(before_removal.name(), "Gone");
}

/// Ids naming a correction or version that was never stored are not found,
/// even when the version itself is the latest
#[test]
fn test_unknown_correction_is_not_found() {
    let (mut master, clock) = master();
    let added = master.add(&equity("A")).unwrap();
    clock.advance(Duration::minutes(1));

    let unknown: UniqueId = format!("{}~0-7", added.object_id()).parse().unwrap();
    let err = master.update(&unknown, &equity("B")).unwrap_err();
    assert!(err.is_not_found(), "unexpected {err}");
    let err = master.remove(&unknown).unwrap_err();
    assert!(err.is_not_found(), "unexpected {err}");
    let err = master.correct(&unknown, &equity("B")).unwrap_err();
    assert!(err.is_not_found(), "unexpected {err}");
    let err = master.remove_version(&unknown).unwrap_err();
    assert!(err.is_not_found(), "unexpected {err}");

    let unknown_version = added.object_id().at_version(3);
    let err = master.update(&unknown_version, &equity("B")).unwrap_err();
    assert!(err.is_not_found(), "unexpected {err}");

    assert_eq!(history_len(&master, added.object_id()), 1);
    assert_eq!(
        master.get(&added.object_id().at_latest_version()).unwrap(),
        added
    );
}

/// Replacing a version corrects it in place, for any id form
#[test]
fn test_replace_version() {
    let (mut master, clock) = master();
    let v0 = master.add(&equity("A")).unwrap();
    let t1 = clock.advance(Duration::hours(1));
    let v1 = master.update(&v0.unique_id, &equity("B")).unwrap();
    let t2 = clock.advance(Duration::hours(1));

    let latest = master
        .replace_version(&v0.object_id().at_latest_version(), &equity("B fixed"))
        .unwrap();
    assert_eq!(latest.unique_id.version(), Some(1));
    assert_eq!(latest.unique_id.correction(), Some(1));
    assert_eq!(latest.version_from_instant, t1);
    assert_eq!(latest.version_to_instant, None);
    assert_eq!(latest.correction_from_instant, t2);

    let old = master.replace_version(&v0.unique_id, &equity("A fixed")).unwrap();
    assert_eq!(old.unique_id.version(), Some(0));
    assert_eq!(old.unique_id.correction(), Some(1));
    assert_eq!(old.version_to_instant, Some(t1));

    let err = master.replace_version(&v1.unique_id, &equity("B again")).unwrap_err();
    assert!(err.is_conflict(), "unexpected {err}");
    assert_eq!(history_len(&master, v0.object_id()), 4);
    assert_eq!(
        master.get(&v0.object_id().at_latest_version()).unwrap().name(),
        "B fixed"
    );
}

/// Retracting a version hands its interval back to the version before it
#[test]
fn test_remove_version_extends_previous() {
    let (mut master, clock) = master();
    let events: Arc<Mutex<Vec<ChangeEvent>>> = Arc::default();
    let sink = Arc::clone(&events);
    master
        .change_manager()
        .add_listener(Arc::new(move |e: &ChangeEvent| {
            sink.lock().unwrap().push(e.clone());
        }));

    let v0 = master.add(&equity("A")).unwrap();
    let t1 = clock.advance(Duration::hours(1));
    let v1 = master.update(&v0.unique_id, &equity("B")).unwrap();
    let t2 = clock.advance(Duration::hours(1));

    let extended = master.remove_version(&v1.unique_id).unwrap().unwrap();
    assert_eq!(extended.unique_id.version(), Some(0));
    assert_eq!(extended.unique_id.correction(), Some(1));
    assert_eq!(extended.name(), "A");
    assert_eq!(extended.version_from_instant, t0());
    assert_eq!(extended.version_to_instant, None);
    assert_eq!(extended.correction_from_instant, t2);

    let latest = master.get(&v0.object_id().at_latest_version()).unwrap();
    assert_eq!(latest, extended);
    let retracted = master.get(&v1.unique_id).unwrap();
    assert_eq!(retracted.correction_to_instant, Some(t2));

    let as_known_before = master
        .get_at(
            v0.object_id(),
            VersionCorrection::of(t1 + Duration::minutes(1), t2 - Duration::seconds(1)),
        )
        .unwrap();
    assert_eq!(as_known_before.name(), "B");
    let as_known_now = master
        .get_at(
            v0.object_id(),
            VersionCorrection::of_version_as_of(t1 + Duration::minutes(1)),
        )
        .unwrap();
    assert_eq!(as_known_now.name(), "A");

    {
        let events = events.lock().unwrap();
        let last = events.last().unwrap();
        assert_eq!(last.change_type, ChangeType::Changed);
        assert_eq!(last.before.as_ref(), Some(&v1.unique_id));
        assert_eq!(last.after.as_ref(), Some(&extended.unique_id));
        assert_eq!(last.instant, t2);
    }

    // version numbers are never handed out twice
    clock.advance(Duration::hours(1));
    let v2 = master.update(&extended.unique_id, &equity("C")).unwrap();
    assert_eq!(v2.unique_id.version(), Some(2));
}

/// Retracting the only version leaves nothing current
#[test]
fn test_remove_version_without_predecessor() {
    let (mut master, clock) = master();
    let events: Arc<Mutex<Vec<ChangeEvent>>> = Arc::default();
    let sink = Arc::clone(&events);
    master
        .change_manager()
        .add_listener(Arc::new(move |e: &ChangeEvent| {
            sink.lock().unwrap().push(e.clone());
        }));

    let solo = master.add(&equity("Solo")).unwrap();
    let t1 = clock.advance(Duration::hours(1));

    let latest = solo.object_id().at_latest_version();
    assert_eq!(master.remove_version(&latest).unwrap(), None);
    assert!(master.get(&latest).unwrap_err().is_not_found());
    assert_eq!(
        master.get(&solo.unique_id).unwrap().correction_to_instant,
        Some(t1)
    );
    assert_eq!(history_len(&master, solo.object_id()), 1);
    assert!(master.remove_version(&latest).unwrap_err().is_not_found());

    let events = events.lock().unwrap();
    let last = events.last().unwrap();
    assert_eq!(last.change_type, ChangeType::Removed);
    assert_eq!(last.before.as_ref(), Some(&solo.unique_id));
    assert_eq!(last.after, None);
    assert_eq!(last.instant, t1);
}

/// Only the open correction of a version can be retracted
#[test]
fn test_remove_version_rejects_stale_correction() {
    let (mut master, clock) = master();
    let added = master.add(&equity("A")).unwrap();
    clock.advance(Duration::minutes(1));
    master.correct(&added.unique_id, &equity("A1")).unwrap();

    let err = master.remove_version(&added.unique_id).unwrap_err();
    assert!(err.is_conflict(), "unexpected {err}");
    assert_eq!(history_len(&master, added.object_id()), 2);
}

/// Malformed arguments fail before touching storage
#[test]
fn test_invalid_arguments() {
    let (mut master, _clock) = master();
    let added = master.add(&equity("A")).unwrap();

    let unversioned = added.object_id().at_latest_version();
    assert!(matches!(
        master.update(&unversioned, &equity("B")),
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        master.correct(&unversioned, &equity("B")),
        Err(Error::InvalidArgument(_))
    ));

    let foreign: UniqueId = "Other~1~0".parse().unwrap();
    assert!(matches!(
        master.get(&foreign),
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        master.add(&Security::new("", "EQUITY")),
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        master.update(&added.unique_id, &Security::new("B", " ")),
        Err(Error::InvalidArgument(_))
    ));
    assert_eq!(history_len(&master, added.object_id()), 1);

    let missing: UniqueId = "DbSec~999~0".parse().unwrap();
    assert!(master.get(&missing).unwrap_err().is_not_found());
}

#[test]
fn test_get_many() {
    let (mut master, _clock) = master();
    let a = master.add(&equity("A")).unwrap();
    let b = master.add(&equity("B")).unwrap();

    let found = master
        .get_many(&[a.unique_id.clone(), b.object_id().at_latest_version()])
        .unwrap();
    assert_eq!(found.len(), 2);
    assert_eq!(found[&a.unique_id], a);
    assert_eq!(found[&b.object_id().at_latest_version()], b);

    let missing: UniqueId = "DbSec~999".parse().unwrap();
    assert!(master
        .get_many(&[a.unique_id.clone(), missing])
        .unwrap_err()
        .is_not_found());
}

/// Listeners see each committed change, and nothing for failures
#[test]
fn test_change_events() {
    let (mut master, clock) = master();
    let events: Arc<Mutex<Vec<ChangeEvent>>> = Arc::default();
    let sink = Arc::clone(&events);
    master
        .change_manager()
        .add_listener(Arc::new(move |e: &ChangeEvent| {
            sink.lock().unwrap().push(e.clone());
        }));

    let v0 = master.add(&equity("A")).unwrap();
    let t1 = clock.advance(Duration::minutes(5));
    let v1 = master.update(&v0.unique_id, &equity("B")).unwrap();
    assert!(master.update(&v0.unique_id, &equity("C")).is_err());
    let t2 = clock.advance(Duration::minutes(5));
    master.remove(&v1.unique_id).unwrap();

    let events = events.lock().unwrap();
    let types: Vec<ChangeType> = events.iter().map(|e| e.change_type).collect();
    assert_eq!(
        types,
        vec![ChangeType::Added, ChangeType::Changed, ChangeType::Removed]
    );

    assert_eq!(events[0].after.as_ref(), Some(&v0.unique_id));
    assert_eq!(events[0].instant, t0());
    assert_eq!(events[1].before.as_ref(), Some(&v0.unique_id));
    assert_eq!(events[1].after.as_ref(), Some(&v1.unique_id));
    assert_eq!(events[1].version_from, t1);
    assert_eq!(events[2].after, None);
    assert_eq!(events[2].version_to, Some(t2));
    assert!(events.iter().all(|e| &e.object_id == v0.object_id()));
}

/// Breaks the document insert on demand, after the version was closed
#[derive(Debug, Default)]
struct BrokenInsertDialect {
    inner: SqliteDialect,
    broken: AtomicBool,
}

impl Dialect for BrokenInsertDialect {
    fn insert_document(&self) -> &str {
        if self.broken.load(Ordering::SeqCst) {
            "INSERT INTO sec_document_missing (doc_oid) VALUES (?1)"
        } else {
            self.inner.insert_document()
        }
    }
}

/// A failing insert rolls back the close that preceded it
#[test]
fn test_rollback_on_partial_failure() {
    let dialect = Arc::new(BrokenInsertDialect::default());
    let clock = Arc::new(FixedTimeSource::new(t0()));
    let store = Store::open_in_memory_with_dialect(Arc::clone(&dialect) as Arc<dyn Dialect>)
        .expect("Failed to open store");
    let mut master =
        SecurityMaster::new(store).with_time_source(Arc::clone(&clock) as Arc<dyn TimeSource>);
    let changes = Arc::new(Mutex::new(0_usize));
    let counter = Arc::clone(&changes);
    master
        .change_manager()
        .add_listener(Arc::new(move |_: &ChangeEvent| {
            *counter.lock().unwrap() += 1;
        }));

    let v0 = master.add(&equity("Stable")).unwrap();
    clock.advance(Duration::hours(1));
    dialect.broken.store(true, Ordering::SeqCst);

    let err = master.update(&v0.unique_id, &equity("Lost")).unwrap_err();
    assert!(matches!(err, Error::Schema(_)), "unexpected {err}");
    let err = master.correct(&v0.unique_id, &equity("Lost")).unwrap_err();
    assert!(matches!(err, Error::Schema(_)), "unexpected {err}");

    let latest = master.get(&v0.object_id().at_latest_version()).unwrap();
    assert_eq!(latest, v0);
    assert!(latest.is_latest_version());
    assert!(latest.is_latest_correction());
    assert_eq!(history_len(&master, v0.object_id()), 1);
    assert_eq!(*changes.lock().unwrap(), 1);

    dialect.broken.store(false, Ordering::SeqCst);
    let v1 = master.update(&v0.unique_id, &equity("Recovered")).unwrap();
    assert_eq!(v1.unique_id.version(), Some(1));
}

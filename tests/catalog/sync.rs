use cursus::catalog::course::{add_course, archive_course, get_course, set_selection};
use cursus::catalog::lesson::{add_lesson, edit_lesson, remove_lesson};
use cursus::catalog::sync::{
    LessonSnapshot, StaleBoundary, SyncStatus, apply_sync, evaluate_sync, get_sync_report,
    load_stale_boundary, report_fleet,
};
use cursus::core::db;
use cursus::core::error::CursusError;
use cursus::core::store::{Store, StoreKind};
use tempfile::tempdir;

fn snapshot(entries: &[(&str, i64)]) -> LessonSnapshot {
    let mut map = LessonSnapshot::default();
    for (id, ts) in entries {
        map.insert(id.to_string(), *ts);
    }
    map
}

fn ids(raw: &[&str]) -> Vec<String> {
    raw.iter().map(|s| s.to_string()).collect()
}

// --- Pure evaluator ---

#[test]
fn test_empty_selection_is_not_configured() {
    // Regardless of timestamp or parent state.
    let parent = snapshot(&[("l1", 100)]);
    for last_synced in [None, Some(0), Some(999)] {
        let eval = evaluate_sync(&[], &parent, last_synced, StaleBoundary::Strict);
        assert_eq!(eval.status, SyncStatus::NOT_CONFIGURED);
        assert!(eval.missing_lesson_ids.is_empty());
    }
    let eval = evaluate_sync(&[], &LessonSnapshot::default(), None, StaleBoundary::Strict);
    assert_eq!(eval.status, SyncStatus::NOT_CONFIGURED);
}

#[test]
fn test_never_synced_when_all_resolve_without_timestamp() {
    let parent = snapshot(&[("l1", 100), ("l2", 200)]);
    let eval = evaluate_sync(&ids(&["l1", "l2"]), &parent, None, StaleBoundary::Strict);
    assert_eq!(eval.status, SyncStatus::NEVER_SYNCED);
    assert!(eval.missing_lesson_ids.is_empty());
}

#[test]
fn test_missing_lessons_preserve_selection_order() {
    let parent = snapshot(&[("l1", 100)]);
    let eval = evaluate_sync(
        &ids(&["l9", "l1", "l7", "l8"]),
        &parent,
        Some(100),
        StaleBoundary::Strict,
    );
    assert_eq!(eval.status, SyncStatus::MISSING_LESSONS);
    assert_eq!(eval.missing_lesson_ids, ids(&["l9", "l7", "l8"]));
}

#[test]
fn test_duplicate_ids_reported_once() {
    let parent = snapshot(&[("l1", 100)]);
    let eval = evaluate_sync(
        &ids(&["l2", "l1", "l2", "l2"]),
        &parent,
        None,
        StaleBoundary::Strict,
    );
    assert_eq!(eval.status, SyncStatus::MISSING_LESSONS);
    assert_eq!(eval.missing_lesson_ids, ids(&["l2"]));
}

#[test]
fn test_missing_takes_priority_over_stale() {
    // l1 is newer than the sync point AND l9 is unresolvable.
    let parent = snapshot(&[("l1", 500)]);
    let eval = evaluate_sync(&ids(&["l1", "l9"]), &parent, Some(100), StaleBoundary::Strict);
    assert_eq!(eval.status, SyncStatus::MISSING_LESSONS);
    assert_eq!(eval.missing_lesson_ids, ids(&["l9"]));
}

#[test]
fn test_stale_when_any_lesson_newer_than_sync_point() {
    let parent = snapshot(&[("l1", 100), ("l2", 300)]);
    let eval = evaluate_sync(&ids(&["l1", "l2"]), &parent, Some(200), StaleBoundary::Strict);
    assert_eq!(eval.status, SyncStatus::STALE);
    assert!(eval.missing_lesson_ids.is_empty());
}

#[test]
fn test_equal_timestamp_is_in_sync_under_strict_boundary() {
    let parent = snapshot(&[("l1", 200)]);
    let eval = evaluate_sync(&ids(&["l1"]), &parent, Some(200), StaleBoundary::Strict);
    assert_eq!(eval.status, SyncStatus::IN_SYNC);
}

#[test]
fn test_equal_timestamp_is_stale_under_inclusive_boundary() {
    let parent = snapshot(&[("l1", 200)]);
    let eval = evaluate_sync(&ids(&["l1"]), &parent, Some(200), StaleBoundary::Inclusive);
    assert_eq!(eval.status, SyncStatus::STALE);
}

#[test]
fn test_in_sync_when_nothing_modified_since_sync() {
    let parent = snapshot(&[("l1", 100), ("l2", 150)]);
    let eval = evaluate_sync(&ids(&["l1", "l2"]), &parent, Some(200), StaleBoundary::Strict);
    assert_eq!(eval.status, SyncStatus::IN_SYNC);
    assert!(eval.missing_lesson_ids.is_empty());
}

#[test]
fn test_staleness_only_considers_selected_lessons() {
    // l3 is newer but not selected; the child does not care.
    let parent = snapshot(&[("l1", 100), ("l3", 900)]);
    let eval = evaluate_sync(&ids(&["l1"]), &parent, Some(200), StaleBoundary::Strict);
    assert_eq!(eval.status, SyncStatus::IN_SYNC);
}

#[test]
fn test_evaluation_is_idempotent() {
    let parent = snapshot(&[("l1", 100), ("l2", 300)]);
    let selection = ids(&["l2", "l1", "l2"]);
    let first = evaluate_sync(&selection, &parent, Some(200), StaleBoundary::Strict);
    let second = evaluate_sync(&selection, &parent, Some(200), StaleBoundary::Strict);
    assert_eq!(first, second);
}

// --- Store-facing surfaces ---

struct Fixture {
    _tmp: tempfile::TempDir,
    store: Store,
    parent_id: String,
    child_id: String,
    lesson_ids: Vec<String>,
}

fn seed_fixture() -> Fixture {
    let tmp = tempdir().unwrap();
    let store = Store {
        kind: StoreKind::Scratch,
        root: tmp.path().to_path_buf(),
    };
    db::initialize_catalog_db(&store.root).unwrap();

    let parent_id = add_course(&store, Some("parent-course"), "Parent", "en", None).unwrap();
    let child_id =
        add_course(&store, Some("child-course"), "Child", "es", Some("parent-course")).unwrap();

    let mut lesson_ids = Vec::new();
    for day in 1..=3 {
        let id = add_lesson(
            &store,
            None,
            &parent_id,
            day,
            &format!("Day {}", day),
            "original content",
        )
        .unwrap();
        lesson_ids.push(id);
    }
    set_selection(&store, &child_id, &lesson_ids).unwrap();

    Fixture {
        _tmp: tmp,
        store,
        parent_id,
        child_id,
        lesson_ids,
    }
}

fn set_last_synced(store: &Store, course_id: &str, value: Option<&str>) {
    let db_path = db::catalog_db_path(&store.root);
    let conn = rusqlite::Connection::open(db_path).unwrap();
    conn.execute(
        "UPDATE courses SET last_synced_at = ?1 WHERE id = ?2",
        rusqlite::params![value, course_id],
    )
    .unwrap();
}

#[test]
fn test_status_never_synced_end_to_end() {
    let fx = seed_fixture();
    let (report, _reason) = get_sync_report(&fx.store, &fx.child_id).unwrap();
    assert!(report.success);
    assert_eq!(report.computed_status, SyncStatus::NEVER_SYNCED);
    assert_eq!(report.sync_status, None);
    assert_eq!(report.last_synced_at, None);
    assert!(report.missing_lesson_ids.is_empty());
}

#[test]
fn test_removed_lesson_reported_missing() {
    let fx = seed_fixture();
    remove_lesson(&fx.store, &fx.lesson_ids[1]).unwrap();
    let (report, _) = get_sync_report(&fx.store, &fx.child_id).unwrap();
    assert_eq!(report.computed_status, SyncStatus::MISSING_LESSONS);
    assert_eq!(report.missing_lesson_ids, vec![fx.lesson_ids[1].clone()]);
}

#[test]
fn test_stale_and_in_sync_against_pinned_timestamps() {
    let fx = seed_fixture();

    // Sync point far in the past: lessons were modified after it.
    set_last_synced(&fx.store, &fx.child_id, Some("1000Z"));
    let (report, _) = get_sync_report(&fx.store, &fx.child_id).unwrap();
    assert_eq!(report.computed_status, SyncStatus::STALE);

    // Sync point far in the future: nothing modified after it.
    set_last_synced(&fx.store, &fx.child_id, Some("99999999999Z"));
    let (report, _) = get_sync_report(&fx.store, &fx.child_id).unwrap();
    assert_eq!(report.computed_status, SyncStatus::IN_SYNC);
}

#[test]
fn test_apply_persists_sync_fields_and_settles() {
    let fx = seed_fixture();
    let (report, _) = apply_sync(&fx.store, &fx.child_id).unwrap();
    assert_eq!(report.computed_status, SyncStatus::IN_SYNC);

    let course = get_course(&fx.store, &fx.child_id).unwrap();
    assert_eq!(course.sync_status.as_deref(), Some("IN_SYNC"));
    assert!(course.last_synced_at.is_some());

    // Drift again, then reconcile again.
    edit_lesson(&fx.store, &fx.lesson_ids[0], None, None, Some("revised")).unwrap();
    set_last_synced(&fx.store, &fx.child_id, Some("1000Z"));
    let (report, _) = get_sync_report(&fx.store, &fx.child_id).unwrap();
    assert_eq!(report.computed_status, SyncStatus::STALE);

    let (report, _) = apply_sync(&fx.store, &fx.child_id).unwrap();
    assert_eq!(report.computed_status, SyncStatus::IN_SYNC);
}

#[test]
fn test_apply_refuses_unconfigured_child() {
    let fx = seed_fixture();
    set_selection(&fx.store, &fx.child_id, &[]).unwrap();
    let err = apply_sync(&fx.store, &fx.child_id).unwrap_err();
    assert!(matches!(err, CursusError::ValidationError(_)));
}

#[test]
fn test_status_on_parent_is_a_validation_error() {
    let fx = seed_fixture();
    let err = get_sync_report(&fx.store, &fx.parent_id).unwrap_err();
    match err {
        CursusError::ValidationError(msg) => assert!(msg.contains("not a child course")),
        other => panic!("expected ValidationError, got {:?}", other),
    }
}

#[test]
fn test_status_on_unknown_course_is_not_found() {
    let fx = seed_fixture();
    let err = get_sync_report(&fx.store, "ghost-course").unwrap_err();
    assert!(matches!(err, CursusError::NotFound(_)));
}

#[test]
fn test_archived_parent_is_invalid_reference() {
    let fx = seed_fixture();
    archive_course(&fx.store, &fx.parent_id).unwrap();
    let err = get_sync_report(&fx.store, &fx.child_id).unwrap_err();
    assert!(matches!(err, CursusError::InvalidParentReference(_)));
}

#[test]
fn test_dangling_parent_is_invalid_reference() {
    let fx = seed_fixture();
    // Corrupt the reference directly; the store does not forbid it.
    let db_path = db::catalog_db_path(&fx.store.root);
    let conn = rusqlite::Connection::open(db_path).unwrap();
    conn.execute(
        "UPDATE courses SET parent_course_id = 'ghost-parent' WHERE id = ?1",
        rusqlite::params![fx.child_id],
    )
    .unwrap();
    drop(conn);

    let err = get_sync_report(&fx.store, &fx.child_id).unwrap_err();
    assert!(matches!(err, CursusError::InvalidParentReference(_)));
}

#[test]
fn test_select_is_lax_and_status_is_strict() {
    let fx = seed_fixture();
    let mut selection = fx.lesson_ids.clone();
    selection.push("not-a-lesson".to_string());
    set_selection(&fx.store, &fx.child_id, &selection).unwrap();

    let (report, _) = get_sync_report(&fx.store, &fx.child_id).unwrap();
    assert_eq!(report.computed_status, SyncStatus::MISSING_LESSONS);
    assert_eq!(report.missing_lesson_ids, vec!["not-a-lesson".to_string()]);
}

#[test]
fn test_status_refreshes_cache_row() {
    let fx = seed_fixture();
    let _ = get_sync_report(&fx.store, &fx.child_id).unwrap();

    let db_path = db::catalog_db_path(&fx.store.root);
    let conn = rusqlite::Connection::open(db_path).unwrap();
    let (status, missing): (String, String) = conn
        .query_row(
            "SELECT computed_status, missing_lesson_ids FROM sync_cache WHERE course_id = ?1",
            rusqlite::params![fx.child_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap();
    assert_eq!(status, "NEVER_SYNCED");
    assert_eq!(missing, "[]");
}

#[test]
fn test_fleet_report_mixed_states() {
    let fx = seed_fixture();

    // A second child that has already been reconciled.
    let settled_id =
        add_course(&fx.store, Some("settled-child"), "Settled", "fr", Some("parent-course"))
            .unwrap();
    set_selection(&fx.store, &settled_id, &fx.lesson_ids[..1].to_vec()).unwrap();
    apply_sync(&fx.store, &settled_id).unwrap();

    // A third child pointing at a parent that disappears.
    let orphan_parent = add_course(&fx.store, Some("doomed-parent"), "Doomed", "en", None).unwrap();
    let orphan_child =
        add_course(&fx.store, Some("orphan-child"), "Orphan", "de", Some("doomed-parent"))
            .unwrap();
    set_selection(&fx.store, &orphan_child, &ids(&["whatever"])).unwrap();
    archive_course(&fx.store, &orphan_parent).unwrap();

    let entries = report_fleet(&fx.store).unwrap();
    assert_eq!(entries.len(), 3);

    let by_id = |id: &str| entries.iter().find(|e| e.course_id == id).unwrap();
    assert_eq!(
        by_id("child-course").computed_status,
        Some(SyncStatus::NEVER_SYNCED)
    );
    assert_eq!(
        by_id("settled-child").computed_status,
        Some(SyncStatus::IN_SYNC)
    );
    let orphan = by_id("orphan-child");
    assert_eq!(orphan.computed_status, None);
    assert!(orphan.error.as_deref().unwrap().contains("invalid parent reference"));
}

#[test]
fn test_report_payload_shape_is_camel_case() {
    let fx = seed_fixture();
    let (report, _) = get_sync_report(&fx.store, &fx.child_id).unwrap();
    let value = serde_json::to_value(&report).unwrap();
    let obj = value.as_object().unwrap();
    for key in [
        "success",
        "syncStatus",
        "lastSyncedAt",
        "computedStatus",
        "missingLessonIds",
    ] {
        assert!(obj.contains_key(key), "missing payload key: {}", key);
    }
    assert_eq!(value["computedStatus"], "NEVER_SYNCED");
}

// --- Boundary policy ---

#[test]
fn test_boundary_defaults_to_strict_without_policy_file() {
    let tmp = tempdir().unwrap();
    assert_eq!(
        load_stale_boundary(tmp.path()).unwrap(),
        StaleBoundary::Strict
    );
}

#[test]
fn test_boundary_reads_inclusive_policy() {
    let tmp = tempdir().unwrap();
    std::fs::write(
        tmp.path().join("SYNC.toml"),
        "[policy]\nstale_boundary = \"inclusive\"\n",
    )
    .unwrap();
    assert_eq!(
        load_stale_boundary(tmp.path()).unwrap(),
        StaleBoundary::Inclusive
    );
}

#[test]
fn test_boundary_rejects_unknown_policy_value() {
    let tmp = tempdir().unwrap();
    std::fs::write(
        tmp.path().join("SYNC.toml"),
        "[policy]\nstale_boundary = \"sometimes\"\n",
    )
    .unwrap();
    let err = load_stale_boundary(tmp.path()).unwrap_err();
    assert!(matches!(err, CursusError::ValidationError(_)));
}

#[test]
fn test_inclusive_boundary_applies_to_status_surface() {
    let fx = seed_fixture();
    std::fs::write(
        fx.store.root.join("SYNC.toml"),
        "[policy]\nstale_boundary = \"inclusive\"\n",
    )
    .unwrap();

    // Pin sync point exactly to a lesson's modification timestamp.
    let db_path = db::catalog_db_path(&fx.store.root);
    let conn = rusqlite::Connection::open(db_path).unwrap();
    let modified: String = conn
        .query_row(
            "SELECT last_modified_at FROM lessons WHERE id = ?1",
            rusqlite::params![fx.lesson_ids[0]],
            |row| row.get(0),
        )
        .unwrap();
    conn.execute(
        "UPDATE lessons SET last_modified_at = ?1 WHERE course_id = 'parent-course'",
        rusqlite::params![modified],
    )
    .unwrap();
    drop(conn);
    set_last_synced(&fx.store, &fx.child_id, Some(&modified));

    let (report, _) = get_sync_report(&fx.store, &fx.child_id).unwrap();
    assert_eq!(report.computed_status, SyncStatus::STALE);
}

use cursus::catalog::course::add_course;
use cursus::catalog::lesson::{
    add_lesson, content_hash, edit_lesson, get_lesson, list_lessons, remove_lesson,
};
use cursus::core::db;
use cursus::core::error::CursusError;
use cursus::core::store::{Store, StoreKind};
use cursus::core::time;
use tempfile::tempdir;

fn store_with_course() -> (tempfile::TempDir, Store) {
    let tmp = tempdir().unwrap();
    let store = Store {
        kind: StoreKind::Scratch,
        root: tmp.path().to_path_buf(),
    };
    db::initialize_catalog_db(&store.root).unwrap();
    add_course(&store, Some("course-1"), "Course", "en", None).unwrap();
    (tmp, store)
}

#[test]
fn test_content_hash_is_sha256() {
    assert_eq!(
        content_hash(""),
        "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
    );
    assert_ne!(content_hash("a"), content_hash("b"));
}

#[test]
fn test_add_and_get_lesson() {
    let (_tmp, store) = store_with_course();
    let id = add_lesson(&store, None, "course-1", 2, "Day 2", "breathe in").unwrap();

    let lesson = get_lesson(&store, &id).unwrap();
    assert_eq!(lesson.course_id, "course-1");
    assert_eq!(lesson.day_number, 2);
    assert_eq!(lesson.title, "Day 2");
    assert_eq!(lesson.content_hash, content_hash("breathe in"));
    assert!(time::parse_epoch_z(&lesson.last_modified_at).is_some());
    assert_eq!(lesson.last_modified_at, lesson.created_at);
}

#[test]
fn test_add_rejects_unknown_or_archived_course() {
    let (_tmp, store) = store_with_course();
    let err = add_lesson(&store, None, "ghost", 1, "Day 1", "").unwrap_err();
    assert!(matches!(err, CursusError::NotFound(_)));

    cursus::catalog::course::archive_course(&store, "course-1").unwrap();
    let err = add_lesson(&store, None, "course-1", 1, "Day 1", "").unwrap_err();
    assert!(matches!(err, CursusError::ValidationError(_)));
}

#[test]
fn test_add_rejects_empty_title() {
    let (_tmp, store) = store_with_course();
    let err = add_lesson(&store, None, "course-1", 1, "  ", "").unwrap_err();
    assert!(matches!(err, CursusError::ValidationError(_)));
}

#[test]
fn test_edit_content_rewrites_revision_marker() {
    let (_tmp, store) = store_with_course();
    let id = add_lesson(&store, None, "course-1", 1, "Day 1", "v1").unwrap();
    let before = get_lesson(&store, &id).unwrap();

    edit_lesson(&store, &id, None, None, Some("v2")).unwrap();
    let after = get_lesson(&store, &id).unwrap();
    assert_eq!(after.content, "v2");
    assert_ne!(after.content_hash, before.content_hash);
    assert_eq!(after.content_hash, content_hash("v2"));
}

#[test]
fn test_edit_title_keeps_content_hash() {
    let (_tmp, store) = store_with_course();
    let id = add_lesson(&store, None, "course-1", 1, "Day 1", "same").unwrap();
    edit_lesson(&store, &id, Some("Day One"), Some(4), None).unwrap();

    let lesson = get_lesson(&store, &id).unwrap();
    assert_eq!(lesson.title, "Day One");
    assert_eq!(lesson.day_number, 4);
    assert_eq!(lesson.content_hash, content_hash("same"));
}

#[test]
fn test_edit_requires_some_field() {
    let (_tmp, store) = store_with_course();
    let id = add_lesson(&store, None, "course-1", 1, "Day 1", "").unwrap();
    let err = edit_lesson(&store, &id, None, None, None).unwrap_err();
    assert!(matches!(err, CursusError::ValidationError(_)));
}

#[test]
fn test_edit_unknown_lesson_is_not_found() {
    let (_tmp, store) = store_with_course();
    let err = edit_lesson(&store, "ghost", Some("t"), None, None).unwrap_err();
    assert!(matches!(err, CursusError::NotFound(_)));
}

#[test]
fn test_remove_lesson_hard_deletes() {
    let (_tmp, store) = store_with_course();
    let id = add_lesson(&store, None, "course-1", 1, "Day 1", "").unwrap();
    remove_lesson(&store, &id).unwrap();

    let err = get_lesson(&store, &id).unwrap_err();
    assert!(matches!(err, CursusError::NotFound(_)));

    let err = remove_lesson(&store, &id).unwrap_err();
    assert!(matches!(err, CursusError::NotFound(_)));
}

#[test]
fn test_list_orders_by_day() {
    let (_tmp, store) = store_with_course();
    add_lesson(&store, Some("l-c"), "course-1", 3, "Day 3", "").unwrap();
    add_lesson(&store, Some("l-a"), "course-1", 1, "Day 1", "").unwrap();
    add_lesson(&store, Some("l-b"), "course-1", 2, "Day 2", "").unwrap();

    let lessons = list_lessons(&store, Some("course-1")).unwrap();
    let days: Vec<i64> = lessons.iter().map(|l| l.day_number).collect();
    assert_eq!(days, vec![1, 2, 3]);

    let all = list_lessons(&store, None).unwrap();
    assert_eq!(all.len(), 3);
}

//! Centralized database schema definitions for the Cursus catalog store.
//!
//! The catalog is a single consolidated SQLite database (`catalog.db`)
//! holding three subsystem surfaces:
//! 1. courses: parent and child course records, including each child's
//!    declared lesson selection and cached sync fields.
//! 2. lessons: per-course lesson records with revision markers.
//! 3. sync_cache: non-authoritative computed sync results for dashboards.

pub const CATALOG_DB_NAME: &str = "catalog.db";
pub const BROKER_EVENTS_NAME: &str = "broker.events.jsonl";
pub const SYNC_POLICY_NAME: &str = "SYNC.toml";

// `parent_course_id` is deliberately NOT a foreign key: a parent may be
// archived or removed out from under its children, and the sync engine
// must be able to observe that state rather than have the store forbid it.
// The same holds for `selected_lesson_ids`: an ordered JSON array of
// lesson ids that the store never validates against the parent's lesson
// set. Integrity is re-checked on every sync evaluation.
pub const CATALOG_DB_SCHEMA_COURSES: &str = "
    CREATE TABLE IF NOT EXISTS courses (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        language TEXT NOT NULL DEFAULT 'en',
        parent_course_id TEXT,
        selected_lesson_ids TEXT NOT NULL DEFAULT '[]',
        sync_status TEXT,
        last_synced_at TEXT,
        status TEXT NOT NULL DEFAULT 'active',
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
";

pub const CATALOG_DB_SCHEMA_LESSONS: &str = "
    CREATE TABLE IF NOT EXISTS lessons (
        id TEXT PRIMARY KEY,
        course_id TEXT NOT NULL,
        day_number INTEGER NOT NULL DEFAULT 1,
        title TEXT NOT NULL,
        content TEXT NOT NULL DEFAULT '',
        content_hash TEXT NOT NULL,
        last_modified_at TEXT NOT NULL,
        created_at TEXT NOT NULL,
        FOREIGN KEY(course_id) REFERENCES courses(id)
    )
";

pub const CATALOG_DB_SCHEMA_SYNC_CACHE: &str = "
    CREATE TABLE IF NOT EXISTS sync_cache (
        course_id TEXT PRIMARY KEY,
        computed_status TEXT NOT NULL,
        missing_lesson_ids TEXT NOT NULL DEFAULT '[]',
        reason TEXT,
        evaluated_at TEXT NOT NULL
    )
";

pub const CATALOG_DB_INDEX_COURSES_PARENT: &str =
    "CREATE INDEX IF NOT EXISTS idx_courses_parent ON courses(parent_course_id)";
pub const CATALOG_DB_INDEX_COURSES_STATUS: &str =
    "CREATE INDEX IF NOT EXISTS idx_courses_status ON courses(status)";
pub const CATALOG_DB_INDEX_LESSONS_COURSE: &str =
    "CREATE INDEX IF NOT EXISTS idx_lessons_course ON lessons(course_id)";
pub const CATALOG_DB_INDEX_LESSONS_MODIFIED: &str =
    "CREATE INDEX IF NOT EXISTS idx_lessons_modified ON lessons(last_modified_at)";

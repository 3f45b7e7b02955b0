use crate::core::broker::DbBroker;
use crate::core::error;
use crate::core::schemas;
use rusqlite::Connection;
use std::fs;
use std::path::{Path, PathBuf};

pub fn db_connect(db_path: &str) -> Result<Connection, error::CursusError> {
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(std::time::Duration::from_secs(5))
        .map_err(error::CursusError::RusqliteError)?;
    conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))
        .map_err(error::CursusError::RusqliteError)?;
    conn.execute("PRAGMA foreign_keys=ON;", [])
        .map_err(error::CursusError::RusqliteError)?;
    Ok(conn)
}

pub fn catalog_db_path(root: &Path) -> PathBuf {
    root.join(schemas::CATALOG_DB_NAME)
}

pub fn initialize_catalog_db(root: &Path) -> Result<(), error::CursusError> {
    let db_path = catalog_db_path(root);
    let parent_dir = db_path.parent().ok_or_else(|| {
        error::CursusError::PathError(format!("no parent directory for {}", db_path.display()))
    })?;
    fs::create_dir_all(parent_dir).map_err(error::CursusError::IoError)?;

    let broker = DbBroker::new(root);
    broker.with_conn(&db_path, "cursus", None, "catalog.init", |conn| {
        conn.execute(schemas::CATALOG_DB_SCHEMA_COURSES, [])?;
        conn.execute(schemas::CATALOG_DB_SCHEMA_LESSONS, [])?;
        conn.execute(schemas::CATALOG_DB_SCHEMA_SYNC_CACHE, [])?;
        conn.execute(schemas::CATALOG_DB_INDEX_COURSES_PARENT, [])?;
        conn.execute(schemas::CATALOG_DB_INDEX_COURSES_STATUS, [])?;
        conn.execute(schemas::CATALOG_DB_INDEX_LESSONS_COURSE, [])?;
        conn.execute(schemas::CATALOG_DB_INDEX_LESSONS_MODIFIED, [])?;
        Ok(())
    })
}

// Subsystems share the consolidated catalog.db. Avoid per-subsystem database
// files until a real extension mechanism exists.

use crate::core::broker::DbBroker;
use crate::core::db;
use crate::core::error;
use crate::core::store::Store;
use crate::core::time;
use crate::core::validate;
use clap::{Parser, Subcommand, ValueEnum};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[clap(name = "lesson", about = "Manage lessons owned by catalog courses.")]
pub struct LessonCli {
    /// Output format for this command group.
    #[clap(long, global = true, value_enum, default_value = "text")]
    format: OutputFormat,
    #[clap(subcommand)]
    command: LessonCommand,
}

#[derive(Subcommand, Debug)]
pub enum LessonCommand {
    /// Add a lesson to a course.
    Add {
        /// Lesson title (positional argument)
        #[clap(value_name = "TITLE")]
        title: String,
        #[clap(long)]
        course: String,
        #[clap(long, default_value_t = 1)]
        day: i64,
        #[clap(long, default_value = "")]
        content: String,
        /// Explicit lesson id (ULID generated when omitted).
        #[clap(long)]
        id: Option<String>,
    },
    /// List lessons, optionally scoped to one course.
    List {
        #[clap(long)]
        course: Option<String>,
    },
    /// Get a lesson by id.
    Get {
        #[clap(long)]
        id: String,
    },
    /// Edit a lesson's title, day, or content. Bumps the revision marker.
    Edit {
        #[clap(long)]
        id: String,
        #[clap(long)]
        title: Option<String>,
        #[clap(long)]
        day: Option<i64>,
        #[clap(long)]
        content: Option<String>,
    },
    /// Hard-delete a lesson. Child selections referencing it go stale by
    /// design; the sync engine reports them as missing.
    Remove {
        #[clap(long)]
        id: String,
    },
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Lesson {
    pub id: String,
    pub course_id: String,
    pub day_number: i64,
    pub title: String,
    pub content: String,
    pub content_hash: String,
    pub last_modified_at: String,
    pub created_at: String,
}

const LESSON_COLUMNS: &str =
    "id, course_id, day_number, title, content, content_hash, last_modified_at, created_at";

fn lesson_from_row(row: &rusqlite::Row) -> rusqlite::Result<Lesson> {
    Ok(Lesson {
        id: row.get(0)?,
        course_id: row.get(1)?,
        day_number: row.get(2)?,
        title: row.get(3)?,
        content: row.get(4)?,
        content_hash: row.get(5)?,
        last_modified_at: row.get(6)?,
        created_at: row.get(7)?,
    })
}

/// SHA-256 revision marker over lesson content.
pub fn content_hash(content: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub fn run_lesson_cli(store: &Store, cli: LessonCli) -> Result<(), error::CursusError> {
    db::initialize_catalog_db(&store.root)?;
    let format = cli.format;
    match cli.command {
        LessonCommand::Add {
            title,
            course,
            day,
            content,
            id,
        } => {
            let lesson_id = add_lesson(store, id.as_deref(), &course, day, &title, &content)?;
            println!("Lesson added: {}", lesson_id);
        }
        LessonCommand::List { course } => {
            let lessons = list_lessons(store, course.as_deref())?;
            match format {
                OutputFormat::Text => {
                    for l in &lessons {
                        println!(
                            "{}  day {:>3}  [{}] {}",
                            l.id, l.day_number, l.course_id, l.title
                        );
                    }
                    println!("{} lesson(s)", lessons.len());
                }
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&lessons).unwrap());
                }
            }
        }
        LessonCommand::Get { id } => {
            let lesson = get_lesson(store, &id)?;
            match format {
                OutputFormat::Text => {
                    println!(
                        "Lesson: {}\nCourse: {}\nDay: {}\nTitle: {}\nModified: {}",
                        lesson.id,
                        lesson.course_id,
                        lesson.day_number,
                        lesson.title,
                        lesson.last_modified_at
                    );
                }
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&lesson).unwrap());
                }
            }
        }
        LessonCommand::Edit {
            id,
            title,
            day,
            content,
        } => {
            edit_lesson(store, &id, title.as_deref(), day, content.as_deref())?;
            println!("Lesson updated: {}", id);
        }
        LessonCommand::Remove { id } => {
            remove_lesson(store, &id)?;
            println!("Lesson removed: {}", id);
        }
    }
    Ok(())
}

pub fn add_lesson(
    store: &Store,
    id: Option<&str>,
    course_id: &str,
    day_number: i64,
    title: &str,
    content: &str,
) -> Result<String, error::CursusError> {
    if title.trim().is_empty() {
        return Err(error::CursusError::ValidationError(
            "lesson title must not be empty".to_string(),
        ));
    }
    let lesson_id = match id {
        Some(explicit) => {
            validate::validate_entity_id(explicit)?;
            explicit.to_string()
        }
        None => Ulid::new().to_string().to_lowercase(),
    };

    let broker = DbBroker::new(&store.root);
    let db_path = db::catalog_db_path(&store.root);
    let now = time::now_epoch_z();
    let hash = content_hash(content);

    broker.with_conn(&db_path, "cursus", None, "lesson.add", |conn| {
        let owner: Option<String> = conn
            .query_row(
                "SELECT status FROM courses WHERE id = ?1",
                params![course_id],
                |row| row.get(0),
            )
            .optional()?;
        match owner {
            None => {
                return Err(error::CursusError::NotFound(format!(
                    "course not found: {}",
                    course_id
                )));
            }
            Some(status) if status != "active" => {
                return Err(error::CursusError::ValidationError(format!(
                    "course is not active: {}",
                    course_id
                )));
            }
            Some(_) => {}
        }
        conn.execute(
            "INSERT INTO lessons(id, course_id, day_number, title, content, content_hash, last_modified_at, created_at) \
             VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            params![lesson_id, course_id, day_number, title, content, hash, now],
        )?;
        Ok(())
    })?;

    Ok(lesson_id)
}

pub fn get_lesson(store: &Store, id: &str) -> Result<Lesson, error::CursusError> {
    let broker = DbBroker::new(&store.root);
    let db_path = db::catalog_db_path(&store.root);

    broker.with_conn(&db_path, "cursus", None, "lesson.get", |conn| {
        fetch_lesson(conn, id)?
            .ok_or_else(|| error::CursusError::NotFound(format!("lesson not found: {}", id)))
    })
}

fn fetch_lesson(conn: &Connection, id: &str) -> Result<Option<Lesson>, error::CursusError> {
    let lesson = conn
        .query_row(
            &format!("SELECT {} FROM lessons WHERE id = ?1", LESSON_COLUMNS),
            params![id],
            lesson_from_row,
        )
        .optional()?;
    Ok(lesson)
}

pub fn list_lessons(
    store: &Store,
    course_id: Option<&str>,
) -> Result<Vec<Lesson>, error::CursusError> {
    let broker = DbBroker::new(&store.root);
    let db_path = db::catalog_db_path(&store.root);

    broker.with_conn(&db_path, "cursus", None, "lesson.list", |conn| {
        let mut out = Vec::new();
        match course_id {
            Some(cid) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM lessons WHERE course_id = ?1 ORDER BY day_number, id",
                    LESSON_COLUMNS
                ))?;
                let rows = stmt.query_map(params![cid], lesson_from_row)?;
                for r in rows {
                    out.push(r?);
                }
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM lessons ORDER BY course_id, day_number, id",
                    LESSON_COLUMNS
                ))?;
                let rows = stmt.query_map([], lesson_from_row)?;
                for r in rows {
                    out.push(r?);
                }
            }
        }
        Ok(out)
    })
}

/// Any edit bumps `last_modified_at`; a content change also rewrites the
/// content hash. Children synced before the edit become STALE.
pub fn edit_lesson(
    store: &Store,
    id: &str,
    title: Option<&str>,
    day_number: Option<i64>,
    content: Option<&str>,
) -> Result<(), error::CursusError> {
    if title.is_none() && day_number.is_none() && content.is_none() {
        return Err(error::CursusError::ValidationError(
            "nothing to edit: pass --title, --day, or --content".to_string(),
        ));
    }
    let broker = DbBroker::new(&store.root);
    let db_path = db::catalog_db_path(&store.root);
    let now = time::now_epoch_z();

    broker.with_conn(&db_path, "cursus", None, "lesson.edit", |conn| {
        let existing = fetch_lesson(conn, id)?
            .ok_or_else(|| error::CursusError::NotFound(format!("lesson not found: {}", id)))?;

        let new_title = title.unwrap_or(&existing.title);
        let new_day = day_number.unwrap_or(existing.day_number);
        let new_content = content.unwrap_or(&existing.content);
        let new_hash = content_hash(new_content);

        conn.execute(
            "UPDATE lessons SET title = ?1, day_number = ?2, content = ?3, content_hash = ?4, last_modified_at = ?5 \
             WHERE id = ?6",
            params![new_title, new_day, new_content, new_hash, now, id],
        )?;
        Ok(())
    })
}

pub fn remove_lesson(store: &Store, id: &str) -> Result<(), error::CursusError> {
    let broker = DbBroker::new(&store.root);
    let db_path = db::catalog_db_path(&store.root);

    broker.with_conn(&db_path, "cursus", None, "lesson.remove", |conn| {
        let changed = conn.execute("DELETE FROM lessons WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(error::CursusError::NotFound(format!(
                "lesson not found: {}",
                id
            )));
        }
        Ok(())
    })
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "lesson",
        "version": "0.1.0",
        "description": "Lesson records with content revision markers",
        "commands": [
            { "name": "add", "parameters": ["title", "course", "day", "content", "id"] },
            { "name": "list", "parameters": ["course"] },
            { "name": "get", "parameters": ["id"] },
            { "name": "edit", "parameters": ["id", "title", "day", "content"] },
            { "name": "remove", "parameters": ["id"] }
        ],
        "storage": ["catalog.db"]
    })
}

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
#[clap(name = "course", about = "Manage catalog courses and child selections.")]
pub struct CourseCli {
    /// Output format for this command group.
    #[clap(long, global = true, value_enum, default_value = "text")]
    format: OutputFormat,
    #[clap(subcommand)]
    command: CourseCommand,
}

#[derive(Subcommand, Debug)]
pub enum CourseCommand {
    /// Add a new course (child course when --parent is given).
    Add {
        /// Course title (positional argument)
        #[clap(value_name = "TITLE")]
        title: String,
        /// Explicit course id (ULID generated when omitted).
        #[clap(long)]
        id: Option<String>,
        #[clap(long, default_value = "en")]
        language: String,
        /// Parent course id; marks this course as a child.
        #[clap(long)]
        parent: Option<String>,
    },
    /// List courses.
    List {
        /// Only children of this parent course.
        #[clap(long)]
        parent: Option<String>,
        #[clap(long)]
        status: Option<String>,
        /// Only child courses (any parent).
        #[clap(long)]
        children: bool,
    },
    /// Get a course by id.
    Get {
        #[clap(long)]
        id: String,
    },
    /// Declare or replace a child course's ordered lesson selection.
    Select {
        #[clap(long)]
        id: String,
        /// Comma-separated lesson ids, in mirror order.
        #[clap(long)]
        lessons: String,
    },
    /// Archive a course (keeps the record; children observe the loss).
    Archive {
        #[clap(long)]
        id: String,
    },
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Course {
    pub id: String,
    pub title: String,
    pub language: String,
    pub parent_course_id: Option<String>,
    pub selected_lesson_ids: Vec<String>,
    pub sync_status: Option<String>,
    pub last_synced_at: Option<String>,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

pub(crate) const COURSE_COLUMNS: &str = "id, title, language, parent_course_id, \
     selected_lesson_ids, sync_status, last_synced_at, status, created_at, updated_at";

pub(crate) fn course_from_row(row: &rusqlite::Row) -> rusqlite::Result<Course> {
    let selection_raw: String = row.get(4)?;
    Ok(Course {
        id: row.get(0)?,
        title: row.get(1)?,
        language: row.get(2)?,
        parent_course_id: row.get(3)?,
        selected_lesson_ids: selection_from_json(&selection_raw).unwrap_or_default(),
        sync_status: row.get(5)?,
        last_synced_at: row.get(6)?,
        status: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

/// Parse a stored `selected_lesson_ids` column. Malformed rows are a
/// validation error, not a sync state.
pub fn selection_from_json(raw: &str) -> Result<Vec<String>, error::CursusError> {
    serde_json::from_str::<Vec<String>>(raw).map_err(|e| {
        error::CursusError::ValidationError(format!("malformed selected_lesson_ids: {}", e))
    })
}

pub fn run_course_cli(store: &Store, cli: CourseCli) -> Result<(), error::CursusError> {
    db::initialize_catalog_db(&store.root)?;
    let format = cli.format;
    match cli.command {
        CourseCommand::Add {
            title,
            id,
            language,
            parent,
        } => {
            let course_id = add_course(store, id.as_deref(), &title, &language, parent.as_deref())?;
            match format {
                OutputFormat::Text => println!("Course added: {}", course_id),
                OutputFormat::Json => {
                    let course = get_course(store, &course_id)?;
                    println!("{}", serde_json::to_string_pretty(&course).unwrap());
                }
            }
        }
        CourseCommand::List {
            parent,
            status,
            children,
        } => {
            let courses = list_courses(store, parent.as_deref(), status.as_deref(), children)?;
            match format {
                OutputFormat::Text => {
                    for c in &courses {
                        let role = match &c.parent_course_id {
                            Some(p) => format!("child of {}", p),
                            None => "parent".to_string(),
                        };
                        println!("{}  [{}] {} ({}, {})", c.id, c.status, c.title, c.language, role);
                    }
                    println!("{} course(s)", courses.len());
                }
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&courses).unwrap());
                }
            }
        }
        CourseCommand::Get { id } => {
            let course = get_course(store, &id)?;
            match format {
                OutputFormat::Text => {
                    println!("Course: {}\nTitle: {}\nLanguage: {}", course.id, course.title, course.language);
                    if let Some(parent) = &course.parent_course_id {
                        println!("Parent: {}", parent);
                        println!("Selected lessons: {}", course.selected_lesson_ids.len());
                        println!("Cached sync status: {}", course.sync_status.as_deref().unwrap_or("-"));
                        println!("Last synced at: {}", course.last_synced_at.as_deref().unwrap_or("-"));
                    }
                    println!("Status: {}", course.status);
                }
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&course).unwrap());
                }
            }
        }
        CourseCommand::Select { id, lessons } => {
            let selection: Vec<String> = lessons
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            set_selection(store, &id, &selection)?;
            match format {
                OutputFormat::Text => {
                    println!("Selection updated for {}: {} lesson(s)", id, selection.len())
                }
                OutputFormat::Json => {
                    let extra = serde_json::json!({ "course_id": id, "selected": selection });
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&time::command_envelope(
                            "course.select",
                            "ok",
                            extra
                        ))
                        .unwrap()
                    );
                }
            }
        }
        CourseCommand::Archive { id } => {
            archive_course(store, &id)?;
            println!("Course archived: {}", id);
        }
    }
    Ok(())
}

pub fn add_course(
    store: &Store,
    id: Option<&str>,
    title: &str,
    language: &str,
    parent: Option<&str>,
) -> Result<String, error::CursusError> {
    if title.trim().is_empty() {
        return Err(error::CursusError::ValidationError(
            "course title must not be empty".to_string(),
        ));
    }
    let course_id = match id {
        Some(explicit) => {
            validate::validate_entity_id(explicit)?;
            explicit.to_string()
        }
        None => Ulid::new().to_string().to_lowercase(),
    };

    let broker = DbBroker::new(&store.root);
    let db_path = db::catalog_db_path(&store.root);
    let now = time::now_epoch_z();

    broker.with_conn(&db_path, "cursus", None, "course.add", |conn| {
        if let Some(parent_id) = parent {
            let parent_row = fetch_course(conn, parent_id)?;
            let parent_course = parent_row.ok_or_else(|| {
                error::CursusError::ValidationError(format!(
                    "parent course not found: {}",
                    parent_id
                ))
            })?;
            if parent_course.status != "active" {
                return Err(error::CursusError::ValidationError(format!(
                    "parent course is not active: {}",
                    parent_id
                )));
            }
            // One-level hierarchy: a child cannot itself be selected from.
            if parent_course.parent_course_id.is_some() {
                return Err(error::CursusError::ValidationError(format!(
                    "course {} is itself a child and cannot be a parent",
                    parent_id
                )));
            }
        }
        conn.execute(
            "INSERT INTO courses(id, title, language, parent_course_id, selected_lesson_ids, status, created_at, updated_at) \
             VALUES(?1, ?2, ?3, ?4, '[]', 'active', ?5, ?5)",
            params![course_id, title, language, parent, now],
        )?;
        Ok(())
    })?;

    Ok(course_id)
}

pub(crate) fn fetch_course(
    conn: &Connection,
    id: &str,
) -> Result<Option<Course>, error::CursusError> {
    let course = conn
        .query_row(
            &format!("SELECT {} FROM courses WHERE id = ?1", COURSE_COLUMNS),
            params![id],
            course_from_row,
        )
        .optional()?;
    Ok(course)
}

pub fn get_course(store: &Store, id: &str) -> Result<Course, error::CursusError> {
    let broker = DbBroker::new(&store.root);
    let db_path = db::catalog_db_path(&store.root);

    broker.with_conn(&db_path, "cursus", None, "course.get", |conn| {
        fetch_course(conn, id)?
            .ok_or_else(|| error::CursusError::NotFound(format!("course not found: {}", id)))
    })
}

pub fn list_courses(
    store: &Store,
    parent: Option<&str>,
    status: Option<&str>,
    children_only: bool,
) -> Result<Vec<Course>, error::CursusError> {
    let broker = DbBroker::new(&store.root);
    let db_path = db::catalog_db_path(&store.root);

    broker.with_conn(&db_path, "cursus", None, "course.list", |conn| {
        let mut sql = format!("SELECT {} FROM courses WHERE 1=1", COURSE_COLUMNS);
        let mut args: Vec<String> = Vec::new();
        if let Some(p) = parent {
            args.push(p.to_string());
            sql.push_str(&format!(" AND parent_course_id = ?{}", args.len()));
        } else if children_only {
            sql.push_str(" AND parent_course_id IS NOT NULL");
        }
        if let Some(s) = status {
            args.push(s.to_string());
            sql.push_str(&format!(" AND status = ?{}", args.len()));
        }
        sql.push_str(" ORDER BY created_at, id");

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(args.iter()), course_from_row)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    })
}

/// Replace a child's declared lesson selection, preserving the given order.
///
/// The ids are format-checked only. They are NOT resolved against the
/// parent's lesson set here: referential integrity is re-validated on every
/// sync evaluation, because the parent changes independently.
pub fn set_selection(
    store: &Store,
    id: &str,
    selection: &[String],
) -> Result<(), error::CursusError> {
    for lesson_id in selection {
        validate::validate_entity_id(lesson_id)?;
    }
    let broker = DbBroker::new(&store.root);
    let db_path = db::catalog_db_path(&store.root);
    let now = time::now_epoch_z();

    broker.with_conn(&db_path, "cursus", None, "course.select", |conn| {
        let course = fetch_course(conn, id)?
            .ok_or_else(|| error::CursusError::NotFound(format!("course not found: {}", id)))?;
        if course.parent_course_id.is_none() {
            return Err(error::CursusError::ValidationError(format!(
                "not a child course: {}",
                id
            )));
        }
        let selection_json = serde_json::to_string(selection).unwrap();
        conn.execute(
            "UPDATE courses SET selected_lesson_ids = ?1, updated_at = ?2 WHERE id = ?3",
            params![selection_json, now, id],
        )?;
        Ok(())
    })
}

pub fn archive_course(store: &Store, id: &str) -> Result<(), error::CursusError> {
    let broker = DbBroker::new(&store.root);
    let db_path = db::catalog_db_path(&store.root);
    let now = time::now_epoch_z();

    broker.with_conn(&db_path, "cursus", None, "course.archive", |conn| {
        let changed = conn.execute(
            "UPDATE courses SET status = 'archived', updated_at = ?1 WHERE id = ?2",
            params![now, id],
        )?;
        if changed == 0 {
            return Err(error::CursusError::NotFound(format!(
                "course not found: {}",
                id
            )));
        }
        Ok(())
    })
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "course",
        "version": "0.1.0",
        "description": "Course records and child lesson selections",
        "commands": [
            { "name": "add", "parameters": ["title", "id", "language", "parent"] },
            { "name": "list", "parameters": ["parent", "status", "children"] },
            { "name": "get", "parameters": ["id"] },
            { "name": "select", "parameters": ["id", "lessons"] },
            { "name": "archive", "parameters": ["id"] }
        ],
        "storage": ["catalog.db"]
    })
}

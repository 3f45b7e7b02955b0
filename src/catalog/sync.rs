//! Child-course synchronization engine.
//!
//! A child course mirrors an ordered subset of its parent's lessons. The
//! evaluator here answers one question: is that selection still valid,
//! still present, and still current relative to the parent's lesson set?
//! The computation is a pure function over a snapshot loaded in a single
//! brokered read; persistence of a reconciliation (`sync apply`) is a
//! separate, explicit write path.

use crate::catalog::course::{self, Course};
use crate::core::broker::DbBroker;
use crate::core::db;
use crate::core::error;
use crate::core::output;
use crate::core::schemas;
use crate::core::store::Store;
use crate::core::time;
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use rayon::prelude::*;
use rusqlite::{Connection, OptionalExtension, params};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[clap(name = "sync", about = "Compute and reconcile child-course sync status.")]
pub struct SyncCli {
    /// Output format for this command group.
    #[clap(long, global = true, value_enum, default_value = "text")]
    format: OutputFormat,
    #[clap(subcommand)]
    command: SyncCommand,
}

#[derive(Subcommand, Debug)]
pub enum SyncCommand {
    /// Compute the sync status of one child course.
    Status {
        #[clap(long)]
        id: String,
    },
    /// Fleet report: compute sync status for every active child course.
    Report,
    /// Reconcile a child course: persist a fresh last-synced timestamp and
    /// the resulting status onto the course record.
    Apply {
        #[clap(long)]
        id: String,
    },
}

/// Computed relationship between a child's selection and its parent.
///
/// Drift states are first-class results, never errors. Serialized variant
/// names are the externally observed wire values.
#[allow(non_camel_case_types)]
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    NOT_CONFIGURED,
    MISSING_LESSONS,
    NEVER_SYNCED,
    STALE,
    IN_SYNC,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::NOT_CONFIGURED => "NOT_CONFIGURED",
            SyncStatus::MISSING_LESSONS => "MISSING_LESSONS",
            SyncStatus::NEVER_SYNCED => "NEVER_SYNCED",
            SyncStatus::STALE => "STALE",
            SyncStatus::IN_SYNC => "IN_SYNC",
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// STALE-vs-IN_SYNC boundary policy.
///
/// `Strict` (default): a lesson modified exactly at `last_synced_at`
/// counts as in sync, avoiding false positives from clock-equal writes.
/// `Inclusive`: the equal timestamp counts as stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StaleBoundary {
    #[default]
    Strict,
    Inclusive,
}

/// Parent lesson snapshot: lesson id -> last-modified epoch seconds.
pub type LessonSnapshot = FxHashMap<String, i64>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncEvaluation {
    pub status: SyncStatus,
    pub missing_lesson_ids: Vec<String>,
    pub reason: String,
}

/// Compute the sync status of a child selection against a parent snapshot.
///
/// Single pass, no side effects. Missing-lesson detection takes priority
/// over staleness: a broken reference is a stronger signal than a content
/// update. Duplicate ids in the selection are one logical reference.
pub fn evaluate_sync(
    selected_lesson_ids: &[String],
    parent_lessons: &LessonSnapshot,
    last_synced_at: Option<i64>,
    boundary: StaleBoundary,
) -> SyncEvaluation {
    if selected_lesson_ids.is_empty() {
        return SyncEvaluation {
            status: SyncStatus::NOT_CONFIGURED,
            missing_lesson_ids: Vec::new(),
            reason: "No lessons selected; nothing to synchronize".to_string(),
        };
    }

    let mut seen = HashSet::new();
    let deduped: Vec<&str> = selected_lesson_ids
        .iter()
        .map(|s| s.as_str())
        .filter(|id| seen.insert(*id))
        .collect();

    let missing: Vec<String> = deduped
        .iter()
        .filter(|id| !parent_lessons.contains_key(**id))
        .map(|id| id.to_string())
        .collect();
    if !missing.is_empty() {
        return SyncEvaluation {
            status: SyncStatus::MISSING_LESSONS,
            reason: format!(
                "{} selected lesson(s) no longer resolve in the parent",
                missing.len()
            ),
            missing_lesson_ids: missing,
        };
    }

    let Some(synced_at) = last_synced_at else {
        return SyncEvaluation {
            status: SyncStatus::NEVER_SYNCED,
            missing_lesson_ids: Vec::new(),
            reason: "All selections resolve but no synchronization has been recorded".to_string(),
        };
    };

    let max_modified = deduped
        .iter()
        .filter_map(|id| parent_lessons.get(*id))
        .copied()
        .max()
        .unwrap_or(i64::MIN);

    let drifted = match boundary {
        StaleBoundary::Strict => max_modified > synced_at,
        StaleBoundary::Inclusive => max_modified >= synced_at,
    };

    if drifted {
        SyncEvaluation {
            status: SyncStatus::STALE,
            missing_lesson_ids: Vec::new(),
            reason: format!(
                "Parent content modified at {}Z, last sync at {}Z",
                max_modified, synced_at
            ),
        }
    } else {
        SyncEvaluation {
            status: SyncStatus::IN_SYNC,
            missing_lesson_ids: Vec::new(),
            reason: format!(
                "All {} selected lesson(s) unchanged since last sync",
                deduped.len()
            ),
        }
    }
}

// --- Boundary policy (SYNC.toml) ---

#[derive(Debug, Deserialize, Default)]
struct SyncPolicyFile {
    #[serde(default)]
    policy: SyncPolicyTable,
}

#[derive(Debug, Deserialize, Default)]
struct SyncPolicyTable {
    #[serde(default)]
    stale_boundary: Option<String>,
}

pub fn sync_policy_path(root: &Path) -> PathBuf {
    root.join(schemas::SYNC_POLICY_NAME)
}

/// Write the default policy file if none exists.
pub fn initialize_sync_policy(root: &Path) -> Result<(), error::CursusError> {
    let path = sync_policy_path(root);
    if path.exists() {
        return Ok(());
    }
    let default = "# Cursus sync policy.\n\
                   # stale_boundary: 'strict' treats a lesson modified exactly at\n\
                   # last_synced_at as in sync; 'inclusive' counts it as stale.\n\
                   [policy]\nstale_boundary = \"strict\"\n";
    fs::write(&path, default).map_err(error::CursusError::IoError)
}

pub fn load_stale_boundary(root: &Path) -> Result<StaleBoundary, error::CursusError> {
    let path = sync_policy_path(root);
    if !path.exists() {
        return Ok(StaleBoundary::Strict);
    }
    let content = fs::read_to_string(&path).map_err(error::CursusError::IoError)?;
    let parsed: SyncPolicyFile = toml::from_str(&content).map_err(|e| {
        error::CursusError::ValidationError(format!("malformed SYNC.toml: {}", e))
    })?;
    match parsed.policy.stale_boundary.as_deref() {
        None | Some("strict") => Ok(StaleBoundary::Strict),
        Some("inclusive") => Ok(StaleBoundary::Inclusive),
        Some(other) => Err(error::CursusError::ValidationError(format!(
            "unknown stale_boundary in SYNC.toml: {}",
            other
        ))),
    }
}

// --- Snapshot loading ---

struct ChildSnapshot {
    course: Course,
    parent_lessons: LessonSnapshot,
}

/// Load a child course and its parent's lesson map in one consistent read.
///
/// The declared parent must resolve to an active course; anything else is
/// the fatal `InvalidParentReference` data-integrity error.
fn load_child_snapshot(
    conn: &Connection,
    course_id: &str,
) -> Result<ChildSnapshot, error::CursusError> {
    let child = course::fetch_course(conn, course_id)?
        .ok_or_else(|| error::CursusError::NotFound(format!("course not found: {}", course_id)))?;

    let parent_id = child.parent_course_id.clone().ok_or_else(|| {
        error::CursusError::ValidationError(format!("not a child course: {}", course_id))
    })?;

    let parent_status: Option<String> = conn
        .query_row(
            "SELECT status FROM courses WHERE id = ?1",
            params![parent_id],
            |row| row.get(0),
        )
        .optional()?;
    match parent_status {
        None => {
            return Err(error::CursusError::InvalidParentReference(format!(
                "parent course {} declared by {} does not exist",
                parent_id, course_id
            )));
        }
        Some(status) if status != "active" => {
            return Err(error::CursusError::InvalidParentReference(format!(
                "parent course {} declared by {} is {}",
                parent_id, course_id, status
            )));
        }
        Some(_) => {}
    }

    let parent_lessons = lesson_snapshot(conn, &parent_id)?;
    Ok(ChildSnapshot {
        course: child,
        parent_lessons,
    })
}

fn lesson_snapshot(
    conn: &Connection,
    course_id: &str,
) -> Result<LessonSnapshot, error::CursusError> {
    let mut stmt =
        conn.prepare("SELECT id, last_modified_at FROM lessons WHERE course_id = ?1")?;
    let rows = stmt.query_map(params![course_id], |row| {
        let id: String = row.get(0)?;
        let ts: String = row.get(1)?;
        Ok((id, ts))
    })?;
    let mut map = LessonSnapshot::default();
    for r in rows {
        let (id, ts) = r?;
        map.insert(id, time::parse_epoch_z(&ts).unwrap_or(0));
    }
    Ok(map)
}

fn refresh_cache(
    conn: &Connection,
    course_id: &str,
    eval: &SyncEvaluation,
) -> Result<(), error::CursusError> {
    conn.execute(
        "INSERT OR REPLACE INTO sync_cache(course_id, computed_status, missing_lesson_ids, reason, evaluated_at) \
         VALUES(?1, ?2, ?3, ?4, ?5)",
        params![
            course_id,
            eval.status.as_str(),
            serde_json::to_string(&eval.missing_lesson_ids).unwrap(),
            eval.reason,
            time::now_epoch_z()
        ],
    )?;
    Ok(())
}

// --- Report surfaces ---

/// Externally observed report payload. Key casing is part of the contract.
#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub success: bool,
    pub sync_status: Option<String>,
    pub last_synced_at: Option<String>,
    pub computed_status: SyncStatus,
    pub missing_lesson_ids: Vec<String>,
}

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct FleetEntry {
    pub course_id: String,
    pub parent_course_id: String,
    pub sync_status: Option<String>,
    pub last_synced_at: Option<String>,
    pub computed_status: Option<SyncStatus>,
    pub missing_lesson_ids: Vec<String>,
    pub error: Option<String>,
}

/// Compute the report for one child course and refresh its cache row.
///
/// The course record's own `sync_status`/`last_synced_at` are never
/// touched here; reconciliation is `apply_sync`.
pub fn get_sync_report(
    store: &Store,
    course_id: &str,
) -> Result<(SyncReport, String), error::CursusError> {
    let boundary = load_stale_boundary(&store.root)?;
    let broker = DbBroker::new(&store.root);
    let db_path = db::catalog_db_path(&store.root);

    broker.with_conn(&db_path, "cursus", None, "sync.status", |conn| {
        let snapshot = load_child_snapshot(conn, course_id)?;
        let last_synced = snapshot
            .course
            .last_synced_at
            .as_deref()
            .and_then(time::parse_epoch_z);
        let eval = evaluate_sync(
            &snapshot.course.selected_lesson_ids,
            &snapshot.parent_lessons,
            last_synced,
            boundary,
        );
        refresh_cache(conn, course_id, &eval)?;
        let report = SyncReport {
            success: true,
            sync_status: snapshot.course.sync_status.clone(),
            last_synced_at: snapshot.course.last_synced_at.clone(),
            computed_status: eval.status,
            missing_lesson_ids: eval.missing_lesson_ids.clone(),
        };
        Ok((report, eval.reason))
    })
}

/// Fleet report over every active child course.
///
/// Rows are loaded in one brokered snapshot pass; evaluation is pure and
/// runs in parallel. A child with an invalid parent reference is reported
/// as an error entry rather than aborting the whole fleet.
pub fn report_fleet(store: &Store) -> Result<Vec<FleetEntry>, error::CursusError> {
    let boundary = load_stale_boundary(&store.root)?;
    let broker = DbBroker::new(&store.root);
    let db_path = db::catalog_db_path(&store.root);

    broker.with_conn(&db_path, "cursus", None, "sync.report", |conn| {
        let children = {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM courses WHERE parent_course_id IS NOT NULL AND status = 'active' ORDER BY id",
                course::COURSE_COLUMNS
            ))?;
            let rows = stmt.query_map([], course::course_from_row)?;
            let mut out: Vec<Course> = Vec::new();
            for r in rows {
                out.push(r?);
            }
            out
        };

        // One snapshot per distinct parent; children evaluate against it.
        let mut parents: FxHashMap<String, Result<LessonSnapshot, String>> = FxHashMap::default();
        for child in &children {
            let parent_id = child.parent_course_id.clone().unwrap_or_default();
            if parents.contains_key(&parent_id) {
                continue;
            }
            let status: Option<String> = conn
                .query_row(
                    "SELECT status FROM courses WHERE id = ?1",
                    params![parent_id],
                    |row| row.get(0),
                )
                .optional()?;
            let entry = match status {
                None => Err(format!("parent course {} does not exist", parent_id)),
                Some(s) if s != "active" => Err(format!("parent course {} is {}", parent_id, s)),
                Some(_) => Ok(lesson_snapshot(conn, &parent_id)?),
            };
            parents.insert(parent_id, entry);
        }

        let entries: Vec<(FleetEntry, Option<SyncEvaluation>)> = children
            .par_iter()
            .map(|child| {
                let parent_id = child.parent_course_id.clone().unwrap_or_default();
                match parents.get(&parent_id) {
                    Some(Ok(snapshot)) => {
                        let last_synced =
                            child.last_synced_at.as_deref().and_then(time::parse_epoch_z);
                        let eval = evaluate_sync(
                            &child.selected_lesson_ids,
                            snapshot,
                            last_synced,
                            boundary,
                        );
                        let entry = FleetEntry {
                            course_id: child.id.clone(),
                            parent_course_id: parent_id,
                            sync_status: child.sync_status.clone(),
                            last_synced_at: child.last_synced_at.clone(),
                            computed_status: Some(eval.status),
                            missing_lesson_ids: eval.missing_lesson_ids.clone(),
                            error: None,
                        };
                        (entry, Some(eval))
                    }
                    Some(Err(msg)) => (
                        FleetEntry {
                            course_id: child.id.clone(),
                            parent_course_id: parent_id,
                            sync_status: child.sync_status.clone(),
                            last_synced_at: child.last_synced_at.clone(),
                            computed_status: None,
                            missing_lesson_ids: Vec::new(),
                            error: Some(format!("invalid parent reference: {}", msg)),
                        },
                        None,
                    ),
                    None => unreachable!("parent snapshot preloaded for every child"),
                }
            })
            .collect();

        let mut out = Vec::with_capacity(entries.len());
        for (entry, eval) in entries {
            if let Some(eval) = eval {
                refresh_cache(conn, &entry.course_id, &eval)?;
            }
            out.push(entry);
        }
        Ok(out)
    })
}

/// Reconcile a child course after review: persist `last_synced_at = now`
/// and the status recomputed against that timestamp. The only writer of
/// those two course fields.
pub fn apply_sync(
    store: &Store,
    course_id: &str,
) -> Result<(SyncReport, String), error::CursusError> {
    let boundary = load_stale_boundary(&store.root)?;
    let broker = DbBroker::new(&store.root);
    let db_path = db::catalog_db_path(&store.root);

    broker.with_conn(&db_path, "cursus", None, "sync.apply", |conn| {
        let snapshot = load_child_snapshot(conn, course_id)?;
        if snapshot.course.selected_lesson_ids.is_empty() {
            return Err(error::CursusError::ValidationError(format!(
                "could not compute status: no selections configured for {}",
                course_id
            )));
        }

        let now_secs = time::now_epoch_secs();
        let now_z = time::now_epoch_z();
        let eval = evaluate_sync(
            &snapshot.course.selected_lesson_ids,
            &snapshot.parent_lessons,
            Some(now_secs),
            boundary,
        );

        conn.execute(
            "UPDATE courses SET sync_status = ?1, last_synced_at = ?2, updated_at = ?2 WHERE id = ?3",
            params![eval.status.as_str(), now_z, course_id],
        )?;
        refresh_cache(conn, course_id, &eval)?;

        let report = SyncReport {
            success: true,
            sync_status: Some(eval.status.as_str().to_string()),
            last_synced_at: Some(now_z),
            computed_status: eval.status,
            missing_lesson_ids: eval.missing_lesson_ids.clone(),
        };
        Ok((report, eval.reason))
    })
}

// --- CLI ---

fn render_status(status: SyncStatus) -> colored::ColoredString {
    match status {
        SyncStatus::IN_SYNC => status.as_str().bright_green(),
        SyncStatus::STALE => status.as_str().bright_yellow(),
        SyncStatus::MISSING_LESSONS => status.as_str().bright_red(),
        SyncStatus::NEVER_SYNCED => status.as_str().bright_cyan(),
        SyncStatus::NOT_CONFIGURED => status.as_str().bright_black(),
    }
}

pub fn run_sync_cli(store: &Store, cli: SyncCli) -> Result<(), error::CursusError> {
    db::initialize_catalog_db(&store.root)?;
    let format = cli.format;
    match cli.command {
        SyncCommand::Status { id } => {
            let (report, reason) = get_sync_report(store, &id)?;
            match format {
                OutputFormat::Text => {
                    println!("Course: {}", id);
                    println!("Computed: {}", render_status(report.computed_status));
                    println!("Reason: {}", reason);
                    println!(
                        "Cached: {}  (last synced: {})",
                        report.sync_status.as_deref().unwrap_or("-"),
                        report.last_synced_at.as_deref().unwrap_or("never")
                    );
                    if !report.missing_lesson_ids.is_empty() {
                        println!(
                            "Missing: {}",
                            output::preview_items(&report.missing_lesson_ids, 5, 40)
                        );
                    }
                }
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&report).unwrap());
                }
            }
        }
        SyncCommand::Report => {
            let entries = report_fleet(store)?;
            match format {
                OutputFormat::Text => {
                    for e in &entries {
                        match (&e.computed_status, &e.error) {
                            (Some(status), _) => {
                                let missing = if e.missing_lesson_ids.is_empty() {
                                    String::new()
                                } else {
                                    format!(
                                        "  missing: {}",
                                        output::preview_items(&e.missing_lesson_ids, 3, 30)
                                    )
                                };
                                println!(
                                    "{:<16} {}  parent={}{}",
                                    render_status(*status),
                                    e.course_id,
                                    e.parent_course_id,
                                    missing
                                );
                            }
                            (None, Some(err)) => {
                                println!("{:<16} {}  {}", "ERROR".bright_red(), e.course_id, err);
                            }
                            (None, None) => {}
                        }
                    }
                    println!("{} child course(s)", entries.len());
                }
                OutputFormat::Json => {
                    let extra = serde_json::json!({
                        "count": entries.len(),
                        "children": entries,
                    });
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&time::command_envelope(
                            "sync.report",
                            "ok",
                            extra
                        ))
                        .unwrap()
                    );
                }
            }
        }
        SyncCommand::Apply { id } => {
            let (report, reason) = apply_sync(store, &id)?;
            match format {
                OutputFormat::Text => {
                    println!(
                        "Reconciled {}: {} at {}",
                        id,
                        render_status(report.computed_status),
                        report.last_synced_at.as_deref().unwrap_or("-")
                    );
                    println!("Reason: {}", reason);
                }
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&report).unwrap());
                }
            }
        }
    }
    Ok(())
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "sync",
        "version": "0.1.0",
        "description": "Child-course synchronization status engine",
        "commands": [
            { "name": "status", "parameters": ["id"] },
            { "name": "report", "parameters": [] },
            { "name": "apply", "parameters": ["id"] }
        ],
        "storage": ["catalog.db", "SYNC.toml"]
    })
}

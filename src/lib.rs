//! Cursus: a local-first control plane for e-learning course catalogs.
//!
//! **Cursus tracks derivative courses and how far they have drifted from
//! their parents.**
//!
//! A parent course owns daily lessons. A child course (a translation or a
//! shortened edition) declares an ordered selection of the parent's lesson
//! ids. Lessons are added, edited, and removed independently of any child,
//! so a child's selection decays: references stop resolving, content moves
//! on past the last reconciliation. The sync engine recomputes that
//! relationship from scratch on every request and reports it.
//!
//! # Core Principles
//!
//! - **Local-first**: all state lives in an embedded SQLite catalog
//! - **Audited**: every brokered mutation lands in `broker.events.jsonl`
//! - **Read-time strictness**: selections are validated on evaluation,
//!   never on write — the parent changes out from under the child
//! - **Command/query separation**: computing a status never persists it;
//!   `sync apply` is the only writer of a child's sync fields
//!
//! # Architecture
//!
//! All state mutations route through the `DbBroker` for serialization and
//! audit logging. Subsystems own their schema and CLI surface:
//!
//! - `course`: course records and child lesson selections
//! - `lesson`: lesson records with content revision markers
//! - `sync`: the drift evaluator, fleet reporting, and reconciliation
//!
//! # Examples
//!
//! ```bash
//! # Initialize a catalog workspace
//! cursus init
//!
//! # Author a parent course with lessons
//! cursus course add "Mindful Mornings" --id mindful-mornings
//! cursus lesson add "Day 1: Breathing" --course mindful-mornings --day 1
//!
//! # Declare a child and its mirror selection
//! cursus course add "Mañanas Conscientes" --parent mindful-mornings
//! cursus course select --id <child-id> --lessons <lesson-id>,<lesson-id>
//!
//! # Compute drift, then reconcile
//! cursus sync status --id <child-id>
//! cursus sync apply --id <child-id>
//! ```
//!
//! # Crate Structure
//!
//! - [`core`]: store handle, brokered DB path, schemas, validation harness
//! - [`catalog`]: course, lesson, and sync subsystems

pub mod catalog;
pub mod core;
mod subsystems;

use crate::catalog::{course, lesson, sync};
use crate::core::error;
use crate::core::store::{Store, StoreKind};
use crate::core::validate;

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[clap(
    name = "cursus",
    version = env!("CARGO_PKG_VERSION"),
    about = "The course catalog synchronization control plane"
)]
struct Cli {
    #[clap(subcommand)]
    command: Command,
}

#[derive(clap::Args, Debug)]
struct InitCli {
    /// Directory to initialize (defaults to current working directory).
    #[clap(short, long)]
    dir: Option<PathBuf>,
    /// Re-run initialization even if a catalog already exists.
    #[clap(long)]
    force: bool,
    /// Show what would change without writing files.
    #[clap(long)]
    dry_run: bool,
}

#[derive(clap::Args, Debug)]
struct ValidateCli {
    /// Store to validate: 'workspace' (project catalog) or 'scratch'
    /// (blank-slate semantics).
    #[clap(long, default_value = "workspace")]
    store: String,
    /// Output format: 'text' or 'json'.
    #[clap(long, default_value = "text")]
    format: String,
}

#[derive(clap::Args, Debug)]
struct SchemaCli {
    /// Format: json | md
    #[clap(long, default_value = "json")]
    format: String,
    /// Optional: filter by subsystem name
    #[clap(long)]
    subsystem: Option<String>,
    /// Force deterministic output (removes volatile timestamps)
    #[clap(long)]
    deterministic: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Bootstrap a catalog workspace
    #[clap(name = "init", visible_alias = "i")]
    Init(InitCli),

    /// Manage courses and child selections
    #[clap(name = "course", visible_alias = "c")]
    Course(course::CourseCli),

    /// Manage lessons
    #[clap(name = "lesson", visible_alias = "l")]
    Lesson(lesson::LessonCli),

    /// Compute and reconcile child-course sync status
    #[clap(name = "sync", visible_alias = "s")]
    Sync(sync::SyncCli),

    /// Validate catalog integrity
    #[clap(name = "validate", visible_alias = "v")]
    Validate(ValidateCli),

    /// Subsystem schemas and discovery
    #[clap(name = "schema")]
    Schema(SchemaCli),

    /// Show the audit log of brokered mutations
    #[clap(name = "audit")]
    Audit,

    /// Show version information
    #[clap(name = "version")]
    Version,
}

fn find_project_root(start_dir: &Path) -> Result<PathBuf, error::CursusError> {
    let mut current_dir = PathBuf::from(start_dir);
    loop {
        if current_dir.join(".cursus").exists() {
            return Ok(current_dir);
        }
        if !current_dir.pop() {
            return Err(error::CursusError::NotFound(
                "'.cursus' directory not found in current or parent directories. Run `cursus init` first.".to_string(),
            ));
        }
    }
}

fn run_init(init_cli: InitCli, current_dir: &Path) -> Result<(), error::CursusError> {
    let target_dir = match init_cli.dir {
        Some(d) => d,
        None => current_dir.to_path_buf(),
    };
    let target_dir = fs::canonicalize(&target_dir).map_err(error::CursusError::IoError)?;

    let cursus_root = target_dir.join(".cursus");
    if cursus_root.exists() && !init_cli.force {
        println!(
            "{} Catalog already initialized at {}",
            "⚠".bright_yellow(),
            cursus_root.display()
        );
        println!(
            "  {} Use {} to re-run initialization",
            "▸".bright_yellow(),
            "--force".bright_cyan().bold()
        );
        return Ok(());
    }

    println!(
        "{} {}",
        "CURSUS".bright_white().bold(),
        "catalog control plane".bright_cyan()
    );
    println!();

    let store_root = cursus_root.join("data");
    if init_cli.dry_run {
        println!("  (dry run) would create {}", store_root.display());
        for sub in subsystems::SUBSYSTEMS {
            println!("  (dry run) would initialize subsystem: {}", sub.name);
        }
        return Ok(());
    }

    fs::create_dir_all(&store_root).map_err(error::CursusError::IoError)?;
    for sub in subsystems::SUBSYSTEMS {
        (sub.initialize)(&store_root)?;
        println!("    {} {}", "●".bright_green(), sub.name.bright_white());
    }
    println!();
    println!("Catalog workspace ready at {}", store_root.display());
    Ok(())
}

pub fn run() -> Result<(), error::CursusError> {
    let cli = Cli::parse();
    let current_dir = std::env::current_dir()?;

    match cli.command {
        Command::Version => {
            // Simple output for scripts/parsing
            println!("v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Command::Init(init_cli) => run_init(init_cli, &current_dir),
        _ => {
            let project_root = find_project_root(&current_dir)?;
            let store_root = project_root.join(".cursus").join("data");
            fs::create_dir_all(&store_root).map_err(error::CursusError::IoError)?;
            subsystems::initialize_all(&store_root)?;

            let workspace = Store {
                kind: StoreKind::Workspace,
                root: store_root.clone(),
            };

            match cli.command {
                Command::Course(course_cli) => course::run_course_cli(&workspace, course_cli),
                Command::Lesson(lesson_cli) => lesson::run_lesson_cli(&workspace, lesson_cli),
                Command::Sync(sync_cli) => sync::run_sync_cli(&workspace, sync_cli),
                Command::Validate(validate_cli) => {
                    let store = match validate_cli.store.as_str() {
                        "scratch" => {
                            // Blank-slate validation in a throwaway store
                            let tmp_root = std::env::temp_dir()
                                .join(format!("cursus_validate_scratch_{}", ulid::Ulid::new()));
                            fs::create_dir_all(&tmp_root).map_err(error::CursusError::IoError)?;
                            Store {
                                kind: StoreKind::Scratch,
                                root: tmp_root,
                            }
                        }
                        _ => workspace.clone(),
                    };
                    validate::run_validation(&store, &validate_cli.format)
                }
                Command::Schema(schema_cli) => {
                    let mut schemas = std::collections::BTreeMap::new();
                    schemas.insert("course", course::schema());
                    schemas.insert("lesson", lesson::schema());
                    schemas.insert("sync", sync::schema());
                    schemas.insert("broker", crate::core::broker::schema());

                    let output = if let Some(sub) = schema_cli.subsystem {
                        schemas
                            .get(sub.as_str())
                            .cloned()
                            .unwrap_or(serde_json::json!({ "error": "subsystem not found" }))
                    } else {
                        let mut envelope = serde_json::json!({
                            "schema_version": "1.0.0",
                            "subsystems": schemas
                        });
                        if !schema_cli.deterministic {
                            envelope.as_object_mut().unwrap().insert(
                                "generated_at".to_string(),
                                serde_json::json!(crate::core::time::now_epoch_z()),
                            );
                        }
                        envelope
                    };

                    if schema_cli.format == "json" {
                        println!("{}", serde_json::to_string_pretty(&output).unwrap());
                    } else {
                        println!("Markdown schema format not yet implemented. Defaulting to JSON.");
                        println!("{}", serde_json::to_string_pretty(&output).unwrap());
                    }
                    Ok(())
                }
                Command::Audit => {
                    let audit_log = store_root.join("broker.events.jsonl");
                    if audit_log.exists() {
                        let content = fs::read_to_string(audit_log)?;
                        print!("{}", content);
                    } else {
                        println!("No audit log found.");
                    }
                    Ok(())
                }
                _ => unreachable!(),
            }
        }
    }
}

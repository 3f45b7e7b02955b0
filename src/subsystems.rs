//! Subsystem registration — centralizes store initialization.
//!
//! Adding a new subsystem: append one entry to `SUBSYSTEMS`.

use crate::catalog::sync;
use crate::core::{db, error};
use std::path::Path;

pub(crate) struct SubsystemInit {
    /// Subsystem identifier (used for init diagnostics).
    pub name: &'static str,
    pub initialize: fn(&Path) -> Result<(), error::CursusError>,
}

/// All subsystems that require store initialization. Order matters for
/// daemonless first-start reliability — sequential execution avoids
/// SQLite contention during bootstrap.
pub(crate) const SUBSYSTEMS: &[SubsystemInit] = &[
    SubsystemInit {
        name: "catalog",
        initialize: db::initialize_catalog_db,
    },
    SubsystemInit {
        name: "sync",
        initialize: sync::initialize_sync_policy,
    },
];

/// Initialize all subsystem state sequentially.
pub(crate) fn initialize_all(data_root: &Path) -> Result<(), error::CursusError> {
    for sub in SUBSYSTEMS {
        (sub.initialize)(data_root)?;
    }
    Ok(())
}

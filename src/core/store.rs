//! Store abstraction for Cursus catalog state.
//!
//! A store is the directory holding the catalog database and the broker's
//! audit log. Two kinds exist: the project workspace and a throwaway
//! scratch store used by the validation harness for blank-slate runs.

use std::path::PathBuf;

/// Store type discriminator.
///
/// - `Workspace`: the project catalog at `<root>/.cursus/data/`
/// - `Scratch`: a temporary blank-slate store (validation, tests)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreKind {
    /// Project catalog workspace.
    Workspace,
    /// Temporary blank-slate store.
    Scratch,
}

/// Store handle representing a Cursus catalog workspace.
///
/// All subsystem state (courses, lessons, sync cache) is scoped to a store.
#[derive(Debug, Clone)]
pub struct Store {
    /// Store type (Workspace or Scratch)
    pub kind: StoreKind,
    /// Absolute path to the store root directory
    pub root: PathBuf,
}

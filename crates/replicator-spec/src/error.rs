//! Loader error taxonomy. Everything here is fatal and surfaces to the
//! driver with the offending context.

use replicator_core::registry::RegistryError;
use replicator_core::resolver::ResolveError;
use replicator_subsystems::SubsystemBuildError;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum SpecError {
    /// Schema, range, or reference error, with the offending field path.
    #[error("invalid configuration at '{field}': {detail}")]
    InvalidConfiguration { field: String, detail: String },

    /// A path failed allow-list confinement or could not be resolved.
    #[error("path not permitted or not found: {path}")]
    InvalidPath { path: PathBuf },

    /// The spec file exceeds the pre-parse size cap.
    #[error("spec file too large: {path} is {size} bytes (cap {cap})")]
    FileTooLarge { path: PathBuf, size: u64, cap: u64 },

    /// The file extension is not a supported format.
    #[error("unsupported format for file: {file}")]
    UnsupportedFormat { file: PathBuf },

    /// A deserialization error.
    #[error("parse error in {file}: {detail}")]
    Parse { file: PathBuf, detail: String },

    /// The parent chain exceeds the depth bound.
    #[error("spec inheritance deeper than {depth} levels")]
    InheritanceTooDeep { depth: usize },

    /// A parent path chain loops back on itself.
    #[error("circular spec inheritance through {path}")]
    CircularInheritance { path: PathBuf },

    /// The requested profile does not exist.
    #[error("unknown profile: {name}")]
    UnknownProfile { name: String },

    /// Recipe cycle found during the load-time resolver dry run.
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// Registry construction failed (duplicate or dangling references).
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// A subsystem block failed to build.
    #[error(transparent)]
    Subsystem(#[from] SubsystemBuildError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

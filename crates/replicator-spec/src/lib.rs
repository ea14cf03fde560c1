//! Configuration loading for the replicator engine.
//!
//! Parses a declarative factory specification (RON, TOML, or JSON), resolves
//! inheritance and profiles, validates every field, and produces the
//! immutable registry, the engine configuration, and the instantiated
//! subsystems.

pub mod error;
pub mod loader;
pub mod resolve;
pub mod schema;

pub use error::SpecError;
pub use resolve::LoadedSimulation;

use loader::AllowList;
use schema::SpecDoc;
use std::path::Path;

/// Load a specification file into a runnable simulation.
///
/// Resolves the `metadata.parent` chain, applies the named profile if any,
/// validates, and builds registries. All file reads are confined to the spec
/// directory, the working directory, and /tmp.
pub fn load(path: &Path, profile: Option<&str>) -> Result<LoadedSimulation, SpecError> {
    let allow = AllowList::for_spec(path)?;
    let mut document = loader::load_with_inheritance(path, &allow)?;
    if let Some(name) = profile {
        loader::apply_profile(&mut document, name)?;
    }
    let doc: SpecDoc =
        serde_json::from_value(document.clone()).map_err(|e| SpecError::Parse {
            file: path.to_path_buf(),
            detail: e.to_string(),
        })?;
    let spec_dir = path.parent().unwrap_or(Path::new("."));
    resolve::resolve(doc, document, spec_dir, &allow)
}

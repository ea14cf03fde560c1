//! File pipeline: allow-list confinement, size caps, format detection,
//! inheritance resolution, and profile merging.
//!
//! Documents are parsed into `serde_json::Value` regardless of on-disk
//! format (RON, TOML, or JSON, detected by extension), merged generically,
//! and only then deserialized into typed [`SpecDoc`] structs. Parsing uses
//! safe, non-executing serde deserializers only.

use crate::error::SpecError;
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Hard cap on spec file size, applied before any parse.
pub const MAX_SPEC_FILE_BYTES: u64 = 50 * 1024 * 1024;

/// Maximum inheritance chain length.
pub const MAX_INHERITANCE_DEPTH: usize = 10;

// ===========================================================================
// Format detection
// ===========================================================================

/// Supported spec file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Ron,
    Toml,
    Json,
}

/// Detect the format of a file based on its extension.
pub fn detect_format(path: &Path) -> Result<Format, SpecError> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("ron") => Ok(Format::Ron),
        Some("toml") => Ok(Format::Toml),
        Some("json") => Ok(Format::Json),
        _ => Err(SpecError::UnsupportedFormat {
            file: path.to_path_buf(),
        }),
    }
}

// ===========================================================================
// Allow-list
// ===========================================================================

/// Directories file reads are confined to: the spec's own directory, the
/// working directory, and /tmp. Checked on resolved absolute paths.
#[derive(Debug, Clone)]
pub struct AllowList {
    roots: Vec<PathBuf>,
}

impl AllowList {
    /// Build the allow-list for a spec rooted at `spec_path`.
    pub fn for_spec(spec_path: &Path) -> Result<Self, SpecError> {
        let mut roots = Vec::new();
        if let Some(dir) = spec_path.parent() {
            if let Ok(canonical) = dir.canonicalize() {
                roots.push(canonical);
            }
        }
        if let Ok(cwd) = std::env::current_dir()
            && let Ok(canonical) = cwd.canonicalize()
        {
            roots.push(canonical);
        }
        if let Ok(tmp) = Path::new("/tmp").canonicalize() {
            roots.push(tmp);
        }
        if roots.is_empty() {
            return Err(SpecError::InvalidPath {
                path: spec_path.to_path_buf(),
            });
        }
        Ok(Self { roots })
    }

    /// Resolve a path and confirm it sits under one of the allowed roots.
    pub fn resolve(&self, path: &Path) -> Result<PathBuf, SpecError> {
        let canonical = path.canonicalize().map_err(|_| SpecError::InvalidPath {
            path: path.to_path_buf(),
        })?;
        if self.roots.iter().any(|root| canonical.starts_with(root)) {
            Ok(canonical)
        } else {
            Err(SpecError::InvalidPath {
                path: path.to_path_buf(),
            })
        }
    }
}

// ===========================================================================
// Reading & parsing
// ===========================================================================

/// Read a file through the allow-list and size cap, then parse it into a
/// generic JSON value according to its detected format.
pub fn read_document(path: &Path, allow: &AllowList) -> Result<Value, SpecError> {
    let resolved = allow.resolve(path)?;

    let size = std::fs::metadata(&resolved)?.len();
    if size > MAX_SPEC_FILE_BYTES {
        return Err(SpecError::FileTooLarge {
            path: resolved,
            size,
            cap: MAX_SPEC_FILE_BYTES,
        });
    }

    let format = detect_format(&resolved)?;
    let content = std::fs::read_to_string(&resolved)?;
    parse_str(&content, format, &resolved)
}

/// Parse document text in the given format into a generic JSON value.
pub fn parse_str(content: &str, format: Format, file: &Path) -> Result<Value, SpecError> {
    match format {
        Format::Json => serde_json::from_str(content).map_err(|e| SpecError::Parse {
            file: file.to_path_buf(),
            detail: e.to_string(),
        }),
        Format::Toml => {
            let value: toml::Value = toml::from_str(content).map_err(|e| SpecError::Parse {
                file: file.to_path_buf(),
                detail: e.to_string(),
            })?;
            serde_json::to_value(value).map_err(|e| SpecError::Parse {
                file: file.to_path_buf(),
                detail: e.to_string(),
            })
        }
        Format::Ron => ron::from_str(content).map_err(|e| SpecError::Parse {
            file: file.to_path_buf(),
            detail: e.to_string(),
        }),
    }
}

// ===========================================================================
// Deep merge
// ===========================================================================

/// Deep-merge `overlay` over `base`: objects merge key-by-key recursively,
/// everything else is replaced by the overlay value.
pub fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => {
                        base_map.insert(key, overlay_value);
                    }
                }
            }
        }
        (base_slot, overlay_value) => *base_slot = overlay_value,
    }
}

// ===========================================================================
// Inheritance & profile
// ===========================================================================

/// Load a document and resolve its `metadata.parent` chain: ancestors load
/// first and each child deep-merges over its parent. The chain is bounded by
/// [`MAX_INHERITANCE_DEPTH`] and checked for cycles over resolved paths.
pub fn load_with_inheritance(path: &Path, allow: &AllowList) -> Result<Value, SpecError> {
    let mut chain = Vec::new();
    load_chain(path, allow, &mut chain)
}

fn load_chain(
    path: &Path,
    allow: &AllowList,
    chain: &mut Vec<PathBuf>,
) -> Result<Value, SpecError> {
    let resolved = allow.resolve(path)?;
    if chain.contains(&resolved) {
        return Err(SpecError::CircularInheritance { path: resolved });
    }
    if chain.len() >= MAX_INHERITANCE_DEPTH {
        return Err(SpecError::InheritanceTooDeep {
            depth: chain.len(),
        });
    }
    chain.push(resolved.clone());

    let child = read_document(&resolved, allow)?;
    let parent_path = child
        .get("metadata")
        .and_then(|m| m.get("parent"))
        .and_then(|p| p.as_str())
        .map(|p| {
            let relative = Path::new(p);
            if relative.is_absolute() {
                relative.to_path_buf()
            } else {
                resolved.parent().unwrap_or(Path::new(".")).join(relative)
            }
        });

    let merged = match parent_path {
        Some(parent) => {
            let mut base = load_chain(&parent, allow, chain)?;
            deep_merge(&mut base, child);
            // The merged document's identity is the child's; drop the
            // now-resolved parent pointer so a reload does not chase it.
            if let Some(metadata) = base.get_mut("metadata").and_then(|m| m.as_object_mut()) {
                metadata.remove("parent");
            }
            base
        }
        None => child,
    };
    chain.pop();
    Ok(merged)
}

/// Apply a named profile: deep-merge `profiles.<name>` over the document.
pub fn apply_profile(document: &mut Value, profile: &str) -> Result<(), SpecError> {
    let overlay = document
        .get("profiles")
        .and_then(|p| p.get(profile))
        .cloned()
        .ok_or_else(|| SpecError::UnknownProfile {
            name: profile.to_string(),
        })?;
    deep_merge(document, overlay);
    Ok(())
}

//! Optional subsystems for the replicator engine.
//!
//! Each subsystem implements [`Subsystem`] from the core crate: it receives a
//! read-only tick-context snapshot and returns proposal events. None of them
//! hold references into the engine; all coupling is through the event bus.
//!
//! [`instantiate`] maps the configuration's `subsystem_implementations` tags
//! onto concrete types, passing each its `subsystem_data` block.

pub mod contamination;
pub mod software;
pub mod thermal;
pub mod transport;
pub mod waste;

use replicator_core::registry::Registry;
use replicator_core::subsystem::Subsystem;

/// Errors building a subsystem from its configuration block.
#[derive(Debug, thiserror::Error)]
pub enum SubsystemBuildError {
    #[error("unknown subsystem implementation tag: {0}")]
    UnknownTag(String),
    #[error("invalid data for subsystem '{tag}': {detail}")]
    InvalidData { tag: String, detail: String },
    #[error("subsystem '{tag}' references unknown resource '{resource}'")]
    UnknownResource { tag: String, resource: String },
}

/// Build one subsystem from its implementation tag and data block.
pub fn instantiate(
    tag: &str,
    data: &serde_json::Value,
    registry: &Registry,
) -> Result<Box<dyn Subsystem>, SubsystemBuildError> {
    match tag {
        "thermal" => Ok(Box::new(thermal::ThermalManager::from_value(data, tag)?)),
        "waste_recycling" => Ok(Box::new(waste::WasteRecycler::from_value(
            data, registry, tag,
        )?)),
        "software_production" => Ok(Box::new(software::SoftwarePlanner::from_value(
            data, registry, tag,
        )?)),
        "contamination" => Ok(Box::new(contamination::ContaminationMonitor::from_value(
            data, tag,
        )?)),
        "transport" => Ok(Box::new(transport::TransportScheduler::from_value(
            data, tag,
        )?)),
        other => Err(SubsystemBuildError::UnknownTag(other.to_string())),
    }
}

/// Deserialize a subsystem's data block, mapping failures to build errors.
pub(crate) fn parse_data<T: serde::de::DeserializeOwned + Default>(
    data: &serde_json::Value,
    tag: &str,
) -> Result<T, SubsystemBuildError> {
    if data.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(data.clone()).map_err(|e| SubsystemBuildError::InvalidData {
        tag: tag.to_string(),
        detail: e.to_string(),
    })
}

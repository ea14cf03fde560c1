//! Cross-crate end-to-end tests: spec file in, report out, with the optional
//! subsystems attached.

use replicator_core::engine::Engine;
use replicator_core::event::EventKind;
use replicator_core::report::TerminationReason;
use std::path::{Path, PathBuf};

fn tmp_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("replicator-it-{name}-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// A self-replicating spec with waste, recycling, software gating, and
/// contamination all switched on.
fn write_full_spec(dir: &Path) -> PathBuf {
    let path = dir.join("full.json");
    std::fs::write(
        &path,
        serde_json::to_string_pretty(&serde_json::json!({
            "metadata": {"name": "full-factory", "version": "1.0"},
            "constraints": {
                "solar_capacity_kw": 5000.0,
                "battery_capacity_kwh": 50000.0,
                "max_hours": 4000.0,
                "seed": 11,
                "enable_degradation": false,
                "enable_maintenance": false,
                "enable_storage_limits": false,
                "enable_waste_recycling": true,
                "enable_software_production": true,
                "enable_contamination": true,
                "enable_transport_time": true,
                "enable_thermal_management": true
            },
            "initial_state": {"battery_kwh": 50000.0},
            "resources": {
                "regolith": {
                    "density_t_per_m3": 1.5,
                    "volume_per_unit_m3": 0.01,
                    "extraction": {
                        "module": "mining",
                        "time_hours": 1.0,
                        "energy_kwh": 2.0,
                        "output_quantity": 10.0
                    }
                },
                "metal": {"density_t_per_m3": 7.0, "volume_per_unit_m3": 0.004},
                "slag": {"density_t_per_m3": 3.0, "volume_per_unit_m3": 0.01, "recyclable": true},
                "electronics": {"density_t_per_m3": 2.0, "volume_per_unit_m3": 0.002},
                "assembler_firmware": {"software": true},
                "mining": {"volume_per_unit_m3": 1.0},
                "refining": {"volume_per_unit_m3": 1.0},
                "electronics_fab": {"volume_per_unit_m3": 1.0},
                "assembly": {"volume_per_unit_m3": 1.0}
            },
            "modules": {
                "mining": {"idle_power_kw": 0.0},
                "refining": {"idle_power_kw": 0.0},
                "electronics_fab": {"idle_power_kw": 0.0},
                "assembly": {"idle_power_kw": 0.0}
            },
            "recipes": [
                {
                    "output": "metal", "output_quantity": 2.0,
                    "inputs": {"regolith": 5.0},
                    "energy_kwh": 3.0, "time_hours": 1.0, "module": "refining",
                    "waste_products": {"slag": 0.5}
                },
                {
                    "output": "electronics",
                    "inputs": {"metal": 1.0},
                    "energy_kwh": 2.0, "time_hours": 1.0, "module": "electronics_fab",
                    "cleanroom_class": 100000.0
                },
                {
                    "output": "assembler_firmware",
                    "inputs": {"electronics": 1.0},
                    "energy_kwh": 1.0, "time_hours": 2.0, "module": "electronics_fab"
                },
                {
                    "output": "mining", "inputs": {"metal": 4.0},
                    "energy_kwh": 10.0, "time_hours": 4.0, "module": "assembly",
                    "software_required": "assembler_firmware"
                },
                {
                    "output": "refining", "inputs": {"metal": 3.0, "electronics": 1.0},
                    "energy_kwh": 10.0, "time_hours": 4.0, "module": "assembly",
                    "software_required": "assembler_firmware"
                },
                {
                    "output": "electronics_fab", "inputs": {"metal": 2.0, "electronics": 3.0},
                    "energy_kwh": 12.0, "time_hours": 5.0, "module": "assembly",
                    "software_required": "assembler_firmware"
                },
                {
                    "output": "assembly", "inputs": {"metal": 5.0, "electronics": 2.0},
                    "energy_kwh": 15.0, "time_hours": 6.0, "module": "assembly",
                    "software_required": "assembler_firmware"
                }
            ],
            "subsystem_data": {
                "waste_recycling": {
                    "rules": [
                        {"waste": "slag", "recovered": "metal", "efficiency": 0.3}
                    ],
                    "processing_rate_per_hour": 20.0
                },
                "contamination": {
                    "base_rate_per_hour": 1.0,
                    "per_task_rate_per_hour": 5.0,
                    "filtration_per_hour": 50.0,
                    "floor": 50.0,
                    "initial_level": 200.0
                }
            }
        }))
        .unwrap(),
    )
    .unwrap();
    path
}

// ===========================================================================
// Test 1: Full-featured factory replicates
// ===========================================================================

#[test]
fn full_factory_replicates_with_subsystems() {
    let dir = tmp_dir("full");
    let path = write_full_spec(&dir);
    let loaded = replicator_spec::load(&path, None).unwrap();
    assert_eq!(loaded.subsystems.len(), 5);

    let mut engine = Engine::new(loaded.registry, loaded.config, loaded.subsystems).unwrap();
    engine.set_config_document(loaded.document);
    let report = engine.run().unwrap();

    assert_eq!(
        report.status.terminated_reason,
        TerminationReason::Replicated
    );
    // Seed plus one produced of each target type.
    for name in ["mining", "refining", "electronics_fab", "assembly"] {
        assert!(
            report.module_counts[name] >= 2,
            "module '{name}' should have grown, counts: {:?}",
            report.module_counts
        );
    }
    // The contamination monitor kept publishing its level to the very end.
    assert!(
        engine
            .bus()
            .history()
            .any(|e| e.kind() == EventKind::ContaminationLevel)
    );
    assert!(!report.metrics.is_empty());
    assert!(!report.completed_tasks.is_empty());
}

// ===========================================================================
// Test 2: Software gate delays module builds until firmware exists
// ===========================================================================

#[test]
fn software_gate_defers_module_builds() {
    let dir = tmp_dir("software");
    let path = write_full_spec(&dir);
    let loaded = replicator_spec::load(&path, None).unwrap();

    let mut engine = Engine::new(loaded.registry, loaded.config, loaded.subsystems).unwrap();
    let firmware = engine.registry().resource_id("assembler_firmware").unwrap();

    // Drive until the firmware exists; module-building tasks cannot have
    // completed before that moment.
    let mining_product = engine.registry().resource_id("mining").unwrap();
    let mut firmware_at = None;
    for tick in 0..40_000 {
        engine.step().unwrap();
        if firmware_at.is_none() && engine.storage().quantity(firmware) >= 1.0 {
            firmware_at = Some(tick);
        }
        if engine.storage().quantity(mining_product) >= 1.0 {
            assert!(
                firmware_at.is_some_and(|f| f <= tick),
                "module product appeared before its operator software"
            );
            break;
        }
        if engine.replicated() {
            break;
        }
    }
    assert!(firmware_at.is_some(), "firmware was never produced");
    // Software is reusable: still exactly one copy on hand.
    assert_eq!(engine.storage().quantity(firmware), 1.0);
}

// ===========================================================================
// Test 3: Byte-identical reports across independent loads
// ===========================================================================

#[test]
fn end_to_end_determinism_across_loads() {
    let dir = tmp_dir("determinism");
    let path = write_full_spec(&dir);

    let run = || {
        let loaded = replicator_spec::load(&path, None).unwrap();
        let mut engine =
            Engine::new(loaded.registry, loaded.config, loaded.subsystems).unwrap();
        engine.set_config_document(loaded.document);
        let report = engine.run().unwrap();
        report.deterministic_json().unwrap()
    };

    assert_eq!(run(), run());
}

// ===========================================================================
// Test 4: Wall-clock timeout from a loaded spec
// ===========================================================================

#[test]
fn wall_clock_timeout_reason_is_wall_time() {
    let dir = tmp_dir("wall");
    let path = write_full_spec(&dir);
    let loaded = replicator_spec::load(&path, None).unwrap();

    let mut config = loaded.config;
    config.max_wall_time_secs = 0.0;
    let mut engine = Engine::new(loaded.registry, config, loaded.subsystems).unwrap();
    let report = engine.run().unwrap();

    assert_eq!(report.status.terminated_reason, TerminationReason::WallTime);
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["status"]["terminated_reason"], "wall_time");
}

// ===========================================================================
// Test 5: Recycling returns real material to the ledger
// ===========================================================================

#[test]
fn recycling_recovers_metal_from_slag() {
    let dir = tmp_dir("recycle");
    let path = write_full_spec(&dir);
    let loaded = replicator_spec::load(&path, None).unwrap();

    let mut engine = Engine::new(loaded.registry, loaded.config, loaded.subsystems).unwrap();
    let report = engine.run().unwrap();
    assert_eq!(
        report.status.terminated_reason,
        TerminationReason::Replicated
    );

    // Slag was emitted during refining and recovered metal flowed back.
    let recovered = engine
        .bus()
        .history()
        .any(|e| e.kind() == EventKind::ResourceRecovered);
    let log_mentions_recovery = report
        .log
        .iter()
        .any(|entry| entry.message.contains("recovered"));
    assert!(
        recovered || log_mentions_recovery,
        "expected recycling activity in events or log"
    );
}

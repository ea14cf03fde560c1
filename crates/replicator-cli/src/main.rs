//! Thin command-line driver for the replicator engine.
//!
//! Loads a spec, runs the simulation, and writes the report. All simulation
//! behavior lives in the library crates; this binary only parses arguments
//! and maps outcomes to exit codes:
//!
//! - 0: replication succeeded
//! - 1: configuration error
//! - 2: runtime error
//! - 3: timeout (simulated-time, wall-clock, or cancellation)

use replicator_core::engine::Engine;
use replicator_core::report::TerminationReason;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug)]
struct CliOptions {
    spec: PathBuf,
    profile: Option<String>,
    max_hours: Option<f64>,
    max_wall_time: Option<f64>,
    output: Option<PathBuf>,
    modular: bool,
    seed: Option<u64>,
}

fn print_usage() {
    eprintln!(
        "usage: replicator --spec <path> [--profile <name>] [--max-hours <float>]\n\
         \x20                 [--max-wall-time <seconds>] [--output <path>] [--modular]\n\
         \x20                 [--seed <int>]"
    );
}

fn parse_args(args: &[String]) -> Result<CliOptions, String> {
    let mut spec = None;
    let mut profile = None;
    let mut max_hours = None;
    let mut max_wall_time = None;
    let mut output = None;
    let mut modular = false;
    let mut seed = None;

    let mut i = 0usize;
    while i < args.len() {
        match args[i].as_str() {
            "--spec" => {
                i += 1;
                let path = args
                    .get(i)
                    .ok_or_else(|| "missing value for --spec (expected a file path)".to_string())?;
                if spec.replace(PathBuf::from(path)).is_some() {
                    return Err("--spec provided more than once".to_string());
                }
            }
            "--profile" => {
                i += 1;
                let name = args
                    .get(i)
                    .ok_or_else(|| "missing value for --profile (expected a name)".to_string())?;
                if profile.replace(name.clone()).is_some() {
                    return Err("--profile provided more than once".to_string());
                }
            }
            "--max-hours" => {
                i += 1;
                let value = args
                    .get(i)
                    .ok_or_else(|| "missing value for --max-hours".to_string())?;
                let hours: f64 = value
                    .parse()
                    .map_err(|_| format!("invalid --max-hours value: {value}"))?;
                max_hours = Some(hours);
            }
            "--max-wall-time" => {
                i += 1;
                let value = args
                    .get(i)
                    .ok_or_else(|| "missing value for --max-wall-time".to_string())?;
                let seconds: f64 = value
                    .parse()
                    .map_err(|_| format!("invalid --max-wall-time value: {value}"))?;
                max_wall_time = Some(seconds);
            }
            "--output" => {
                i += 1;
                let path = args
                    .get(i)
                    .ok_or_else(|| "missing value for --output (expected a file path)".to_string())?;
                output = Some(PathBuf::from(path));
            }
            "--modular" => {
                modular = true;
            }
            "--seed" => {
                i += 1;
                let value = args
                    .get(i)
                    .ok_or_else(|| "missing value for --seed".to_string())?;
                let parsed: u64 = value
                    .parse()
                    .map_err(|_| format!("invalid --seed value: {value}"))?;
                seed = Some(parsed);
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            other => return Err(format!("unknown argument: {other}")),
        }
        i += 1;
    }

    let spec = spec.ok_or_else(|| "--spec is required".to_string())?;
    Ok(CliOptions {
        spec,
        profile,
        max_hours,
        max_wall_time,
        output,
        modular,
        seed,
    })
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let options = match parse_args(&args) {
        Ok(options) => options,
        Err(message) => {
            eprintln!("error: {message}");
            print_usage();
            return ExitCode::from(1);
        }
    };

    let loaded = match replicator_spec::load(&options.spec, options.profile.as_deref()) {
        Ok(loaded) => loaded,
        Err(err) => {
            eprintln!("configuration error: {err}");
            return ExitCode::from(1);
        }
    };

    let mut config = loaded.config;
    if let Some(hours) = options.max_hours {
        config.max_hours = hours;
    }
    if let Some(seconds) = options.max_wall_time {
        config.max_wall_time_secs = seconds;
    }
    if let Some(seed) = options.seed {
        config.seed = seed;
    }
    // Without --modular the optional subsystems stay detached and the core
    // runs alone.
    let subsystems = if options.modular {
        loaded.subsystems
    } else {
        Vec::new()
    };

    let mut engine = match Engine::new(loaded.registry, config, subsystems) {
        Ok(engine) => engine,
        Err(err) => {
            eprintln!("configuration error: {err}");
            return ExitCode::from(1);
        }
    };
    engine.set_config_document(loaded.document);

    let report = match engine.run() {
        Ok(report) => report,
        Err(err) => {
            eprintln!("runtime error: {err}");
            return ExitCode::from(2);
        }
    };

    let json = match serde_json::to_string_pretty(&report) {
        Ok(json) => json,
        Err(err) => {
            eprintln!("runtime error: failed to serialize report: {err}");
            return ExitCode::from(2);
        }
    };
    match &options.output {
        Some(path) => {
            if let Err(err) = std::fs::write(path, &json) {
                eprintln!("runtime error: failed to write {}: {err}", path.display());
                return ExitCode::from(2);
            }
        }
        None => println!("{json}"),
    }

    match report.status.terminated_reason {
        TerminationReason::Replicated => ExitCode::SUCCESS,
        TerminationReason::MaxHours
        | TerminationReason::WallTime
        | TerminationReason::Cancelled => {
            eprintln!(
                "timeout: {:?} after {:.1} simulated hours",
                report.status.terminated_reason, report.status.sim_time_hours
            );
            ExitCode::from(3)
        }
    }
}

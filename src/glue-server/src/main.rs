// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

mod config;
mod control;
mod debug_dump;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::{error, info, warn};

use glue_app::{init_logging, normalize_name, ConfigFile};
use glue_backend::{register_builtin_backends_on, RegistrationContext};
use glue_core::{
    DynResult, GlueDispensingOperation, GluePath, GlueProcessState, ProcessListener,
    PumpController, PROCESS_STATE_TOPIC,
};

use config::ServerConfig;
use debug_dump::DebugDumpListener;

const PKG_DESCRIPTION: &str = concat!(env!("CARGO_PKG_NAME"), " - glue dispensing runner");

#[derive(Debug, Parser)]
#[command(
    author = env!("CARGO_PKG_AUTHORS"),
    version = env!("CARGO_PKG_VERSION"),
    about = PKG_DESCRIPTION,
)]
struct Cli {
    /// Path to configuration file
    #[arg(long = "config", short = 'C', value_name = "FILE")]
    config: Option<PathBuf>,
    /// Print example configuration and exit
    #[arg(long = "print-config")]
    print_config: bool,
    /// JSON file with the glue paths to dispense
    #[arg(long = "paths", short = 'p', value_name = "FILE")]
    paths: Option<PathBuf>,
    /// Move along the paths without dispensing
    #[arg(long = "no-spray")]
    no_spray: bool,
    /// Robot backend to use (e.g. sim)
    #[arg(short = 'r', long = "robot")]
    robot: Option<String>,
    /// Pump backend to use (e.g. sim)
    #[arg(short = 'm', long = "pump")]
    pump: Option<String>,
}

/// Logs every committed transition on the process-state topic.
struct StateLogger;

impl ProcessListener for StateLogger {
    fn on_state_change(&self, old: GlueProcessState, new: GlueProcessState) {
        info!(topic = PROCESS_STATE_TOPIC, "{} -> {}", old, new);
    }
}

fn load_paths(path: &Path) -> DynResult<Vec<GluePath>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read paths file {}: {}", path.display(), e))?;
    let paths: Vec<GluePath> = serde_json::from_str(&content)
        .map_err(|e| format!("Failed to parse paths file {}: {}", path.display(), e))?;
    Ok(paths)
}

/// Backend names after merging CLI arguments over the config file.
struct ResolvedBackends {
    robot: String,
    pump: String,
}

fn resolve_backends(
    cli: &Cli,
    cfg: &ServerConfig,
    registry: &RegistrationContext,
) -> DynResult<ResolvedBackends> {
    let robot = match cli.robot.as_deref().or(cfg.robot.backend.as_deref()) {
        Some(name) => normalize_name(name),
        None => {
            return Err("Robot backend not specified. Use --robot or set [robot].backend.".into())
        }
    };
    if !registry.is_robot_registered(&robot) {
        return Err(format!(
            "Unknown robot backend: {} (available: {})",
            robot,
            registry.registered_robots().join(", ")
        )
        .into());
    }

    let pump = match cli.pump.as_deref().or(cfg.pump.backend.as_deref()) {
        Some(name) => normalize_name(name),
        None => return Err("Pump backend not specified. Use --pump or set [pump].backend.".into()),
    };
    if !registry.is_pump_registered(&pump) {
        return Err(format!(
            "Unknown pump backend: {} (available: {})",
            pump,
            registry.registered_pumps().join(", ")
        )
        .into());
    }

    Ok(ResolvedBackends { robot, pump })
}

fn build_operation(
    cfg: &ServerConfig,
    backends: &ResolvedBackends,
    registry: &RegistrationContext,
) -> DynResult<(Arc<GlueDispensingOperation>, Arc<PumpController>)> {
    let robot = registry.build_robot(&backends.robot, &cfg.robot.to_access())?;
    let motor = registry.build_pump(&backends.pump, &cfg.pump.to_access())?;
    let pump = Arc::new(PumpController::new(
        motor,
        cfg.process.use_segment_settings,
        cfg.pump.global.clone(),
    ));
    let op = GlueDispensingOperation::new(
        robot,
        pump.clone(),
        Arc::new(cfg.cell_map()),
        cfg.process.to_policy(),
    );
    Ok((Arc::new(op), pump))
}

/// Report motors of all configured cells; unhealthy ones are only warned about.
async fn check_motors(cfg: &ServerConfig, pump: &PumpController) {
    for cell in cfg.effective_cells() {
        match pump.motor_health(cell.motor_address).await {
            Ok(health) if health.is_healthy && !health.has_errors() => {
                info!("Cell '{}' motor {} healthy", cell.glue_type, cell.motor_address)
            }
            Ok(health) => warn!(
                "Cell '{}' motor {} unhealthy: errors {:?}, modbus {:?}",
                cell.glue_type, cell.motor_address, health.errors, health.modbus_errors
            ),
            Err(e) => warn!(
                "Cell '{}' motor {} health query failed: {}",
                cell.glue_type, cell.motor_address, e
            ),
        }
    }
}

#[tokio::main]
async fn main() -> DynResult<()> {
    let mut registry = RegistrationContext::new();
    register_builtin_backends_on(&mut registry);

    let cli = Cli::parse();

    if cli.print_config {
        println!("{}", ServerConfig::example_combined_toml());
        return Ok(());
    }

    let (cfg, config_path) = if let Some(ref path) = cli.config {
        let cfg = ServerConfig::load_from_file(path)?;
        (cfg, Some(path.clone()))
    } else {
        ServerConfig::load_from_default_paths()?
    };
    cfg.validate()
        .map_err(|e| format!("Invalid server configuration: {}", e))?;

    init_logging(cfg.general.log_level.as_deref());

    if let Some(ref path) = config_path {
        info!("Loaded configuration from {}", path.display());
    }

    let paths_file = cli
        .paths
        .as_deref()
        .ok_or("No paths file given. Use --paths <FILE>.")?;
    let paths = load_paths(paths_file)?;
    let backends = resolve_backends(&cli, &cfg, &registry)?;
    info!(
        "Starting glue-server (robot: {}, pump: {}, {} paths from {})",
        backends.robot,
        backends.pump,
        paths.len(),
        paths_file.display()
    );

    let (op, pump) = build_operation(&cfg, &backends, &registry)?;
    op.register_listener(Arc::new(StateLogger));
    let debug_dump = if cfg.debug.enabled {
        info!("Writing context snapshots to {}", cfg.debug.dir);
        let (listener, writer) = DebugDumpListener::spawn(&cfg.debug.dir);
        Some((op.register_listener(Arc::new(listener)), writer))
    } else {
        None
    };
    check_motors(&cfg, &pump).await;

    let ctrl_c = {
        let op = op.clone();
        tokio::spawn(async move {
            if signal::ctrl_c().await.is_ok() {
                info!("Ctrl-C received, stopping");
                let result = op.stop().await;
                if !result.success {
                    warn!("Stop rejected: {}", result.message);
                }
            }
        })
    };
    let operator = tokio::spawn(control::run(op.clone(), control::spawn_stdin_reader()));

    let result = op.start(paths, !cli.no_spray, false).await;

    ctrl_c.abort();
    operator.abort();

    // dropping the listener closes the queue; wait for queued dumps
    if let Some((id, writer)) = debug_dump {
        op.machine().unregister_listener(id);
        if let Err(e) = writer.await {
            warn!("Debug dump writer failed: {}", e);
        }
    }

    if result.success {
        info!("{}", result.message);
        Ok(())
    } else {
        let detail = result.error.unwrap_or_default();
        error!("{}: {}", result.message, detail);
        Err(format!("{}: {}", result.message, detail).into())
    }
}

// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Configuration file support for glue-server.
//!
//! Config is loaded from the `[glue-server]` section of `glue-dispense.toml`.
//! Default search order:
//! 1. Path specified via `--config` CLI argument
//! 2. `./glue-dispense.toml`
//! 3. `~/.config/glue-dispense/glue-dispense.toml`
//! 4. `/etc/glue-dispense/glue-dispense.toml`

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use glue_app::ConfigFile;
use glue_backend::{PumpAccess, RobotAccess};
use glue_core::{DispensingPolicy, GlueCellMap, MotionParams, RobotPose, SegmentSettings};

/// Top-level server configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub general: GeneralConfig,
    /// Run-loop timings and feature switches
    pub process: ProcessConfig,
    pub robot: RobotConfig,
    pub pump: PumpConfig,
    /// Glue cell table; empty means the built-in four-cell layout
    pub cells: Vec<CellConfig>,
    /// Context snapshot dumps
    pub debug: DebugConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: Option<String>,
}

/// Process tunables. Durations are in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessConfig {
    pub use_segment_settings: bool,
    pub turn_off_pump_between_paths: bool,
    pub adjust_pump_speed_while_spray: bool,
    pub loop_delay_ms: u64,
    pub wait_poll_interval_ms: u64,
    pub worker_tick_ms: u64,
    pub worker_join_timeout_ms: u64,
    pub pump_ready_timeout_ms: u64,
    pub reach_timeout_ms: u64,
    pub path_completion_timeout_ms: u64,
    /// Motor used for glue types without a cell
    pub default_motor_address: u16,
    pub motion: MotionParams,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        let policy = DispensingPolicy::default();
        Self {
            use_segment_settings: policy.use_segment_settings,
            turn_off_pump_between_paths: policy.turn_off_pump_between_paths,
            adjust_pump_speed_while_spray: policy.adjust_pump_speed_while_spray,
            loop_delay_ms: millis(policy.loop_delay),
            wait_poll_interval_ms: millis(policy.wait_poll_interval),
            worker_tick_ms: millis(policy.worker_tick),
            worker_join_timeout_ms: millis(policy.worker_join_timeout),
            pump_ready_timeout_ms: millis(policy.pump_ready_timeout),
            reach_timeout_ms: millis(policy.reach_timeout),
            path_completion_timeout_ms: millis(policy.path_completion_timeout),
            default_motor_address: policy.default_motor_address,
            motion: policy.motion,
        }
    }
}

fn millis(d: Duration) -> u64 {
    d.as_millis() as u64
}

impl ProcessConfig {
    pub fn to_policy(&self) -> DispensingPolicy {
        DispensingPolicy {
            use_segment_settings: self.use_segment_settings,
            turn_off_pump_between_paths: self.turn_off_pump_between_paths,
            adjust_pump_speed_while_spray: self.adjust_pump_speed_while_spray,
            loop_delay: Duration::from_millis(self.loop_delay_ms),
            wait_poll_interval: Duration::from_millis(self.wait_poll_interval_ms),
            worker_tick: Duration::from_millis(self.worker_tick_ms),
            worker_join_timeout: Duration::from_millis(self.worker_join_timeout_ms),
            pump_ready_timeout: Duration::from_millis(self.pump_ready_timeout_ms),
            reach_timeout: Duration::from_millis(self.reach_timeout_ms),
            path_completion_timeout: Duration::from_millis(self.path_completion_timeout_ms),
            default_motor_address: self.default_motor_address,
            motion: self.motion,
        }
    }
}

/// Robot backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RobotConfig {
    /// Robot backend (e.g. "sim")
    pub backend: Option<String>,
    /// Simulated TCP speed at 100% velocity, mm/s
    pub speed_mm_s: f64,
    /// Simulation step, ms
    pub tick_ms: u64,
    /// Pose before the first move
    pub home: RobotPose,
}

impl Default for RobotConfig {
    fn default() -> Self {
        let access = RobotAccess::default();
        Self {
            backend: Some("sim".to_string()),
            speed_mm_s: access.speed_mm_s,
            tick_ms: millis(access.tick),
            home: access.home,
        }
    }
}

impl RobotConfig {
    pub fn to_access(&self) -> RobotAccess {
        RobotAccess {
            speed_mm_s: self.speed_mm_s,
            tick: Duration::from_millis(self.tick_ms),
            home: self.home,
        }
    }
}

/// Pump board configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PumpConfig {
    /// Pump backend (e.g. "sim")
    pub backend: Option<String>,
    /// Motor addresses present on the board
    pub addresses: Vec<u16>,
    pub max_speed: u32,
    /// Pump settings used when segment settings are disabled
    pub global: SegmentSettings,
}

impl Default for PumpConfig {
    fn default() -> Self {
        let access = PumpAccess::default();
        Self {
            backend: Some("sim".to_string()),
            addresses: access.addresses,
            max_speed: access.max_speed,
            global: SegmentSettings::default(),
        }
    }
}

impl PumpConfig {
    pub fn to_access(&self) -> PumpAccess {
        PumpAccess {
            addresses: self.addresses.clone(),
            max_speed: self.max_speed,
        }
    }
}

/// One dispensing cell: glue type and the motor feeding it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellConfig {
    pub glue_type: String,
    pub motor_address: u16,
}

impl CellConfig {
    fn new(glue_type: &str, motor_address: u16) -> Self {
        Self {
            glue_type: glue_type.to_string(),
            motor_address,
        }
    }
}

/// Four-cell dispenser: cells 1..4 on motors 0, 2, 4, 6.
pub fn default_cells() -> Vec<CellConfig> {
    vec![
        CellConfig::new("Type A", 0),
        CellConfig::new("Type B", 2),
        CellConfig::new("Type C", 4),
        CellConfig::new("Type D", 6),
    ]
}

fn default_debug_dir() -> String {
    if let Some(data_dir) = dirs::data_dir() {
        return data_dir
            .join("glue-dispense")
            .join("debug")
            .to_string_lossy()
            .to_string();
    }
    "logs/debug".to_string()
}

/// Context snapshot dump configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub enabled: bool,
    /// Directory receiving one JSON file per snapshot
    pub dir: String,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: default_debug_dir(),
        }
    }
}

impl ServerConfig {
    /// Cells in effect: the configured ones, or the built-in layout.
    pub fn effective_cells(&self) -> Vec<CellConfig> {
        if self.cells.is_empty() {
            default_cells()
        } else {
            self.cells.clone()
        }
    }

    pub fn cell_map(&self) -> GlueCellMap {
        let mut map = GlueCellMap::new(self.process.default_motor_address);
        for cell in self.effective_cells() {
            map.insert(&cell.glue_type, cell.motor_address);
        }
        map
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_log_level(self.general.log_level.as_deref())?;

        let p = &self.process;
        for (name, value) in [
            ("loop_delay_ms", p.loop_delay_ms),
            ("wait_poll_interval_ms", p.wait_poll_interval_ms),
            ("worker_tick_ms", p.worker_tick_ms),
            ("worker_join_timeout_ms", p.worker_join_timeout_ms),
            ("pump_ready_timeout_ms", p.pump_ready_timeout_ms),
            ("reach_timeout_ms", p.reach_timeout_ms),
            ("path_completion_timeout_ms", p.path_completion_timeout_ms),
        ] {
            if value == 0 {
                return Err(format!("[process].{} must be > 0", name));
            }
        }
        if !(p.motion.velocity > 0.0 && p.motion.velocity <= 100.0) {
            return Err("[process.motion].velocity must be in range (0, 100]".to_string());
        }
        if !(p.motion.acceleration > 0.0 && p.motion.acceleration <= 100.0) {
            return Err("[process.motion].acceleration must be in range (0, 100]".to_string());
        }

        if !(self.robot.speed_mm_s.is_finite() && self.robot.speed_mm_s > 0.0) {
            return Err("[robot].speed_mm_s must be > 0".to_string());
        }
        if self.robot.tick_ms == 0 {
            return Err("[robot].tick_ms must be > 0".to_string());
        }

        if self.pump.addresses.is_empty() {
            return Err("[pump].addresses must not be empty".to_string());
        }
        if self.pump.max_speed == 0 {
            return Err("[pump].max_speed must be > 0".to_string());
        }
        if self.pump.global.glue_speed_coefficient < 0.0 {
            return Err("[pump.global].glue_speed_coefficient must be >= 0".to_string());
        }

        let mut seen = HashSet::new();
        for cell in self.effective_cells() {
            let key = cell.glue_type.trim().to_lowercase();
            if key.is_empty() {
                return Err("[[cells]].glue_type must not be empty".to_string());
            }
            if !seen.insert(key) {
                return Err(format!(
                    "[[cells]].glue_type '{}' is configured twice",
                    cell.glue_type
                ));
            }
            if !self.pump.addresses.contains(&cell.motor_address) {
                return Err(format!(
                    "[[cells]].motor_address {} for '{}' is not in [pump].addresses",
                    cell.motor_address, cell.glue_type
                ));
            }
        }

        if self.debug.enabled && self.debug.dir.trim().is_empty() {
            return Err("[debug].dir must not be empty when debug is enabled".to_string());
        }
        Ok(())
    }

    /// Generate an example configuration wrapped under the `[glue-server]`
    /// section header, suitable for use in a combined `glue-dispense.toml`.
    pub fn example_combined_toml() -> String {
        #[derive(serde::Serialize)]
        struct Wrapper {
            #[serde(rename = "glue-server")]
            inner: ServerConfig,
        }
        let example = ServerConfig {
            general: GeneralConfig {
                log_level: Some("info".to_string()),
            },
            cells: default_cells(),
            ..ServerConfig::default()
        };
        toml::to_string_pretty(&Wrapper { inner: example }).unwrap_or_default()
    }
}

fn validate_log_level(level: Option<&str>) -> Result<(), String> {
    match level {
        None | Some("trace" | "debug" | "info" | "warn" | "error") => Ok(()),
        Some(level) => Err(format!(
            "[general].log_level '{}' is invalid (expected one of: trace, debug, info, warn, error)",
            level
        )),
    }
}

impl ConfigFile for ServerConfig {
    fn section_key() -> &'static str {
        "glue-server"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glue_core::MotorAddressResolver;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.process.loop_delay_ms, 200);
        assert_eq!(config.process.worker_tick_ms, 50);
        assert_eq!(config.process.path_completion_timeout_ms, 600_000);
        assert_eq!(config.robot.backend.as_deref(), Some("sim"));
        assert_eq!(config.pump.addresses, vec![0, 2, 4, 6]);
        assert!(!config.debug.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_cell_layout() {
        let map = ServerConfig::default().cell_map();
        assert_eq!(map.len(), 4);
        assert_eq!(map.motor_address("type c"), Some(4));
        assert_eq!(map.motor_address("Type D"), Some(6));
        assert_eq!(map.motor_address("Custom"), None);
    }

    #[test]
    fn test_parse_full_toml() {
        let toml_str = r#"
[glue-server.general]
log_level = "debug"

[glue-server.process]
loop_delay_ms = 50
turn_off_pump_between_paths = false
default_motor_address = 2

[glue-server.process.motion]
velocity = 60.0

[glue-server.robot]
backend = "sim"
speed_mm_s = 250.0

[glue-server.pump]
addresses = [0, 2]

[glue-server.pump.global]
motor_speed = 12000

[[glue-server.cells]]
glue_type = "Epoxy"
motor_address = 2

[glue-server.debug]
enabled = true
dir = "/tmp/glue-debug"
"#;
        let config = ServerConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.general.log_level.as_deref(), Some("debug"));
        assert_eq!(config.process.loop_delay_ms, 50);
        assert_eq!(config.process.worker_tick_ms, 50);
        assert!(!config.process.turn_off_pump_between_paths);
        assert_eq!(config.process.motion.velocity, 60.0);
        assert_eq!(config.process.motion.acceleration, 30.0);
        assert_eq!(config.robot.speed_mm_s, 250.0);
        assert_eq!(config.pump.global.motor_speed, 12_000);
        assert_eq!(config.pump.global.speed_reverse, 1_000);
        assert_eq!(config.cells, vec![CellConfig::new("Epoxy", 2)]);
        assert!(config.debug.enabled);
        assert!(config.validate().is_ok());

        let policy = config.process.to_policy();
        assert_eq!(policy.loop_delay, Duration::from_millis(50));
        assert_eq!(policy.default_motor_address, 2);
        assert_eq!(config.cell_map().motor_address("epoxy"), Some(2));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = ServerConfig::default();
        config.general.log_level = Some("loud".to_string());
        assert!(config.validate().unwrap_err().contains("[general].log_level"));

        let mut config = ServerConfig::default();
        config.process.worker_tick_ms = 0;
        assert_eq!(
            config.validate().unwrap_err(),
            "[process].worker_tick_ms must be > 0"
        );

        let mut config = ServerConfig::default();
        config.process.motion.velocity = 150.0;
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.cells = vec![CellConfig::new("Type A", 0), CellConfig::new("type a", 2)];
        assert!(config.validate().unwrap_err().contains("configured twice"));

        let mut config = ServerConfig::default();
        config.cells = vec![CellConfig::new("Type A", 9)];
        assert!(config.validate().unwrap_err().contains("not in [pump].addresses"));
    }

    #[test]
    fn test_example_round_trips() {
        let example = ServerConfig::example_combined_toml();
        assert!(example.contains("[glue-server"));
        let config = ServerConfig::from_toml_str(&example).unwrap();
        assert_eq!(config.cells, default_cells());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_demo_config_is_valid() {
        let config =
            ServerConfig::from_toml_str(include_str!("../../../demos/glue-dispense.toml")).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.robot.home.z, 150.0);
        assert_eq!(config.cell_map().len(), 2);
    }
}

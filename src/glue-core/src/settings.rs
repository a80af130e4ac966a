// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Per-path glue settings and glue-type to motor-address resolution.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Glue settings attached to a single path segment.
///
/// Missing keys fall back to the dispenser defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentSettings {
    /// Glue type label; selects the dispensing cell and therefore the motor.
    pub glue_type: String,
    /// Steady-state motor speed.
    pub motor_speed: u32,
    pub forward_ramp_steps: u32,
    pub initial_ramp_speed: u32,
    /// Duration of the initial ramp in seconds.
    pub initial_ramp_speed_duration: f64,
    pub speed_reverse: u32,
    /// Duration of the anti-drip reverse in seconds.
    pub reverse_duration: f64,
    pub reverse_ramp_steps: u32,
    /// Motor speed per mm/s of TCP velocity.
    pub glue_speed_coefficient: f64,
    /// Distance (mm) at which the first point counts as reached.
    pub reach_start_threshold: f64,
    /// Distance (mm) at which a path point counts as reached.
    pub reach_end_threshold: f64,
}

impl Default for SegmentSettings {
    fn default() -> Self {
        Self {
            glue_type: String::new(),
            motor_speed: 10_000,
            forward_ramp_steps: 1,
            initial_ramp_speed: 5_000,
            initial_ramp_speed_duration: 1.0,
            speed_reverse: 1_000,
            reverse_duration: 1.0,
            reverse_ramp_steps: 1,
            glue_speed_coefficient: 5.0,
            reach_start_threshold: 1.0,
            reach_end_threshold: 1.0,
        }
    }
}

/// Segment settings with the motor address already resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedSettings {
    pub motor_address: u16,
    pub segment: SegmentSettings,
}

/// Glue type to motor (Modbus register) address lookup.
pub trait MotorAddressResolver: Send + Sync {
    fn motor_address(&self, glue_type: &str) -> Option<u16>;
}

/// Glue cells of the dispenser, keyed by glue type.
#[derive(Debug, Clone, Default)]
pub struct GlueCellMap {
    cells: HashMap<String, u16>,
    default_address: u16,
}

impl GlueCellMap {
    pub fn new(default_address: u16) -> Self {
        Self {
            cells: HashMap::new(),
            default_address,
        }
    }

    /// Map a glue type to a motor address. Glue types compare case-insensitively.
    pub fn insert(&mut self, glue_type: &str, motor_address: u16) {
        self.cells.insert(cell_key(glue_type), motor_address);
    }

    pub fn with_cell(mut self, glue_type: &str, motor_address: u16) -> Self {
        self.insert(glue_type, motor_address);
        self
    }

    pub fn default_address(&self) -> u16 {
        self.default_address
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Resolve segment settings, falling back to the default address when
    /// the glue type has no cell.
    pub fn resolve(&self, segment: &SegmentSettings) -> ResolvedSettings {
        resolve_settings(self, segment, self.default_address)
    }
}

impl MotorAddressResolver for GlueCellMap {
    fn motor_address(&self, glue_type: &str) -> Option<u16> {
        self.cells.get(&cell_key(glue_type)).copied()
    }
}

/// Resolve the motor address for `segment` through `resolver`.
///
/// An unknown glue type is not fatal: the fallback address is used and the
/// miss is logged.
pub fn resolve_settings(
    resolver: &dyn MotorAddressResolver,
    segment: &SegmentSettings,
    fallback: u16,
) -> ResolvedSettings {
    let motor_address = match resolver.motor_address(&segment.glue_type) {
        Some(addr) => addr,
        None => {
            warn!(
                "No glue cell configured for glue type '{}', using motor address {}",
                segment.glue_type, fallback
            );
            fallback
        }
    };
    ResolvedSettings {
        motor_address,
        segment: segment.clone(),
    }
}

fn cell_key(glue_type: &str) -> String {
    glue_type.trim().to_ascii_lowercase()
}

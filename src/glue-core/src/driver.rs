// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Hardware seams: the robot arm and the pump motor bank.
//!
//! Both drivers are shared between the run loop, the pump-adjustment
//! worker and the operation facade, so every method takes `&self`.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::path::RobotPose;
use crate::DynResult;

pub type DriverFuture<'a, T> = Pin<Box<dyn Future<Output = DynResult<T>> + Send + 'a>>;

/// Status code returned by robot motion commands. Zero means accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotionCode(pub i32);

impl MotionCode {
    pub const OK: MotionCode = MotionCode(0);

    pub fn is_success(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for MotionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Tool, frame and speed parameters shared by all robot motion commands.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionParams {
    pub tool: u8,
    pub user_frame: u8,
    /// Percent of the robot's nominal velocity.
    pub velocity: f64,
    /// Percent of the robot's nominal acceleration.
    pub acceleration: f64,
}

impl Default for MotionParams {
    fn default() -> Self {
        Self {
            tool: 0,
            user_frame: 0,
            velocity: 30.0,
            acceleration: 30.0,
        }
    }
}

/// Health record reported by the motor board for one motor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MotorHealth {
    pub address: u16,
    pub is_healthy: bool,
    /// Error codes latched by the motor controller.
    pub errors: Vec<u16>,
    /// Communication errors seen while querying the board.
    pub modbus_errors: Vec<String>,
}

impl MotorHealth {
    pub fn healthy(address: u16) -> Self {
        Self {
            address,
            is_healthy: true,
            errors: Vec::new(),
            modbus_errors: Vec::new(),
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty() || !self.modbus_errors.is_empty()
    }
}

/// Robot arm command surface.
pub trait RobotDriver: Send + Sync {
    /// Linear move to `pose`; returns once the command has been accepted.
    fn move_to<'a>(&'a self, pose: RobotPose, params: MotionParams)
        -> DriverFuture<'a, MotionCode>;

    /// Execute a multi-waypoint path. With `blocking == false` the call
    /// returns as soon as the trajectory is queued.
    fn execute_path<'a>(
        &'a self,
        points: &'a [RobotPose],
        params: MotionParams,
        blocking: bool,
    ) -> DriverFuture<'a, MotionCode>;

    /// Current TCP pose, or `None` when the controller cannot report one.
    fn current_position<'a>(&'a self) -> DriverFuture<'a, Option<RobotPose>>;

    /// Halt any motion in progress.
    fn stop_motion<'a>(&'a self) -> DriverFuture<'a, ()>;
}

/// Pump motor and generator command surface.
///
/// `Ok(false)` means the board refused the command; `Err` means the
/// command could not be delivered at all.
pub trait MotorDriver: Send + Sync {
    fn motor_on<'a>(
        &'a self,
        address: u16,
        speed: u32,
        ramp_steps: u32,
        initial_ramp_speed: u32,
        ramp_duration: f64,
    ) -> DriverFuture<'a, bool>;

    fn motor_off<'a>(
        &'a self,
        address: u16,
        reverse_speed: u32,
        reverse_time: f64,
        ramp_steps: u32,
    ) -> DriverFuture<'a, bool>;

    fn adjust_speed<'a>(&'a self, address: u16, speed: u32) -> DriverFuture<'a, bool>;

    fn motor_state<'a>(&'a self, address: u16) -> DriverFuture<'a, MotorHealth>;

    fn generator_on<'a>(&'a self) -> DriverFuture<'a, bool>;

    fn generator_off<'a>(&'a self) -> DriverFuture<'a, bool>;
}

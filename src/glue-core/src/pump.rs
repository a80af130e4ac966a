// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Pump control on top of a [`MotorDriver`].

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::driver::{MotorDriver, MotorHealth};
use crate::settings::SegmentSettings;
use crate::DynResult;

/// Turns the glue pump on and off with either the per-segment settings or
/// a global fallback set.
///
/// One controller is shared by every run of an operation.
pub struct PumpController {
    motor: Arc<dyn MotorDriver>,
    use_segment_settings: bool,
    global: SegmentSettings,
}

impl PumpController {
    pub fn new(
        motor: Arc<dyn MotorDriver>,
        use_segment_settings: bool,
        global: SegmentSettings,
    ) -> Self {
        Self {
            motor,
            use_segment_settings,
            global,
        }
    }

    pub fn use_segment_settings(&self) -> bool {
        self.use_segment_settings
    }

    fn effective<'a>(&'a self, segment: &'a SegmentSettings) -> &'a SegmentSettings {
        if self.use_segment_settings {
            segment
        } else {
            &self.global
        }
    }

    /// Start the motor with its initial ramp.
    ///
    /// Returns `false` when the board refused or the command failed.
    pub async fn pump_on(&self, address: u16, segment: &SegmentSettings) -> bool {
        let s = self.effective(segment);
        info!(
            "Pump on: motor {} speed {} (ramp {} steps, initial {} for {:.2}s)",
            address,
            s.motor_speed,
            s.forward_ramp_steps,
            s.initial_ramp_speed,
            s.initial_ramp_speed_duration
        );
        match self
            .motor
            .motor_on(
                address,
                s.motor_speed,
                s.forward_ramp_steps,
                s.initial_ramp_speed,
                s.initial_ramp_speed_duration,
            )
            .await
        {
            Ok(true) => true,
            Ok(false) => {
                warn!("Motor {} refused pump-on command", address);
                false
            }
            Err(e) => {
                error!("Pump-on for motor {} failed: {}", address, e);
                false
            }
        }
    }

    /// Stop the motor with an anti-drip reverse. Never fails loudly.
    pub async fn pump_off(&self, address: u16, segment: &SegmentSettings) -> bool {
        let s = self.effective(segment);
        info!(
            "Pump off: motor {} (reverse {} for {:.2}s, {} steps)",
            address, s.speed_reverse, s.reverse_duration, s.reverse_ramp_steps
        );
        match self
            .motor
            .motor_off(
                address,
                s.speed_reverse,
                s.reverse_duration,
                s.reverse_ramp_steps,
            )
            .await
        {
            Ok(true) => true,
            Ok(false) => {
                warn!("Motor {} refused pump-off command", address);
                false
            }
            Err(e) => {
                error!("Pump-off for motor {} failed: {}", address, e);
                false
            }
        }
    }

    pub async fn adjust_speed(&self, address: u16, speed: u32) -> DynResult<bool> {
        debug!("Adjust motor {} speed to {}", address, speed);
        self.motor.adjust_speed(address, speed).await
    }

    pub async fn generator_on(&self) -> bool {
        match self.motor.generator_on().await {
            Ok(ok) => ok,
            Err(e) => {
                error!("Generator on failed: {}", e);
                false
            }
        }
    }

    pub async fn generator_off(&self) -> bool {
        match self.motor.generator_off().await {
            Ok(ok) => ok,
            Err(e) => {
                error!("Generator off failed: {}", e);
                false
            }
        }
    }

    pub async fn motor_health(&self, address: u16) -> DynResult<MotorHealth> {
        self.motor.motor_state(address).await
    }
}

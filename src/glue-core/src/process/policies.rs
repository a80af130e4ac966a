// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Process timing and feature switches.

use std::time::Duration;

use crate::driver::MotionParams;

/// Tunables of a dispensing run.
#[derive(Debug, Clone)]
pub struct DispensingPolicy {
    /// Use the per-path glue settings instead of the global pump settings.
    pub use_segment_settings: bool,
    pub turn_off_pump_between_paths: bool,
    /// Spawn the pump-adjustment worker while spraying.
    pub adjust_pump_speed_while_spray: bool,
    /// Sleep between run-loop iterations.
    pub loop_delay: Duration,
    /// Interval at which polling handlers re-check the machine state.
    pub wait_poll_interval: Duration,
    /// Interval at which the pump worker samples robot position.
    pub worker_tick: Duration,
    /// Upper bound for a cancelled worker to exit.
    pub worker_join_timeout: Duration,
    pub pump_ready_timeout: Duration,
    /// Upper bound for the robot to reach the first point of a path.
    pub reach_timeout: Duration,
    /// Upper bound for the robot or the pump worker to finish a path.
    pub path_completion_timeout: Duration,
    /// Motor used when a glue type has no configured cell.
    pub default_motor_address: u16,
    pub motion: MotionParams,
}

impl Default for DispensingPolicy {
    fn default() -> Self {
        Self {
            use_segment_settings: true,
            turn_off_pump_between_paths: true,
            adjust_pump_speed_while_spray: true,
            loop_delay: Duration::from_millis(200),
            wait_poll_interval: Duration::from_millis(100),
            worker_tick: Duration::from_millis(50),
            worker_join_timeout: Duration::from_secs(2),
            pump_ready_timeout: Duration::from_secs(2),
            reach_timeout: Duration::from_secs(30),
            path_completion_timeout: Duration::from_secs(600),
            default_motor_address: 0,
            motion: MotionParams::default(),
        }
    }
}

impl DispensingPolicy {
    /// Short timings for tests and simulation.
    pub fn fast() -> Self {
        Self {
            loop_delay: Duration::from_millis(1),
            wait_poll_interval: Duration::from_millis(2),
            worker_tick: Duration::from_millis(2),
            worker_join_timeout: Duration::from_millis(500),
            pump_ready_timeout: Duration::from_millis(500),
            reach_timeout: Duration::from_millis(500),
            path_completion_timeout: Duration::from_secs(5),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = DispensingPolicy::default();
        assert!(policy.use_segment_settings);
        assert!(policy.turn_off_pump_between_paths);
        assert!(policy.adjust_pump_speed_while_spray);
        assert_eq!(policy.loop_delay, Duration::from_millis(200));
        assert_eq!(policy.wait_poll_interval, Duration::from_millis(100));
        assert_eq!(policy.worker_join_timeout, Duration::from_secs(2));
        assert_eq!(policy.reach_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_fast_policy_keeps_switches() {
        let policy = DispensingPolicy::fast();
        assert!(policy.adjust_pump_speed_while_spray);
        assert!(policy.loop_delay < Duration::from_millis(10));
    }
}

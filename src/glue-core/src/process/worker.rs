// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Pump-adjustment worker.
//!
//! While the robot traverses a path the worker samples the TCP position,
//! tracks which waypoints have been reached and scales the pump speed to
//! the measured TCP velocity. It reports its outcome exactly once, through
//! its task's join handle.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::driver::RobotDriver;
use crate::path::RobotPose;
use crate::pump::PumpController;
use crate::settings::SegmentSettings;

use super::state::GlueProcessState;

/// Tracks the furthest waypoint of a path the robot has come within
/// `threshold` of.
#[derive(Debug, Clone)]
pub struct PathProgress {
    points: Arc<[RobotPose]>,
    reached: usize,
    threshold: f64,
}

impl PathProgress {
    /// The robot is assumed to stand on `start_index` already.
    pub fn new(points: Arc<[RobotPose]>, start_index: usize, threshold: f64) -> Self {
        let reached = start_index.min(points.len().saturating_sub(1));
        Self {
            points,
            reached,
            threshold,
        }
    }

    /// Advance to the furthest upcoming point within the threshold.
    ///
    /// Points the robot passes between samples are skipped over, never
    /// counted backwards.
    pub fn observe(&mut self, pose: &RobotPose) -> usize {
        let start = self.reached + 1;
        if let Some(offset) = self
            .points
            .get(start..)
            .unwrap_or_default()
            .iter()
            .rposition(|p| p.is_within(pose, self.threshold))
        {
            self.reached = start + offset;
        }
        self.reached
    }

    pub fn reached(&self) -> usize {
        self.reached
    }

    pub fn is_complete(&self) -> bool {
        self.points.is_empty() || self.reached + 1 >= self.points.len()
    }
}

/// Outcome of a worker run.
#[derive(Debug, Clone, PartialEq)]
pub struct PumpWorkerResult {
    /// True when the worker followed the robot to the last point.
    pub success: bool,
    /// Last point index confirmed reached.
    pub progress_point_index: usize,
    /// Driver failure that ended the run, if any.
    pub error: Option<String>,
}

/// What joining a worker produced.
#[derive(Debug)]
pub enum WorkerExit {
    Finished(PumpWorkerResult),
    /// The task panicked or was aborted.
    Crashed(String),
    /// The worker did not exit in time and has been aborted.
    TimedOut,
}

/// Parameters for one worker run.
#[derive(Debug, Clone)]
pub struct PumpWorkerConfig {
    pub points: Arc<[RobotPose]>,
    pub start_index: usize,
    pub motor_address: u16,
    pub settings: SegmentSettings,
    pub tick: Duration,
}

/// Handle to the in-flight worker.
pub struct PumpWorkerHandle {
    join: JoinHandle<PumpWorkerResult>,
    cancel: watch::Sender<bool>,
    ready: watch::Receiver<bool>,
}

impl PumpWorkerHandle {
    /// Spawn a worker. It exits on its own when the last point is reached,
    /// when [`cancel`](Self::cancel) is called, or when `state_rx` reports
    /// PAUSED, STOPPED or ERROR.
    pub fn spawn(
        config: PumpWorkerConfig,
        robot: Arc<dyn RobotDriver>,
        pump: Arc<PumpController>,
        state_rx: watch::Receiver<GlueProcessState>,
    ) -> Self {
        let (cancel, cancel_rx) = watch::channel(false);
        let (ready_tx, ready) = watch::channel(false);
        let join = tokio::spawn(run_worker(
            config, robot, pump, state_rx, cancel_rx, ready_tx,
        ));
        Self {
            join,
            cancel,
            ready,
        }
    }

    pub fn is_alive(&self) -> bool {
        !self.join.is_finished()
    }

    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    /// Wait for the ready handshake. Returns false on timeout.
    pub async fn wait_ready(&mut self, timeout: Duration) -> bool {
        let ready = &mut self.ready;
        let wait = async {
            loop {
                if *ready.borrow_and_update() {
                    return true;
                }
                if ready.changed().await.is_err() {
                    return *ready.borrow();
                }
            }
        };
        tokio::time::timeout(timeout, wait).await.unwrap_or(false)
    }

    /// Ask the worker to exit at its next check-point.
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    pub fn abort(self) {
        self.join.abort();
    }

    /// Join with an upper bound. A worker that overstays is aborted.
    pub async fn join(mut self, timeout: Duration) -> WorkerExit {
        match tokio::time::timeout(timeout, &mut self.join).await {
            Ok(Ok(result)) => WorkerExit::Finished(result),
            Ok(Err(e)) => WorkerExit::Crashed(e.to_string()),
            Err(_) => {
                self.join.abort();
                WorkerExit::TimedOut
            }
        }
    }
}

/// Target pump speed for a TCP velocity in mm/s, capped at the segment's
/// steady-state speed.
pub fn pump_speed_for(velocity: f64, settings: &SegmentSettings) -> u32 {
    let speed = (velocity * settings.glue_speed_coefficient).round();
    speed.clamp(0.0, settings.motor_speed as f64) as u32
}

async fn run_worker(
    config: PumpWorkerConfig,
    robot: Arc<dyn RobotDriver>,
    pump: Arc<PumpController>,
    mut state_rx: watch::Receiver<GlueProcessState>,
    mut cancel_rx: watch::Receiver<bool>,
    ready_tx: watch::Sender<bool>,
) -> PumpWorkerResult {
    let mut progress = PathProgress::new(
        config.points.clone(),
        config.start_index,
        config.settings.reach_end_threshold,
    );
    info!(
        "Pump worker started on motor {} at point {}/{}",
        config.motor_address,
        progress.reached(),
        config.points.len()
    );

    let initial = *state_rx.borrow_and_update();
    if stops_worker(initial) {
        return early_exit(&*robot, &mut progress, initial.name()).await;
    }
    ready_tx.send_replace(true);

    let mut ticker = tokio::time::interval(config.tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_sample: Option<(RobotPose, Instant)> = None;
    let mut last_speed: Option<u32> = None;

    loop {
        tokio::select! {
            biased;
            _ = cancel_rx.changed() => {
                return early_exit(&*robot, &mut progress, "cancelled").await;
            }
            changed = state_rx.changed() => {
                let state = match changed {
                    Ok(()) => *state_rx.borrow_and_update(),
                    Err(_) => return early_exit(&*robot, &mut progress, "state closed").await,
                };
                if stops_worker(state) {
                    return early_exit(&*robot, &mut progress, state.name()).await;
                }
                continue;
            }
            _ = ticker.tick() => {}
        }

        let pose = match robot.current_position().await {
            Ok(Some(pose)) => pose,
            Ok(None) => continue,
            Err(e) => {
                return PumpWorkerResult {
                    success: false,
                    progress_point_index: progress.reached(),
                    error: Some(format!("position query failed: {}", e)),
                }
            }
        };
        progress.observe(&pose);

        let now = Instant::now();
        if let Some((prev, at)) = last_sample {
            let dt = now.duration_since(at).as_secs_f64();
            let velocity = if dt > 0.0 {
                prev.distance_to(&pose) / dt
            } else {
                0.0
            };
            let speed = pump_speed_for(velocity, &config.settings);
            if velocity > 0.0 && last_speed != Some(speed) {
                match pump.adjust_speed(config.motor_address, speed).await {
                    Ok(true) => last_speed = Some(speed),
                    Ok(false) => warn!(
                        "Motor {} refused speed {}",
                        config.motor_address, speed
                    ),
                    Err(e) => {
                        return PumpWorkerResult {
                            success: false,
                            progress_point_index: progress.reached(),
                            error: Some(format!("speed adjust failed: {}", e)),
                        }
                    }
                }
            }
        }
        last_sample = Some((pose, now));

        if progress.is_complete() {
            info!("Pump worker reached final point {}", progress.reached());
            return PumpWorkerResult {
                success: true,
                progress_point_index: progress.reached(),
                error: None,
            };
        }
    }
}

fn stops_worker(state: GlueProcessState) -> bool {
    state.is_interrupt() || state == GlueProcessState::Error
}

/// Take one last position sample so the reported index is current.
async fn early_exit(
    robot: &dyn RobotDriver,
    progress: &mut PathProgress,
    reason: &str,
) -> PumpWorkerResult {
    if let Ok(Some(pose)) = robot.current_position().await {
        progress.observe(&pose);
    }
    debug!(
        "Pump worker exiting early ({}) at point {}",
        reason,
        progress.reached()
    );
    PumpWorkerResult {
        success: false,
        progress_point_index: progress.reached(),
        error: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{line_path, MockMotor, MockRobot, MotorCall};

    fn points(n: usize) -> Arc<[RobotPose]> {
        line_path(n, 0.0, "Type A").points.into()
    }

    #[test]
    fn test_progress_advances_forward_only() {
        let pts = points(4);
        let mut progress = PathProgress::new(pts.clone(), 0, 1.0);
        assert_eq!(progress.observe(&pts[1]), 1);
        // back at the start: no regression
        assert_eq!(progress.observe(&pts[0]), 1);
        // skipped point 2 between samples
        assert_eq!(progress.observe(&pts[3]), 3);
        assert!(progress.is_complete());
    }

    #[test]
    fn test_progress_ignores_far_poses() {
        let pts = points(3);
        let mut progress = PathProgress::new(pts, 1, 1.0);
        assert_eq!(progress.observe(&RobotPose::new(15.0, 0.0, 0.0, 0.0, 0.0, 0.0)), 1);
        assert!(!progress.is_complete());
    }

    #[test]
    fn test_progress_start_index_is_clamped() {
        let progress = PathProgress::new(points(3), 10, 1.0);
        assert_eq!(progress.reached(), 2);
        assert!(progress.is_complete());
    }

    #[test]
    fn test_pump_speed_for_velocity() {
        let settings = SegmentSettings {
            glue_speed_coefficient: 10.0,
            motor_speed: 5_000,
            ..Default::default()
        };
        assert_eq!(pump_speed_for(0.0, &settings), 0);
        assert_eq!(pump_speed_for(120.0, &settings), 1_200);
        assert_eq!(pump_speed_for(1_000.0, &settings), 5_000);
    }

    fn spawn(
        robot: &MockRobot,
        motor: &Arc<MockMotor>,
        state_rx: watch::Receiver<GlueProcessState>,
        pts: Arc<[RobotPose]>,
    ) -> PumpWorkerHandle {
        let pump = Arc::new(PumpController::new(
            motor.clone(),
            true,
            SegmentSettings::default(),
        ));
        PumpWorkerHandle::spawn(
            PumpWorkerConfig {
                points: pts,
                start_index: 0,
                motor_address: 2,
                settings: SegmentSettings::default(),
                tick: Duration::from_millis(1),
            },
            Arc::new(robot.clone()),
            pump,
            state_rx,
        )
    }

    #[tokio::test]
    async fn test_worker_runs_to_last_point() {
        let robot = MockRobot::new(Duration::from_millis(3));
        let motor = Arc::new(MockMotor::default());
        let (_state_tx, state_rx) = watch::channel(GlueProcessState::WaitForPathCompletion);
        let pts = points(4);

        let mut worker = spawn(&robot, &motor, state_rx, pts.clone());
        assert!(worker.wait_ready(Duration::from_secs(1)).await);
        robot
            .execute_path(&pts, Default::default(), false)
            .await
            .unwrap();

        match worker.join(Duration::from_secs(2)).await {
            WorkerExit::Finished(result) => {
                assert!(result.success);
                assert_eq!(result.progress_point_index, 3);
                assert!(result.error.is_none());
            }
            other => panic!("unexpected exit: {:?}", other),
        }
        assert!(motor.count(|c| matches!(c, MotorCall::Adjust { address: 2, .. })) > 0);
    }

    #[tokio::test]
    async fn test_worker_exits_on_pause_with_progress() {
        let robot = MockRobot::new(Duration::from_millis(3));
        let motor = Arc::new(MockMotor::default());
        let (state_tx, state_rx) = watch::channel(GlueProcessState::WaitForPathCompletion);
        let pts = points(4);
        robot.hold_at(pts[2]);

        let worker = spawn(&robot, &motor, state_rx, pts.clone());
        robot
            .execute_path(&pts, Default::default(), false)
            .await
            .unwrap();
        robot.wait_hold_reached().await;
        state_tx.send_replace(GlueProcessState::Paused);

        match worker.join(Duration::from_secs(1)).await {
            WorkerExit::Finished(result) => {
                assert!(!result.success);
                assert_eq!(result.progress_point_index, 2);
            }
            other => panic!("unexpected exit: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_worker_cancel() {
        let robot = MockRobot::new(Duration::from_millis(3));
        let motor = Arc::new(MockMotor::default());
        let (_state_tx, state_rx) = watch::channel(GlueProcessState::WaitForPathCompletion);

        let worker = spawn(&robot, &motor, state_rx, points(5));
        worker.cancel();
        match worker.join(Duration::from_secs(1)).await {
            WorkerExit::Finished(result) => {
                assert!(!result.success);
                assert_eq!(result.progress_point_index, 0);
            }
            other => panic!("unexpected exit: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_worker_reports_adjust_failure() {
        let robot = MockRobot::new(Duration::from_millis(3));
        let motor = Arc::new(MockMotor::default());
        motor.fail_with_error(true);
        let (_state_tx, state_rx) = watch::channel(GlueProcessState::WaitForPathCompletion);
        let pts = points(6);

        let worker = spawn(&robot, &motor, state_rx, pts.clone());
        robot
            .execute_path(&pts, Default::default(), false)
            .await
            .unwrap();
        match worker.join(Duration::from_secs(2)).await {
            WorkerExit::Finished(result) => {
                assert!(!result.success);
                assert!(result.error.unwrap().contains("speed adjust failed"));
            }
            other => panic!("unexpected exit: {:?}", other),
        }
    }
}

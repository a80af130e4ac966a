// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Recording drivers for unit tests.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;

use crate::driver::{DriverFuture, MotionCode, MotionParams, MotorDriver, MotorHealth, RobotDriver};
use crate::path::{GluePath, RobotPose};
use crate::settings::SegmentSettings;

#[derive(Debug, Clone, PartialEq)]
pub enum MotorCall {
    On {
        address: u16,
        speed: u32,
        ramp_steps: u32,
        initial_ramp_speed: u32,
    },
    Off {
        address: u16,
        reverse_speed: u32,
        ramp_steps: u32,
    },
    Adjust {
        address: u16,
        speed: u32,
    },
    GeneratorOn,
    GeneratorOff,
}

#[derive(Default)]
pub struct MockMotor {
    calls: Mutex<Vec<MotorCall>>,
    error: AtomicBool,
    refuse: AtomicBool,
    on_delay: Mutex<Option<Duration>>,
    on_entered: Notify,
}

impl MockMotor {
    pub fn fail_with_error(&self, on: bool) {
        self.error.store(on, Ordering::SeqCst);
    }

    pub fn refuse(&self, on: bool) {
        self.refuse.store(on, Ordering::SeqCst);
    }

    /// Make `motor_on` take `delay` before it is recorded, like a ramp.
    pub fn delay_motor_on(&self, delay: Duration) {
        *self.on_delay.lock().unwrap() = Some(delay);
    }

    /// Resolves once a `motor_on` call has begun.
    pub async fn wait_motor_on(&self) {
        self.on_entered.notified().await;
    }

    pub fn calls(&self) -> Vec<MotorCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&MotorCall) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| pred(c)).count()
    }

    fn record(&self, call: MotorCall) -> crate::DynResult<bool> {
        self.calls.lock().unwrap().push(call);
        if self.error.load(Ordering::SeqCst) {
            return Err("modbus timeout".into());
        }
        Ok(!self.refuse.load(Ordering::SeqCst))
    }
}

impl MotorDriver for MockMotor {
    fn motor_on<'a>(
        &'a self,
        address: u16,
        speed: u32,
        ramp_steps: u32,
        initial_ramp_speed: u32,
        _ramp_duration: f64,
    ) -> DriverFuture<'a, bool> {
        let delay = *self.on_delay.lock().unwrap();
        Box::pin(async move {
            self.on_entered.notify_one();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            self.record(MotorCall::On {
                address,
                speed,
                ramp_steps,
                initial_ramp_speed,
            })
        })
    }

    fn motor_off<'a>(
        &'a self,
        address: u16,
        reverse_speed: u32,
        _reverse_time: f64,
        ramp_steps: u32,
    ) -> DriverFuture<'a, bool> {
        let res = self.record(MotorCall::Off {
            address,
            reverse_speed,
            ramp_steps,
        });
        Box::pin(async move { res })
    }

    fn adjust_speed<'a>(&'a self, address: u16, speed: u32) -> DriverFuture<'a, bool> {
        let res = self.record(MotorCall::Adjust { address, speed });
        Box::pin(async move { res })
    }

    fn motor_state<'a>(&'a self, address: u16) -> DriverFuture<'a, MotorHealth> {
        Box::pin(async move { Ok(MotorHealth::healthy(address)) })
    }

    fn generator_on<'a>(&'a self) -> DriverFuture<'a, bool> {
        let res = self.record(MotorCall::GeneratorOn);
        Box::pin(async move { res })
    }

    fn generator_off<'a>(&'a self) -> DriverFuture<'a, bool> {
        let res = self.record(MotorCall::GeneratorOff);
        Box::pin(async move { res })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RobotCall {
    MoveTo(RobotPose),
    ExecutePath(Vec<RobotPose>),
    Stop,
}

struct RobotInner {
    position: Mutex<Option<RobotPose>>,
    calls: Mutex<Vec<RobotCall>>,
    epoch: AtomicU64,
    move_code: AtomicI32,
    move_error: AtomicBool,
    path_error: AtomicBool,
    stay_put: AtomicBool,
    hang_positions: AtomicBool,
    path_delay: Mutex<Option<Duration>>,
    path_entered: Notify,
    hold_at: Mutex<Option<RobotPose>>,
    hold_reached: Notify,
    step: Duration,
}

/// Robot that walks queued trajectories one point per `step`.
#[derive(Clone)]
pub struct MockRobot {
    inner: Arc<RobotInner>,
}

impl MockRobot {
    pub fn new(step: Duration) -> Self {
        Self {
            inner: Arc::new(RobotInner {
                position: Mutex::new(Some(RobotPose::default())),
                calls: Mutex::new(Vec::new()),
                epoch: AtomicU64::new(0),
                move_code: AtomicI32::new(0),
                move_error: AtomicBool::new(false),
                path_error: AtomicBool::new(false),
                stay_put: AtomicBool::new(false),
                hang_positions: AtomicBool::new(false),
                path_delay: Mutex::new(None),
                path_entered: Notify::new(),
                hold_at: Mutex::new(None),
                hold_reached: Notify::new(),
                step,
            }),
        }
    }

    pub fn calls(&self) -> Vec<RobotCall> {
        self.inner.calls.lock().unwrap().clone()
    }

    pub fn executed_paths(&self) -> Vec<Vec<RobotPose>> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                RobotCall::ExecutePath(points) => Some(points),
                _ => None,
            })
            .collect()
    }

    pub fn moves(&self) -> Vec<RobotPose> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                RobotCall::MoveTo(pose) => Some(pose),
                _ => None,
            })
            .collect()
    }

    pub fn set_move_code(&self, code: i32) {
        self.inner.move_code.store(code, Ordering::SeqCst);
    }

    pub fn fail_move_with_error(&self, on: bool) {
        self.inner.move_error.store(on, Ordering::SeqCst);
    }

    pub fn fail_path_with_error(&self, on: bool) {
        self.inner.path_error.store(on, Ordering::SeqCst);
    }

    /// Accept move commands without changing the reported position.
    pub fn stay_put(&self, on: bool) {
        self.inner.stay_put.store(on, Ordering::SeqCst);
    }

    /// Position queries never resolve while set.
    pub fn hang_position_queries(&self, on: bool) {
        self.inner.hang_positions.store(on, Ordering::SeqCst);
    }

    /// Make `execute_path` take `delay` before the trajectory starts.
    pub fn delay_execute_path(&self, delay: Duration) {
        *self.inner.path_delay.lock().unwrap() = Some(delay);
    }

    /// Resolves once an `execute_path` call has begun.
    pub async fn wait_execute_path(&self) {
        self.inner.path_entered.notified().await;
    }

    /// Freeze the next trajectory once it reaches `pose`, until stopped.
    pub fn hold_at(&self, pose: RobotPose) {
        *self.inner.hold_at.lock().unwrap() = Some(pose);
    }

    pub async fn wait_hold_reached(&self) {
        self.inner.hold_reached.notified().await;
    }

    pub fn position(&self) -> Option<RobotPose> {
        *self.inner.position.lock().unwrap()
    }
}

impl RobotDriver for MockRobot {
    fn move_to<'a>(
        &'a self,
        pose: RobotPose,
        _params: MotionParams,
    ) -> DriverFuture<'a, MotionCode> {
        Box::pin(async move {
            self.inner.calls.lock().unwrap().push(RobotCall::MoveTo(pose));
            if self.inner.move_error.load(Ordering::SeqCst) {
                return Err("robot connection lost".into());
            }
            let code = MotionCode(self.inner.move_code.load(Ordering::SeqCst));
            if code.is_success() && !self.inner.stay_put.load(Ordering::SeqCst) {
                *self.inner.position.lock().unwrap() = Some(pose);
            }
            Ok(code)
        })
    }

    fn execute_path<'a>(
        &'a self,
        points: &'a [RobotPose],
        _params: MotionParams,
        _blocking: bool,
    ) -> DriverFuture<'a, MotionCode> {
        Box::pin(async move {
            self.inner
                .calls
                .lock()
                .unwrap()
                .push(RobotCall::ExecutePath(points.to_vec()));
            if self.inner.path_error.load(Ordering::SeqCst) {
                return Err("trajectory rejected".into());
            }
            self.inner.path_entered.notify_one();
            let delay = *self.inner.path_delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let inner = self.inner.clone();
            let points = points.to_vec();
            let epoch = inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::spawn(async move {
                for point in points {
                    tokio::time::sleep(inner.step).await;
                    if inner.epoch.load(Ordering::SeqCst) != epoch {
                        return;
                    }
                    *inner.position.lock().unwrap() = Some(point);
                    let hold = {
                        let mut hold_at = inner.hold_at.lock().unwrap();
                        if *hold_at == Some(point) {
                            hold_at.take()
                        } else {
                            None
                        }
                    };
                    if hold.is_some() {
                        inner.hold_reached.notify_one();
                        while inner.epoch.load(Ordering::SeqCst) == epoch {
                            tokio::time::sleep(inner.step).await;
                        }
                        return;
                    }
                }
            });
            Ok(MotionCode::OK)
        })
    }

    fn current_position<'a>(&'a self) -> DriverFuture<'a, Option<RobotPose>> {
        Box::pin(async move {
            if self.inner.hang_positions.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            Ok(*self.inner.position.lock().unwrap())
        })
    }

    fn stop_motion<'a>(&'a self) -> DriverFuture<'a, ()> {
        Box::pin(async move {
            self.inner.calls.lock().unwrap().push(RobotCall::Stop);
            self.inner.epoch.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }
}

/// Straight path along +x with `n` points spaced 10 mm apart.
pub fn line_path(n: usize, y: f64, glue_type: &str) -> GluePath {
    let points = (0..n)
        .map(|i| RobotPose::new(i as f64 * 10.0, y, 0.0, 180.0, 0.0, 0.0))
        .collect();
    GluePath::new(
        points,
        SegmentSettings {
            glue_type: glue_type.to_string(),
            ..Default::default()
        },
    )
}

/// Context wired to mock drivers, with cell "Type A" on motor 2 and
/// "Type B" on motor 4.
pub fn context_with(
    robot: Arc<MockRobot>,
    motor: Arc<MockMotor>,
    policy: crate::process::policies::DispensingPolicy,
) -> crate::process::context::ExecutionContext {
    let pump = Arc::new(crate::pump::PumpController::new(
        motor,
        policy.use_segment_settings,
        SegmentSettings::default(),
    ));
    let cells = Arc::new(
        crate::settings::GlueCellMap::new(0)
            .with_cell("Type A", 2)
            .with_cell("Type B", 4),
    );
    crate::process::context::ExecutionContext::new(
        robot,
        pump,
        cells,
        policy,
        Arc::new(crate::operation::OperationStatus::default()),
    )
}

// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Simulated robot and pump board.
//!
//! Motion and motor state live in memory. No controller or Modbus link is
//! needed, which makes these the drivers for bench runs and tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use glue_core::driver::DriverFuture;
use glue_core::{MotionCode, MotionParams, MotorDriver, MotorHealth, RobotDriver, RobotPose};
use tracing::{debug, warn};

/// Rejected trajectory (empty or containing non-finite coordinates).
pub const CODE_BAD_TRAJECTORY: MotionCode = MotionCode(14);

struct RobotShared {
    position: Mutex<RobotPose>,
    // bumped under the position lock by every new command and by stop
    epoch: AtomicU64,
    moving: AtomicBool,
}

/// Robot that moves in straight lines at a fixed TCP speed.
///
/// Each `tick` the pose advances by at most `speed * tick` towards the
/// next waypoint. A new command or `stop_motion` abandons the current one.
#[derive(Clone)]
pub struct SimRobot {
    shared: Arc<RobotShared>,
    speed_mm_s: f64,
    tick: Duration,
}

impl SimRobot {
    pub fn new(home: RobotPose, speed_mm_s: f64, tick: Duration) -> Self {
        Self {
            shared: Arc::new(RobotShared {
                position: Mutex::new(home),
                epoch: AtomicU64::new(0),
                moving: AtomicBool::new(false),
            }),
            speed_mm_s,
            tick,
        }
    }

    pub fn position(&self) -> RobotPose {
        *self
            .shared
            .position
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_moving(&self) -> bool {
        self.shared.moving.load(Ordering::SeqCst)
    }

    fn start_motion(&self, waypoints: Vec<RobotPose>, velocity_pct: f64) {
        let epoch = self.shared.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let shared = self.shared.clone();
        let tick = self.tick;
        let scale = (velocity_pct / 100.0).clamp(0.01, 1.0);
        let max_step = self.speed_mm_s * scale * tick.as_secs_f64();
        shared.moving.store(true, Ordering::SeqCst);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick);
            ticker.tick().await;
            for target in waypoints {
                loop {
                    ticker.tick().await;
                    let mut pos = shared.position.lock().unwrap_or_else(PoisonError::into_inner);
                    if shared.epoch.load(Ordering::SeqCst) != epoch {
                        return;
                    }
                    *pos = step_towards(&pos, &target, max_step);
                    if *pos == target {
                        break;
                    }
                }
            }
            if shared.epoch.load(Ordering::SeqCst) == epoch {
                shared.moving.store(false, Ordering::SeqCst);
            }
        });
    }
}

/// Advance `from` towards `to` by at most `max_step` millimetres. The
/// orientation is interpolated along with the position.
fn step_towards(from: &RobotPose, to: &RobotPose, max_step: f64) -> RobotPose {
    let distance = from.distance_to(to);
    if distance <= max_step || distance == 0.0 {
        return *to;
    }
    let f = max_step / distance;
    let lerp = |a: f64, b: f64| a + (b - a) * f;
    RobotPose::new(
        lerp(from.x, to.x),
        lerp(from.y, to.y),
        lerp(from.z, to.z),
        lerp(from.rx, to.rx),
        lerp(from.ry, to.ry),
        lerp(from.rz, to.rz),
    )
}

fn is_finite(pose: &RobotPose) -> bool {
    <[f64; 6]>::from(*pose).iter().all(|v| v.is_finite())
}

impl RobotDriver for SimRobot {
    fn move_to<'a>(
        &'a self,
        pose: RobotPose,
        params: MotionParams,
    ) -> DriverFuture<'a, MotionCode> {
        Box::pin(async move {
            if !is_finite(&pose) {
                return Ok(CODE_BAD_TRAJECTORY);
            }
            debug!("sim robot: move to {}", pose);
            self.start_motion(vec![pose], params.velocity);
            Ok(MotionCode::OK)
        })
    }

    fn execute_path<'a>(
        &'a self,
        points: &'a [RobotPose],
        params: MotionParams,
        _blocking: bool,
    ) -> DriverFuture<'a, MotionCode> {
        Box::pin(async move {
            if points.is_empty() || !points.iter().all(is_finite) {
                return Ok(CODE_BAD_TRAJECTORY);
            }
            debug!("sim robot: executing {} waypoints", points.len());
            self.start_motion(points.to_vec(), params.velocity);
            Ok(MotionCode::OK)
        })
    }

    fn current_position<'a>(&'a self) -> DriverFuture<'a, Option<RobotPose>> {
        Box::pin(async move { Ok(Some(self.position())) })
    }

    fn stop_motion<'a>(&'a self) -> DriverFuture<'a, ()> {
        Box::pin(async move {
            {
                let _pos = self
                    .shared
                    .position
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                self.shared.epoch.fetch_add(1, Ordering::SeqCst);
            }
            self.shared.moving.store(false, Ordering::SeqCst);
            debug!("sim robot: stopped at {}", self.position());
            Ok(())
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct SimMotor {
    speed: u32,
    running: bool,
}

/// Motor board with a fixed set of addresses and a shared generator.
///
/// Motors refuse to start while the generator is off. Unknown addresses
/// behave like a silent Modbus slave.
pub struct SimPump {
    motors: Mutex<HashMap<u16, SimMotor>>,
    generator: AtomicBool,
    max_speed: u32,
}

impl SimPump {
    pub fn new(addresses: &[u16], max_speed: u32) -> Self {
        Self {
            motors: Mutex::new(
                addresses
                    .iter()
                    .map(|a| (*a, SimMotor::default()))
                    .collect(),
            ),
            generator: AtomicBool::new(false),
            max_speed,
        }
    }

    pub fn generator_is_on(&self) -> bool {
        self.generator.load(Ordering::SeqCst)
    }

    pub fn is_running(&self, address: u16) -> bool {
        self.motor(address).is_some_and(|m| m.running)
    }

    pub fn speed(&self, address: u16) -> Option<u32> {
        self.motor(address).map(|m| m.speed)
    }

    fn motor(&self, address: u16) -> Option<SimMotor> {
        self.motors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&address)
            .copied()
    }

    fn update(
        &self,
        address: u16,
        f: impl FnOnce(&mut SimMotor) -> bool,
    ) -> glue_core::DynResult<bool> {
        let mut motors = self.motors.lock().unwrap_or_else(PoisonError::into_inner);
        let motor = motors
            .get_mut(&address)
            .ok_or_else(|| format!("no response from motor address {}", address))?;
        Ok(f(motor))
    }
}

impl MotorDriver for SimPump {
    fn motor_on<'a>(
        &'a self,
        address: u16,
        speed: u32,
        _ramp_steps: u32,
        _initial_ramp_speed: u32,
        _ramp_duration: f64,
    ) -> DriverFuture<'a, bool> {
        Box::pin(async move {
            if !self.generator_is_on() {
                warn!("sim pump: motor {} refused, generator is off", address);
                return Ok(false);
            }
            let max = self.max_speed;
            self.update(address, |m| {
                if speed > max {
                    return false;
                }
                m.speed = speed;
                m.running = true;
                true
            })
        })
    }

    fn motor_off<'a>(
        &'a self,
        address: u16,
        _reverse_speed: u32,
        _reverse_time: f64,
        _ramp_steps: u32,
    ) -> DriverFuture<'a, bool> {
        Box::pin(async move {
            self.update(address, |m| {
                *m = SimMotor::default();
                true
            })
        })
    }

    fn adjust_speed<'a>(&'a self, address: u16, speed: u32) -> DriverFuture<'a, bool> {
        Box::pin(async move {
            let max = self.max_speed;
            self.update(address, |m| {
                if !m.running || speed > max {
                    return false;
                }
                m.speed = speed;
                true
            })
        })
    }

    fn motor_state<'a>(&'a self, address: u16) -> DriverFuture<'a, MotorHealth> {
        Box::pin(async move {
            Ok(match self.motor(address) {
                Some(_) => MotorHealth::healthy(address),
                None => MotorHealth {
                    address,
                    is_healthy: false,
                    errors: Vec::new(),
                    modbus_errors: vec![format!("no response from motor address {}", address)],
                },
            })
        })
    }

    fn generator_on<'a>(&'a self) -> DriverFuture<'a, bool> {
        Box::pin(async move {
            self.generator.store(true, Ordering::SeqCst);
            Ok(true)
        })
    }

    fn generator_off<'a>(&'a self) -> DriverFuture<'a, bool> {
        Box::pin(async move {
            self.generator.store(false, Ordering::SeqCst);
            let mut motors = self.motors.lock().unwrap_or_else(PoisonError::into_inner);
            for motor in motors.values_mut() {
                *motor = SimMotor::default();
            }
            Ok(true)
        })
    }
}

// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use glue_app::normalize_name;
use glue_core::{DynResult, MotorDriver, RobotDriver, RobotPose};

pub mod sim;

pub use sim::{SimPump, SimRobot};

/// Parameters for instantiating a robot driver.
#[derive(Debug, Clone, PartialEq)]
pub struct RobotAccess {
    /// Linear TCP speed in mm/s.
    pub speed_mm_s: f64,
    /// Interval between position updates.
    pub tick: Duration,
    /// Pose reported before the first motion.
    pub home: RobotPose,
}

impl Default for RobotAccess {
    fn default() -> Self {
        Self {
            speed_mm_s: 100.0,
            tick: Duration::from_millis(20),
            home: RobotPose::default(),
        }
    }
}

/// Parameters for instantiating a pump motor driver.
#[derive(Debug, Clone, PartialEq)]
pub struct PumpAccess {
    /// Motor addresses present on the board.
    pub addresses: Vec<u16>,
    /// Highest speed the board accepts.
    pub max_speed: u32,
}

impl Default for PumpAccess {
    fn default() -> Self {
        Self {
            addresses: vec![0, 2, 4, 6],
            max_speed: 20_000,
        }
    }
}

pub type RobotFactory = fn(&RobotAccess) -> DynResult<Arc<dyn RobotDriver>>;
pub type PumpFactory = fn(&PumpAccess) -> DynResult<Arc<dyn MotorDriver>>;

/// Named driver factories for robots and pump boards.
#[derive(Clone, Default)]
pub struct RegistrationContext {
    robots: HashMap<String, RobotFactory>,
    pumps: HashMap<String, PumpFactory>,
}

impl RegistrationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a robot factory under a stable name (e.g. "sim").
    pub fn register_robot(&mut self, name: &str, factory: RobotFactory) {
        self.robots.insert(normalize_name(name), factory);
    }

    pub fn register_pump(&mut self, name: &str, factory: PumpFactory) {
        self.pumps.insert(normalize_name(name), factory);
    }

    pub fn is_robot_registered(&self, name: &str) -> bool {
        self.robots.contains_key(&normalize_name(name))
    }

    pub fn is_pump_registered(&self, name: &str) -> bool {
        self.pumps.contains_key(&normalize_name(name))
    }

    pub fn registered_robots(&self) -> Vec<String> {
        sorted_keys(&self.robots)
    }

    pub fn registered_pumps(&self) -> Vec<String> {
        sorted_keys(&self.pumps)
    }

    pub fn build_robot(&self, name: &str, access: &RobotAccess) -> DynResult<Arc<dyn RobotDriver>> {
        let factory = self
            .robots
            .get(&normalize_name(name))
            .ok_or_else(|| format!("Unknown robot backend: {}", name))?;
        factory(access)
    }

    pub fn build_pump(&self, name: &str, access: &PumpAccess) -> DynResult<Arc<dyn MotorDriver>> {
        let factory = self
            .pumps
            .get(&normalize_name(name))
            .ok_or_else(|| format!("Unknown pump backend: {}", name))?;
        factory(access)
    }

    /// Merge another registration context into this one.
    pub fn extend_from(&mut self, other: &RegistrationContext) {
        self.robots
            .extend(other.robots.iter().map(|(k, f)| (k.clone(), *f)));
        self.pumps
            .extend(other.pumps.iter().map(|(k, f)| (k.clone(), *f)));
    }
}

fn sorted_keys<V>(map: &HashMap<String, V>) -> Vec<String> {
    let mut names: Vec<String> = map.keys().cloned().collect();
    names.sort();
    names
}

/// Register the built-in backends on a context.
pub fn register_builtin_backends_on(context: &mut RegistrationContext) {
    context.register_robot("sim", sim_robot_factory);
    context.register_pump("sim", sim_pump_factory);
}

fn sim_robot_factory(access: &RobotAccess) -> DynResult<Arc<dyn RobotDriver>> {
    if !(access.speed_mm_s.is_finite() && access.speed_mm_s > 0.0) {
        return Err(format!("sim robot speed must be positive, got {}", access.speed_mm_s).into());
    }
    if access.tick.is_zero() {
        return Err("sim robot tick must be non-zero".into());
    }
    Ok(Arc::new(SimRobot::new(access.home, access.speed_mm_s, access.tick)))
}

fn sim_pump_factory(access: &PumpAccess) -> DynResult<Arc<dyn MotorDriver>> {
    if access.addresses.is_empty() {
        return Err("sim pump needs at least one motor address".into());
    }
    Ok(Arc::new(SimPump::new(&access.addresses, access.max_speed)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builtin() -> RegistrationContext {
        let mut ctx = RegistrationContext::new();
        register_builtin_backends_on(&mut ctx);
        ctx
    }

    #[test]
    fn test_builtin_registration() {
        let ctx = builtin();
        assert_eq!(ctx.registered_robots(), vec!["sim".to_string()]);
        assert_eq!(ctx.registered_pumps(), vec!["sim".to_string()]);
        assert!(ctx.is_robot_registered("SIM"));
        assert!(!ctx.is_pump_registered("modbus"));
    }

    #[test]
    fn test_unknown_backend() {
        let ctx = builtin();
        let err = ctx
            .build_robot("fairino", &RobotAccess::default())
            .err()
            .unwrap();
        assert_eq!(err.to_string(), "Unknown robot backend: fairino");
        assert!(ctx.build_pump("modbus", &PumpAccess::default()).is_err());
    }

    #[test]
    fn test_factories_validate_access() {
        let ctx = builtin();
        let bad = RobotAccess {
            speed_mm_s: 0.0,
            ..RobotAccess::default()
        };
        assert!(ctx.build_robot("sim", &bad).is_err());
        let empty = PumpAccess {
            addresses: Vec::new(),
            ..PumpAccess::default()
        };
        assert!(ctx.build_pump("sim", &empty).is_err());
    }

    #[tokio::test]
    async fn test_build_sim_drivers() {
        let ctx = builtin();
        let robot = ctx.build_robot("Sim", &RobotAccess::default()).unwrap();
        assert_eq!(
            robot.current_position().await.unwrap(),
            Some(RobotPose::default())
        );
        let pump = ctx.build_pump("sim", &PumpAccess::default()).unwrap();
        assert!(pump.motor_state(2).await.unwrap().is_healthy);
    }

    #[test]
    fn test_extend_from() {
        let mut ctx = RegistrationContext::new();
        ctx.extend_from(&builtin());
        assert!(ctx.is_robot_registered("sim"));
        assert!(ctx.is_pump_registered("sim"));
    }
}

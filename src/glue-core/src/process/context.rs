// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Mutable record of one dispensing run.

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::driver::RobotDriver;
use crate::operation::OperationStatus;
use crate::path::GluePath;
use crate::pump::PumpController;
use crate::settings::{resolve_settings, MotorAddressResolver, ResolvedSettings};

use super::policies::DispensingPolicy;
use super::state::GlueProcessState;
use super::worker::PumpWorkerHandle;

/// Everything the handlers read and write during a run.
///
/// Exclusively borrowed by the run loop; the pump worker never touches it
/// and reports back through its [`PumpWorkerHandle`] instead.
pub struct ExecutionContext {
    pub run_id: Uuid,
    pub paths: Vec<GluePath>,
    pub spray_on: bool,
    pub current_path_index: usize,
    pub current_point_index: usize,
    pub current_path: Option<GluePath>,
    pub current_settings: Option<ResolvedSettings>,
    /// In-flight pump-adjustment worker, if any. Carries the ready handshake.
    pub pump_worker: Option<PumpWorkerHandle>,
    pub is_resuming: bool,
    pub operation_just_completed: bool,
    pub paused_from_state: Option<GlueProcessState>,
    pub motor_started: bool,
    pub generator_started: bool,
    pub last_error: Option<String>,

    pub robot: Arc<dyn RobotDriver>,
    pub pump_controller: Arc<PumpController>,
    pub resolver: Arc<dyn MotorAddressResolver>,
    pub policy: DispensingPolicy,
    pub status: Arc<OperationStatus>,
}

impl ExecutionContext {
    pub fn new(
        robot: Arc<dyn RobotDriver>,
        pump_controller: Arc<PumpController>,
        resolver: Arc<dyn MotorAddressResolver>,
        policy: DispensingPolicy,
        status: Arc<OperationStatus>,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            paths: Vec::new(),
            spray_on: false,
            current_path_index: 0,
            current_point_index: 0,
            current_path: None,
            current_settings: None,
            pump_worker: None,
            is_resuming: false,
            operation_just_completed: false,
            paused_from_state: None,
            motor_started: false,
            generator_started: false,
            last_error: None,
            robot,
            pump_controller,
            resolver,
            policy,
            status,
        }
    }

    /// Drop all run state. Shared drivers and the policy are kept.
    pub fn reset(&mut self) {
        if let Some(worker) = self.pump_worker.take() {
            warn!("Resetting context with a live pump worker, aborting it");
            worker.abort();
        }
        self.run_id = Uuid::new_v4();
        self.paths.clear();
        self.spray_on = false;
        self.current_path_index = 0;
        self.current_point_index = 0;
        self.current_path = None;
        self.current_settings = None;
        self.is_resuming = false;
        self.operation_just_completed = false;
        self.paused_from_state = None;
        self.motor_started = false;
        self.generator_started = false;
        self.last_error = None;
        self.status.set_active_settings(None);
    }

    /// Reset and load a fresh set of paths.
    pub fn setup(&mut self, paths: Vec<GluePath>, spray_on: bool) {
        self.reset();
        self.paths = paths;
        self.spray_on = spray_on;
        debug!(
            "Execution context {} loaded with {} paths (spray_on={})",
            self.run_id,
            self.paths.len(),
            spray_on
        );
    }

    pub fn save_progress(&mut self, path_index: usize, point_index: usize) {
        self.current_path_index = path_index;
        self.current_point_index = point_index;
    }

    /// A context is resumable once it carries paths.
    pub fn has_valid_context(&self) -> bool {
        !self.paths.is_empty()
    }

    pub fn path(&self, index: usize) -> Option<&GluePath> {
        self.paths.get(index)
    }

    pub fn motor_address(&self) -> Option<u16> {
        self.current_settings.as_ref().map(|s| s.motor_address)
    }

    /// Resolve the glue settings of path `index`.
    pub fn resolve_path_settings(&self, index: usize) -> Option<ResolvedSettings> {
        let path = self.paths.get(index)?;
        Some(resolve_settings(
            self.resolver.as_ref(),
            &path.settings,
            self.policy.default_motor_address,
        ))
    }

    /// Install settings and publish them so pause/stop can reach the pump.
    pub fn set_current_settings(&mut self, settings: Option<ResolvedSettings>) {
        self.status.set_active_settings(settings.clone());
        self.current_settings = settings;
    }

    pub fn record_error(&mut self, message: impl Into<String>) {
        self.last_error = Some(message.into());
    }

    /// JSON dump of the run. Worker handles are reduced to flags.
    pub fn to_debug_value(&self) -> serde_json::Value {
        json!({
            "run_id": self.run_id.to_string(),
            "paths": self.paths,
            "spray_on": self.spray_on,
            "current_path_index": self.current_path_index,
            "current_point_index": self.current_point_index,
            "current_settings": self.current_settings,
            "pump_worker_alive": self.pump_worker.as_ref().is_some_and(|w| w.is_alive()),
            "pump_ready": self.pump_worker.as_ref().is_some_and(|w| w.is_ready()),
            "is_resuming": self.is_resuming,
            "operation_just_completed": self.operation_just_completed,
            "paused_from_state": self.paused_from_state.map(|s| s.name()),
            "motor_started": self.motor_started,
            "generator_started": self.generator_started,
            "last_error": self.last_error,
        })
    }
}

/// Cursor update produced by a handler and applied in one step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HandlerResult {
    pub handled: bool,
    pub resume: bool,
    pub next_state: Option<GlueProcessState>,
    pub next_path_index: Option<usize>,
    pub next_point_index: Option<usize>,
    pub next_path: Option<GluePath>,
    pub next_settings: Option<ResolvedSettings>,
}

impl HandlerResult {
    pub fn to_state(state: GlueProcessState) -> Self {
        Self {
            handled: true,
            next_state: Some(state),
            ..Default::default()
        }
    }

    pub fn with_progress(mut self, path_index: usize, point_index: usize) -> Self {
        self.next_path_index = Some(path_index);
        self.next_point_index = Some(point_index);
        self
    }

    pub fn resuming(mut self) -> Self {
        self.resume = true;
        self
    }

    pub fn with_path(mut self, path: GluePath, settings: ResolvedSettings) -> Self {
        self.next_path = Some(path);
        self.next_settings = Some(settings);
        self
    }

    /// Write every populated field into `ctx` and yield the next state.
    pub fn apply(self, ctx: &mut ExecutionContext) -> Option<GlueProcessState> {
        if let Some(index) = self.next_path_index {
            ctx.current_path_index = index;
        }
        if let Some(index) = self.next_point_index {
            ctx.current_point_index = index;
        }
        if let Some(path) = self.next_path {
            ctx.current_path = Some(path);
        }
        if self.next_settings.is_some() {
            ctx.set_current_settings(self.next_settings);
        }
        if self.resume {
            ctx.is_resuming = true;
        }
        self.next_state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{context_with, line_path, MockMotor, MockRobot};
    use std::time::Duration;

    fn context() -> ExecutionContext {
        context_with(
            Arc::new(MockRobot::new(Duration::from_millis(1))),
            Arc::new(MockMotor::default()),
            DispensingPolicy::fast(),
        )
    }

    #[test]
    fn test_new_context_is_empty() {
        let ctx = context();
        assert!(!ctx.has_valid_context());
        assert_eq!(ctx.current_path_index, 0);
        assert_eq!(ctx.current_point_index, 0);
        assert!(ctx.pump_worker.is_none());
        assert!(!ctx.is_resuming);
    }

    #[test]
    fn test_setup_and_reset() {
        let mut ctx = context();
        ctx.setup(vec![line_path(3, 0.0, "Type A")], true);
        assert!(ctx.has_valid_context());
        assert!(ctx.spray_on);

        ctx.save_progress(0, 2);
        ctx.is_resuming = true;
        ctx.motor_started = true;
        ctx.record_error("boom");
        let first_run = ctx.run_id;

        ctx.reset();
        assert!(!ctx.has_valid_context());
        assert_eq!(ctx.current_point_index, 0);
        assert!(!ctx.is_resuming);
        assert!(!ctx.motor_started);
        assert!(ctx.last_error.is_none());
        assert_ne!(ctx.run_id, first_run);
    }

    #[test]
    fn test_resolve_path_settings() {
        let mut ctx = context();
        ctx.setup(
            vec![line_path(2, 0.0, "Type A"), line_path(2, 1.0, "Unknown")],
            true,
        );
        assert_eq!(ctx.resolve_path_settings(0).unwrap().motor_address, 2);
        assert_eq!(ctx.resolve_path_settings(1).unwrap().motor_address, 0);
        assert!(ctx.resolve_path_settings(2).is_none());
    }

    #[test]
    fn test_handler_result_apply() {
        let mut ctx = context();
        ctx.setup(vec![line_path(4, 0.0, "Type A")], true);
        let settings = ctx.resolve_path_settings(0).unwrap();

        let next = HandlerResult::to_state(GlueProcessState::Paused)
            .with_progress(0, 3)
            .with_path(ctx.paths[0].clone(), settings.clone())
            .resuming()
            .apply(&mut ctx);

        assert_eq!(next, Some(GlueProcessState::Paused));
        assert_eq!(ctx.current_point_index, 3);
        assert!(ctx.is_resuming);
        assert_eq!(ctx.motor_address(), Some(2));
        assert_eq!(ctx.status.active_settings(), Some(settings));
    }

    #[test]
    fn test_debug_value() {
        let mut ctx = context();
        ctx.setup(vec![line_path(2, 0.0, "Type A")], false);
        ctx.paused_from_state = Some(GlueProcessState::WaitForPathCompletion);
        let value = ctx.to_debug_value();
        assert_eq!(value["spray_on"], false);
        assert_eq!(value["paused_from_state"], "WAIT_FOR_PATH_COMPLETION");
        assert_eq!(value["pump_worker_alive"], false);
        assert_eq!(value["paths"][0]["points"][1][0], 10.0);
    }
}

// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Operation facade: start, pause, resume and stop a dispensing run.
//!
//! Every call returns an [`OperationResult`]; faults never cross this
//! boundary as errors or panics.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::driver::RobotDriver;
use crate::path::GluePath;
use crate::process::{
    DispensingPolicy, ExecutableStateMachine, ExecutionContext, GlueHandlers, GlueProcessState,
    ListenerId, ProcessListener,
};
use crate::pump::PumpController;
use crate::settings::{MotorAddressResolver, ResolvedSettings};

/// Result of a facade call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationResult {
    pub success: bool,
    pub message: String,
    pub error: Option<String>,
}

impl OperationResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            error: None,
        }
    }

    pub fn failure(message: impl Into<String>, error: Option<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            error,
        }
    }
}

/// Externally visible run status, shared between the facade and the run.
#[derive(Debug, Default)]
pub struct OperationStatus {
    completed: AtomicBool,
    stopped: AtomicBool,
    completions: AtomicU64,
    active_settings: Mutex<Option<ResolvedSettings>>,
}

impl OperationStatus {
    pub fn mark_completed(&self) {
        self.completed.store(true, Ordering::SeqCst);
        self.completions.fetch_add(1, Ordering::SeqCst);
    }

    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::SeqCst)
    }

    /// Number of runs that reached the final IDLE.
    pub fn completion_count(&self) -> u64 {
        self.completions.load(Ordering::SeqCst)
    }

    pub fn mark_stopped(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn was_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn begin_run(&self) {
        self.completed.store(false, Ordering::SeqCst);
        self.stopped.store(false, Ordering::SeqCst);
    }

    pub fn set_active_settings(&self, settings: Option<ResolvedSettings>) {
        *self
            .active_settings
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = settings;
    }

    /// Settings of the path being dispensed, if any.
    pub fn active_settings(&self) -> Option<ResolvedSettings> {
        self.active_settings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Glue-dispensing operation.
///
/// Owns one execution context and one state machine. `start` drives the
/// run loop to completion; `pause`, `resume` and `stop` may be called
/// concurrently from other tasks.
pub struct GlueDispensingOperation {
    machine: ExecutableStateMachine,
    context: tokio::sync::Mutex<ExecutionContext>,
    handlers: GlueHandlers,
    robot: Arc<dyn RobotDriver>,
    pump: Arc<PumpController>,
    status: Arc<OperationStatus>,
    loop_delay: Duration,
}

impl GlueDispensingOperation {
    pub fn new(
        robot: Arc<dyn RobotDriver>,
        pump: Arc<PumpController>,
        resolver: Arc<dyn MotorAddressResolver>,
        policy: DispensingPolicy,
    ) -> Self {
        let status = Arc::new(OperationStatus::default());
        let loop_delay = policy.loop_delay;
        let context = ExecutionContext::new(
            robot.clone(),
            pump.clone(),
            resolver,
            policy,
            status.clone(),
        );
        Self {
            machine: ExecutableStateMachine::new(
                GlueProcessState::Idle,
                crate::process::TransitionRules::glue_default(),
            ),
            context: tokio::sync::Mutex::new(context),
            handlers: GlueHandlers,
            robot,
            pump,
            status,
            loop_delay,
        }
    }

    pub fn state(&self) -> GlueProcessState {
        self.machine.state()
    }

    pub fn subscribe(&self) -> watch::Receiver<GlueProcessState> {
        self.machine.subscribe()
    }

    pub fn status(&self) -> &OperationStatus {
        &self.status
    }

    pub fn machine(&self) -> &ExecutableStateMachine {
        &self.machine
    }

    pub fn is_running(&self) -> bool {
        self.machine.is_running()
    }

    pub fn register_listener(&self, listener: Arc<dyn ProcessListener>) -> ListenerId {
        self.machine.register_listener(listener)
    }

    /// Run `paths` to completion.
    ///
    /// With `resume` set on a paused operation, the saved progress cursor is
    /// kept and `paths`/`spray_on` are ignored. Otherwise the call starts
    /// fresh.
    pub async fn start(
        &self,
        paths: Vec<GluePath>,
        spray_on: bool,
        resume: bool,
    ) -> OperationResult {
        let Ok(mut ctx) = self.context.try_lock() else {
            return OperationResult::failure("Operation already running", None);
        };
        if self.machine.is_running() {
            return OperationResult::failure("Operation already running", None);
        }

        self.status.begin_run();
        let state = self.machine.state();
        if resume && state == GlueProcessState::Paused && ctx.has_valid_context() {
            info!(
                "Resuming operation {} at path {} point {}",
                ctx.run_id, ctx.current_path_index, ctx.current_point_index
            );
            ctx.is_resuming = true;
            if !self.machine.transition(GlueProcessState::Starting) {
                return OperationResult::failure("Invalid state transition", None);
            }
        } else {
            if resume {
                warn!("No execution context to resume, starting fresh");
            }
            if paths.is_empty() {
                return OperationResult::failure("No paths to execute", None);
            }
            if state != GlueProcessState::Idle {
                return OperationResult::failure(format!("Cannot start from state {}", state), None);
            }
            ctx.setup(paths, spray_on);
            info!(
                "Starting operation {} with {} paths (spray_on={})",
                ctx.run_id,
                ctx.paths.len(),
                spray_on
            );
            if !self.machine.transition(GlueProcessState::Starting) {
                return OperationResult::failure("Invalid state transition", None);
            }
        }

        let outcome = self
            .machine
            .start_execution(&mut ctx, &self.handlers, self.loop_delay)
            .await;

        match outcome {
            Err(e) => {
                error!("Operation {} faulted: {}", ctx.run_id, e);
                ctx.record_error(e.to_string());
                if let Some(worker) = ctx.pump_worker.take() {
                    worker.abort();
                }
                self.machine.transition(GlueProcessState::Error);
                self.quiesce(&mut ctx).await;
                OperationResult::failure("Execution failed", Some(e.to_string()))
            }
            Ok(()) if self.machine.state() == GlueProcessState::Error => {
                self.quiesce(&mut ctx).await;
                OperationResult::failure("Execution failed", ctx.last_error.clone())
            }
            Ok(()) if self.status.was_stopped() => OperationResult::ok("Operation stopped"),
            Ok(()) if self.status.is_completed() => OperationResult::ok("Operation completed"),
            Ok(()) => OperationResult::ok(format!("Execution ended in {}", self.machine.state())),
        }
    }

    /// Pause the running operation. Pausing a paused operation resumes it.
    pub async fn pause(&self) -> OperationResult {
        let state = self.machine.state();
        if state == GlueProcessState::Paused {
            info!("Operation already paused, resuming");
            return self.resume().await;
        }
        if !self.machine.transition(GlueProcessState::Paused) {
            return OperationResult::failure(format!("Cannot pause from state {}", state), None);
        }
        info!("Operation paused in {}", state);
        self.halt_hardware().await;
        OperationResult::ok("Operation paused")
    }

    /// Continue a paused operation from its saved progress.
    pub async fn resume(&self) -> OperationResult {
        if self.machine.state() != GlueProcessState::Paused {
            return OperationResult::failure("Not in paused state", None);
        }
        if self.machine.is_running() {
            return if self.machine.transition(GlueProcessState::Starting) {
                info!("Operation resumed");
                OperationResult::ok("Operation resumed")
            } else {
                OperationResult::failure("Invalid state transition", None)
            };
        }

        let resumable = self
            .context
            .try_lock()
            .map(|ctx| ctx.has_valid_context())
            .unwrap_or(false);
        if !resumable {
            return OperationResult::failure("No execution context to resume", None);
        }
        self.start(Vec::new(), false, true).await
    }

    /// Stop the operation. The run loop winds down through COMPLETED.
    pub async fn stop(&self) -> OperationResult {
        let state = self.machine.state();
        if !self.machine.transition(GlueProcessState::Stopped) {
            return OperationResult::failure(format!("Cannot stop from state {}", state), None);
        }
        info!("Operation stopped in {}", state);
        self.status.mark_stopped();
        self.halt_hardware().await;

        if !self.machine.is_running() {
            // nobody drives STOPPED -> COMPLETED -> IDLE otherwise
            if let Ok(mut ctx) = self.context.try_lock() {
                if let Err(e) = self
                    .machine
                    .start_execution(&mut ctx, &self.handlers, self.loop_delay)
                    .await
                {
                    error!("Winding down stopped operation failed: {}", e);
                }
            }
        }
        OperationResult::ok("Operation stopped")
    }

    /// Leave ERROR through re-initialization.
    pub async fn reset(&self) -> OperationResult {
        let state = self.machine.state();
        if state != GlueProcessState::Error {
            return OperationResult::failure(format!("Cannot reset from state {}", state), None);
        }
        if !self.machine.transition(GlueProcessState::Initializing)
            || !self.machine.transition(GlueProcessState::Idle)
        {
            return OperationResult::failure("Invalid state transition", None);
        }
        if let Ok(mut ctx) = self.context.try_lock() {
            ctx.reset();
        }
        info!("Operation reset");
        OperationResult::ok("Operation reset")
    }

    /// Stop robot motion, pump and generator. Failures are logged only.
    async fn halt_hardware(&self) {
        if let Err(e) = self.robot.stop_motion().await {
            error!("Failed to stop robot motion: {}", e);
        }
        if let Some(settings) = self.status.active_settings() {
            self.pump
                .pump_off(settings.motor_address, &settings.segment)
                .await;
        }
        self.pump.generator_off().await;
    }

    async fn quiesce(&self, ctx: &mut ExecutionContext) {
        self.halt_hardware().await;
        ctx.motor_started = false;
        ctx.generator_started = false;
    }
}

// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Per-state handlers of the dispensing process.
//!
//! A handler returns the next state, or `None` to be called again on the
//! next loop iteration.

use std::future::Future;
use std::pin::Pin;

use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::path::{GluePath, RobotPose};

use super::context::{ExecutionContext, HandlerResult};
use super::error::ProcessError;
use super::machine::ExecutableStateMachine;
use super::state::GlueProcessState;
use super::worker::{PathProgress, PumpWorkerConfig, PumpWorkerHandle, WorkerExit};

pub type HandlerOutcome = Result<Option<GlueProcessState>, ProcessError>;

pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = HandlerOutcome> + Send + 'a>>;

/// Dispatch table from state to handler.
pub trait ProcessHandlers: Send + Sync {
    fn handle<'a>(
        &'a self,
        state: GlueProcessState,
        ctx: &'a mut ExecutionContext,
        machine: &'a ExecutableStateMachine,
    ) -> HandlerFuture<'a>;
}

/// Handlers of the glue-dispensing process.
#[derive(Debug, Clone, Copy, Default)]
pub struct GlueHandlers;

impl ProcessHandlers for GlueHandlers {
    fn handle<'a>(
        &'a self,
        state: GlueProcessState,
        ctx: &'a mut ExecutionContext,
        machine: &'a ExecutableStateMachine,
    ) -> HandlerFuture<'a> {
        use GlueProcessState::*;
        Box::pin(async move {
            match state {
                Idle => handle_idle(ctx, machine),
                Initializing => Ok(Some(Idle)),
                Starting => handle_starting(ctx),
                MovingToFirstPoint => handle_moving_to_first_point(ctx, machine).await,
                ExecutingPath => Ok(Some(PumpInitialBoost)),
                PumpInitialBoost => handle_pump_initial_boost(ctx, machine).await,
                StartingPumpAdjustmentThread => handle_start_pump_worker(ctx, machine).await,
                SendingPathPoints => handle_sending_path_points(ctx, machine).await,
                WaitForPathCompletion => handle_wait_for_path_completion(ctx, machine).await,
                TransitionBetweenPaths => handle_transition_between_paths(ctx).await,
                Paused => handle_paused(ctx).await,
                Stopped => handle_stopped(ctx).await,
                Error => handle_error(ctx, machine),
                Completed => handle_completed(ctx).await,
            }
        })
    }
}

fn fail(ctx: &mut ExecutionContext, message: String) -> HandlerOutcome {
    error!("{}", message);
    ctx.record_error(message);
    Ok(Some(GlueProcessState::Error))
}

fn current_path(ctx: &ExecutionContext) -> Result<GluePath, ProcessError> {
    ctx.current_path
        .clone()
        .ok_or(ProcessError::MissingPath(ctx.current_path_index))
}

/// PAUSED or STOPPED, when committed from outside the run loop.
fn interrupt_of(machine: &ExecutableStateMachine) -> Option<GlueProcessState> {
    Some(machine.state()).filter(|s| s.is_interrupt())
}

async fn halt_robot(ctx: &ExecutionContext) {
    if let Err(e) = ctx.robot.stop_motion().await {
        warn!("Failed to stop robot motion: {}", e);
    }
}

fn handle_idle(ctx: &mut ExecutionContext, machine: &ExecutableStateMachine) -> HandlerOutcome {
    if ctx.operation_just_completed {
        info!("Operation {} complete", ctx.run_id);
        ctx.status.mark_completed();
        machine.stop_execution();
    }
    Ok(None)
}

fn handle_starting(ctx: &mut ExecutionContext) -> HandlerOutcome {
    let index = ctx.current_path_index;
    let Some(path) = ctx.path(index).cloned() else {
        return fail(ctx, format!("No path at index {}", index));
    };
    if path.is_empty() {
        return fail(ctx, format!("Path {} has no points", index));
    }
    let Some(settings) = ctx.resolve_path_settings(index) else {
        return Err(ProcessError::MissingPath(index));
    };
    let point = path.clamp_index(ctx.current_point_index);
    info!(
        "Starting path {}/{} at point {} (glue '{}', motor {}{})",
        index + 1,
        ctx.paths.len(),
        point,
        settings.segment.glue_type,
        settings.motor_address,
        if ctx.is_resuming { ", resuming" } else { "" }
    );
    Ok(HandlerResult::to_state(GlueProcessState::MovingToFirstPoint)
        .with_progress(index, point)
        .with_path(path, settings)
        .apply(ctx))
}

enum Reach {
    Reached,
    Interrupted(GlueProcessState),
    TimedOut,
    Failed(String),
}

/// Poll the robot until it stands within `threshold` of `target`.
async fn wait_for_reach(
    ctx: &ExecutionContext,
    machine: &ExecutableStateMachine,
    target: RobotPose,
    threshold: f64,
) -> Reach {
    let deadline = Instant::now() + ctx.policy.reach_timeout;
    loop {
        let state = machine.state();
        if state.is_interrupt() {
            return Reach::Interrupted(state);
        }
        match ctx.robot.current_position().await {
            Ok(Some(pose)) if pose.is_within(&target, threshold) => return Reach::Reached,
            Ok(_) => {}
            Err(e) => return Reach::Failed(e.to_string()),
        }
        if Instant::now() >= deadline {
            return Reach::TimedOut;
        }
        tokio::time::sleep(ctx.policy.wait_poll_interval).await;
    }
}

async fn handle_moving_to_first_point(
    ctx: &mut ExecutionContext,
    machine: &ExecutableStateMachine,
) -> HandlerOutcome {
    let Some(settings) = ctx.current_settings.clone() else {
        return fail(ctx, "No settings resolved for current path".to_string());
    };
    let path = current_path(ctx)?;
    let index = path.clamp_index(ctx.current_point_index);
    let Some(target) = path.points.get(index).copied() else {
        return fail(ctx, format!("Path {} has no points", ctx.current_path_index));
    };

    debug!("Moving to point {} {}", index, target);
    match ctx.robot.move_to(target, ctx.policy.motion).await {
        Ok(code) if code.is_success() => {}
        Ok(code) => return fail(ctx, format!("Move to first point failed with code {}", code)),
        Err(e) => return fail(ctx, format!("Move to first point failed: {}", e)),
    }

    match wait_for_reach(ctx, machine, target, settings.segment.reach_start_threshold).await {
        Reach::Reached => {
            ctx.current_point_index = index;
            Ok(Some(GlueProcessState::ExecutingPath))
        }
        Reach::Interrupted(state) => {
            info!("Move to first point interrupted by {}", state);
            halt_robot(ctx).await;
            Ok(Some(state))
        }
        Reach::TimedOut => fail(
            ctx,
            format!(
                "Robot did not reach point {} within {:?}",
                index, ctx.policy.reach_timeout
            ),
        ),
        Reach::Failed(e) => fail(ctx, format!("Position query failed: {}", e)),
    }
}

async fn handle_pump_initial_boost(
    ctx: &mut ExecutionContext,
    machine: &ExecutableStateMachine,
) -> HandlerOutcome {
    if !ctx.spray_on || ctx.motor_started {
        return Ok(Some(GlueProcessState::StartingPumpAdjustmentThread));
    }
    let Some(settings) = ctx.current_settings.clone() else {
        return fail(ctx, "No motor address resolved for pump".to_string());
    };

    if !ctx.generator_started {
        let started = ctx.pump_controller.generator_on().await;
        if let Some(state) = interrupt_of(machine) {
            info!("{} while starting generator, turning it off again", state);
            ctx.pump_controller.generator_off().await;
            return Ok(Some(state));
        }
        if !started {
            return fail(ctx, "Generator failed to start".to_string());
        }
        ctx.generator_started = true;
    }

    // pump_on blocks for the ramp; pause or stop may have halted the
    // hardware in the meantime
    let pump_on = ctx
        .pump_controller
        .pump_on(settings.motor_address, &settings.segment)
        .await;
    if let Some(state) = interrupt_of(machine) {
        info!(
            "{} during pump boost, turning motor {} off again",
            state, settings.motor_address
        );
        if pump_on {
            ctx.pump_controller
                .pump_off(settings.motor_address, &settings.segment)
                .await;
        }
        ctx.pump_controller.generator_off().await;
        ctx.generator_started = false;
        return Ok(Some(state));
    }
    if !pump_on {
        return fail(
            ctx,
            format!("Pump on failed for motor {}", settings.motor_address),
        );
    }
    ctx.motor_started = true;
    Ok(Some(GlueProcessState::StartingPumpAdjustmentThread))
}

async fn handle_start_pump_worker(
    ctx: &mut ExecutionContext,
    machine: &ExecutableStateMachine,
) -> HandlerOutcome {
    if !(ctx.policy.adjust_pump_speed_while_spray && ctx.spray_on) {
        debug!("Pump speed adjustment disabled for this run");
        return Ok(Some(GlueProcessState::SendingPathPoints));
    }
    if ctx.pump_worker.as_ref().is_some_and(|w| w.is_alive()) {
        return Err(ProcessError::WorkerAlreadyActive);
    }
    let Some(settings) = ctx.current_settings.clone() else {
        return fail(ctx, "No motor address resolved for pump worker".to_string());
    };
    let path = current_path(ctx)?;

    let config = PumpWorkerConfig {
        points: path.points.into(),
        start_index: ctx.current_point_index,
        motor_address: settings.motor_address,
        settings: settings.segment,
        tick: ctx.policy.worker_tick,
    };
    let mut worker = PumpWorkerHandle::spawn(
        config,
        ctx.robot.clone(),
        ctx.pump_controller.clone(),
        machine.subscribe(),
    );
    if !worker.wait_ready(ctx.policy.pump_ready_timeout).await {
        warn!(
            "Pump worker not ready after {:?}, starting motion anyway",
            ctx.policy.pump_ready_timeout
        );
    }
    ctx.pump_worker = Some(worker);
    Ok(Some(GlueProcessState::SendingPathPoints))
}

async fn handle_sending_path_points(
    ctx: &mut ExecutionContext,
    machine: &ExecutableStateMachine,
) -> HandlerOutcome {
    let state = machine.state();
    if state.is_interrupt() {
        return Ok(Some(state));
    }
    let path = current_path(ctx)?;
    let start = ctx.current_point_index.min(path.len());
    let remaining = &path.points[start..];
    if remaining.is_empty() {
        warn!("Path {} has no points left to send", ctx.current_path_index);
        return Ok(Some(GlueProcessState::WaitForPathCompletion));
    }

    debug!(
        "Sending {} points of path {} from point {}",
        remaining.len(),
        ctx.current_path_index,
        start
    );
    match ctx
        .robot
        .execute_path(remaining, ctx.policy.motion, false)
        .await
    {
        Ok(code) if code.is_success() => {}
        Ok(code) => return fail(ctx, format!("Path execution failed with code {}", code)),
        Err(e) => return fail(ctx, format!("Path execution failed: {}", e)),
    }
    if let Some(state) = interrupt_of(machine) {
        info!("{} while sending path points, halting robot", state);
        halt_robot(ctx).await;
        return Ok(Some(state));
    }
    ctx.is_resuming = false;
    Ok(Some(GlueProcessState::WaitForPathCompletion))
}

/// Progress index from a worker that was asked to stop.
fn settled_index(exit: WorkerExit, fallback: usize, path: &GluePath) -> usize {
    match exit {
        WorkerExit::Finished(result) => path.clamp_index(result.progress_point_index),
        WorkerExit::Crashed(e) => {
            warn!("Pump worker crashed ({}), keeping point {}", e, fallback);
            fallback
        }
        WorkerExit::TimedOut => {
            warn!("Pump worker did not exit in time, keeping point {}", fallback);
            fallback
        }
    }
}

/// Cancel and join the live worker, persisting the progress it reports.
async fn settle_worker(ctx: &mut ExecutionContext) {
    let Some(worker) = ctx.pump_worker.take() else {
        return;
    };
    worker.cancel();
    let exit = worker.join(ctx.policy.worker_join_timeout).await;
    let fallback = ctx.current_point_index;
    if let Some(path) = ctx.current_path.as_ref() {
        ctx.current_point_index = settled_index(exit, fallback, path);
    }
}

async fn handle_wait_for_path_completion(
    ctx: &mut ExecutionContext,
    machine: &ExecutableStateMachine,
) -> HandlerOutcome {
    let path = current_path(ctx)?;
    match ctx.pump_worker.take() {
        Some(worker) => wait_on_worker(ctx, machine, worker, &path).await,
        None => wait_on_robot(ctx, machine, &path).await,
    }
}

async fn wait_on_worker(
    ctx: &mut ExecutionContext,
    machine: &ExecutableStateMachine,
    worker: PumpWorkerHandle,
    path: &GluePath,
) -> HandlerOutcome {
    let path_index = ctx.current_path_index;
    let timeout = ctx.policy.worker_join_timeout;
    let deadline = Instant::now() + ctx.policy.path_completion_timeout;

    loop {
        let state = machine.state();
        if state.is_interrupt() {
            worker.cancel();
            let point = settled_index(worker.join(timeout).await, ctx.current_point_index, path);
            info!("{} at path {} point {}", state, path_index, point);
            return Ok(interrupted(state, path_index, point).apply(ctx));
        }
        if !worker.is_alive() {
            break;
        }
        if Instant::now() >= deadline {
            worker.cancel();
            let point = settled_index(worker.join(timeout).await, ctx.current_point_index, path);
            ctx.save_progress(path_index, point);
            return fail(
                ctx,
                format!(
                    "Pump worker did not finish path {} within {:?}",
                    path_index, ctx.policy.path_completion_timeout
                ),
            );
        }
        tokio::time::sleep(ctx.policy.wait_poll_interval).await;
    }

    let result = match worker.join(timeout).await {
        WorkerExit::Finished(result) => result,
        WorkerExit::Crashed(e) => return fail(ctx, format!("Pump worker crashed: {}", e)),
        WorkerExit::TimedOut => return fail(ctx, "Pump worker did not finish".to_string()),
    };
    let point = path.clamp_index(result.progress_point_index);
    if let Some(e) = result.error {
        ctx.save_progress(path_index, point);
        return fail(ctx, format!("Pump worker failed: {}", e));
    }

    let state = machine.state();
    if state.is_interrupt() {
        return Ok(interrupted(state, path_index, point).apply(ctx));
    }
    if !result.success {
        ctx.save_progress(path_index, point);
        return fail(
            ctx,
            format!("Pump worker stopped early at point {}", point),
        );
    }
    debug!("Path {} complete at point {}", path_index, point);
    Ok(
        HandlerResult::to_state(GlueProcessState::TransitionBetweenPaths)
            .with_progress(path_index, point)
            .apply(ctx),
    )
}

/// Without a worker, follow the robot alone until the last point.
async fn wait_on_robot(
    ctx: &mut ExecutionContext,
    machine: &ExecutableStateMachine,
    path: &GluePath,
) -> HandlerOutcome {
    let path_index = ctx.current_path_index;
    let threshold = ctx
        .current_settings
        .as_ref()
        .map_or(path.settings.reach_end_threshold, |s| {
            s.segment.reach_end_threshold
        });
    let mut progress = PathProgress::new(
        path.points.clone().into(),
        ctx.current_point_index,
        threshold,
    );
    let deadline = Instant::now() + ctx.policy.path_completion_timeout;

    loop {
        let state = machine.state();
        let position = ctx.robot.current_position().await;
        match position {
            Ok(Some(pose)) => {
                progress.observe(&pose);
            }
            Ok(None) => {}
            Err(e) => return fail(ctx, format!("Position query failed: {}", e)),
        }
        if state.is_interrupt() {
            let point = path.clamp_index(progress.reached());
            info!("{} at path {} point {}", state, path_index, point);
            return Ok(interrupted(state, path_index, point).apply(ctx));
        }
        if progress.is_complete() {
            return Ok(
                HandlerResult::to_state(GlueProcessState::TransitionBetweenPaths)
                    .with_progress(path_index, path.clamp_index(progress.reached()))
                    .apply(ctx),
            );
        }
        if Instant::now() >= deadline {
            return fail(
                ctx,
                format!(
                    "Path {} did not complete within {:?}",
                    path_index, ctx.policy.path_completion_timeout
                ),
            );
        }
        tokio::time::sleep(ctx.policy.wait_poll_interval).await;
    }
}

fn interrupted(state: GlueProcessState, path_index: usize, point: usize) -> HandlerResult {
    let result = HandlerResult::to_state(state).with_progress(path_index, point);
    if state == GlueProcessState::Paused {
        result.resuming()
    } else {
        result
    }
}

async fn handle_transition_between_paths(ctx: &mut ExecutionContext) -> HandlerOutcome {
    if ctx.policy.turn_off_pump_between_paths && ctx.spray_on && ctx.motor_started {
        let Some(settings) = ctx.current_settings.clone() else {
            return Err("pump is running without a resolved motor address".into());
        };
        ctx.pump_controller
            .pump_off(settings.motor_address, &settings.segment)
            .await;
        ctx.motor_started = false;
    }

    let mut next = ctx.current_path_index + 1;
    while ctx.path(next).is_some_and(|p| p.is_empty()) {
        warn!("Skipping empty path {}", next);
        next += 1;
    }
    if next >= ctx.paths.len() {
        info!("All {} paths dispensed", ctx.paths.len());
        ctx.save_progress(ctx.paths.len(), 0);
        return Ok(Some(GlueProcessState::Completed));
    }

    let path = ctx.paths[next].clone();
    let settings = ctx
        .resolve_path_settings(next)
        .ok_or(ProcessError::MissingPath(next))?;

    // A pump left running must not keep dispensing from another cell.
    if ctx.motor_started && ctx.motor_address() != Some(settings.motor_address) {
        if let Some(old) = ctx.current_settings.clone() {
            ctx.pump_controller
                .pump_off(old.motor_address, &old.segment)
                .await;
        }
        ctx.motor_started = false;
    }

    info!("Advancing to path {}/{}", next + 1, ctx.paths.len());
    Ok(
        HandlerResult::to_state(GlueProcessState::MovingToFirstPoint)
            .with_progress(next, 0)
            .with_path(path, settings)
            .apply(ctx),
    )
}

async fn handle_paused(ctx: &mut ExecutionContext) -> HandlerOutcome {
    settle_worker(ctx).await;
    ctx.is_resuming = true;
    // pause turned pump and generator off
    ctx.motor_started = false;
    ctx.generator_started = false;
    Ok(None)
}

async fn handle_stopped(ctx: &mut ExecutionContext) -> HandlerOutcome {
    settle_worker(ctx).await;
    ctx.motor_started = false;
    ctx.generator_started = false;
    Ok(Some(GlueProcessState::Completed))
}

fn handle_error(ctx: &mut ExecutionContext, machine: &ExecutableStateMachine) -> HandlerOutcome {
    if let Some(worker) = ctx.pump_worker.take() {
        worker.abort();
    }
    error!(
        "Process halted in ERROR: {}",
        ctx.last_error.as_deref().unwrap_or("unknown error")
    );
    machine.stop_execution();
    Ok(None)
}

async fn handle_completed(ctx: &mut ExecutionContext) -> HandlerOutcome {
    if ctx.motor_started {
        if let Some(settings) = ctx.current_settings.clone() {
            ctx.pump_controller
                .pump_off(settings.motor_address, &settings.segment)
                .await;
        }
        ctx.motor_started = false;
    }
    if ctx.generator_started {
        ctx.pump_controller.generator_off().await;
        ctx.generator_started = false;
    }
    ctx.operation_just_completed = true;
    Ok(Some(GlueProcessState::Idle))
}

// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! The executable state machine: rule-checked transitions plus the run
//! loop that drives state handlers.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::context::ExecutionContext;
use super::error::ProcessError;
use super::events::{
    ContextSnapshot, ListenerId, ProcessEventEmitter, ProcessListener, PROCESS_STATE_TOPIC,
};
use super::handlers::ProcessHandlers;
use super::state::{GlueProcessState, TransitionRules};

/// Rule-checked state holder and run loop.
///
/// The current state lives in a watch channel so any number of observers
/// can read it or await changes. Transitions from the run loop and from
/// external pause/stop requests are serialized.
pub struct ExecutableStateMachine {
    state_tx: watch::Sender<GlueProcessState>,
    rules: TransitionRules,
    emitter: RwLock<ProcessEventEmitter>,
    transition_lock: Mutex<()>,
    stop_requested: AtomicBool,
    running: AtomicBool,
    transition_count: AtomicU64,
    stop_count: AtomicU64,
}

impl ExecutableStateMachine {
    pub fn new(initial: GlueProcessState, rules: TransitionRules) -> Self {
        let (state_tx, _) = watch::channel(initial);
        Self {
            state_tx,
            rules,
            emitter: RwLock::new(ProcessEventEmitter::new()),
            transition_lock: Mutex::new(()),
            stop_requested: AtomicBool::new(false),
            running: AtomicBool::new(false),
            transition_count: AtomicU64::new(0),
            stop_count: AtomicU64::new(0),
        }
    }

    pub fn builder() -> StateMachineBuilder {
        StateMachineBuilder::default()
    }

    pub fn state(&self) -> GlueProcessState {
        *self.state_tx.borrow()
    }

    /// Receiver that observes every committed state.
    pub fn subscribe(&self) -> watch::Receiver<GlueProcessState> {
        self.state_tx.subscribe()
    }

    pub fn rules(&self) -> &TransitionRules {
        &self.rules
    }

    pub fn can_transition(&self, to: GlueProcessState) -> bool {
        let from = self.state();
        from == to || self.rules.allows(from, to)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn transition_count(&self) -> u64 {
        self.transition_count.load(Ordering::Relaxed)
    }

    /// Number of `stop_execution` calls since construction.
    pub fn stop_count(&self) -> u64 {
        self.stop_count.load(Ordering::Relaxed)
    }

    pub fn register_listener(&self, listener: Arc<dyn ProcessListener>) -> ListenerId {
        self.emitter
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .register(listener)
    }

    pub fn unregister_listener(&self, id: ListenerId) {
        self.emitter
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .unregister(id);
    }

    /// Move to `to` if the rule table allows it.
    ///
    /// A transition to the current state is a no-op that succeeds without
    /// running hooks. A rejected transition leaves the state untouched.
    pub fn transition(&self, to: GlueProcessState) -> bool {
        self.commit(None, to)
    }

    /// Like [`transition`](Self::transition), but only while the machine is
    /// still in `expected`.
    pub fn transition_from(&self, expected: GlueProcessState, to: GlueProcessState) -> bool {
        self.commit(Some(expected), to)
    }

    fn commit(&self, expected: Option<GlueProcessState>, to: GlueProcessState) -> bool {
        let _guard = self
            .transition_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let from = self.state();
        if let Some(expected) = expected {
            if from != expected {
                debug!(
                    "Dropping {} -> {}: state changed to {} meanwhile",
                    expected, to, from
                );
                return false;
            }
        }
        if from == to {
            return true;
        }
        if !self.rules.allows(from, to) {
            warn!("Invalid transition {} -> {}", from, to);
            return false;
        }

        let emitter = self.emitter.read().unwrap_or_else(PoisonError::into_inner);
        emitter.notify_exit(from);
        self.state_tx.send_replace(to);
        self.transition_count.fetch_add(1, Ordering::Relaxed);
        emitter.notify_enter(to);
        emitter.notify_state_change(from, to);
        debug!(topic = PROCESS_STATE_TOPIC, "{} -> {}", from, to);
        true
    }

    /// Ask the run loop to exit after the current iteration.
    pub fn stop_execution(&self) {
        self.stop_count.fetch_add(1, Ordering::Relaxed);
        if !self.stop_requested.swap(true, Ordering::SeqCst) {
            debug!("Run loop stop requested");
        }
    }

    /// Drive `handlers` until [`stop_execution`](Self::stop_execution) is
    /// called, sleeping `delay` between iterations.
    ///
    /// Returns the first orchestration fault a handler raises.
    pub async fn start_execution(
        &self,
        ctx: &mut ExecutionContext,
        handlers: &dyn ProcessHandlers,
        delay: Duration,
    ) -> Result<(), ProcessError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ProcessError::AlreadyRunning);
        }
        let _running = RunningGuard(&self.running);
        self.stop_requested.store(false, Ordering::SeqCst);
        info!("Run loop {} started in {}", ctx.run_id, self.state());

        let mut last_seen: Option<GlueProcessState> = None;
        loop {
            if self.stop_requested.load(Ordering::SeqCst) {
                break;
            }
            let current = self.state();
            if last_seen != Some(current) {
                if current == GlueProcessState::Paused {
                    if let Some(prev) = last_seen.filter(|s| *s != GlueProcessState::Paused) {
                        ctx.paused_from_state = Some(prev);
                    }
                }
                self.emit_snapshot(ctx, current);
                last_seen = Some(current);
            }

            if let Some(next) = handlers.handle(current, ctx, self).await? {
                if next != current {
                    self.transition_from(current, next);
                }
            }

            if self.stop_requested.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(delay).await;
        }

        info!("Run loop {} stopped in {}", ctx.run_id, self.state());
        Ok(())
    }

    fn emit_snapshot(&self, ctx: &ExecutionContext, state: GlueProcessState) {
        let emitter = self.emitter.read().unwrap_or_else(PoisonError::into_inner);
        if emitter.listener_count() == 0 {
            return;
        }
        let snapshot = ContextSnapshot::enter(ctx.run_id, state, ctx.to_debug_value());
        emitter.notify_snapshot(&snapshot);
    }
}

struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Builder for [`ExecutableStateMachine`].
#[derive(Default)]
pub struct StateMachineBuilder {
    initial: Option<GlueProcessState>,
    rules: Option<TransitionRules>,
    listeners: Vec<Arc<dyn ProcessListener>>,
}

impl StateMachineBuilder {
    pub fn initial_state(mut self, state: GlueProcessState) -> Self {
        self.initial = Some(state);
        self
    }

    pub fn transition_rules(mut self, rules: TransitionRules) -> Self {
        self.rules = Some(rules);
        self
    }

    pub fn listener(mut self, listener: Arc<dyn ProcessListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Build the machine. Fails when the rule table leaves a non-terminal
    /// state without successors.
    pub fn build(self) -> Result<ExecutableStateMachine, String> {
        let rules = self.rules.unwrap_or_else(TransitionRules::glue_default);
        rules.validate()?;
        let machine =
            ExecutableStateMachine::new(self.initial.unwrap_or(GlueProcessState::Idle), rules);
        for listener in self.listeners {
            machine.register_listener(listener);
        }
        Ok(machine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::handlers::HandlerFuture;
    use crate::process::policies::DispensingPolicy;
    use crate::testing::{context_with, MockMotor, MockRobot};
    use GlueProcessState::*;

    fn machine() -> ExecutableStateMachine {
        ExecutableStateMachine::builder().build().unwrap()
    }

    fn context() -> ExecutionContext {
        context_with(
            Arc::new(MockRobot::new(Duration::from_millis(1))),
            Arc::new(MockMotor::default()),
            DispensingPolicy::fast(),
        )
    }

    #[test]
    fn test_initial_state() {
        let m = machine();
        assert_eq!(m.state(), Idle);
        assert_eq!(m.transition_count(), 0);
        assert!(!m.is_running());
    }

    #[test]
    fn test_transition_legality_matches_rules() {
        let rules = TransitionRules::glue_default();
        for from in GlueProcessState::ALL {
            for to in GlueProcessState::ALL {
                let m = ExecutableStateMachine::new(from, rules.clone());
                let ok = m.transition(to);
                if from == to {
                    assert!(ok);
                    assert_eq!(m.transition_count(), 0);
                } else {
                    assert_eq!(ok, rules.allows(from, to), "{} -> {}", from, to);
                }
                let expected = if ok { to } else { from };
                assert_eq!(m.state(), expected);
            }
        }
    }

    #[test]
    fn test_invalid_transition() {
        let m = machine();
        assert!(!m.transition(Completed));
        assert_eq!(m.state(), Idle);
        assert!(!m.can_transition(Paused));
    }

    #[test]
    fn test_transition_from_requires_expected_state() {
        let m = machine();
        assert!(m.transition(Starting));
        assert!(m.transition(Paused));
        assert!(!m.transition_from(Starting, MovingToFirstPoint));
        assert_eq!(m.state(), Paused);
    }

    #[test]
    fn test_builder_rejects_incomplete_rules() {
        let mut rules = TransitionRules::new();
        rules.allow(Idle, Starting);
        assert!(ExecutableStateMachine::builder()
            .transition_rules(rules)
            .build()
            .is_err());
    }

    #[derive(Default)]
    struct Hooks {
        log: Mutex<Vec<String>>,
    }

    impl ProcessListener for Hooks {
        fn on_state_exit(&self, state: GlueProcessState) {
            self.log.lock().unwrap().push(format!("{}_EXIT", state));
        }
        fn on_state_enter(&self, state: GlueProcessState) {
            self.log.lock().unwrap().push(format!("{}_ENTER", state));
        }
        fn on_snapshot(&self, snapshot: &ContextSnapshot) {
            self.log.lock().unwrap().push(format!("snap {}", snapshot.state));
        }
    }

    #[test]
    fn test_hooks_run_in_order() {
        let hooks = Arc::new(Hooks::default());
        let m = ExecutableStateMachine::builder()
            .listener(hooks.clone())
            .build()
            .unwrap();
        assert!(m.transition(Starting));
        assert!(!m.transition(Idle));
        assert_eq!(
            *hooks.log.lock().unwrap(),
            vec!["IDLE_EXIT", "STARTING_ENTER"]
        );
    }

    #[tokio::test]
    async fn test_subscribers_see_transitions() {
        let m = machine();
        let mut rx = m.subscribe();
        assert!(m.transition(Starting));
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), Starting);
    }

    /// Walks IDLE -> INITIALIZING -> IDLE and stops on the second IDLE.
    struct Scripted {
        idle_visits: Mutex<u32>,
    }

    impl ProcessHandlers for Scripted {
        fn handle<'a>(
            &'a self,
            state: GlueProcessState,
            _ctx: &'a mut ExecutionContext,
            machine: &'a ExecutableStateMachine,
        ) -> HandlerFuture<'a> {
            Box::pin(async move {
                match state {
                    Idle => {
                        let mut visits = self.idle_visits.lock().unwrap();
                        *visits += 1;
                        if *visits == 1 {
                            Ok(Some(Initializing))
                        } else {
                            machine.stop_execution();
                            Ok(None)
                        }
                    }
                    Initializing => Ok(Some(Idle)),
                    other => Err(ProcessError::UnhandledState(other)),
                }
            })
        }
    }

    #[tokio::test]
    async fn test_run_loop_until_stop() {
        let hooks = Arc::new(Hooks::default());
        let m = ExecutableStateMachine::builder()
            .listener(hooks.clone())
            .build()
            .unwrap();
        let mut ctx = context();
        let handlers = Scripted {
            idle_visits: Mutex::new(0),
        };

        m.start_execution(&mut ctx, &handlers, Duration::from_millis(1))
            .await
            .unwrap();

        assert_eq!(m.state(), Idle);
        assert_eq!(m.transition_count(), 2);
        assert_eq!(m.stop_count(), 1);
        assert!(!m.is_running());
        let log = hooks.log.lock().unwrap();
        assert_eq!(log.first().map(String::as_str), Some("snap IDLE_ENTER"));
        assert!(log.contains(&"snap INITIALIZING_ENTER".to_string()));
    }

    #[tokio::test]
    async fn test_run_loop_propagates_fault() {
        let m = ExecutableStateMachine::new(Completed, TransitionRules::glue_default());
        let mut ctx = context();
        let handlers = Scripted {
            idle_visits: Mutex::new(0),
        };
        let err = m
            .start_execution(&mut ctx, &handlers, Duration::from_millis(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::UnhandledState(Completed)));
        assert!(!m.is_running());
    }

    #[test]
    fn test_stop_execution_is_idempotent() {
        let m = machine();
        m.stop_execution();
        m.stop_execution();
        assert_eq!(m.stop_count(), 2);
        assert_eq!(m.state(), Idle);
    }
}

// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Process event notification.
//!
//! Listeners observe state transitions and context snapshots. Hooks are
//! side-effect slots only: they run after the validity check and cannot
//! veto or redirect a transition.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::state::GlueProcessState;

/// Topic every committed transition is published on.
pub const PROCESS_STATE_TOPIC: &str = "PROCESS_STATE";

/// Unique identifier for a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Point-in-time dump of the execution context for postmortem inspection.
#[derive(Debug, Clone, Serialize)]
pub struct ContextSnapshot {
    pub timestamp: DateTime<Utc>,
    pub run_id: Uuid,
    /// `<STATE>_ENTER` or `<STATE>_EXIT`.
    pub state: String,
    pub context: serde_json::Value,
}

impl ContextSnapshot {
    pub fn enter(run_id: Uuid, state: GlueProcessState, context: serde_json::Value) -> Self {
        Self {
            timestamp: Utc::now(),
            run_id,
            state: format!("{}_ENTER", state),
            context,
        }
    }
}

/// Components that want to observe the dispensing process.
///
/// All methods default to no-ops.
pub trait ProcessListener: Send + Sync {
    fn on_state_exit(&self, _state: GlueProcessState) {}

    fn on_state_enter(&self, _state: GlueProcessState) {}

    /// Called once per committed transition, after the enter hook.
    fn on_state_change(&self, _old: GlueProcessState, _new: GlueProcessState) {}

    fn on_snapshot(&self, _snapshot: &ContextSnapshot) {}
}

/// Manages registered listeners and dispatches events.
#[derive(Default)]
pub struct ProcessEventEmitter {
    listeners: Vec<(ListenerId, Arc<dyn ProcessListener>)>,
}

impl ProcessEventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, listener: Arc<dyn ProcessListener>) -> ListenerId {
        let id = ListenerId::new();
        self.listeners.push((id, listener));
        id
    }

    pub fn unregister(&mut self, id: ListenerId) {
        self.listeners.retain(|(lid, _)| *lid != id);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn notify_exit(&self, state: GlueProcessState) {
        for (_, listener) in &self.listeners {
            listener.on_state_exit(state);
        }
    }

    pub fn notify_enter(&self, state: GlueProcessState) {
        for (_, listener) in &self.listeners {
            listener.on_state_enter(state);
        }
    }

    pub fn notify_state_change(&self, old: GlueProcessState, new: GlueProcessState) {
        for (_, listener) in &self.listeners {
            listener.on_state_change(old, new);
        }
    }

    pub fn notify_snapshot(&self, snapshot: &ContextSnapshot) {
        for (_, listener) in &self.listeners {
            listener.on_snapshot(snapshot);
        }
    }
}

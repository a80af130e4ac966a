// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Process states and the transition rule table.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Named states of a glue-dispensing run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GlueProcessState {
    Idle,
    Initializing,
    Starting,
    MovingToFirstPoint,
    ExecutingPath,
    PumpInitialBoost,
    StartingPumpAdjustmentThread,
    SendingPathPoints,
    WaitForPathCompletion,
    TransitionBetweenPaths,
    Paused,
    Stopped,
    Error,
    Completed,
}

impl GlueProcessState {
    pub const ALL: [GlueProcessState; 14] = [
        Self::Idle,
        Self::Initializing,
        Self::Starting,
        Self::MovingToFirstPoint,
        Self::ExecutingPath,
        Self::PumpInitialBoost,
        Self::StartingPumpAdjustmentThread,
        Self::SendingPathPoints,
        Self::WaitForPathCompletion,
        Self::TransitionBetweenPaths,
        Self::Paused,
        Self::Stopped,
        Self::Error,
        Self::Completed,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Initializing => "INITIALIZING",
            Self::Starting => "STARTING",
            Self::MovingToFirstPoint => "MOVING_TO_FIRST_POINT",
            Self::ExecutingPath => "EXECUTING_PATH",
            Self::PumpInitialBoost => "PUMP_INITIAL_BOOST",
            Self::StartingPumpAdjustmentThread => "STARTING_PUMP_ADJUSTMENT_THREAD",
            Self::SendingPathPoints => "SENDING_PATH_POINTS",
            Self::WaitForPathCompletion => "WAIT_FOR_PATH_COMPLETION",
            Self::TransitionBetweenPaths => "TRANSITION_BETWEEN_PATHS",
            Self::Paused => "PAUSED",
            Self::Stopped => "STOPPED",
            Self::Error => "ERROR",
            Self::Completed => "COMPLETED",
        }
    }

    /// States without a regular successor.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Error | Self::Completed)
    }

    /// States that belong to an active run and can be paused or stopped.
    pub fn is_in_flight(self) -> bool {
        matches!(
            self,
            Self::Starting
                | Self::MovingToFirstPoint
                | Self::ExecutingPath
                | Self::PumpInitialBoost
                | Self::StartingPumpAdjustmentThread
                | Self::SendingPathPoints
                | Self::WaitForPathCompletion
                | Self::TransitionBetweenPaths
        )
    }

    /// Externally applied states a polling handler must yield to.
    pub fn is_interrupt(self) -> bool {
        matches!(self, Self::Paused | Self::Stopped)
    }
}

impl fmt::Display for GlueProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Legal successors of every state.
pub fn default_successors(state: GlueProcessState) -> &'static [GlueProcessState] {
    use GlueProcessState::*;
    match state {
        Idle => &[Starting, Initializing, Error],
        Initializing => &[Idle, Error],
        Starting => &[MovingToFirstPoint, Paused, Stopped, Error],
        MovingToFirstPoint => &[ExecutingPath, Paused, Stopped, Error],
        ExecutingPath => &[PumpInitialBoost, Paused, Stopped, Error],
        PumpInitialBoost => &[StartingPumpAdjustmentThread, Paused, Stopped, Error],
        StartingPumpAdjustmentThread => &[SendingPathPoints, Paused, Stopped, Error],
        SendingPathPoints => &[WaitForPathCompletion, Paused, Stopped, Error],
        WaitForPathCompletion => &[TransitionBetweenPaths, Paused, Stopped, Error],
        TransitionBetweenPaths => &[MovingToFirstPoint, Completed, Paused, Stopped, Error],
        Paused => &[Starting, Stopped, Error],
        Stopped => &[Completed, Error],
        Completed => &[Idle],
        Error => &[Initializing],
    }
}

/// Mapping `state -> allowed next states`, checked before every transition.
#[derive(Debug, Clone, Default)]
pub struct TransitionRules {
    table: HashMap<GlueProcessState, HashSet<GlueProcessState>>,
}

impl TransitionRules {
    /// An empty table; every transition is rejected.
    pub fn new() -> Self {
        Self::default()
    }

    /// The dispensing process table.
    pub fn glue_default() -> Self {
        let mut rules = Self::new();
        for from in GlueProcessState::ALL {
            for to in default_successors(from) {
                rules.allow(from, *to);
            }
        }
        rules
    }

    pub fn allow(&mut self, from: GlueProcessState, to: GlueProcessState) -> &mut Self {
        self.table.entry(from).or_default().insert(to);
        self
    }

    pub fn allows(&self, from: GlueProcessState, to: GlueProcessState) -> bool {
        self.table.get(&from).is_some_and(|next| next.contains(&to))
    }

    pub fn successors(&self, from: GlueProcessState) -> Vec<GlueProcessState> {
        let mut next: Vec<_> = self
            .table
            .get(&from)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default();
        next.sort_by_key(|s| s.name());
        next
    }

    /// Every non-terminal state must have at least one successor.
    pub fn validate(&self) -> Result<(), String> {
        for state in GlueProcessState::ALL {
            if state.is_terminal() {
                continue;
            }
            if self.table.get(&state).map_or(true, |s| s.is_empty()) {
                return Err(format!("state {} has no allowed successor", state));
            }
        }
        Ok(())
    }
}

// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use thiserror::Error;

use super::state::GlueProcessState;

/// Orchestration faults: conditions the handlers cannot map onto a
/// regular state transition.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("no path at index {0}")]
    MissingPath(usize),

    #[error("a pump adjustment worker is already active")]
    WorkerAlreadyActive,

    #[error("no handler for state {0}")]
    UnhandledState(GlueProcessState),

    #[error("state machine is already running")]
    AlreadyRunning,

    #[error("{0}")]
    Other(String),
}

impl From<String> for ProcessError {
    fn from(value: String) -> Self {
        Self::Other(value)
    }
}

impl From<&str> for ProcessError {
    fn from(value: &str) -> Self {
        Self::Other(value.to_string())
    }
}

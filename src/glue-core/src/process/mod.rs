// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Glue-dispensing process orchestration.
//!
//! - [`state`]: process states and the transition rule table
//! - [`machine`]: the executable state machine and its run loop
//! - [`context`]: the per-run execution context
//! - [`handlers`]: one handler per state
//! - [`worker`]: the pump-adjustment worker
//! - [`events`]: listeners for transitions and context snapshots
//! - [`policies`]: timings and feature switches

pub mod context;
pub mod error;
pub mod events;
pub mod handlers;
pub mod machine;
pub mod policies;
pub mod state;
pub mod worker;

pub use context::{ExecutionContext, HandlerResult};
pub use error::ProcessError;
pub use events::{
    ContextSnapshot, ListenerId, ProcessEventEmitter, ProcessListener, PROCESS_STATE_TOPIC,
};
pub use handlers::{GlueHandlers, HandlerFuture, ProcessHandlers};
pub use machine::{ExecutableStateMachine, StateMachineBuilder};
pub use policies::DispensingPolicy;
pub use state::{default_successors, GlueProcessState, TransitionRules};
pub use worker::{PathProgress, PumpWorkerConfig, PumpWorkerHandle, PumpWorkerResult, WorkerExit};

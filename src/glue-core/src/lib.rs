// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

pub mod driver;
pub mod operation;
pub mod path;
pub mod process;
pub mod pump;
pub mod settings;

#[cfg(test)]
mod testing;

pub type DynResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

pub use driver::{MotionCode, MotionParams, MotorDriver, MotorHealth, RobotDriver};
pub use operation::{GlueDispensingOperation, OperationResult, OperationStatus};
pub use path::{GluePath, RobotPose};
pub use process::{
    ContextSnapshot, DispensingPolicy, ExecutableStateMachine, GlueProcessState, ProcessError,
    ProcessListener, PROCESS_STATE_TOPIC,
};
pub use pump::PumpController;
pub use settings::{GlueCellMap, MotorAddressResolver, ResolvedSettings, SegmentSettings};

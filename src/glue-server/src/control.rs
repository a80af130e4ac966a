// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Operator commands read from stdin.

use std::io::BufRead;
use std::str::FromStr;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};

use glue_core::GlueDispensingOperation;

const STDIN_CHANNEL_BUFFER: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Pause,
    Resume,
    Stop,
    Status,
}

impl FromStr for Command {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pause" | "p" => Ok(Command::Pause),
            "resume" | "r" => Ok(Command::Resume),
            "stop" | "s" => Ok(Command::Stop),
            "status" | "?" => Ok(Command::Status),
            other => Err(format!(
                "Unknown command '{}' (expected pause, resume, stop or status)",
                other
            )),
        }
    }
}

pub async fn apply(op: &GlueDispensingOperation, command: Command) {
    let result = match command {
        Command::Pause => op.pause().await,
        Command::Resume => op.resume().await,
        Command::Stop => op.stop().await,
        Command::Status => {
            info!(
                "State {} (running: {}, completed runs: {})",
                op.state(),
                op.is_running(),
                op.status().completion_count()
            );
            return;
        }
    };
    if result.success {
        info!("{}", result.message);
    } else {
        warn!("{:?} rejected: {}", command, result.message);
    }
}

/// Forward stdin lines from a dedicated thread.
///
/// A blocking reader thread does not hold up runtime shutdown the way a
/// pending `tokio::io::stdin` read does.
pub fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(STDIN_CHANNEL_BUFFER);
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if tx.blocking_send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("Reading operator input failed: {}", e);
                    break;
                }
            }
        }
    });
    rx
}

/// Feed commands from `lines` to `op` until the sender goes away.
pub async fn run(op: Arc<GlueDispensingOperation>, mut lines: mpsc::Receiver<String>) {
    while let Some(line) = lines.recv().await {
        if line.trim().is_empty() {
            continue;
        }
        match line.parse::<Command>() {
            Ok(command) => apply(&op, command).await,
            Err(e) => warn!("{}", e),
        }
    }
}

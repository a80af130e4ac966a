// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Context snapshot dumps.
//!
//! Every snapshot becomes one pretty-printed JSON file under
//! `<dir>/<run_id>/`, named by sequence number and state so a directory
//! listing reads as the run's timeline. The listener only queues
//! snapshots; a writer task does the file I/O on the blocking pool.

use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use glue_core::{ContextSnapshot, ProcessListener};

const DUMP_QUEUE_SIZE: usize = 256;

pub struct DebugDumpListener {
    tx: mpsc::Sender<ContextSnapshot>,
}

impl DebugDumpListener {
    /// Start the writer task. It drains the queue and exits once the
    /// listener is dropped.
    pub fn spawn(base_dir: impl Into<PathBuf>) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(DUMP_QUEUE_SIZE);
        let writer = DumpWriter {
            base_dir: base_dir.into(),
            seq: 0,
        };
        (Self { tx }, tokio::spawn(writer.run(rx)))
    }
}

impl ProcessListener for DebugDumpListener {
    fn on_snapshot(&self, snapshot: &ContextSnapshot) {
        if let Err(e) = self.tx.try_send(snapshot.clone()) {
            warn!("Debug dump dropped {} snapshot: {}", snapshot.state, e);
        }
    }
}

struct DumpWriter {
    base_dir: PathBuf,
    seq: u64,
}

impl DumpWriter {
    async fn run(mut self, mut rx: mpsc::Receiver<ContextSnapshot>) {
        while let Some(snapshot) = rx.recv().await {
            let path = self.file_path(&snapshot);
            self.seq += 1;
            match tokio::task::spawn_blocking(move || write_snapshot(&path, &snapshot)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Debug dump failed: {}", e),
                Err(e) => warn!("Debug dump task failed: {}", e),
            }
        }
    }

    fn file_path(&self, snapshot: &ContextSnapshot) -> PathBuf {
        self.base_dir
            .join(snapshot.run_id.to_string())
            .join(format!(
                "{:05}_{}_{}.json",
                self.seq,
                stamp(&snapshot.timestamp),
                snapshot.state
            ))
    }
}

fn write_snapshot(path: &Path, snapshot: &ContextSnapshot) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        create_dir_all(parent)
            .map_err(|e| format!("create debug dir '{}': {}", parent.display(), e))?;
    }
    let file =
        File::create(path).map_err(|e| format!("open debug dump '{}': {}", path.display(), e))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, snapshot)
        .map_err(|e| format!("encode debug dump '{}': {}", path.display(), e))?;
    writer
        .flush()
        .map_err(|e| format!("write debug dump '{}': {}", path.display(), e))
}

fn stamp(ts: &DateTime<Utc>) -> String {
    ts.format("%Y%m%dT%H%M%S%.3f").to_string()
}

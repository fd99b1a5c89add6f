//! Sinks for training-progress records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use trainsharp_core::{Phase, Result};

/// Metrics observed at one point of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub phase: Phase,
    pub epoch: usize,
    pub step: usize,
    pub metrics: BTreeMap<String, f64>,
    pub timestamp: DateTime<Utc>,
}

impl Record {
    pub fn new(phase: Phase, epoch: usize, step: usize) -> Self {
        Self {
            phase,
            epoch,
            step,
            metrics: BTreeMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(name.into(), value);
        self
    }
}

/// Receives progress records from a training loop.
pub trait Monitor {
    fn log(&mut self, record: &Record) -> Result<()>;
}

/// Emits each record as a structured `tracing` event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingMonitor;

impl Monitor for TracingMonitor {
    fn log(&mut self, record: &Record) -> Result<()> {
        tracing::info!(
            phase = %record.phase,
            epoch = record.epoch,
            step = record.step,
            metrics = ?record.metrics,
            "Progress"
        );
        Ok(())
    }
}

/// Appends each record as one JSON line.
#[derive(Debug)]
pub struct JsonlMonitor {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl JsonlMonitor {
    /// Open `path` for appending, creating it and its parent directories.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Monitor for JsonlMonitor {
    fn log(&mut self, record: &Record) -> Result<()> {
        serde_json::to_writer(&mut self.writer, record)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}

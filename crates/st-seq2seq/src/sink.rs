// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Destinations for per-epoch metric records.

use crate::error::Seq2seqResult;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

/// Receives one flat metric map per epoch.
pub trait MetricsSink {
    fn log_metrics(&mut self, metrics: &BTreeMap<String, f64>) -> Seq2seqResult<()>;
}

/// Emits each record as a structured `tracing` event.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl MetricsSink for TracingSink {
    fn log_metrics(&mut self, metrics: &BTreeMap<String, f64>) -> Seq2seqResult<()> {
        let rendered = metrics
            .iter()
            .map(|(name, value)| format!("{name}={value:.4}"))
            .collect::<Vec<_>>()
            .join(" ");
        info!(target: "st_seq2seq::metrics", %rendered, "epoch metrics");
        Ok(())
    }
}

/// Keeps every record in memory.
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    pub records: Vec<BTreeMap<String, f64>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(&self) -> Option<&BTreeMap<String, f64>> {
        self.records.last()
    }
}

impl MetricsSink for MemorySink {
    fn log_metrics(&mut self, metrics: &BTreeMap<String, f64>) -> Seq2seqResult<()> {
        self.records.push(metrics.clone());
        Ok(())
    }
}

/// Appends one JSON object per line.
#[derive(Debug)]
pub struct JsonLinesSink {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl JsonLinesSink {
    pub fn create<P: AsRef<Path>>(path: P) -> Seq2seqResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MetricsSink for JsonLinesSink {
    fn log_metrics(&mut self, metrics: &BTreeMap<String, f64>) -> Seq2seqResult<()> {
        serde_json::to_writer(&mut self.writer, metrics)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}

impl<S: MetricsSink + ?Sized> MetricsSink for &mut S {
    fn log_metrics(&mut self, metrics: &BTreeMap<String, f64>) -> Seq2seqResult<()> {
        (**self).log_metrics(metrics)
    }
}

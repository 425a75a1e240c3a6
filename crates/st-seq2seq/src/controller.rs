// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Plateau-driven k annealing.

use crate::config::ControllerConfig;
use crate::error::{Seq2seqError, Seq2seqResult};
use crate::sparsity::SparsityHandle;
use std::collections::BTreeMap;
use tracing::info;

/// Outcome of one epoch-boundary observation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControllerDecision {
    Stable,
    Shrunk { from: usize, to: usize },
}

/// `max(1, floor(k * factor))`; never above `k`.
pub fn shrink_k(k: usize, factor: f64) -> usize {
    let scaled = (k as f64 * factor).floor();
    let next = if scaled >= 1.0 { scaled as usize } else { 1 };
    next.min(k)
}

/// Sole writer of the shared k during training.
#[derive(Debug)]
pub struct SparsityController {
    config: ControllerConfig,
    handle: SparsityHandle,
    best: f64,
    bad_epochs: usize,
}

impl SparsityController {
    pub fn new(config: ControllerConfig, handle: SparsityHandle) -> Seq2seqResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            handle,
            best: f64::NEG_INFINITY,
            bad_epochs: 0,
        })
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn best(&self) -> f64 {
        self.best
    }

    pub fn bad_epochs(&self) -> usize {
        self.bad_epochs
    }

    pub fn k(&self) -> usize {
        self.handle.get()
    }

    /// Feeds one epoch's value of the tracked metric. Only a strict
    /// improvement resets the bad-epoch counter.
    pub fn observe(&mut self, value: f64) -> ControllerDecision {
        if value > self.best {
            self.best = value;
            self.bad_epochs = 0;
        } else {
            self.bad_epochs += 1;
        }
        if self.bad_epochs < self.config.patience {
            return ControllerDecision::Stable;
        }
        self.bad_epochs = 0;
        let from = self.handle.get();
        let to = shrink_k(from, self.config.factor);
        self.handle.set(to);
        info!(from, to, metric = %self.config.metric, "k-sparsity plateau, shrinking k");
        ControllerDecision::Shrunk { from, to }
    }

    /// Reads the tracked metric from a completed evaluation pass.
    pub fn on_epoch_end(
        &mut self,
        eval_metrics: &BTreeMap<String, f64>,
    ) -> Seq2seqResult<ControllerDecision> {
        let value = eval_metrics
            .get(&self.config.metric)
            .copied()
            .ok_or_else(|| Seq2seqError::UnknownMetric(self.config.metric.clone()))?;
        Ok(self.observe(value))
    }
}

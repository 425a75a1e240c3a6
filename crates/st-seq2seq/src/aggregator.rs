// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::config::LossConfig;
use crate::error::{Seq2seqError, Seq2seqResult};
use crate::loss::{AttentionLoss, L1Loss, LossAccumulator, LossInput, NllLoss};
use std::collections::BTreeMap;

/// Weighted set of loss accumulators for one pass.
#[derive(Debug, Default)]
pub struct LossAggregator {
    entries: Vec<(Box<dyn LossAccumulator>, f32)>,
}

impl LossAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the objectives named by `config`: NLL first, then one L1 term
    /// per listed input, then the attention loss.
    pub fn from_config(config: &LossConfig) -> Self {
        let mut aggregator = Self::new();
        aggregator.push(Box::new(NllLoss::new(config.pad_id)), config.xent);
        for &input in &config.l1_inputs {
            aggregator.push(Box::new(L1Loss::new(input)), config.scale_l1);
        }
        if config.use_attention_loss {
            aggregator.push(Box::new(AttentionLoss::new()), config.scale_attention);
        }
        aggregator
    }

    pub fn push(&mut self, loss: Box<dyn LossAccumulator>, weight: f32) {
        self.entries.push((loss, weight));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Feeds one batch to every objective.
    pub fn eval_batch(&mut self, input: &LossInput<'_>) -> Seq2seqResult<()> {
        for (loss, _) in &mut self.entries {
            loss.eval_batch(input)?;
        }
        Ok(())
    }

    /// `Σ weight × normalised value`.
    pub fn weighted_total(&self) -> f64 {
        self.entries
            .iter()
            .map(|(loss, weight)| f64::from(*weight) * loss.get_loss())
            .sum()
    }

    /// Unweighted normalised value per objective, keyed by log name.
    pub fn values(&self) -> BTreeMap<String, f64> {
        self.entries
            .iter()
            .map(|(loss, _)| (loss.log_name(), loss.get_loss()))
            .collect()
    }

    pub fn get(&self, log_name: &str) -> Seq2seqResult<f64> {
        self.entries
            .iter()
            .find(|(loss, _)| loss.log_name() == log_name)
            .map(|(loss, _)| loss.get_loss())
            .ok_or_else(|| Seq2seqError::UnknownMetric(log_name.to_string()))
    }

    pub fn reset(&mut self) {
        for (loss, _) in &mut self.entries {
            loss.reset();
        }
    }
}

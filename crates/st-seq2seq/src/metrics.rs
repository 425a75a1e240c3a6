// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Greedy-decoding accuracy metrics.

use crate::batch::TokenBatch;
use crate::decoder::DecoderOutput;
use crate::error::{Seq2seqError, Seq2seqResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetricKind {
    #[serde(rename = "word_acc")]
    WordAccuracy,
    #[serde(rename = "seq_acc")]
    SequenceAccuracy,
    #[serde(rename = "target_acc")]
    FinalTargetAccuracy,
}

impl MetricKind {
    pub fn log_name(self) -> &'static str {
        match self {
            MetricKind::WordAccuracy => "word_acc",
            MetricKind::SequenceAccuracy => "seq_acc",
            MetricKind::FinalTargetAccuracy => "target_acc",
        }
    }

    pub fn from_log_name(name: &str) -> Seq2seqResult<Self> {
        match name {
            "word_acc" => Ok(MetricKind::WordAccuracy),
            "seq_acc" => Ok(MetricKind::SequenceAccuracy),
            "target_acc" => Ok(MetricKind::FinalTargetAccuracy),
            other => Err(Seq2seqError::UnknownMetric(other.to_string())),
        }
    }

    pub fn build(self, pad_id: Option<usize>, eos_id: usize) -> Box<dyn Metric> {
        match self {
            MetricKind::WordAccuracy => Box::new(WordAccuracy::new(pad_id)),
            MetricKind::SequenceAccuracy => Box::new(SequenceAccuracy::new(pad_id)),
            MetricKind::FinalTargetAccuracy => Box::new(FinalTargetAccuracy::new(pad_id, eos_id)),
        }
    }
}

/// Pass-scoped metric fed once per batch.
pub trait Metric: std::fmt::Debug {
    fn log_name(&self) -> &'static str;

    /// `targets` includes the leading SOS column; step `t` is compared with
    /// column `t + 1`.
    fn eval_batch(&mut self, output: &DecoderOutput, targets: &TokenBatch);

    /// Current value, `0` before anything was counted.
    fn get_val(&self) -> f64;

    fn reset(&mut self);
}

fn predicted(output: &DecoderOutput, step: usize, batch: usize) -> Option<usize> {
    output
        .side
        .sequence
        .get(step)
        .and_then(|symbols| symbols.get(batch))
        .copied()
}

/// Fraction of non-pad target tokens predicted correctly.
#[derive(Clone, Debug, Default)]
pub struct WordAccuracy {
    pad_id: Option<usize>,
    correct: usize,
    total: usize,
}

impl WordAccuracy {
    pub fn new(pad_id: Option<usize>) -> Self {
        Self {
            pad_id,
            ..Self::default()
        }
    }
}

impl Metric for WordAccuracy {
    fn log_name(&self) -> &'static str {
        MetricKind::WordAccuracy.log_name()
    }

    fn eval_batch(&mut self, output: &DecoderOutput, targets: &TokenBatch) {
        for b in 0..targets.batch() {
            for step in 0..targets.steps().saturating_sub(1) {
                let target = targets.get(b, step + 1);
                if Some(target) == self.pad_id {
                    continue;
                }
                self.total += 1;
                if predicted(output, step, b) == Some(target) {
                    self.correct += 1;
                }
            }
        }
    }

    fn get_val(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.correct as f64 / self.total as f64
        }
    }

    fn reset(&mut self) {
        self.correct = 0;
        self.total = 0;
    }
}

/// Fraction of sequences whose every non-pad target token was predicted.
#[derive(Clone, Debug, Default)]
pub struct SequenceAccuracy {
    pad_id: Option<usize>,
    correct: usize,
    total: usize,
}

impl SequenceAccuracy {
    pub fn new(pad_id: Option<usize>) -> Self {
        Self {
            pad_id,
            ..Self::default()
        }
    }
}

impl Metric for SequenceAccuracy {
    fn log_name(&self) -> &'static str {
        MetricKind::SequenceAccuracy.log_name()
    }

    fn eval_batch(&mut self, output: &DecoderOutput, targets: &TokenBatch) {
        for b in 0..targets.batch() {
            let matched = (0..targets.steps().saturating_sub(1)).all(|step| {
                let target = targets.get(b, step + 1);
                Some(target) == self.pad_id || predicted(output, step, b) == Some(target)
            });
            self.total += 1;
            if matched {
                self.correct += 1;
            }
        }
    }

    fn get_val(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.correct as f64 / self.total as f64
        }
    }

    fn reset(&mut self) {
        self.correct = 0;
        self.total = 0;
    }
}

/// Fraction of sequences whose last meaningful target token (neither pad nor
/// EOS) was predicted at its position. Sequences without such a token are
/// skipped.
#[derive(Clone, Debug, Default)]
pub struct FinalTargetAccuracy {
    pad_id: Option<usize>,
    eos_id: usize,
    correct: usize,
    total: usize,
}

impl FinalTargetAccuracy {
    pub fn new(pad_id: Option<usize>, eos_id: usize) -> Self {
        Self {
            pad_id,
            eos_id,
            ..Self::default()
        }
    }
}

impl Metric for FinalTargetAccuracy {
    fn log_name(&self) -> &'static str {
        MetricKind::FinalTargetAccuracy.log_name()
    }

    fn eval_batch(&mut self, output: &DecoderOutput, targets: &TokenBatch) {
        for b in 0..targets.batch() {
            let last = (1..targets.steps()).rev().find(|&column| {
                let target = targets.get(b, column);
                Some(target) != self.pad_id && target != self.eos_id
            });
            let Some(column) = last else {
                continue;
            };
            self.total += 1;
            if predicted(output, column - 1, b) == Some(targets.get(b, column)) {
                self.correct += 1;
            }
        }
    }

    fn get_val(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.correct as f64 / self.total as f64
        }
    }

    fn reset(&mut self) {
        self.correct = 0;
        self.total = 0;
    }
}

/// Metric values keyed by log name.
pub fn snapshot(metrics: &[Box<dyn Metric>]) -> BTreeMap<String, f64> {
    metrics
        .iter()
        .map(|metric| (metric.log_name().to_string(), metric.get_val()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::{DecodeMode, SideChannel};
    use approx::assert_abs_diff_eq;
    use st_nn::RecurrentState;
    use st_tensor::Tensor;

    fn output(sequence: Vec<Vec<usize>>) -> DecoderOutput {
        DecoderOutput {
            outputs: Vec::new(),
            hidden: RecurrentState {
                hidden: Tensor::zeros(1, 1).unwrap(),
                cell: None,
            },
            side: SideChannel {
                sequence,
                ..SideChannel::default()
            },
            mode: DecodeMode::Unrolled,
            teacher_forcing: false,
            projection_inputs: Vec::new(),
        }
    }

    #[test]
    fn accuracies_ignore_padding() {
        // pad = 0; targets include SOS = 1
        let targets = TokenBatch::new(2, 4, vec![1, 5, 6, 2, 1, 7, 2, 0]).unwrap();
        // step-major predictions: row 0 gets everything right, row 1 misses step 1
        let out = output(vec![vec![5, 7], vec![6, 3], vec![2, 9]]);
        let mut word = WordAccuracy::new(Some(0));
        let mut seq = SequenceAccuracy::new(Some(0));
        word.eval_batch(&out, &targets);
        seq.eval_batch(&out, &targets);
        assert_abs_diff_eq!(word.get_val(), 4.0 / 5.0);
        assert_abs_diff_eq!(seq.get_val(), 0.5);
    }

    #[test]
    fn short_predictions_count_as_wrong() {
        let targets = TokenBatch::new(1, 3, vec![1, 4, 2]).unwrap();
        let out = output(vec![vec![4]]);
        let mut seq = SequenceAccuracy::new(None);
        seq.eval_batch(&out, &targets);
        assert_eq!(seq.get_val(), 0.0);
        let metrics: Vec<Box<dyn Metric>> = vec![Box::new(seq)];
        assert_eq!(snapshot(&metrics)["seq_acc"], 0.0);
    }

    #[test]
    fn final_target_skips_eos_and_padding() {
        // pad = 0, eos = 2; last meaningful tokens are 6 (row 0) and 7 (row 1)
        let targets = TokenBatch::new(3, 4, vec![1, 5, 6, 2, 1, 7, 2, 0, 1, 2, 0, 0]).unwrap();
        // row 0 misses its first token but hits the final one, row 1 misses 7
        let out = output(vec![vec![9, 3, 2], vec![6, 2, 0], vec![2, 0, 0]]);
        let mut target = FinalTargetAccuracy::new(Some(0), 2);
        target.eval_batch(&out, &targets);
        assert_abs_diff_eq!(target.get_val(), 0.5);
        target.reset();
        assert_eq!(target.get_val(), 0.0);
    }

    #[test]
    fn log_names_round_trip() {
        for kind in [
            MetricKind::WordAccuracy,
            MetricKind::SequenceAccuracy,
            MetricKind::FinalTargetAccuracy,
        ] {
            assert_eq!(MetricKind::from_log_name(kind.log_name()).unwrap(), kind);
        }
        assert!(MetricKind::from_log_name("bleu").is_err());
    }
}

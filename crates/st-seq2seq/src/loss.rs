// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Pass-scoped loss accumulators.
//!
//! An accumulator is built fresh for every train or evaluation pass, fed once
//! per batch, and read once at the end of the pass. Accumulation is additive,
//! so batch order only affects floating-point summation order.

use crate::attention::AlignmentTarget;
use crate::batch::TokenBatch;
use crate::decoder::{DecoderOutput, SideChannel};
use crate::error::{Seq2seqError, Seq2seqResult};
use serde::{Deserialize, Serialize};
use st_tensor::Tensor;
use std::fmt;

/// Attention probabilities are clamped to this before taking the log.
pub const ATTENTION_CLAMP: f32 = 1e-20;

/// Everything a loss may read for one batch.
#[derive(Clone, Copy)]
pub struct LossInput<'a> {
    /// Per-step `(batch, vocab)` log-probabilities.
    pub outputs: &'a [Tensor],
    pub side: &'a SideChannel,
    /// Full target sequences including the leading SOS column.
    pub targets: &'a TokenBatch,
    pub alignment: Option<&'a AlignmentTarget>,
}

impl<'a> LossInput<'a> {
    pub fn new(
        output: &'a DecoderOutput,
        targets: &'a TokenBatch,
        alignment: Option<&'a AlignmentTarget>,
    ) -> Self {
        Self {
            outputs: &output.outputs,
            side: &output.side,
            targets,
            alignment,
        }
    }

    /// Number of decode steps that have a target token.
    pub fn scored_steps(&self) -> usize {
        self.outputs
            .len()
            .min(self.targets.steps().saturating_sub(1))
    }
}

/// Running `acc_loss / norm_term` pair. `acc_loss` stays `None` until the
/// first contribution so an untouched accumulator reads as zero.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Accumulated {
    acc_loss: Option<f64>,
    norm_term: f64,
}

impl Accumulated {
    pub fn add(&mut self, loss: f64, norm: f64) {
        *self.acc_loss.get_or_insert(0.0) += loss;
        self.norm_term += norm;
    }

    pub fn acc_loss(&self) -> Option<f64> {
        self.acc_loss
    }

    pub fn norm_term(&self) -> f64 {
        self.norm_term
    }

    pub fn value(&self) -> f64 {
        match self.acc_loss {
            Some(acc) if self.norm_term > 0.0 => acc / self.norm_term,
            _ => 0.0,
        }
    }
}

/// One training objective.
pub trait LossAccumulator: fmt::Debug {
    fn name(&self) -> &'static str;

    /// Key used when the value is logged.
    fn log_name(&self) -> String;

    /// Adds this batch's contribution.
    fn eval_batch(&mut self, input: &LossInput<'_>) -> Seq2seqResult<()>;

    fn state(&self) -> &Accumulated;

    fn reset(&mut self);

    /// Normalised loss, `0` when nothing has been accumulated.
    fn get_loss(&self) -> f64 {
        self.state().value()
    }
}

/// Token negative log-likelihood. Step `t` is scored against target column
/// `t + 1`; every step contributes its mean over non-pad rows and counts one
/// towards the normaliser.
#[derive(Clone, Debug, Default)]
pub struct NllLoss {
    pad_id: Option<usize>,
    state: Accumulated,
}

impl NllLoss {
    pub fn new(pad_id: Option<usize>) -> Self {
        Self {
            pad_id,
            state: Accumulated::default(),
        }
    }

    pub fn pad_id(&self) -> Option<usize> {
        self.pad_id
    }
}

impl LossAccumulator for NllLoss {
    fn name(&self) -> &'static str {
        "Avg NLLLoss"
    }

    fn log_name(&self) -> String {
        "nll_loss".to_string()
    }

    fn eval_batch(&mut self, input: &LossInput<'_>) -> Seq2seqResult<()> {
        for step in 0..input.scored_steps() {
            let log_probs = &input.outputs[step];
            let mut total = 0.0f64;
            let mut count = 0usize;
            for (b, row) in log_probs.iter_rows().enumerate() {
                let target = input.targets.get(b, step + 1);
                if Some(target) == self.pad_id {
                    continue;
                }
                let Some(&value) = row.get(target) else {
                    return Err(Seq2seqError::MalformedTarget(format!(
                        "target id {target} outside vocabulary of {}",
                        row.len()
                    )));
                };
                total -= f64::from(value);
                count += 1;
            }
            if count > 0 {
                self.state.add(total / count as f64, 1.0);
            }
        }
        Ok(())
    }

    fn state(&self) -> &Accumulated {
        &self.state
    }

    fn reset(&mut self) {
        self.state = Accumulated::default();
    }
}

/// Tensor an [`L1Loss`] penalises.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum L1Input {
    EncoderHidden,
    EncoderOutputs,
    ModelParameters,
}

impl L1Input {
    pub fn as_str(self) -> &'static str {
        match self {
            L1Input::EncoderHidden => "encoder_hidden",
            L1Input::EncoderOutputs => "encoder_outputs",
            L1Input::ModelParameters => "model_parameters",
        }
    }
}

/// Sum of absolute values of one side-channel tensor, normalised by its
/// leading dimension: state slots for the encoder hidden state, batch size
/// for encoder outputs, and one per batch for the model parameters.
#[derive(Clone, Debug)]
pub struct L1Loss {
    input: L1Input,
    state: Accumulated,
}

impl L1Loss {
    pub fn new(input: L1Input) -> Self {
        Self {
            input,
            state: Accumulated::default(),
        }
    }

    pub fn input(&self) -> L1Input {
        self.input
    }
}

impl LossAccumulator for L1Loss {
    fn name(&self) -> &'static str {
        "L1 Loss"
    }

    fn log_name(&self) -> String {
        format!("l1_loss_{}", self.input.as_str())
    }

    fn eval_batch(&mut self, input: &LossInput<'_>) -> Seq2seqResult<()> {
        let (sum, norm) = match self.input {
            L1Input::EncoderHidden => {
                let hidden = input
                    .side
                    .encoder_hidden
                    .as_ref()
                    .ok_or(Seq2seqError::MissingEncoderHidden)?;
                (hidden.hidden().l1_norm(), hidden.slots())
            }
            L1Input::EncoderOutputs => {
                let outputs = input
                    .side
                    .encoder_outputs
                    .as_ref()
                    .ok_or(Seq2seqError::MissingEncoderOutputs)?;
                (outputs.tensor().l1_norm(), outputs.batch())
            }
            L1Input::ModelParameters => {
                let params = input.side.model_parameters.as_ref().ok_or_else(|| {
                    Seq2seqError::Config("model parameters are not attached to the output".into())
                })?;
                (params.iter().map(Tensor::l1_norm).sum::<f32>(), 1)
            }
        };
        self.state.add(f64::from(sum), norm as f64);
        Ok(())
    }

    fn state(&self) -> &Accumulated {
        &self.state
    }

    fn reset(&mut self) {
        self.state = Accumulated::default();
    }
}

/// NLL of the recorded attention against the supplied alignment. Steps where
/// every row is ignored contribute nothing.
#[derive(Clone, Debug, Default)]
pub struct AttentionLoss {
    state: Accumulated,
}

impl AttentionLoss {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LossAccumulator for AttentionLoss {
    fn name(&self) -> &'static str {
        "Attention Loss"
    }

    fn log_name(&self) -> String {
        "attn_loss".to_string()
    }

    fn eval_batch(&mut self, input: &LossInput<'_>) -> Seq2seqResult<()> {
        let scores = input.side.attention_scores.as_ref().ok_or_else(|| {
            Seq2seqError::Config("attention loss needs recorded attention scores".into())
        })?;
        let alignment = input.alignment.ok_or(Seq2seqError::MissingAlignment)?;
        for (step, attention) in scores.iter().enumerate() {
            if alignment.batch() != attention.rows() {
                return Err(Seq2seqError::ShapeMismatch {
                    context: "attention loss batch",
                    expected: (attention.rows(), attention.cols()),
                    got: (alignment.batch(), alignment.steps()),
                });
            }
            let mut total = 0.0f64;
            let mut count = 0usize;
            for (b, row) in attention.iter_rows().enumerate() {
                let Some(position) = alignment.position(b, step, row.len()) else {
                    continue;
                };
                total -= f64::from(row[position].max(ATTENTION_CLAMP).ln());
                count += 1;
            }
            if count > 0 {
                self.state.add(total / count as f64, 1.0);
            }
        }
        Ok(())
    }

    fn state(&self) -> &Accumulated {
        &self.state
    }

    fn reset(&mut self) {
        self.state = Accumulated::default();
    }
}

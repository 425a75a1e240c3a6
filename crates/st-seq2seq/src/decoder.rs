// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Autoregressive decoder with unrolled and batched execution.
//!
//! A forward call picks its mode once. It unrolls step by step when attention
//! is placed before the recurrent cell, or when the teacher-forcing coin (one
//! draw per call) comes up false. Otherwise the shifted target sequence goes
//! through the recurrent stack in a single pass. Both modes issue the same
//! row-wise arithmetic, so with teacher forcing they agree bit for bit.

use crate::attention::{AlignmentTarget, AttentionMethod, AttentionModule, GuidedAlignment};
use crate::batch::TokenBatch;
use crate::config::{AttentionPlacement, DecoderConfig};
use crate::error::{Seq2seqError, Seq2seqResult};
use crate::sequence::{EncoderHidden, SequenceTensor};
use crate::sparsity::{SparsityGate, SparsityHandle, SparsityTarget};
use rand::rngs::StdRng;
use rand::Rng;
use spiral_config::determinism;
use st_nn::{
    CellKind, Embedding, Linear, Module, Parameter, Parameterised, PureResult, Recurrent,
    RecurrentState,
};
use st_tensor::Tensor;
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodeMode {
    Unrolled,
    Batched,
}

/// Per-call decoding knobs.
#[derive(Clone, Debug, Default)]
pub struct DecodeOptions {
    pub teacher_forcing_ratio: f32,
    /// Step limit when no target is supplied; defaults to the configured
    /// `max_length`.
    pub max_length: Option<usize>,
    /// Overrides mode selection. Forcing [`DecodeMode::Batched`] implies
    /// teacher forcing and needs a target without pre-rnn attention.
    pub force_mode: Option<DecodeMode>,
}

impl DecodeOptions {
    pub fn with_teacher_forcing(mut self, ratio: f32) -> Self {
        self.teacher_forcing_ratio = ratio;
        self
    }

    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = Some(max_length);
        self
    }

    pub fn force_mode(mut self, mode: DecodeMode) -> Self {
        self.force_mode = Some(mode);
        self
    }
}

/// Borrowed tensors consumed by one forward call.
#[derive(Clone, Copy, Debug, Default)]
pub struct DecoderInput<'a> {
    /// Target ids including the leading SOS column.
    pub targets: Option<&'a TokenBatch>,
    pub encoder_hidden: Option<&'a EncoderHidden>,
    pub encoder_outputs: Option<&'a SequenceTensor>,
    pub alignment: Option<&'a AlignmentTarget>,
}

/// Auxiliary outputs of a forward call.
#[derive(Clone, Debug, Default)]
pub struct SideChannel {
    /// Encoder hidden state as supplied, before any sparsity gate.
    pub encoder_hidden: Option<EncoderHidden>,
    /// Encoder outputs as supplied, before any sparsity gate.
    pub encoder_outputs: Option<SequenceTensor>,
    /// Per-step `(batch, source_len)` alignments; `None` without attention.
    pub attention_scores: Option<Vec<Tensor>>,
    /// Per-step greedy symbols, one per batch row.
    pub sequence: Vec<Vec<usize>>,
    pub lengths: Vec<usize>,
    /// Filled by the enclosing model so parameter penalties need no model
    /// access.
    pub model_parameters: Option<Vec<Tensor>>,
}

#[derive(Clone, Debug)]
pub struct DecoderOutput {
    /// Per-step `(batch, vocab)` log-probabilities.
    pub outputs: Vec<Tensor>,
    pub hidden: RecurrentState,
    pub side: SideChannel,
    pub mode: DecodeMode,
    pub teacher_forcing: bool,
    /// Per-step inputs of the output projection.
    pub projection_inputs: Vec<Tensor>,
}

/// Everything one step hands to [`DecodeState::record`].
#[derive(Clone, Debug)]
pub struct StepOutput {
    pub log_probs: Tensor,
    pub attention: Option<Tensor>,
    pub projection_input: Tensor,
}

/// Pass-scoped bookkeeping, discarded when the call returns.
#[derive(Debug)]
pub struct DecodeState {
    pub hidden: RecurrentState,
    step: usize,
    eos_id: usize,
    outputs: Vec<Tensor>,
    symbols: Vec<Vec<usize>>,
    lengths: Vec<usize>,
    attention: Option<Vec<Tensor>>,
    projection_inputs: Vec<Tensor>,
}

impl DecodeState {
    pub fn new(
        hidden: RecurrentState,
        batch: usize,
        max_length: usize,
        eos_id: usize,
        record_attention: bool,
    ) -> Self {
        Self {
            hidden,
            step: 0,
            eos_id,
            outputs: Vec::with_capacity(max_length),
            symbols: Vec::with_capacity(max_length),
            lengths: vec![max_length; batch],
            attention: record_attention.then(Vec::new),
            projection_inputs: Vec::with_capacity(max_length),
        }
    }

    /// Stores one step and returns its greedy symbols. A row that emits EOS
    /// while its length is still open gets length `step + 1`; later steps
    /// never reopen it.
    pub fn record(&mut self, step: usize, output: StepOutput) -> Vec<usize> {
        let symbols = output.log_probs.row_argmax();
        self.outputs.push(output.log_probs);
        if let (Some(scores), Some(attention)) = (self.attention.as_mut(), output.attention) {
            scores.push(attention);
        }
        self.projection_inputs.push(output.projection_input);
        self.symbols.push(symbols.clone());
        let recorded = self.symbols.len();
        for (length, &symbol) in self.lengths.iter_mut().zip(&symbols) {
            if symbol == self.eos_id && *length > step {
                *length = recorded;
            }
        }
        self.step = step + 1;
        symbols
    }

    pub fn step(&self) -> usize {
        self.step
    }

    pub fn lengths(&self) -> &[usize] {
        &self.lengths
    }

    fn finish(
        self,
        mode: DecodeMode,
        teacher_forcing: bool,
        encoder_hidden: Option<EncoderHidden>,
        encoder_outputs: Option<SequenceTensor>,
    ) -> DecoderOutput {
        DecoderOutput {
            outputs: self.outputs,
            hidden: self.hidden,
            side: SideChannel {
                encoder_hidden,
                encoder_outputs,
                attention_scores: self.attention,
                sequence: self.symbols,
                lengths: self.lengths,
                model_parameters: None,
            },
            mode,
            teacher_forcing,
            projection_inputs: self.projection_inputs,
        }
    }
}

/// Recurrent decoder over a fixed vocabulary.
#[derive(Debug)]
pub struct SequenceDecoder {
    config: DecoderConfig,
    embedding: Embedding,
    rnn: Recurrent,
    attention: Option<AttentionModule>,
    ffocus_merge: Option<Linear>,
    out: Linear,
    sparsity: Option<SparsityHandle>,
    rng: StdRng,
}

impl SequenceDecoder {
    pub fn new(config: DecoderConfig) -> Seq2seqResult<Self> {
        config.validate()?;
        let h = config.hidden_size;
        let seed = config.seed;
        let pre_rnn = config.attention == AttentionPlacement::PreRnn;
        let rnn_input = if pre_rnn && !config.full_focus { 2 * h } else { h };
        let attention = match (config.uses_attention(), config.attention_method) {
            (true, Some(method)) => Some(AttentionModule::new(h, method, seed)?),
            _ => None,
        };
        let ffocus_merge = if config.full_focus {
            Some(Linear::new("decoder::ffocus_merge", 2 * h, h, seed)?)
        } else {
            None
        };
        let out_input = if config.attention == AttentionPlacement::PostRnn { 2 * h } else { h };
        let sparsity = if config.sparsity.enabled {
            Some(SparsityHandle::new(config.sparsity.initial_k)?)
        } else {
            None
        };
        let rng = determinism::rng_from_optional(
            determinism::derive_seed(seed, "decoder::teacher_forcing"),
            "st-seq2seq/decoder/teacher-forcing",
        );
        Ok(Self {
            embedding: Embedding::new("decoder::embedding", config.vocab_size, h, seed)?,
            rnn: Recurrent::new(
                "decoder::rnn",
                config.cell,
                rnn_input,
                h,
                config.layers,
                false,
                seed,
            )?,
            attention,
            ffocus_merge,
            out: Linear::new("decoder::out", out_input, config.vocab_size, seed)?,
            sparsity,
            rng,
            config,
        })
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Shared k handle, present when sparsity is enabled.
    pub fn sparsity(&self) -> Option<&SparsityHandle> {
        self.sparsity.as_ref()
    }

    pub fn k(&self) -> Option<usize> {
        self.sparsity.as_ref().map(SparsityHandle::get)
    }

    pub fn readout(&self) -> &Linear {
        &self.out
    }

    pub fn readout_mut(&mut self) -> &mut Linear {
        &mut self.out
    }

    /// Runs one forward pass.
    pub fn forward(
        &mut self,
        input: DecoderInput<'_>,
        options: &DecodeOptions,
    ) -> Seq2seqResult<DecoderOutput> {
        if self.attention.is_some() && input.encoder_outputs.is_none() {
            return Err(Seq2seqError::MissingEncoderOutputs);
        }
        if self.is_hard_guided() && input.alignment.is_none() {
            return Err(Seq2seqError::MissingAlignment);
        }
        let batch = infer_batch(&input)?;
        let ratio = options.teacher_forcing_ratio;
        let (tokens, steps) = match input.targets {
            Some(targets) => {
                if targets.steps() < 2 {
                    return Err(Seq2seqError::MalformedTarget(format!(
                        "target needs at least 2 steps, got {}",
                        targets.steps()
                    )));
                }
                (targets.clone(), targets.steps() - 1)
            }
            None => {
                if ratio > 0.0 {
                    return Err(Seq2seqError::TeacherForcingWithoutTarget { ratio });
                }
                let steps = options.max_length.unwrap_or(self.config.max_length);
                if steps == 0 {
                    return Err(Seq2seqError::Config("max_length must be positive".into()));
                }
                (TokenBatch::filled(batch, self.config.sos_id)?, steps)
            }
        };

        let (encoder_hidden, memory) = self.sparsify(input.encoder_hidden, input.encoder_outputs)?;
        let initial = self.init_state(encoder_hidden.as_ref(), batch)?;

        let draw: f32 = self.rng.gen();
        let mut teacher_forcing = draw < ratio;
        let natural = if self.config.attention == AttentionPlacement::PreRnn || !teacher_forcing {
            DecodeMode::Unrolled
        } else {
            DecodeMode::Batched
        };
        let mode = match options.force_mode {
            Some(DecodeMode::Batched) => {
                if input.targets.is_none() || self.config.attention == AttentionPlacement::PreRnn {
                    return Err(Seq2seqError::Config(
                        "batched decoding needs a target and no pre-rnn attention".into(),
                    ));
                }
                teacher_forcing = true;
                DecodeMode::Batched
            }
            Some(DecodeMode::Unrolled) => DecodeMode::Unrolled,
            None => natural,
        };
        debug!(?mode, teacher_forcing, steps, batch, "decoder mode selected");

        let mut state = DecodeState::new(
            initial,
            batch,
            steps,
            self.config.eos_id,
            self.attention.is_some(),
        );
        match mode {
            DecodeMode::Unrolled => self.run_unrolled(
                &mut state,
                &tokens,
                steps,
                teacher_forcing,
                memory.as_ref(),
                input.alignment,
            )?,
            DecodeMode::Batched => {
                self.run_batched(&mut state, &tokens, steps, memory.as_ref(), input.alignment)?
            }
        }
        Ok(state.finish(
            mode,
            teacher_forcing,
            input.encoder_hidden.cloned(),
            input.encoder_outputs.cloned(),
        ))
    }

    fn is_hard_guided(&self) -> bool {
        matches!(
            self.attention.as_ref().map(AttentionModule::method),
            Some(AttentionMethod::Hard)
        )
    }

    fn guidance<'a>(
        &self,
        alignment: Option<&'a AlignmentTarget>,
        first_step: usize,
    ) -> Option<GuidedAlignment<'a>> {
        if !self.is_hard_guided() {
            return None;
        }
        alignment.map(|target| GuidedAlignment { target, first_step })
    }

    /// Gates the configured encoder tensor with the current k. The caller's
    /// tensors are left untouched.
    fn sparsify(
        &self,
        hidden: Option<&EncoderHidden>,
        outputs: Option<&SequenceTensor>,
    ) -> Seq2seqResult<(Option<EncoderHidden>, Option<SequenceTensor>)> {
        let (Some(handle), true) = (&self.sparsity, self.config.sparsity.enabled) else {
            return Ok((hidden.cloned(), outputs.cloned()));
        };
        let k = handle.get();
        match self.config.sparsity.target {
            Some(SparsityTarget::EncoderHidden) => {
                let hidden = hidden.ok_or(Seq2seqError::MissingEncoderHidden)?;
                let gated = hidden.with_hidden(SparsityGate::apply(hidden.hidden(), k)?)?;
                debug!(k, target = "encoder_hidden", "applied k-sparsity");
                Ok((Some(gated), outputs.cloned()))
            }
            Some(SparsityTarget::EncoderOutputs) => {
                let outputs = outputs.ok_or(Seq2seqError::MissingEncoderOutputs)?;
                let gated = outputs.map_tensor(|t| SparsityGate::apply(t, k))?;
                debug!(k, target = "encoder_outputs", "applied k-sparsity");
                Ok((hidden.cloned(), Some(gated)))
            }
            None => Err(Seq2seqError::Config(
                "k-sparsity is enabled but no target layer is designated".into(),
            )),
        }
    }

    fn init_state(
        &self,
        encoder_hidden: Option<&EncoderHidden>,
        batch: usize,
    ) -> Seq2seqResult<RecurrentState> {
        let Some(encoder_hidden) = encoder_hidden else {
            return Ok(self.rnn.zero_state(batch)?);
        };
        let bridged = if self.config.bidirectional_encoder {
            encoder_hidden.merge_directions()?
        } else {
            encoder_hidden.clone()
        };
        let expected = (self.rnn.layers() * batch, self.config.hidden_size);
        if bridged.slots() != self.rnn.layers() || bridged.hidden().shape() != expected {
            return Err(Seq2seqError::ShapeMismatch {
                context: "decoder initial hidden",
                expected,
                got: bridged.hidden().shape(),
            });
        }
        let cell = match self.config.cell {
            CellKind::Gru => None,
            CellKind::Lstm => Some(bridged.cell().cloned().ok_or_else(|| {
                Seq2seqError::Config("an lstm decoder needs the encoder cell state".into())
            })?),
        };
        Ok(RecurrentState {
            hidden: bridged.hidden().clone(),
            cell,
        })
    }

    fn run_unrolled(
        &self,
        state: &mut DecodeState,
        tokens: &TokenBatch,
        steps: usize,
        teacher_forcing: bool,
        memory: Option<&SequenceTensor>,
        alignment: Option<&AlignmentTarget>,
    ) -> Seq2seqResult<()> {
        let mut symbols: Vec<usize> = Vec::new();
        for di in 0..steps {
            let step_tokens = if di == 0 || teacher_forcing {
                tokens.column(di)
            } else {
                std::mem::take(&mut symbols)
            };
            let guidance = self.guidance(alignment, di);
            let (output, next) =
                self.forward_step(&step_tokens, &state.hidden, memory, guidance)?;
            state.hidden = next;
            symbols = state.record(di, output);
        }
        Ok(())
    }

    fn run_batched(
        &self,
        state: &mut DecodeState,
        tokens: &TokenBatch,
        steps: usize,
        memory: Option<&SequenceTensor>,
        alignment: Option<&AlignmentTarget>,
    ) -> Seq2seqResult<()> {
        let embedded = (0..steps)
            .map(|t| self.embedding.lookup(&tokens.column(t)))
            .collect::<PureResult<Vec<_>>>()?;
        let (rnn_outputs, final_hidden) =
            self.rnn.forward_sequence(&embedded, Some(&state.hidden))?;
        let attended = match (&self.attention, self.config.attention) {
            (Some(attention), AttentionPlacement::PostRnn) => {
                let memory = memory.ok_or(Seq2seqError::MissingEncoderOutputs)?;
                let query = SequenceTensor::from_steps(&rnn_outputs)?;
                Some(attention.score_and_context(&query, memory, self.guidance(alignment, 0))?)
            }
            _ => None,
        };
        for (t, rnn_out) in rnn_outputs.into_iter().enumerate() {
            let (projection_input, step_attention) = match &attended {
                Some(attended) => (
                    Tensor::cat_cols(&[attended.context.step(t)?, rnn_out])?,
                    Some(attended.alignment.step(t)?),
                ),
                None => (rnn_out, None),
            };
            let log_probs = self.readout_log_probs(&projection_input)?;
            state.record(
                t,
                StepOutput {
                    log_probs,
                    attention: step_attention,
                    projection_input,
                },
            );
        }
        state.hidden = final_hidden;
        Ok(())
    }

    /// One decoder step for every batch row.
    fn forward_step(
        &self,
        tokens: &[usize],
        hidden: &RecurrentState,
        memory: Option<&SequenceTensor>,
        guidance: Option<GuidedAlignment<'_>>,
    ) -> Seq2seqResult<(StepOutput, RecurrentState)> {
        let batch = tokens.len();
        let embedded = self.embedding.lookup(tokens)?;
        let mut step_attention = None;
        let rnn_input = match (&self.attention, self.config.attention) {
            (Some(attention), AttentionPlacement::PreRnn) => {
                let memory = memory.ok_or(Seq2seqError::MissingEncoderOutputs)?;
                let (top, _) = hidden.slot(self.rnn.layers() - 1, batch)?;
                let query = SequenceTensor::new(top, batch, 1)?;
                let attended = attention.score_and_context(&query, memory, guidance)?;
                let context = attended.context.tensor().clone();
                step_attention = Some(attended.alignment.tensor().clone());
                match &self.ffocus_merge {
                    Some(merge) => {
                        let combined = Tensor::cat_cols(&[context.clone(), embedded])?;
                        let mut gate = merge.forward(&combined)?;
                        gate.relu_inplace();
                        context.hadamard(&gate)?
                    }
                    None => Tensor::cat_cols(&[context, embedded])?,
                }
            }
            _ => embedded,
        };
        let (rnn_out, next) = self.rnn.step(&rnn_input, hidden)?;
        let projection_input = match (&self.attention, self.config.attention) {
            (Some(attention), AttentionPlacement::PostRnn) => {
                let memory = memory.ok_or(Seq2seqError::MissingEncoderOutputs)?;
                let query = SequenceTensor::new(rnn_out.clone(), batch, 1)?;
                let attended = attention.score_and_context(&query, memory, guidance)?;
                step_attention = Some(attended.alignment.tensor().clone());
                Tensor::cat_cols(&[attended.context.tensor().clone(), rnn_out])?
            }
            _ => rnn_out,
        };
        let log_probs = self.readout_log_probs(&projection_input)?;
        Ok((
            StepOutput {
                log_probs,
                attention: step_attention,
                projection_input,
            },
            next,
        ))
    }

    fn readout_log_probs(&self, projection_input: &Tensor) -> Seq2seqResult<Tensor> {
        Ok(self.out.forward(projection_input)?.row_log_softmax()?)
    }
}

/// Batch size shared by every supplied tensor; `1` when nothing is supplied.
fn infer_batch(input: &DecoderInput<'_>) -> Seq2seqResult<usize> {
    let sizes = [
        input.targets.map(TokenBatch::batch),
        input.encoder_hidden.map(EncoderHidden::batch),
        input.encoder_outputs.map(SequenceTensor::batch),
        input.alignment.map(AlignmentTarget::batch),
    ];
    let mut known = sizes.into_iter().flatten();
    let Some(batch) = known.next() else {
        return Ok(1);
    };
    if let Some(other) = known.find(|&size| size != batch) {
        return Err(Seq2seqError::ShapeMismatch {
            context: "decoder batch size",
            expected: (batch, 1),
            got: (other, 1),
        });
    }
    Ok(batch)
}

impl Parameterised for SequenceDecoder {
    fn visit_parameters(
        &self,
        visitor: &mut dyn FnMut(&Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        self.embedding.visit_parameters(visitor)?;
        self.rnn.visit_parameters(visitor)?;
        if let Some(attention) = &self.attention {
            attention.visit_parameters(visitor)?;
        }
        if let Some(merge) = &self.ffocus_merge {
            merge.visit_parameters(visitor)?;
        }
        self.out.visit_parameters(visitor)
    }

    fn visit_parameters_mut(
        &mut self,
        visitor: &mut dyn FnMut(&mut Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        self.embedding.visit_parameters_mut(visitor)?;
        self.rnn.visit_parameters_mut(visitor)?;
        if let Some(attention) = &mut self.attention {
            attention.visit_parameters_mut(visitor)?;
        }
        if let Some(merge) = &mut self.ffocus_merge {
            merge.visit_parameters_mut(visitor)?;
        }
        self.out.visit_parameters_mut(visitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(rows: &[&[f32]]) -> StepOutput {
        let rows: Vec<Vec<f32>> = rows.iter().map(|r| r.to_vec()).collect();
        let log_probs = Tensor::from_rows(&rows).unwrap();
        StepOutput {
            projection_input: log_probs.clone(),
            log_probs,
            attention: None,
        }
    }

    #[test]
    fn record_sets_length_on_first_eos_only() {
        let hidden = RecurrentState {
            hidden: Tensor::zeros(2, 1).unwrap(),
            cell: None,
        };
        let mut state = DecodeState::new(hidden, 2, 4, 2, false);
        // vocab 3, eos = 2
        let symbols = state.record(0, step(&[&[0.0, 1.0, 0.0], &[0.0, 0.0, 1.0]]));
        assert_eq!(symbols, vec![1, 2]);
        assert_eq!(state.lengths(), &[4, 1]);
        state.record(1, step(&[&[0.0, 0.0, 1.0], &[0.0, 0.0, 1.0]]));
        assert_eq!(state.lengths(), &[2, 1]);
        state.record(2, step(&[&[0.0, 0.0, 1.0], &[1.0, 0.0, 0.0]]));
        assert_eq!(state.lengths(), &[2, 1]);
        assert_eq!(state.step(), 3);
    }

    #[test]
    fn pre_rnn_input_puts_context_before_embedding() {
        let config = DecoderConfig::new(6, 3)
            .with_attention(AttentionPlacement::PreRnn, AttentionMethod::Dot)
            .with_seed(5);
        let decoder = SequenceDecoder::new(config).unwrap();
        let hidden = RecurrentState {
            hidden: Tensor::random_uniform(2, 3, -1.0, 1.0, Some(6)).unwrap(),
            cell: None,
        };
        let memory = Tensor::random_uniform(8, 3, -1.0, 1.0, Some(7)).unwrap();
        let memory = SequenceTensor::new(memory, 2, 4).unwrap();
        let tokens = [1, 4];
        let (step, next) = decoder
            .forward_step(&tokens, &hidden, Some(&memory), None)
            .unwrap();

        let query = SequenceTensor::new(hidden.hidden.clone(), 2, 1).unwrap();
        let attended = decoder
            .attention
            .as_ref()
            .unwrap()
            .score_and_context(&query, &memory, None)
            .unwrap();
        let context = attended.context.tensor().clone();
        let embedded = decoder.embedding.lookup(&tokens).unwrap();
        let context_first = Tensor::cat_cols(&[context.clone(), embedded.clone()]).unwrap();
        let embedded_first = Tensor::cat_cols(&[embedded, context]).unwrap();
        let (_, expected) = decoder.rnn.step(&context_first, &hidden).unwrap();
        let (_, swapped) = decoder.rnn.step(&embedded_first, &hidden).unwrap();
        assert_eq!(next, expected);
        assert_ne!(next, swapped);
        assert_eq!(step.attention.as_ref(), Some(attended.alignment.tensor()));
    }

    #[test]
    fn construction_rejects_invalid_setups() {
        let mut config = DecoderConfig::new(8, 4);
        config.sparsity.enabled = true;
        assert!(matches!(
            SequenceDecoder::new(config),
            Err(Seq2seqError::Config(_))
        ));
        let mut config = DecoderConfig::new(8, 4);
        config.attention = AttentionPlacement::PreRnn;
        assert!(matches!(
            SequenceDecoder::new(config),
            Err(Seq2seqError::Config(_))
        ));
    }

    #[test]
    fn inputs_must_agree_on_batch() {
        let targets = TokenBatch::new(2, 3, vec![1, 3, 2, 1, 4, 2]).unwrap();
        let alignment = AlignmentTarget::new(3, 1, vec![0, 0, 0]).unwrap();
        let input = DecoderInput {
            targets: Some(&targets),
            alignment: Some(&alignment),
            ..DecoderInput::default()
        };
        assert!(infer_batch(&input).is_err());
        assert_eq!(infer_batch(&DecoderInput::default()).unwrap(), 1);
    }
}

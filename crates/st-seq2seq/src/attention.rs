// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Alignment scoring over encoder memory.
//!
//! Every strategy produces the same pair: a row-normalised alignment over the
//! memory positions and the matching weighted context vector. Each query row
//! is scored on its own, so a row's result does not depend on which other
//! queries share the call.

use crate::error::{Seq2seqError, Seq2seqResult};
use crate::sequence::SequenceTensor;
use serde::{Deserialize, Serialize};
use st_nn::{Linear, Module, Parameter, Parameterised, PureResult};
use st_tensor::Tensor;

/// Scoring strategy, fixed when the module is built.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttentionMethod {
    /// `q · m`
    Dot,
    /// `q · (W m + b)`
    General,
    /// `w · [q; m] + b`
    Concat,
    /// `w₂ · relu(W₁ [q; m] + b₁) + b₂`
    Mlp,
    /// Alignment supplied externally through [`AlignmentTarget`].
    Hard,
}

/// Externally supplied alignment: for every example and decode step, the
/// attended source position, or `-1` to ignore the step.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlignmentTarget {
    batch: usize,
    steps: usize,
    indices: Vec<i64>,
}

impl AlignmentTarget {
    pub const IGNORE: i64 = -1;

    pub fn new(batch: usize, steps: usize, indices: Vec<i64>) -> Seq2seqResult<Self> {
        if batch == 0 || indices.len() != batch * steps {
            return Err(Seq2seqError::MalformedTarget(format!(
                "expected {batch}x{steps} alignment indices, got {}",
                indices.len()
            )));
        }
        Ok(Self {
            batch,
            steps,
            indices,
        })
    }

    /// Right-pads ragged rows with [`AlignmentTarget::IGNORE`].
    pub fn from_ragged(rows: &[Vec<i64>]) -> Seq2seqResult<Self> {
        let steps = rows.iter().map(Vec::len).max().unwrap_or(0);
        let mut indices = Vec::with_capacity(rows.len() * steps);
        for row in rows {
            indices.extend_from_slice(row);
            indices.extend(std::iter::repeat(Self::IGNORE).take(steps - row.len()));
        }
        Self::new(rows.len(), steps, indices)
    }

    pub fn batch(&self) -> usize {
        self.batch
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Raw index for `(batch, step)`; steps past the end read as ignored.
    pub fn raw(&self, batch: usize, step: usize) -> i64 {
        if step >= self.steps {
            return Self::IGNORE;
        }
        self.indices[batch * self.steps + step]
    }

    /// Attended position if it is valid for a memory of `memory_len`.
    pub fn position(&self, batch: usize, step: usize, memory_len: usize) -> Option<usize> {
        usize::try_from(self.raw(batch, step))
            .ok()
            .filter(|&position| position < memory_len)
    }
}

/// Window of an [`AlignmentTarget`] starting at decode step `first_step`.
#[derive(Clone, Copy, Debug)]
pub struct GuidedAlignment<'a> {
    pub target: &'a AlignmentTarget,
    pub first_step: usize,
}

#[derive(Debug, Clone)]
enum Scorer {
    Dot,
    General(Linear),
    Concat(Linear),
    Mlp { hidden: Linear, out: Linear },
    Hard,
}

/// Context vectors and alignments, both batch-first.
#[derive(Clone, Debug)]
pub struct Attended {
    /// `(batch, queries, width)`
    pub context: SequenceTensor,
    /// `(batch, queries, memory_len)`
    pub alignment: SequenceTensor,
}

#[derive(Debug, Clone)]
pub struct AttentionModule {
    method: AttentionMethod,
    scorer: Scorer,
    dim: usize,
}

impl AttentionModule {
    pub fn new(dim: usize, method: AttentionMethod, seed: Option<u64>) -> PureResult<Self> {
        let scorer = match method {
            AttentionMethod::Dot => Scorer::Dot,
            AttentionMethod::General => {
                Scorer::General(Linear::new("attention::general", dim, dim, seed)?)
            }
            AttentionMethod::Concat => {
                Scorer::Concat(Linear::new("attention::concat", 2 * dim, 1, seed)?)
            }
            AttentionMethod::Mlp => Scorer::Mlp {
                hidden: Linear::new("attention::mlp_hidden", 2 * dim, dim, seed)?,
                out: Linear::new("attention::mlp_out", dim, 1, seed)?,
            },
            AttentionMethod::Hard => Scorer::Hard,
        };
        Ok(Self { method, scorer, dim })
    }

    pub fn method(&self) -> AttentionMethod {
        self.method
    }

    /// Scores every query against the memory of its own batch entry.
    ///
    /// When `guided` is supplied the alignment is taken from it verbatim: a
    /// valid position gives a one-hot row, an ignored or out-of-range one a
    /// uniform row.
    pub fn score_and_context(
        &self,
        query: &SequenceTensor,
        memory: &SequenceTensor,
        guided: Option<GuidedAlignment<'_>>,
    ) -> Seq2seqResult<Attended> {
        if query.batch() != memory.batch() {
            return Err(Seq2seqError::ShapeMismatch {
                context: "attention batch",
                expected: (memory.batch(), memory.width()),
                got: (query.batch(), query.width()),
            });
        }
        if query.width() != self.dim || memory.width() != self.dim {
            return Err(Seq2seqError::ShapeMismatch {
                context: "attention width",
                expected: (self.dim, self.dim),
                got: (query.width(), memory.width()),
            });
        }
        let alignment = match guided {
            Some(guided) => guided_alignment(query, memory, guided)?,
            None => {
                if matches!(self.scorer, Scorer::Hard) {
                    return Err(Seq2seqError::MissingAlignment);
                }
                self.scores(query, memory)?.row_softmax()?
            }
        };
        let context = weighted_context(query, memory, &alignment)?;
        Ok(Attended {
            context: SequenceTensor::new(context, query.batch(), query.steps())?,
            alignment: SequenceTensor::new(alignment, query.batch(), query.steps())?,
        })
    }

    /// Unnormalised `(batch * queries, memory_len)` scores.
    fn scores(&self, query: &SequenceTensor, memory: &SequenceTensor) -> Seq2seqResult<Tensor> {
        let (batch, queries, src) = (query.batch(), query.steps(), memory.steps());
        let scores = match &self.scorer {
            Scorer::Dot => pairwise_dot(query, memory.tensor(), src)?,
            Scorer::General(linear) => {
                let keys = linear.forward(memory.tensor())?;
                pairwise_dot(query, &keys, src)?
            }
            Scorer::Concat(linear) => {
                let combined = pair_rows(query, memory)?;
                linear.forward(&combined)?.reshape(batch * queries, src)?
            }
            Scorer::Mlp { hidden, out } => {
                let combined = pair_rows(query, memory)?;
                let mut activated = hidden.forward(&combined)?;
                activated.relu_inplace();
                out.forward(&activated)?.reshape(batch * queries, src)?
            }
            Scorer::Hard => return Err(Seq2seqError::MissingAlignment),
        };
        Ok(scores)
    }
}

/// `q · k` for every query against the `src` key rows of its batch entry.
fn pairwise_dot(query: &SequenceTensor, keys: &Tensor, src: usize) -> Seq2seqResult<Tensor> {
    let queries = query.steps();
    let mut scores = Vec::with_capacity(query.batch() * queries * src);
    for b in 0..query.batch() {
        for q in 0..queries {
            let q_row = query.at(b, q)?;
            for s in 0..src {
                let k_row = keys.row(b * src + s)?;
                let mut acc = 0.0f32;
                for (a, k) in q_row.iter().zip(k_row) {
                    acc += a * k;
                }
                scores.push(acc);
            }
        }
    }
    Ok(Tensor::from_vec(query.batch() * queries, src, scores)?)
}

/// `[q; m]` rows ordered `(batch, query, source)`.
fn pair_rows(query: &SequenceTensor, memory: &SequenceTensor) -> Seq2seqResult<Tensor> {
    let (queries, src, dim) = (query.steps(), memory.steps(), query.width());
    let rows = query.batch() * queries * src;
    let mut data = Vec::with_capacity(rows * 2 * dim);
    for b in 0..query.batch() {
        for q in 0..queries {
            let q_row = query.at(b, q)?;
            for s in 0..src {
                data.extend_from_slice(q_row);
                data.extend_from_slice(memory.at(b, s)?);
            }
        }
    }
    Ok(Tensor::from_vec(rows, 2 * dim, data)?)
}

fn guided_alignment(
    query: &SequenceTensor,
    memory: &SequenceTensor,
    guided: GuidedAlignment<'_>,
) -> Seq2seqResult<Tensor> {
    if guided.target.batch() != query.batch() {
        return Err(Seq2seqError::ShapeMismatch {
            context: "alignment target batch",
            expected: (query.batch(), guided.target.steps()),
            got: (guided.target.batch(), guided.target.steps()),
        });
    }
    let src = memory.steps();
    let uniform = 1.0 / src as f32;
    let mut data = Vec::with_capacity(query.batch() * query.steps() * src);
    for b in 0..query.batch() {
        for q in 0..query.steps() {
            match guided.target.position(b, guided.first_step + q, src) {
                Some(position) => {
                    data.extend((0..src).map(|s| if s == position { 1.0 } else { 0.0 }))
                }
                None => data.extend(std::iter::repeat(uniform).take(src)),
            }
        }
    }
    Ok(Tensor::from_vec(query.batch() * query.steps(), src, data)?)
}

fn weighted_context(
    query: &SequenceTensor,
    memory: &SequenceTensor,
    alignment: &Tensor,
) -> Seq2seqResult<Tensor> {
    let (queries, dim) = (query.steps(), memory.width());
    let mut data = Vec::with_capacity(query.batch() * queries * dim);
    for b in 0..query.batch() {
        for q in 0..queries {
            let weights = alignment.row(b * queries + q)?;
            let mut context = vec![0.0f32; dim];
            for (s, &weight) in weights.iter().enumerate() {
                for (dst, value) in context.iter_mut().zip(memory.at(b, s)?) {
                    *dst += weight * value;
                }
            }
            data.extend(context);
        }
    }
    Ok(Tensor::from_vec(query.batch() * queries, dim, data)?)
}

impl Parameterised for AttentionModule {
    fn visit_parameters(
        &self,
        visitor: &mut dyn FnMut(&Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        match &self.scorer {
            Scorer::Dot | Scorer::Hard => Ok(()),
            Scorer::General(linear) | Scorer::Concat(linear) => linear.visit_parameters(visitor),
            Scorer::Mlp { hidden, out } => {
                hidden.visit_parameters(visitor)?;
                out.visit_parameters(visitor)
            }
        }
    }

    fn visit_parameters_mut(
        &mut self,
        visitor: &mut dyn FnMut(&mut Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        match &mut self.scorer {
            Scorer::Dot | Scorer::Hard => Ok(()),
            Scorer::General(linear) | Scorer::Concat(linear) => {
                linear.visit_parameters_mut(visitor)
            }
            Scorer::Mlp { hidden, out } => {
                hidden.visit_parameters_mut(visitor)?;
                out.visit_parameters_mut(visitor)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn memory() -> SequenceTensor {
        // batch 1, three positions, width 2
        let data = Tensor::from_vec(3, 2, vec![1.0, 0.0, 0.0, 1.0, -1.0, 0.0]).unwrap();
        SequenceTensor::new(data, 1, 3).unwrap()
    }

    fn query(values: Vec<f32>) -> SequenceTensor {
        let rows = values.len() / 2;
        SequenceTensor::new(Tensor::from_vec(rows, 2, values).unwrap(), 1, rows).unwrap()
    }

    #[test]
    fn every_method_yields_distributions() {
        for method in [
            AttentionMethod::Dot,
            AttentionMethod::General,
            AttentionMethod::Concat,
            AttentionMethod::Mlp,
        ] {
            let attention = AttentionModule::new(2, method, Some(5)).unwrap();
            let out = attention
                .score_and_context(&query(vec![0.5, -0.2, 0.1, 0.9]), &memory(), None)
                .unwrap();
            assert_eq!(out.alignment.tensor().shape(), (2, 3));
            assert_eq!(out.context.tensor().shape(), (2, 2));
            for row in out.alignment.tensor().iter_rows() {
                assert_abs_diff_eq!(row.iter().sum::<f32>(), 1.0, epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn dot_scores_prefer_aligned_memory() {
        let attention = AttentionModule::new(2, AttentionMethod::Dot, None).unwrap();
        let out = attention
            .score_and_context(&query(vec![4.0, 0.0]), &memory(), None)
            .unwrap();
        let row = out.alignment.tensor().row(0).unwrap();
        assert!(row[0] > row[1] && row[1] > row[2]);
    }

    #[test]
    fn rows_do_not_depend_on_call_batch() {
        let attention = AttentionModule::new(2, AttentionMethod::Mlp, Some(3)).unwrap();
        let both = attention
            .score_and_context(&query(vec![0.5, -0.2, 0.1, 0.9]), &memory(), None)
            .unwrap();
        let second = attention
            .score_and_context(&query(vec![0.1, 0.9]), &memory(), None)
            .unwrap();
        assert_eq!(
            both.alignment.tensor().row(1).unwrap(),
            second.alignment.tensor().row(0).unwrap()
        );
        assert_eq!(
            both.context.tensor().row(1).unwrap(),
            second.context.tensor().row(0).unwrap()
        );
    }

    #[test]
    fn hard_guidance_uses_supplied_positions() {
        let attention = AttentionModule::new(2, AttentionMethod::Hard, None).unwrap();
        let target = AlignmentTarget::new(1, 3, vec![2, -1, 7]).unwrap();
        let guided = GuidedAlignment {
            target: &target,
            first_step: 0,
        };
        let out = attention
            .score_and_context(
                &query(vec![0.0, 0.0, 0.0, 0.0, 0.0, 0.0]),
                &memory(),
                Some(guided),
            )
            .unwrap();
        let align = out.alignment.tensor();
        assert_eq!(align.row(0).unwrap(), &[0.0, 0.0, 1.0]);
        for row in [align.row(1).unwrap(), align.row(2).unwrap()] {
            for &value in row {
                assert_abs_diff_eq!(value, 1.0 / 3.0, epsilon = 1e-6);
            }
        }
        assert_eq!(out.context.tensor().row(0).unwrap(), &[-1.0, 0.0]);
        assert!(matches!(
            attention.score_and_context(&query(vec![0.0, 0.0]), &memory(), None),
            Err(Seq2seqError::MissingAlignment)
        ));
    }

    #[test]
    fn guided_window_offsets_steps() {
        let attention = AttentionModule::new(2, AttentionMethod::Hard, None).unwrap();
        let target = AlignmentTarget::new(1, 3, vec![2, 0, 1]).unwrap();
        let guided = GuidedAlignment {
            target: &target,
            first_step: 1,
        };
        let out = attention
            .score_and_context(&query(vec![0.0, 0.0]), &memory(), Some(guided))
            .unwrap();
        assert_eq!(out.alignment.tensor().row(0).unwrap(), &[1.0, 0.0, 0.0]);
    }
}

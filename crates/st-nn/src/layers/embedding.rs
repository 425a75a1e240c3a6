// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::module::{Module, Parameter, Parameterised};
use crate::{PureResult, Tensor, TensorError};
use spiral_config::determinism;

fn token_to_index(value: f32, vocab_size: usize) -> PureResult<usize> {
    if !value.is_finite() || value < 0.0 || value.fract() != 0.0 {
        return Err(TensorError::InvalidValue {
            label: "embedding_token_id",
        });
    }
    let index = value as usize;
    if index >= vocab_size {
        return Err(TensorError::IndexOutOfRange {
            label: "embedding_token_id",
            index,
            bound: vocab_size,
        });
    }
    Ok(index)
}

/// Token embedding table shaped `(vocab_size, embed_dim)`.
///
/// [`Embedding::lookup`] is the primary entry point. The [`Module`] impl
/// accepts integer token IDs stored as floats in a `(batch, steps)` tensor
/// and returns `(batch, steps * embed_dim)`.
#[derive(Debug, Clone)]
pub struct Embedding {
    weight: Parameter,
    vocab_size: usize,
    embed_dim: usize,
}

impl Embedding {
    pub fn new(
        name: impl Into<String>,
        vocab_size: usize,
        embed_dim: usize,
        seed: Option<u64>,
    ) -> PureResult<Self> {
        if vocab_size == 0 || embed_dim == 0 {
            return Err(TensorError::InvalidDimensions {
                rows: vocab_size,
                cols: embed_dim,
            });
        }
        let name = name.into();
        let weight = Tensor::random_uniform(
            vocab_size,
            embed_dim,
            -0.1,
            0.1,
            determinism::derive_seed(seed, &format!("{name}::weight")),
        )?;
        Ok(Self {
            weight: Parameter::new(format!("{name}::weight"), weight),
            vocab_size,
            embed_dim,
        })
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    pub fn embed_dim(&self) -> usize {
        self.embed_dim
    }

    pub fn weight(&self) -> &Parameter {
        &self.weight
    }

    /// Gathers one embedding row per token, in order.
    pub fn lookup(&self, tokens: &[usize]) -> PureResult<Tensor> {
        if let Some(&bad) = tokens.iter().find(|&&token| token >= self.vocab_size) {
            return Err(TensorError::IndexOutOfRange {
                label: "embedding_token_id",
                index: bad,
                bound: self.vocab_size,
            });
        }
        self.weight.value().select_rows(tokens)
    }

    /// Scatters `grad_rows` (one row per token) into the table gradient.
    pub fn accumulate_lookup(&mut self, tokens: &[usize], grad_rows: &Tensor) -> PureResult<()> {
        if grad_rows.shape() != (tokens.len(), self.embed_dim) {
            return Err(TensorError::ShapeMismatch {
                left: grad_rows.shape(),
                right: (tokens.len(), self.embed_dim),
            });
        }
        let mut grad = vec![0.0f32; self.vocab_size * self.embed_dim];
        for (row, &token) in grad_rows.iter_rows().zip(tokens) {
            let start = token * self.embed_dim;
            for (dst, value) in grad[start..start + self.embed_dim].iter_mut().zip(row) {
                *dst += value;
            }
        }
        let grad = Tensor::from_vec(self.vocab_size, self.embed_dim, grad)?;
        self.weight.accumulate_euclidean(&grad)
    }

    fn decode_ids(&self, input: &Tensor) -> PureResult<Vec<usize>> {
        input
            .data()
            .iter()
            .map(|&value| token_to_index(value, self.vocab_size))
            .collect()
    }
}

impl Parameterised for Embedding {
    fn visit_parameters(
        &self,
        visitor: &mut dyn FnMut(&Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        visitor(&self.weight)
    }

    fn visit_parameters_mut(
        &mut self,
        visitor: &mut dyn FnMut(&mut Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        visitor(&mut self.weight)
    }
}

impl Module for Embedding {
    fn forward(&self, input: &Tensor) -> PureResult<Tensor> {
        let (batch, steps) = input.shape();
        let ids = self.decode_ids(input)?;
        self.lookup(&ids)?.reshape(batch, steps * self.embed_dim)
    }

    /// Token IDs are not differentiable; the returned gradient is zero.
    fn backward(&mut self, input: &Tensor, grad_output: &Tensor) -> PureResult<Tensor> {
        let (batch, steps) = input.shape();
        if grad_output.shape() != (batch, steps * self.embed_dim) {
            return Err(TensorError::ShapeMismatch {
                left: grad_output.shape(),
                right: (batch, steps * self.embed_dim),
            });
        }
        let ids = self.decode_ids(input)?;
        let grad_rows = grad_output.reshape(batch * steps, self.embed_dim)?;
        self.accumulate_lookup(&ids, &grad_rows)?;
        Tensor::zeros(batch, steps)
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use super::linear::Linear;
use super::sigmoid;
use crate::module::{Module, Parameter, Parameterised};
use crate::{PureResult, Tensor, TensorError};

/// Long short-term memory cell stepping a whole batch at once.
///
/// Gate columns are laid out as `(input, forget, cell, output)`.
#[derive(Debug, Clone)]
pub struct LstmCell {
    input: Linear,
    hidden: Linear,
    hidden_dim: usize,
}

impl LstmCell {
    pub fn new(
        name: impl Into<String>,
        input_dim: usize,
        hidden_dim: usize,
        seed: Option<u64>,
    ) -> PureResult<Self> {
        let name = name.into();
        Ok(Self {
            input: Linear::new(format!("{name}::ih"), input_dim, 4 * hidden_dim, seed)?,
            hidden: Linear::new(format!("{name}::hh"), hidden_dim, 4 * hidden_dim, seed)?,
            hidden_dim,
        })
    }

    pub fn input_dim(&self) -> usize {
        self.input.input_dim()
    }

    pub fn hidden_dim(&self) -> usize {
        self.hidden_dim
    }

    /// Advances one step, returning the new `(hidden, cell)` pair.
    pub fn step(
        &self,
        input: &Tensor,
        hidden: &Tensor,
        cell: &Tensor,
    ) -> PureResult<(Tensor, Tensor)> {
        let batch = input.rows();
        for state in [hidden, cell] {
            if state.shape() != (batch, self.hidden_dim) {
                return Err(TensorError::ShapeMismatch {
                    left: state.shape(),
                    right: (batch, self.hidden_dim),
                });
            }
        }
        let gi = self.input.forward(input)?;
        let gh = self.hidden.forward(hidden)?;
        let h = self.hidden_dim;
        let mut next_hidden = Vec::with_capacity(batch * h);
        let mut next_cell = Vec::with_capacity(batch * h);
        for ((xi, hh), prev_cell) in gi.iter_rows().zip(gh.iter_rows()).zip(cell.iter_rows()) {
            for unit in 0..h {
                let gate = |offset: usize| xi[offset * h + unit] + hh[offset * h + unit];
                let i = sigmoid(gate(0));
                let f = sigmoid(gate(1));
                let g = gate(2).tanh();
                let o = sigmoid(gate(3));
                let c = f * prev_cell[unit] + i * g;
                next_cell.push(c);
                next_hidden.push(o * c.tanh());
            }
        }
        Ok((
            Tensor::from_vec(batch, h, next_hidden)?,
            Tensor::from_vec(batch, h, next_cell)?,
        ))
    }
}

impl Parameterised for LstmCell {
    fn visit_parameters(
        &self,
        visitor: &mut dyn FnMut(&Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        self.input.visit_parameters(visitor)?;
        self.hidden.visit_parameters(visitor)
    }

    fn visit_parameters_mut(
        &mut self,
        visitor: &mut dyn FnMut(&mut Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        self.input.visit_parameters_mut(visitor)?;
        self.hidden.visit_parameters_mut(visitor)
    }
}

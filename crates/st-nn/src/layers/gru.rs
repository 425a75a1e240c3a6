// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use super::linear::Linear;
use super::sigmoid;
use crate::module::{Module, Parameter, Parameterised};
use crate::{PureResult, Tensor, TensorError};

/// Gated recurrent unit operating on a whole batch per step.
///
/// Gates follow the usual `(reset, update, candidate)` layout:
///
/// ```text
/// r  = σ(x W_ir + b_ir + h W_hr + b_hr)
/// z  = σ(x W_iz + b_iz + h W_hz + b_hz)
/// n  = tanh(x W_in + b_in + r ⊙ (h W_hn + b_hn))
/// h' = (1 - z) ⊙ n + z ⊙ h
/// ```
#[derive(Debug, Clone)]
pub struct GruCell {
    input: Linear,
    hidden: Linear,
    hidden_dim: usize,
}

impl GruCell {
    pub fn new(
        name: impl Into<String>,
        input_dim: usize,
        hidden_dim: usize,
        seed: Option<u64>,
    ) -> PureResult<Self> {
        let name = name.into();
        Ok(Self {
            input: Linear::new(format!("{name}::ih"), input_dim, 3 * hidden_dim, seed)?,
            hidden: Linear::new(format!("{name}::hh"), hidden_dim, 3 * hidden_dim, seed)?,
            hidden_dim,
        })
    }

    pub fn input_dim(&self) -> usize {
        self.input.input_dim()
    }

    pub fn hidden_dim(&self) -> usize {
        self.hidden_dim
    }

    /// Advances every batch row by one step. `input` is `(batch, input_dim)`
    /// and `hidden` is `(batch, hidden_dim)`.
    pub fn step(&self, input: &Tensor, hidden: &Tensor) -> PureResult<Tensor> {
        let batch = input.rows();
        if hidden.shape() != (batch, self.hidden_dim) {
            return Err(TensorError::ShapeMismatch {
                left: hidden.shape(),
                right: (batch, self.hidden_dim),
            });
        }
        let gi = self.input.forward(input)?;
        let gh = self.hidden.forward(hidden)?;
        let h = self.hidden_dim;
        let mut out = Vec::with_capacity(batch * h);
        for ((xi, hh), prev) in gi.iter_rows().zip(gh.iter_rows()).zip(hidden.iter_rows()) {
            for unit in 0..h {
                let r = sigmoid(xi[unit] + hh[unit]);
                let z = sigmoid(xi[h + unit] + hh[h + unit]);
                let n = (xi[2 * h + unit] + r * hh[2 * h + unit]).tanh();
                out.push((1.0 - z) * n + z * prev[unit]);
            }
        }
        Tensor::from_vec(batch, h, out)
    }
}

impl Parameterised for GruCell {
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

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn step_preserves_shape_and_bounds() {
        let cell = GruCell::new("gru", 3, 4, Some(3)).unwrap();
        let input = Tensor::random_uniform(2, 3, -1.0, 1.0, Some(1)).unwrap();
        let hidden = Tensor::zeros(2, 4).unwrap();
        let next = cell.step(&input, &hidden).unwrap();
        assert_eq!(next.shape(), (2, 4));
        assert!(next.data().iter().all(|v| v.abs() < 1.0));
    }

    #[test]
    fn rows_evolve_independently() {
        let cell = GruCell::new("gru", 3, 4, Some(3)).unwrap();
        let input = Tensor::random_uniform(3, 3, -1.0, 1.0, Some(5)).unwrap();
        let hidden = Tensor::random_uniform(3, 4, -0.5, 0.5, Some(6)).unwrap();
        let batched = cell.step(&input, &hidden).unwrap();
        let single = cell
            .step(
                &input.select_rows(&[1]).unwrap(),
                &hidden.select_rows(&[1]).unwrap(),
            )
            .unwrap();
        assert_eq!(batched.row(1).unwrap(), single.data());
    }

    #[test]
    fn saturated_update_gate_keeps_previous_state() {
        let mut cell = GruCell::new("gru", 1, 1, Some(0)).unwrap();
        // bias layout per projection is [reset, update, candidate]
        cell.visit_parameters_mut(&mut |param| {
            if param.name() == "gru::ih::bias" {
                param.value_mut().data_mut()[1] = 50.0;
            }
            Ok(())
        })
        .unwrap();
        let input = Tensor::from_vec(1, 1, vec![0.3]).unwrap();
        let hidden = Tensor::from_vec(1, 1, vec![0.7]).unwrap();
        let next = cell.step(&input, &hidden).unwrap();
        assert_abs_diff_eq!(next.data()[0], 0.7, epsilon = 1e-4);
    }
}

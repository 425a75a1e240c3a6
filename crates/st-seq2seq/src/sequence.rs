// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Batch-first sequence views over 2D tensors.

use crate::error::{Seq2seqError, Seq2seqResult};
use st_nn::RecurrentState;
use st_tensor::Tensor;

/// `(batch, steps, width)` tensor stored as `batch * steps` rows, row
/// `b * steps + t`.
#[derive(Clone, Debug, PartialEq)]
pub struct SequenceTensor {
    data: Tensor,
    batch: usize,
    steps: usize,
}

impl SequenceTensor {
    pub fn new(data: Tensor, batch: usize, steps: usize) -> Seq2seqResult<Self> {
        if batch == 0 || steps == 0 || data.rows() != batch * steps {
            return Err(Seq2seqError::ShapeMismatch {
                context: "SequenceTensor::new",
                expected: (batch * steps, data.cols()),
                got: data.shape(),
            });
        }
        Ok(Self { data, batch, steps })
    }

    /// Interleaves per-step `(batch, width)` tensors into batch-first order.
    pub fn from_steps(steps: &[Tensor]) -> Seq2seqResult<Self> {
        let Some(first) = steps.first() else {
            return Err(Seq2seqError::MalformedTarget(
                "sequence needs at least one step".into(),
            ));
        };
        let (batch, width) = first.shape();
        let mut data = Vec::with_capacity(batch * steps.len() * width);
        for b in 0..batch {
            for step in steps {
                if step.shape() != (batch, width) {
                    return Err(Seq2seqError::ShapeMismatch {
                        context: "SequenceTensor::from_steps",
                        expected: (batch, width),
                        got: step.shape(),
                    });
                }
                data.extend_from_slice(step.row(b)?);
            }
        }
        let tensor = Tensor::from_vec(batch * steps.len(), width, data)?;
        Self::new(tensor, batch, steps.len())
    }

    pub fn batch(&self) -> usize {
        self.batch
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn width(&self) -> usize {
        self.data.cols()
    }

    /// Flattened `(batch * steps, width)` view.
    pub fn tensor(&self) -> &Tensor {
        &self.data
    }

    pub fn at(&self, batch: usize, step: usize) -> Seq2seqResult<&[f32]> {
        Ok(self.data.row(batch * self.steps + step)?)
    }

    /// Rows of step `t` for every batch entry, shaped `(batch, width)`.
    pub fn step(&self, step: usize) -> Seq2seqResult<Tensor> {
        let rows: Vec<usize> = (0..self.batch).map(|b| b * self.steps + step).collect();
        Ok(self.data.select_rows(&rows)?)
    }

    /// Rows of one batch entry, shaped `(steps, width)`.
    pub fn example(&self, batch: usize) -> Seq2seqResult<Tensor> {
        let rows: Vec<usize> = (batch * self.steps..(batch + 1) * self.steps).collect();
        Ok(self.data.select_rows(&rows)?)
    }

    pub fn map_tensor(
        &self,
        f: impl FnOnce(&Tensor) -> Seq2seqResult<Tensor>,
    ) -> Seq2seqResult<Self> {
        let data = f(&self.data)?;
        if data.shape() != self.data.shape() {
            return Err(Seq2seqError::ShapeMismatch {
                context: "SequenceTensor::map_tensor",
                expected: self.data.shape(),
                got: data.shape(),
            });
        }
        Ok(Self {
            data,
            batch: self.batch,
            steps: self.steps,
        })
    }
}

/// Final encoder state laid out as `(slots * batch, width)` with
/// `slots = layers * directions`, slot-major.
#[derive(Clone, Debug, PartialEq)]
pub struct EncoderHidden {
    state: RecurrentState,
    slots: usize,
}

impl EncoderHidden {
    pub fn new(state: RecurrentState, slots: usize) -> Seq2seqResult<Self> {
        let rows = state.hidden.rows();
        if slots == 0 || rows % slots != 0 {
            return Err(Seq2seqError::ShapeMismatch {
                context: "EncoderHidden::new",
                expected: (slots, state.hidden.cols()),
                got: state.hidden.shape(),
            });
        }
        if let Some(cell) = &state.cell {
            if cell.shape() != state.hidden.shape() {
                return Err(Seq2seqError::ShapeMismatch {
                    context: "EncoderHidden::new cell",
                    expected: state.hidden.shape(),
                    got: cell.shape(),
                });
            }
        }
        Ok(Self { state, slots })
    }

    pub fn slots(&self) -> usize {
        self.slots
    }

    pub fn batch(&self) -> usize {
        self.state.hidden.rows() / self.slots
    }

    pub fn width(&self) -> usize {
        self.state.hidden.cols()
    }

    pub fn hidden(&self) -> &Tensor {
        &self.state.hidden
    }

    pub fn cell(&self) -> Option<&Tensor> {
        self.state.cell.as_ref()
    }

    pub fn state(&self) -> &RecurrentState {
        &self.state
    }

    /// Replaces the hidden rows, leaving any cell state untouched.
    pub fn with_hidden(&self, hidden: Tensor) -> Seq2seqResult<Self> {
        Self::new(
            RecurrentState {
                hidden,
                cell: self.state.cell.clone(),
            },
            self.slots,
        )
    }

    /// Folds `(layers * 2)` direction slots into `layers` slots of twice the
    /// width, forward features first.
    pub fn merge_directions(&self) -> Seq2seqResult<Self> {
        if self.slots % 2 != 0 {
            return Err(Seq2seqError::ShapeMismatch {
                context: "EncoderHidden::merge_directions",
                expected: (self.slots + 1, self.width()),
                got: (self.slots, self.width()),
            });
        }
        let batch = self.batch();
        let mut hidden = Vec::with_capacity(self.slots / 2);
        let mut cells = Vec::with_capacity(self.slots / 2);
        for layer in 0..self.slots / 2 {
            let (fwd_h, fwd_c) = self.state.slot(2 * layer, batch)?;
            let (bwd_h, bwd_c) = self.state.slot(2 * layer + 1, batch)?;
            hidden.push(Tensor::cat_cols(&[fwd_h, bwd_h])?);
            if let (Some(fwd), Some(bwd)) = (fwd_c, bwd_c) {
                cells.push(Tensor::cat_cols(&[fwd, bwd])?);
            }
        }
        let cell = if cells.is_empty() {
            None
        } else {
            Some(Tensor::cat_rows(&cells)?)
        };
        Self::new(
            RecurrentState {
                hidden: Tensor::cat_rows(&hidden)?,
                cell,
            },
            self.slots / 2,
        )
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Stacked recurrent layers.
//!
//! Hidden state is stored as one `(slots * batch, hidden)` tensor where
//! `slots = layers * directions` and slot `layer * directions + direction`
//! owns rows `[slot * batch, (slot + 1) * batch)`.

use crate::layers::gru::GruCell;
use crate::layers::lstm::LstmCell;
use crate::module::{Parameter, Parameterised};
use crate::{PureResult, Tensor, TensorError};
use serde::{Deserialize, Serialize};

/// Recurrent cell family.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellKind {
    #[default]
    Gru,
    Lstm,
}

/// Hidden state, plus the cell state for LSTM stacks.
#[derive(Clone, Debug, PartialEq)]
pub struct RecurrentState {
    pub hidden: Tensor,
    pub cell: Option<Tensor>,
}

impl RecurrentState {
    pub fn zeros(
        kind: CellKind,
        slots: usize,
        batch: usize,
        hidden_dim: usize,
    ) -> PureResult<Self> {
        let hidden = Tensor::zeros(slots * batch, hidden_dim)?;
        let cell = match kind {
            CellKind::Gru => None,
            CellKind::Lstm => Some(hidden.clone()),
        };
        Ok(Self { hidden, cell })
    }

    /// Rows owned by `slot`.
    pub fn slot(&self, slot: usize, batch: usize) -> PureResult<(Tensor, Option<Tensor>)> {
        let rows: Vec<usize> = (slot * batch..(slot + 1) * batch).collect();
        let hidden = self.hidden.select_rows(&rows)?;
        let cell = match &self.cell {
            Some(cell) => Some(cell.select_rows(&rows)?),
            None => None,
        };
        Ok((hidden, cell))
    }

    fn from_slots(slots: Vec<(Tensor, Option<Tensor>)>) -> PureResult<Self> {
        let (hidden, cells): (Vec<Tensor>, Vec<Option<Tensor>>) = slots.into_iter().unzip();
        let cell = if cells.iter().all(Option::is_some) {
            let cells: Vec<Tensor> = cells.into_iter().flatten().collect();
            Some(Tensor::cat_rows(&cells)?)
        } else {
            None
        };
        Ok(Self {
            hidden: Tensor::cat_rows(&hidden)?,
            cell,
        })
    }
}

#[derive(Debug, Clone)]
enum Cell {
    Gru(GruCell),
    Lstm(LstmCell),
}

impl Cell {
    fn step(
        &self,
        input: &Tensor,
        hidden: &Tensor,
        cell: Option<&Tensor>,
    ) -> PureResult<(Tensor, Option<Tensor>)> {
        match (self, cell) {
            (Cell::Gru(gru), _) => Ok((gru.step(input, hidden)?, None)),
            (Cell::Lstm(lstm), Some(cell)) => {
                let (h, c) = lstm.step(input, hidden, cell)?;
                Ok((h, Some(c)))
            }
            (Cell::Lstm(_), None) => Err(TensorError::InvalidValue {
                label: "lstm_cell_state_missing",
            }),
        }
    }

    fn params(&self) -> &dyn Parameterised {
        match self {
            Cell::Gru(gru) => gru,
            Cell::Lstm(lstm) => lstm,
        }
    }

    fn params_mut(&mut self) -> &mut dyn Parameterised {
        match self {
            Cell::Gru(gru) => gru,
            Cell::Lstm(lstm) => lstm,
        }
    }
}

/// Multi-layer, optionally bidirectional, GRU or LSTM stack.
#[derive(Debug, Clone)]
pub struct Recurrent {
    kind: CellKind,
    hidden_dim: usize,
    layers: usize,
    bidirectional: bool,
    cells: Vec<Cell>,
}

impl Recurrent {
    pub fn new(
        name: impl Into<String>,
        kind: CellKind,
        input_dim: usize,
        hidden_dim: usize,
        layers: usize,
        bidirectional: bool,
        seed: Option<u64>,
    ) -> PureResult<Self> {
        if layers == 0 {
            return Err(TensorError::InvalidDimensions {
                rows: layers,
                cols: hidden_dim,
            });
        }
        let name = name.into();
        let directions = if bidirectional { 2 } else { 1 };
        let mut cells = Vec::with_capacity(layers * directions);
        for layer in 0..layers {
            let layer_input = if layer == 0 {
                input_dim
            } else {
                hidden_dim * directions
            };
            for direction in 0..directions {
                let suffix = if direction == 0 { "" } else { "_reverse" };
                let cell_name = format!("{name}::l{layer}{suffix}");
                cells.push(match kind {
                    CellKind::Gru => {
                        Cell::Gru(GruCell::new(cell_name, layer_input, hidden_dim, seed)?)
                    }
                    CellKind::Lstm => {
                        Cell::Lstm(LstmCell::new(cell_name, layer_input, hidden_dim, seed)?)
                    }
                });
            }
        }
        Ok(Self {
            kind,
            hidden_dim,
            layers,
            bidirectional,
            cells,
        })
    }

    pub fn kind(&self) -> CellKind {
        self.kind
    }

    pub fn hidden_dim(&self) -> usize {
        self.hidden_dim
    }

    pub fn layers(&self) -> usize {
        self.layers
    }

    pub fn directions(&self) -> usize {
        if self.bidirectional {
            2
        } else {
            1
        }
    }

    /// Number of state slots (`layers * directions`).
    pub fn slots(&self) -> usize {
        self.layers * self.directions()
    }

    pub fn zero_state(&self, batch: usize) -> PureResult<RecurrentState> {
        RecurrentState::zeros(self.kind, self.slots(), batch, self.hidden_dim)
    }

    fn check_state(&self, state: &RecurrentState, batch: usize) -> PureResult<()> {
        let expected = (self.slots() * batch, self.hidden_dim);
        if state.hidden.shape() != expected {
            return Err(TensorError::ShapeMismatch {
                left: state.hidden.shape(),
                right: expected,
            });
        }
        if self.kind == CellKind::Lstm && state.cell.is_none() {
            return Err(TensorError::InvalidValue {
                label: "lstm_cell_state_missing",
            });
        }
        Ok(())
    }

    /// Advances a unidirectional stack by one step. Returns the top layer
    /// output `(batch, hidden)` and the updated state.
    pub fn step(
        &self,
        input: &Tensor,
        state: &RecurrentState,
    ) -> PureResult<(Tensor, RecurrentState)> {
        if self.bidirectional {
            return Err(TensorError::InvalidValue {
                label: "bidirectional_single_step",
            });
        }
        let batch = input.rows();
        self.check_state(state, batch)?;
        let mut layer_input = input.clone();
        let mut next = Vec::with_capacity(self.layers);
        for (layer, cell) in self.cells.iter().enumerate() {
            let (hidden, cell_state) = state.slot(layer, batch)?;
            let (h, c) = cell.step(&layer_input, &hidden, cell_state.as_ref())?;
            layer_input = h.clone();
            next.push((h, c));
        }
        Ok((layer_input, RecurrentState::from_slots(next)?))
    }

    /// Runs a whole sequence given one `(batch, input)` tensor per step.
    ///
    /// Outputs are `(batch, directions * hidden)` per step, with the reverse
    /// direction's features appended after the forward ones.
    pub fn forward_sequence(
        &self,
        inputs: &[Tensor],
        initial: Option<&RecurrentState>,
    ) -> PureResult<(Vec<Tensor>, RecurrentState)> {
        let Some(first) = inputs.first() else {
            return Err(TensorError::EmptyInput("Recurrent::forward_sequence"));
        };
        let batch = first.rows();
        let state = match initial {
            Some(state) => {
                self.check_state(state, batch)?;
                state.clone()
            }
            None => self.zero_state(batch)?,
        };
        let directions = self.directions();
        let mut layer_inputs = inputs.to_vec();
        let mut finals = Vec::with_capacity(self.slots());
        for layer in 0..self.layers {
            let mut per_direction = Vec::with_capacity(directions);
            for direction in 0..directions {
                let slot = layer * directions + direction;
                let (mut hidden, mut cell_state) = state.slot(slot, batch)?;
                let mut outputs = vec![None; layer_inputs.len()];
                let order: Box<dyn Iterator<Item = usize>> = if direction == 0 {
                    Box::new(0..layer_inputs.len())
                } else {
                    Box::new((0..layer_inputs.len()).rev())
                };
                for t in order {
                    let (h, c) =
                        self.cells[slot].step(&layer_inputs[t], &hidden, cell_state.as_ref())?;
                    outputs[t] = Some(h.clone());
                    hidden = h;
                    cell_state = c;
                }
                finals.push((hidden, cell_state));
                per_direction.push(outputs.into_iter().flatten().collect::<Vec<_>>());
            }
            layer_inputs = if directions == 1 {
                per_direction.remove(0)
            } else {
                per_direction[0]
                    .iter()
                    .zip(per_direction[1].iter())
                    .map(|(fwd, bwd)| Tensor::cat_cols(&[fwd.clone(), bwd.clone()]))
                    .collect::<PureResult<Vec<_>>>()?
            };
        }
        Ok((layer_inputs, RecurrentState::from_slots(finals)?))
    }
}

impl Parameterised for Recurrent {
    fn visit_parameters(
        &self,
        visitor: &mut dyn FnMut(&Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        for cell in &self.cells {
            cell.params().visit_parameters(visitor)?;
        }
        Ok(())
    }

    fn visit_parameters_mut(
        &mut self,
        visitor: &mut dyn FnMut(&mut Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        for cell in &mut self.cells {
            cell.params_mut().visit_parameters_mut(visitor)?;
        }
        Ok(())
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Top-k magnitude gating and the shared capacity handle.

use crate::error::{Seq2seqError, Seq2seqResult};
use serde::{Deserialize, Serialize};
use st_tensor::Tensor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Encoder tensor the gate is applied to. Exactly one may be chosen.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SparsityTarget {
    EncoderHidden,
    EncoderOutputs,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SparsityConfig {
    pub enabled: bool,
    pub initial_k: usize,
    pub target: Option<SparsityTarget>,
}

impl Default for SparsityConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            initial_k: 100,
            target: None,
        }
    }
}

impl SparsityConfig {
    pub fn enabled(initial_k: usize, target: SparsityTarget) -> Self {
        Self {
            enabled: true,
            initial_k,
            target: Some(target),
        }
    }
}

/// Keeps the `k` largest-magnitude entries of every row.
pub struct SparsityGate;

impl SparsityGate {
    /// Returns a masked copy of `tensor`; the input is never modified.
    ///
    /// Ties at the k-th magnitude resolve to the lower column index, so the
    /// kept set for a smaller k is always a subset of the set for a larger k.
    pub fn apply(tensor: &Tensor, k: usize) -> Seq2seqResult<Tensor> {
        if k == 0 {
            return Err(Seq2seqError::InvalidSparsityK);
        }
        let width = tensor.cols();
        if k > width {
            return Err(Seq2seqError::SparsityWidth { k, width });
        }
        let mut masked = tensor.clone();
        if k == width {
            return Ok(masked);
        }
        let mut order: Vec<usize> = Vec::with_capacity(width);
        for row in masked.data_mut().chunks_mut(width) {
            order.clear();
            order.extend(0..width);
            order.sort_by(|&a, &b| row[b].abs().total_cmp(&row[a].abs()).then(a.cmp(&b)));
            for &col in &order[k..] {
                row[col] = 0.0;
            }
        }
        Ok(masked)
    }
}

/// Current k, shared between the decoder (reader) and the controller (the
/// only writer during training).
#[derive(Clone, Debug)]
pub struct SparsityHandle {
    k: Arc<AtomicUsize>,
}

impl SparsityHandle {
    pub fn new(initial_k: usize) -> Seq2seqResult<Self> {
        if initial_k == 0 {
            return Err(Seq2seqError::InvalidSparsityK);
        }
        Ok(Self {
            k: Arc::new(AtomicUsize::new(initial_k)),
        })
    }

    pub fn get(&self) -> usize {
        self.k.load(Ordering::Acquire)
    }

    pub(crate) fn set(&self, k: usize) {
        self.k.store(k, Ordering::Release);
    }
}

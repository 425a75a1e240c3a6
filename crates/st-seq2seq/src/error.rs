// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use st_tensor::TensorError;
use thiserror::Error;

/// Errors raised while building or running the sequence stack.
#[derive(Debug, Error)]
pub enum Seq2seqError {
    /// Invalid experiment setup detected at construction time.
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Tensor(#[from] TensorError),
    #[error("sparsity k={k} exceeds row width {width}")]
    SparsityWidth { k: usize, width: usize },
    #[error("sparsity k must be at least 1")]
    InvalidSparsityK,
    #[error("malformed target sequence: {0}")]
    MalformedTarget(String),
    #[error("teacher forcing ratio {ratio} requires a target sequence")]
    TeacherForcingWithoutTarget { ratio: f32 },
    #[error("attention requires encoder outputs")]
    MissingEncoderOutputs,
    #[error("sparsity targets the encoder hidden state but none was supplied")]
    MissingEncoderHidden,
    #[error("hard guidance requires an alignment target")]
    MissingAlignment,
    #[error("{context}: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        context: &'static str,
        expected: (usize, usize),
        got: (usize, usize),
    },
    #[error("unknown metric `{0}`")]
    UnknownMetric(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Seq2seqResult<T> = Result<T, Seq2seqError>;

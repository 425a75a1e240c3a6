// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Sequence-to-sequence decoding on top of the SpiralTorch tensor stack.
//!
//! The decoder runs either step by step or over the whole shifted target at
//! once, optionally attends over the encoder outputs, and can gate the
//! encoder representation down to its `k` largest-magnitude features. A
//! plateau controller shrinks `k` when the tracked evaluation metric stops
//! improving.

pub mod aggregator;
pub mod attention;
pub mod batch;
pub mod checkpoint;
pub mod config;
pub mod controller;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod loss;
pub mod metrics;
pub mod model;
pub mod sequence;
pub mod sink;
pub mod sparsity;
pub mod trainer;

pub use aggregator::LossAggregator;
pub use attention::{AlignmentTarget, AttentionMethod, AttentionModule};
pub use batch::{batches, Example, Seq2seqBatch, TokenBatch};
pub use checkpoint::Checkpoint;
pub use config::{
    AttentionPlacement, ControllerConfig, DecoderConfig, EncoderConfig, ExperimentConfig,
    LossConfig, TrainerConfig,
};
pub use controller::{ControllerDecision, SparsityController};
pub use decoder::{
    DecodeMode, DecodeOptions, DecoderInput, DecoderOutput, SequenceDecoder, SideChannel,
};
pub use encoder::{Encoder, EncoderOutput, RecurrentEncoder};
pub use error::{Seq2seqError, Seq2seqResult};
pub use loss::{AttentionLoss, L1Input, L1Loss, LossAccumulator, LossInput, NllLoss};
pub use metrics::{Metric, MetricKind, SequenceAccuracy, WordAccuracy};
pub use model::Seq2seq;
pub use sequence::{EncoderHidden, SequenceTensor};
pub use sink::{JsonLinesSink, MemorySink, MetricsSink, TracingSink};
pub use sparsity::{SparsityConfig, SparsityGate, SparsityHandle, SparsityTarget};
pub use trainer::{PassSummary, Trainer, TrainingLog};

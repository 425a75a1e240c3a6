// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use approx::assert_abs_diff_eq;
use st_nn::RecurrentState;
use st_seq2seq::sparsity::SparsityTarget;
use st_seq2seq::{
    AlignmentTarget, AttentionLoss, AttentionMethod, AttentionPlacement, DecodeOptions,
    DecoderConfig, DecoderInput, DecoderOutput, EncoderHidden, L1Input, L1Loss, LossAccumulator,
    LossAggregator, LossConfig, LossInput, NllLoss, Seq2seqError, SequenceDecoder, SequenceTensor,
    SparsityGate, TokenBatch,
};
use st_tensor::Tensor;

fn nonzero_columns(row: &[f32]) -> Vec<usize> {
    row.iter()
        .enumerate()
        .filter(|(_, v)| **v != 0.0)
        .map(|(i, _)| i)
        .collect()
}

#[test]
fn smaller_k_keeps_a_subset_of_larger_k() {
    let tensor = Tensor::random_uniform(16, 10, -2.0, 2.0, Some(99)).unwrap();
    for k_large in 2..=10 {
        let large = SparsityGate::apply(&tensor, k_large).unwrap();
        for k_small in 1..k_large {
            let small = SparsityGate::apply(&tensor, k_small).unwrap();
            for (row_small, row_large) in small.iter_rows().zip(large.iter_rows()) {
                let kept_large = nonzero_columns(row_large);
                assert!(nonzero_columns(row_small)
                    .iter()
                    .all(|col| kept_large.contains(col)));
            }
        }
    }
}

#[test]
fn gate_keeps_exactly_k_entries_per_dense_row() {
    let tensor = Tensor::random_uniform(8, 7, 0.5, 1.5, Some(5)).unwrap();
    for k in 1..=7 {
        let gated = SparsityGate::apply(&tensor, k).unwrap();
        for (row, original) in gated.iter_rows().zip(tensor.iter_rows()) {
            let kept = nonzero_columns(row);
            assert_eq!(kept.len(), k);
            for col in kept {
                assert_eq!(row[col], original[col]);
            }
        }
    }
}

#[test]
fn rows_with_few_nonzeros_keep_at_most_k() {
    let tensor = Tensor::from_vec(2, 5, vec![0.0, 3.0, 0.0, -1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0])
        .unwrap();
    let gated = SparsityGate::apply(&tensor, 4).unwrap();
    assert_eq!(nonzero_columns(gated.row(0).unwrap()), vec![1, 3]);
    assert!(nonzero_columns(gated.row(1).unwrap()).is_empty());
    assert!(matches!(
        SparsityGate::apply(&tensor, 6),
        Err(Seq2seqError::SparsityWidth { k: 6, width: 5 })
    ));
    assert!(matches!(
        SparsityGate::apply(&tensor, 0),
        Err(Seq2seqError::InvalidSparsityK)
    ));
}

fn hidden_state(seed: u64) -> EncoderHidden {
    let hidden = Tensor::random_uniform(2, 6, -1.0, 1.0, Some(seed)).unwrap();
    EncoderHidden::new(RecurrentState { hidden, cell: None }, 1).unwrap()
}

fn memory(seed: u64) -> SequenceTensor {
    SequenceTensor::new(
        Tensor::random_uniform(6, 6, -1.0, 1.0, Some(seed)).unwrap(),
        2,
        3,
    )
    .unwrap()
}

#[test]
fn decoder_gates_a_copy_of_the_encoder_hidden_state() {
    let config = DecoderConfig::new(8, 6)
        .with_sparsity(2, SparsityTarget::EncoderHidden)
        .with_seed(3);
    let mut sparse = SequenceDecoder::new(config.clone()).unwrap();
    let mut dense_config = config;
    dense_config.sparsity.enabled = false;
    let mut dense = SequenceDecoder::new(dense_config).unwrap();

    let hidden = hidden_state(7);
    let before = hidden.clone();
    let targets = TokenBatch::new(2, 3, vec![1, 4, 2, 1, 5, 2]).unwrap();
    let input = DecoderInput {
        targets: Some(&targets),
        encoder_hidden: Some(&hidden),
        ..DecoderInput::default()
    };
    let gated = sparse.forward(input, &DecodeOptions::default()).unwrap();
    let plain = dense.forward(input, &DecodeOptions::default()).unwrap();

    assert_eq!(hidden, before);
    assert_eq!(gated.side.encoder_hidden.as_ref(), Some(&before));
    assert_ne!(gated.outputs, plain.outputs);
    assert_eq!(sparse.k(), Some(2));
    assert_eq!(dense.k(), None);
}

#[test]
fn decoder_gates_encoder_outputs_when_targeted() {
    let config = DecoderConfig::new(8, 6)
        .with_attention(AttentionPlacement::PostRnn, AttentionMethod::Dot)
        .with_sparsity(3, SparsityTarget::EncoderOutputs)
        .with_seed(9);
    let mut decoder = SequenceDecoder::new(config).unwrap();
    let outputs = memory(12);
    let before = outputs.clone();
    let hidden = hidden_state(13);
    let targets = TokenBatch::new(2, 3, vec![1, 4, 2, 1, 5, 2]).unwrap();
    let input = DecoderInput {
        targets: Some(&targets),
        encoder_hidden: Some(&hidden),
        encoder_outputs: Some(&outputs),
        alignment: None,
    };
    let output = decoder.forward(input, &DecodeOptions::default()).unwrap();
    assert_eq!(outputs, before);
    assert_eq!(output.side.encoder_outputs.as_ref(), Some(&before));
}

#[test]
fn k_wider_than_the_state_fails_at_decode_time() {
    let config = DecoderConfig::new(8, 6)
        .with_sparsity(7, SparsityTarget::EncoderHidden)
        .with_seed(1);
    let mut decoder = SequenceDecoder::new(config).unwrap();
    let hidden = hidden_state(2);
    let input = DecoderInput {
        encoder_hidden: Some(&hidden),
        ..DecoderInput::default()
    };
    assert!(matches!(
        decoder.forward(input, &DecodeOptions::default()),
        Err(Seq2seqError::SparsityWidth { k: 7, width: 6 })
    ));
}

#[test]
fn fresh_accumulators_read_zero() {
    let losses: Vec<Box<dyn LossAccumulator>> = vec![
        Box::new(NllLoss::new(Some(0))),
        Box::new(L1Loss::new(L1Input::EncoderHidden)),
        Box::new(AttentionLoss::new()),
    ];
    for loss in &losses {
        let value = loss.get_loss();
        assert_eq!(value, 0.0);
        assert!(!value.is_nan());
    }
    let aggregator = LossAggregator::from_config(&LossConfig::default());
    assert_eq!(aggregator.weighted_total(), 0.0);
}

fn decode_with_attention() -> (DecoderOutput, TokenBatch, AlignmentTarget) {
    let config = DecoderConfig::new(8, 6)
        .with_attention(AttentionPlacement::PostRnn, AttentionMethod::General)
        .with_seed(17);
    let mut decoder = SequenceDecoder::new(config).unwrap();
    let hidden = hidden_state(18);
    let outputs = memory(19);
    let targets = TokenBatch::new(2, 4, vec![1, 4, 6, 2, 1, 5, 2, 0]).unwrap();
    let alignment = AlignmentTarget::new(2, 3, vec![0, 1, 2, 2, -1, -1]).unwrap();
    let input = DecoderInput {
        targets: Some(&targets),
        encoder_hidden: Some(&hidden),
        encoder_outputs: Some(&outputs),
        alignment: Some(&alignment),
    };
    let output = decoder.forward(input, &DecodeOptions::default()).unwrap();
    (output, targets, alignment)
}

#[test]
fn weighted_total_is_independent_of_objective_order() {
    let (output, targets, alignment) = decode_with_attention();
    let input = LossInput::new(&output, &targets, Some(&alignment));

    let mut forward = LossAggregator::new();
    forward.push(Box::new(NllLoss::new(Some(0))), 1.0);
    forward.push(Box::new(L1Loss::new(L1Input::EncoderHidden)), 0.01);
    forward.push(Box::new(L1Loss::new(L1Input::EncoderOutputs)), 0.02);
    forward.push(Box::new(AttentionLoss::new()), 0.5);

    let mut reversed = LossAggregator::new();
    reversed.push(Box::new(AttentionLoss::new()), 0.5);
    reversed.push(Box::new(L1Loss::new(L1Input::EncoderOutputs)), 0.02);
    reversed.push(Box::new(L1Loss::new(L1Input::EncoderHidden)), 0.01);
    reversed.push(Box::new(NllLoss::new(Some(0))), 1.0);

    forward.eval_batch(&input).unwrap();
    reversed.eval_batch(&input).unwrap();

    let values = forward.values();
    let expected = values["nll_loss"]
        + 0.01 * values["l1_loss_encoder_hidden"]
        + 0.02 * values["l1_loss_encoder_outputs"]
        + 0.5 * values["attn_loss"];
    assert_abs_diff_eq!(forward.weighted_total(), expected, epsilon = 1e-6);
    assert_abs_diff_eq!(reversed.weighted_total(), expected, epsilon = 1e-6);
    assert_eq!(values, reversed.values());
    assert!(values.values().all(|v| v.is_finite() && *v > 0.0));
}

#[test]
fn losses_accumulate_across_batches() {
    let (output, targets, alignment) = decode_with_attention();
    let input = LossInput::new(&output, &targets, Some(&alignment));

    let mut once = L1Loss::new(L1Input::EncoderOutputs);
    once.eval_batch(&input).unwrap();
    let mut twice = L1Loss::new(L1Input::EncoderOutputs);
    twice.eval_batch(&input).unwrap();
    twice.eval_batch(&input).unwrap();
    assert_abs_diff_eq!(once.get_loss(), twice.get_loss(), epsilon = 1e-9);
    assert_abs_diff_eq!(
        twice.state().norm_term(),
        2.0 * once.state().norm_term(),
        epsilon = 1e-12
    );

    let mut nll = NllLoss::new(Some(0));
    nll.eval_batch(&input).unwrap();
    // three decode steps, each contributing one unit of normaliser
    assert_eq!(nll.state().norm_term(), 3.0);
    nll.reset();
    assert_eq!(nll.get_loss(), 0.0);

    let mut attention = AttentionLoss::new();
    attention.eval_batch(&input).unwrap();
    // row 1 is ignored after step 0, but no step is ignored entirely
    assert_eq!(attention.state().norm_term(), 3.0);
}

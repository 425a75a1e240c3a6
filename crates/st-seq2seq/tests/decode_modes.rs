// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use st_nn::{CellKind, RecurrentState};
use st_seq2seq::decoder::{DecodeState, StepOutput};
use st_seq2seq::{
    AlignmentTarget, AttentionMethod, AttentionPlacement, DecodeMode, DecodeOptions, DecoderConfig,
    DecoderInput, EncoderHidden, Seq2seqError, SequenceDecoder, SequenceTensor, TokenBatch,
};
use st_tensor::Tensor;

const VOCAB: usize = 9;
const HIDDEN: usize = 6;
const BATCH: usize = 3;
const SOURCE_LEN: usize = 4;

fn encoder_hidden(cell: CellKind, layers: usize, seed: u64) -> EncoderHidden {
    let rows = layers * BATCH;
    let hidden = Tensor::random_uniform(rows, HIDDEN, -1.0, 1.0, Some(seed)).unwrap();
    let cell = match cell {
        CellKind::Gru => None,
        CellKind::Lstm => {
            Some(Tensor::random_uniform(rows, HIDDEN, -1.0, 1.0, Some(seed + 1)).unwrap())
        }
    };
    EncoderHidden::new(RecurrentState { hidden, cell }, layers).unwrap()
}

fn encoder_outputs(seed: u64) -> SequenceTensor {
    let data = Tensor::random_uniform(BATCH * SOURCE_LEN, HIDDEN, -1.0, 1.0, Some(seed)).unwrap();
    SequenceTensor::new(data, BATCH, SOURCE_LEN).unwrap()
}

fn targets() -> TokenBatch {
    // SOS = 1, EOS = 2, pad = 0
    TokenBatch::new(
        BATCH,
        5,
        vec![
            1, 4, 5, 6, 2, //
            1, 3, 2, 0, 0, //
            1, 8, 7, 2, 0,
        ],
    )
    .unwrap()
}

fn assert_modes_agree(config: DecoderConfig, layers: usize) {
    let cell = config.cell;
    let mut decoder = SequenceDecoder::new(config).unwrap();
    let hidden = encoder_hidden(cell, layers, 21);
    let outputs = encoder_outputs(33);
    let targets = targets();
    let input = DecoderInput {
        targets: Some(&targets),
        encoder_hidden: Some(&hidden),
        encoder_outputs: Some(&outputs),
        alignment: None,
    };

    let batched = decoder
        .forward(
            input,
            &DecodeOptions::default().force_mode(DecodeMode::Batched),
        )
        .unwrap();
    let unrolled = decoder
        .forward(
            input,
            &DecodeOptions::default()
                .with_teacher_forcing(1.0)
                .force_mode(DecodeMode::Unrolled),
        )
        .unwrap();

    assert_eq!(batched.mode, DecodeMode::Batched);
    assert_eq!(unrolled.mode, DecodeMode::Unrolled);
    assert!(batched.teacher_forcing && unrolled.teacher_forcing);
    assert_eq!(batched.outputs.len(), 4);
    assert_eq!(batched.outputs, unrolled.outputs);
    assert_eq!(batched.hidden, unrolled.hidden);
    assert_eq!(batched.side.sequence, unrolled.side.sequence);
    assert_eq!(batched.side.lengths, unrolled.side.lengths);
    assert_eq!(
        batched.side.attention_scores,
        unrolled.side.attention_scores
    );
}

#[test]
fn batched_and_unrolled_agree_without_attention() {
    for cell in [CellKind::Gru, CellKind::Lstm] {
        let config = DecoderConfig::new(VOCAB, HIDDEN)
            .with_cell(cell)
            .with_layers(2)
            .with_seed(5);
        assert_modes_agree(config, 2);
    }
}

#[test]
fn batched_and_unrolled_agree_with_post_rnn_attention() {
    let methods = [
        AttentionMethod::Dot,
        AttentionMethod::General,
        AttentionMethod::Concat,
        AttentionMethod::Mlp,
    ];
    for cell in [CellKind::Gru, CellKind::Lstm] {
        for method in methods {
            let config = DecoderConfig::new(VOCAB, HIDDEN)
                .with_cell(cell)
                .with_attention(AttentionPlacement::PostRnn, method)
                .with_seed(8);
            assert_modes_agree(config, 1);
        }
    }
}

#[test]
fn full_teacher_forcing_picks_batched_mode_for_post_rnn() {
    let config = DecoderConfig::new(VOCAB, HIDDEN)
        .with_attention(AttentionPlacement::PostRnn, AttentionMethod::Dot)
        .with_seed(2);
    let mut decoder = SequenceDecoder::new(config).unwrap();
    let hidden = encoder_hidden(CellKind::Gru, 1, 4);
    let outputs = encoder_outputs(6);
    let targets = targets();
    let input = DecoderInput {
        targets: Some(&targets),
        encoder_hidden: Some(&hidden),
        encoder_outputs: Some(&outputs),
        alignment: None,
    };
    let forced = decoder
        .forward(input, &DecodeOptions::default().with_teacher_forcing(1.0))
        .unwrap();
    assert_eq!(forced.mode, DecodeMode::Batched);
    let free = decoder.forward(input, &DecodeOptions::default()).unwrap();
    assert_eq!(free.mode, DecodeMode::Unrolled);
    assert!(!free.teacher_forcing);
}

#[test]
fn pre_rnn_attention_always_unrolls() {
    for full_focus in [false, true] {
        let config = DecoderConfig::new(VOCAB, HIDDEN)
            .with_attention(AttentionPlacement::PreRnn, AttentionMethod::Mlp)
            .with_full_focus(full_focus)
            .with_seed(3);
        let mut decoder = SequenceDecoder::new(config).unwrap();
        let hidden = encoder_hidden(CellKind::Gru, 1, 10);
        let outputs = encoder_outputs(11);
        let targets = targets();
        let input = DecoderInput {
            targets: Some(&targets),
            encoder_hidden: Some(&hidden),
            encoder_outputs: Some(&outputs),
            alignment: None,
        };
        let output = decoder
            .forward(input, &DecodeOptions::default().with_teacher_forcing(1.0))
            .unwrap();
        assert_eq!(output.mode, DecodeMode::Unrolled);
        assert!(output.teacher_forcing);
        let scores = output.side.attention_scores.as_ref().unwrap();
        assert_eq!(scores.len(), 4);
        for step in scores {
            assert_eq!(step.shape(), (BATCH, SOURCE_LEN));
            for row in step.iter_rows() {
                let total: f32 = row.iter().sum();
                assert!((total - 1.0).abs() < 1e-5);
            }
        }
        let forced = decoder.forward(
            input,
            &DecodeOptions::default().force_mode(DecodeMode::Batched),
        );
        assert!(matches!(forced, Err(Seq2seqError::Config(_))));
    }
}

#[test]
fn greedy_inference_runs_max_length_steps() {
    let config = DecoderConfig::new(VOCAB, HIDDEN)
        .with_max_length(7)
        .with_seed(12);
    let mut decoder = SequenceDecoder::new(config).unwrap();
    let hidden = encoder_hidden(CellKind::Gru, 1, 13);
    let input = DecoderInput {
        encoder_hidden: Some(&hidden),
        ..DecoderInput::default()
    };
    let output = decoder.forward(input, &DecodeOptions::default()).unwrap();
    assert_eq!(output.mode, DecodeMode::Unrolled);
    assert_eq!(output.outputs.len(), 7);
    assert_eq!(output.side.sequence.len(), 7);
    assert!(output.side.attention_scores.is_none());
    assert_eq!(output.side.lengths.len(), BATCH);
    assert!(output.side.lengths.iter().all(|&len| (1..=7).contains(&len)));

    let shorter = decoder
        .forward(input, &DecodeOptions::default().with_max_length(3))
        .unwrap();
    assert_eq!(shorter.outputs.len(), 3);

    let err = decoder
        .forward(input, &DecodeOptions::default().with_teacher_forcing(0.5))
        .unwrap_err();
    assert!(matches!(err, Seq2seqError::TeacherForcingWithoutTarget { .. }));
}

#[test]
fn zero_state_is_used_without_encoder_hidden() {
    let mut decoder = SequenceDecoder::new(DecoderConfig::new(VOCAB, HIDDEN).with_seed(1)).unwrap();
    let output = decoder
        .forward(
            DecoderInput::default(),
            &DecodeOptions::default().with_max_length(2),
        )
        .unwrap();
    assert_eq!(output.outputs[0].shape(), (1, VOCAB));
}

#[test]
fn short_targets_are_rejected() {
    let mut decoder = SequenceDecoder::new(DecoderConfig::new(VOCAB, HIDDEN).with_seed(1)).unwrap();
    let targets = TokenBatch::new(1, 1, vec![1]).unwrap();
    let input = DecoderInput {
        targets: Some(&targets),
        ..DecoderInput::default()
    };
    assert!(matches!(
        decoder.forward(input, &DecodeOptions::default()),
        Err(Seq2seqError::MalformedTarget(_))
    ));
}

#[test]
fn attention_needs_encoder_outputs() {
    let config = DecoderConfig::new(VOCAB, HIDDEN)
        .with_attention(AttentionPlacement::PostRnn, AttentionMethod::Dot);
    let mut decoder = SequenceDecoder::new(config).unwrap();
    let targets = targets();
    let input = DecoderInput {
        targets: Some(&targets),
        ..DecoderInput::default()
    };
    assert!(matches!(
        decoder.forward(input, &DecodeOptions::default()),
        Err(Seq2seqError::MissingEncoderOutputs)
    ));
}

#[test]
fn lstm_decoder_needs_encoder_cell_state() {
    let config = DecoderConfig::new(VOCAB, HIDDEN).with_cell(CellKind::Lstm);
    let mut decoder = SequenceDecoder::new(config).unwrap();
    let hidden = encoder_hidden(CellKind::Gru, 1, 3);
    let input = DecoderInput {
        encoder_hidden: Some(&hidden),
        ..DecoderInput::default()
    };
    assert!(matches!(
        decoder.forward(input, &DecodeOptions::default()),
        Err(Seq2seqError::Config(_))
    ));
}

#[test]
fn hard_guidance_follows_the_alignment_target() {
    let config = DecoderConfig::new(VOCAB, HIDDEN)
        .with_attention(AttentionPlacement::PostRnn, AttentionMethod::Hard)
        .with_seed(4);
    let mut decoder = SequenceDecoder::new(config).unwrap();
    let hidden = encoder_hidden(CellKind::Gru, 1, 14);
    let outputs = encoder_outputs(15);
    let targets = targets();
    // step 1 of row 0 is ignored, row 1 step 2 is out of range
    let alignment = AlignmentTarget::new(
        BATCH,
        4,
        vec![
            0, -1, 2, 3, //
            1, 1, 9, -1, //
            3, 2, 1, 0,
        ],
    )
    .unwrap();
    let input = DecoderInput {
        targets: Some(&targets),
        encoder_hidden: Some(&hidden),
        encoder_outputs: Some(&outputs),
        alignment: Some(&alignment),
    };
    for options in [
        DecodeOptions::default(),
        DecodeOptions::default().force_mode(DecodeMode::Batched),
    ] {
        let output = decoder.forward(input, &options).unwrap();
        let scores = output.side.attention_scores.unwrap();
        assert_eq!(scores[0].row(0).unwrap(), &[1.0, 0.0, 0.0, 0.0]);
        assert_eq!(scores[1].row(0).unwrap(), &[0.25; 4]);
        assert_eq!(scores[2].row(1).unwrap(), &[0.25; 4]);
        assert_eq!(scores[3].row(2).unwrap(), &[1.0, 0.0, 0.0, 0.0]);
        assert_eq!(scores[2].row(2).unwrap(), &[0.0, 1.0, 0.0, 0.0]);
    }

    let missing = DecoderInput {
        alignment: None,
        ..input
    };
    assert!(matches!(
        decoder.forward(missing, &DecodeOptions::default()),
        Err(Seq2seqError::MissingAlignment)
    ));
}

#[test]
fn recorded_length_is_first_eos_position_plus_one() {
    const EOS: usize = 2;
    let rows = [[0.1, 0.9, 0.0], [0.0, 0.1, 0.9]];
    let step = |symbols: [usize; 2]| {
        let data: Vec<Vec<f32>> = symbols.iter().map(|&s| rows_for(s, &rows)).collect();
        let log_probs = Tensor::from_rows(&data).unwrap();
        StepOutput {
            projection_input: log_probs.clone(),
            log_probs,
            attention: None,
        }
    };
    let state_hidden = RecurrentState {
        hidden: Tensor::zeros(2, 1).unwrap(),
        cell: None,
    };
    let mut state = DecodeState::new(state_hidden, 2, 6, EOS, false);
    // row 0 emits EOS first at position 3, row 1 at position 0
    let emitted = [[1, 2], [1, 1], [1, 2], [2, 2], [2, 1], [1, 2]];
    for (t, symbols) in emitted.into_iter().enumerate() {
        assert_eq!(state.record(t, step(symbols)), symbols.to_vec());
    }
    assert_eq!(state.lengths(), &[4, 1]);
}

fn rows_for(symbol: usize, rows: &[[f32; 3]; 2]) -> Vec<f32> {
    match symbol {
        1 => rows[0].to_vec(),
        _ => rows[1].to_vec(),
    }
}

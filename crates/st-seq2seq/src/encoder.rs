// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::batch::TokenBatch;
use crate::config::EncoderConfig;
use crate::error::Seq2seqResult;
use crate::sequence::{EncoderHidden, SequenceTensor};
use st_nn::{Embedding, Parameter, Parameterised, PureResult, Recurrent};

/// What the decoder consumes from an encoder.
#[derive(Clone, Debug)]
pub struct EncoderOutput {
    /// `(batch, source_len, output_width)`
    pub outputs: SequenceTensor,
    pub hidden: EncoderHidden,
}

/// Source-side network feeding the decoder.
pub trait Encoder: Parameterised {
    fn encode(&self, source: &TokenBatch) -> Seq2seqResult<EncoderOutput>;

    /// Width of one output position.
    fn output_width(&self) -> usize;
}

/// Embedding followed by a (optionally bidirectional) GRU/LSTM stack.
/// Padding positions are encoded like any other token.
#[derive(Debug, Clone)]
pub struct RecurrentEncoder {
    config: EncoderConfig,
    embedding: Embedding,
    rnn: Recurrent,
}

impl RecurrentEncoder {
    pub fn new(config: EncoderConfig) -> Seq2seqResult<Self> {
        config.validate()?;
        let embedding = Embedding::new(
            "encoder::embedding",
            config.vocab_size,
            config.embedding_size,
            config.seed,
        )?;
        let rnn = Recurrent::new(
            "encoder::rnn",
            config.cell,
            config.embedding_size,
            config.hidden_size,
            config.layers,
            config.bidirectional,
            config.seed,
        )?;
        Ok(Self {
            config,
            embedding,
            rnn,
        })
    }

    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }
}

impl Encoder for RecurrentEncoder {
    fn encode(&self, source: &TokenBatch) -> Seq2seqResult<EncoderOutput> {
        let embedded = (0..source.steps())
            .map(|t| self.embedding.lookup(&source.column(t)))
            .collect::<PureResult<Vec<_>>>()?;
        let (outputs, state) = self.rnn.forward_sequence(&embedded, None)?;
        Ok(EncoderOutput {
            outputs: SequenceTensor::from_steps(&outputs)?,
            hidden: EncoderHidden::new(state, self.rnn.slots())?,
        })
    }

    fn output_width(&self) -> usize {
        self.rnn.hidden_dim() * self.rnn.directions()
    }
}

impl Parameterised for RecurrentEncoder {
    fn visit_parameters(
        &self,
        visitor: &mut dyn FnMut(&Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        self.embedding.visit_parameters(visitor)?;
        self.rnn.visit_parameters(visitor)
    }

    fn visit_parameters_mut(
        &mut self,
        visitor: &mut dyn FnMut(&mut Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        self.embedding.visit_parameters_mut(visitor)?;
        self.rnn.visit_parameters_mut(visitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use st_nn::CellKind;

    #[test]
    fn bidirectional_lstm_shapes() {
        let encoder = RecurrentEncoder::new(EncoderConfig {
            vocab_size: 7,
            embedding_size: 3,
            hidden_size: 4,
            layers: 2,
            cell: CellKind::Lstm,
            bidirectional: true,
            seed: Some(1),
        })
        .unwrap();
        let source = TokenBatch::new(2, 5, vec![1, 2, 3, 4, 5, 6, 5, 4, 3, 0]).unwrap();
        let encoded = encoder.encode(&source).unwrap();
        assert_eq!(encoded.outputs.batch(), 2);
        assert_eq!(encoded.outputs.steps(), 5);
        assert_eq!(encoded.outputs.width(), 8);
        assert_eq!(encoder.output_width(), 8);
        assert_eq!(encoded.hidden.slots(), 4);
        assert_eq!(encoded.hidden.batch(), 2);
        assert!(encoded.hidden.cell().is_some());
    }
}

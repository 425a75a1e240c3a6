// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::batch::Seq2seqBatch;
use crate::config::ExperimentConfig;
use crate::decoder::{DecodeOptions, DecoderInput, DecoderOutput, SequenceDecoder};
use crate::encoder::{Encoder, RecurrentEncoder};
use crate::error::{Seq2seqError, Seq2seqResult};
use st_nn::{Parameter, Parameterised, PureResult};

/// Encoder and decoder run as one model. Every forward call attaches the
/// model's parameter values to the side channel.
#[derive(Debug)]
pub struct Seq2seq<E: Encoder = RecurrentEncoder> {
    encoder: E,
    decoder: SequenceDecoder,
}

impl<E: Encoder> Seq2seq<E> {
    pub fn new(encoder: E, decoder: SequenceDecoder) -> Seq2seqResult<Self> {
        if encoder.output_width() != decoder.config().hidden_size
            && decoder.config().uses_attention()
        {
            return Err(Seq2seqError::Config(format!(
                "encoder output width {} does not match decoder hidden size {}",
                encoder.output_width(),
                decoder.config().hidden_size
            )));
        }
        Ok(Self { encoder, decoder })
    }

    pub fn encoder(&self) -> &E {
        &self.encoder
    }

    pub fn decoder(&self) -> &SequenceDecoder {
        &self.decoder
    }

    pub fn decoder_mut(&mut self) -> &mut SequenceDecoder {
        &mut self.decoder
    }

    pub fn forward(
        &mut self,
        batch: &Seq2seqBatch,
        options: &DecodeOptions,
    ) -> Seq2seqResult<DecoderOutput> {
        let encoded = self.encoder.encode(&batch.source)?;
        let input = DecoderInput {
            targets: batch.target.as_ref(),
            encoder_hidden: Some(&encoded.hidden),
            encoder_outputs: Some(&encoded.outputs),
            alignment: batch.alignment.as_ref(),
        };
        let mut output = self.decoder.forward(input, options)?;
        output.side.model_parameters = Some(self.parameter_values()?);
        Ok(output)
    }
}

impl Seq2seq<RecurrentEncoder> {
    pub fn from_config(config: &ExperimentConfig) -> Seq2seqResult<Self> {
        config.validate()?;
        let encoder = RecurrentEncoder::new(config.encoder.clone())?;
        let decoder = SequenceDecoder::new(config.decoder.clone())?;
        Self::new(encoder, decoder)
    }
}

impl<E: Encoder> Parameterised for Seq2seq<E> {
    fn visit_parameters(
        &self,
        visitor: &mut dyn FnMut(&Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        self.encoder.visit_parameters(visitor)?;
        self.decoder.visit_parameters(visitor)
    }

    fn visit_parameters_mut(
        &mut self,
        visitor: &mut dyn FnMut(&mut Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        self.encoder.visit_parameters_mut(visitor)?;
        self.decoder.visit_parameters_mut(visitor)
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Experiment configuration.
//!
//! Every struct deserialises with defaults for missing fields, so a JSON file
//! only needs to name what it changes.

use crate::attention::AttentionMethod;
use crate::error::{Seq2seqError, Seq2seqResult};
use crate::loss::L1Input;
use crate::metrics::MetricKind;
use crate::sparsity::{SparsityConfig, SparsityTarget};
use serde::{Deserialize, Serialize};
use st_nn::CellKind;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Where the attention context enters the decoder step.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AttentionPlacement {
    #[default]
    None,
    /// Context from the current hidden state feeds the recurrent cell.
    PreRnn,
    /// Context from the new output is concatenated before the projection.
    PostRnn,
}

fn config_error(message: impl Into<String>) -> Seq2seqError {
    Seq2seqError::Config(message.into())
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    pub vocab_size: usize,
    pub max_length: usize,
    pub hidden_size: usize,
    pub layers: usize,
    pub cell: CellKind,
    /// The encoder feeding this decoder is bidirectional.
    pub bidirectional_encoder: bool,
    pub sos_id: usize,
    pub eos_id: usize,
    pub attention: AttentionPlacement,
    pub attention_method: Option<AttentionMethod>,
    pub full_focus: bool,
    pub sparsity: SparsityConfig,
    pub seed: Option<u64>,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            vocab_size: 16,
            max_length: 50,
            hidden_size: 128,
            layers: 1,
            cell: CellKind::Gru,
            bidirectional_encoder: false,
            sos_id: 1,
            eos_id: 2,
            attention: AttentionPlacement::None,
            attention_method: None,
            full_focus: false,
            sparsity: SparsityConfig::default(),
            seed: None,
        }
    }
}

impl DecoderConfig {
    pub fn new(vocab_size: usize, hidden_size: usize) -> Self {
        Self {
            vocab_size,
            hidden_size,
            ..Self::default()
        }
    }

    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = max_length;
        self
    }

    pub fn with_layers(mut self, layers: usize) -> Self {
        self.layers = layers;
        self
    }

    pub fn with_cell(mut self, cell: CellKind) -> Self {
        self.cell = cell;
        self
    }

    pub fn with_bidirectional_encoder(mut self, bidirectional: bool) -> Self {
        self.bidirectional_encoder = bidirectional;
        self
    }

    pub fn with_special_tokens(mut self, sos_id: usize, eos_id: usize) -> Self {
        self.sos_id = sos_id;
        self.eos_id = eos_id;
        self
    }

    pub fn with_attention(
        mut self,
        placement: AttentionPlacement,
        method: AttentionMethod,
    ) -> Self {
        self.attention = placement;
        self.attention_method = Some(method);
        self
    }

    pub fn with_full_focus(mut self, full_focus: bool) -> Self {
        self.full_focus = full_focus;
        self
    }

    pub fn with_sparsity(mut self, initial_k: usize, target: SparsityTarget) -> Self {
        self.sparsity = SparsityConfig::enabled(initial_k, target);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn uses_attention(&self) -> bool {
        self.attention != AttentionPlacement::None
    }

    /// Construction-time checks. Failing here means the experiment setup
    /// itself is invalid.
    pub fn validate(&self) -> Seq2seqResult<()> {
        if self.vocab_size == 0 || self.hidden_size == 0 || self.layers == 0 {
            return Err(config_error(
                "vocab_size, hidden_size and layers must be positive",
            ));
        }
        if self.max_length == 0 {
            return Err(config_error("max_length must be positive"));
        }
        if self.sos_id >= self.vocab_size || self.eos_id >= self.vocab_size {
            return Err(config_error(format!(
                "sos_id {} / eos_id {} outside vocabulary of {}",
                self.sos_id, self.eos_id, self.vocab_size
            )));
        }
        if self.sparsity.enabled {
            if self.sparsity.target.is_none() {
                return Err(config_error(
                    "k-sparsity is enabled but no target layer is designated",
                ));
            }
            if self.sparsity.initial_k == 0 {
                return Err(Seq2seqError::InvalidSparsityK);
            }
        }
        if self.uses_attention() && self.attention_method.is_none() {
            return Err(config_error(
                "attention is enabled but no scoring method is designated",
            ));
        }
        if !self.uses_attention() && self.attention_method.is_some() {
            return Err(config_error(
                "attention method provided but attention is disabled",
            ));
        }
        if self.full_focus && self.attention != AttentionPlacement::PreRnn {
            return Err(config_error("full focus requires pre-rnn attention"));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    pub vocab_size: usize,
    pub embedding_size: usize,
    pub hidden_size: usize,
    pub layers: usize,
    pub cell: CellKind,
    pub bidirectional: bool,
    pub seed: Option<u64>,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            vocab_size: 16,
            embedding_size: 128,
            hidden_size: 128,
            layers: 1,
            cell: CellKind::Gru,
            bidirectional: false,
            seed: None,
        }
    }
}

impl EncoderConfig {
    pub fn validate(&self) -> Seq2seqResult<()> {
        if self.vocab_size == 0
            || self.embedding_size == 0
            || self.hidden_size == 0
            || self.layers == 0
        {
            return Err(config_error("encoder sizes must be positive"));
        }
        Ok(())
    }

    pub fn directions(&self) -> usize {
        if self.bidirectional {
            2
        } else {
            1
        }
    }
}

/// Objectives and their weights.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LossConfig {
    /// Weight of the token NLL objective.
    pub xent: f32,
    pub pad_id: Option<usize>,
    /// One L1 penalty per listed input, each weighted by `scale_l1`.
    pub l1_inputs: Vec<L1Input>,
    pub scale_l1: f32,
    pub use_attention_loss: bool,
    pub scale_attention: f32,
}

impl Default for LossConfig {
    fn default() -> Self {
        Self {
            xent: 1.0,
            pad_id: None,
            l1_inputs: Vec::new(),
            scale_l1: 1.0,
            use_attention_loss: false,
            scale_attention: 1.0,
        }
    }
}

/// Plateau detection for the sparsity controller.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Log name of the tracked evaluation metric.
    pub metric: String,
    pub patience: usize,
    pub factor: f64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            metric: MetricKind::SequenceAccuracy.log_name().to_string(),
            patience: 20,
            factor: 0.9,
        }
    }
}

impl ControllerConfig {
    pub fn validate(&self) -> Seq2seqResult<()> {
        if self.patience == 0 {
            return Err(config_error("controller patience must be positive"));
        }
        if !(self.factor > 0.0 && self.factor <= 1.0) {
            return Err(config_error(format!(
                "controller factor {} outside (0, 1]",
                self.factor
            )));
        }
        MetricKind::from_log_name(&self.metric)?;
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f32,
    pub teacher_forcing_ratio: f32,
    pub seed: Option<u64>,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            epochs: 6,
            batch_size: 32,
            learning_rate: 0.001,
            teacher_forcing_ratio: 0.2,
            seed: None,
        }
    }
}

impl TrainerConfig {
    pub fn validate(&self) -> Seq2seqResult<()> {
        if self.batch_size == 0 {
            return Err(config_error("batch_size must be positive"));
        }
        if !(0.0..=1.0).contains(&self.teacher_forcing_ratio) {
            return Err(config_error(format!(
                "teacher_forcing_ratio {} outside [0, 1]",
                self.teacher_forcing_ratio
            )));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate >= 0.0) {
            return Err(config_error("learning_rate must be finite and non-negative"));
        }
        Ok(())
    }
}

/// Everything needed to build and train one model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    pub encoder: EncoderConfig,
    pub decoder: DecoderConfig,
    pub losses: LossConfig,
    pub metrics: Vec<MetricKind>,
    pub controller: Option<ControllerConfig>,
    pub trainer: TrainerConfig,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            encoder: EncoderConfig::default(),
            decoder: DecoderConfig::default(),
            losses: LossConfig::default(),
            metrics: vec![MetricKind::SequenceAccuracy],
            controller: None,
            trainer: TrainerConfig::default(),
        }
    }
}

impl ExperimentConfig {
    /// Task defaults: large batches, short patience, a small initial k.
    pub fn task_defaults() -> Self {
        let mut config = Self::default();
        config.trainer.batch_size = 128;
        config.trainer.epochs = 20;
        config.decoder.max_length = 60;
        config.decoder.sparsity = SparsityConfig::enabled(3, SparsityTarget::EncoderHidden);
        config.controller = Some(ControllerConfig {
            patience: 5,
            ..ControllerConfig::default()
        });
        config
    }

    /// Pre-rnn MLP attention baseline with a 512-wide GRU.
    pub fn baseline_2018() -> Self {
        let mut config = Self::default();
        config.trainer.batch_size = 1;
        config.encoder.embedding_size = 128;
        config.encoder.hidden_size = 512;
        config.encoder.cell = CellKind::Gru;
        config.decoder.hidden_size = 512;
        config.decoder.cell = CellKind::Gru;
        config.decoder.attention = AttentionPlacement::PreRnn;
        config.decoder.attention_method = Some(AttentionMethod::Mlp);
        config.decoder.full_focus = false;
        config.decoder.max_length = 50;
        config
    }

    /// The baseline with full focus and 16-wide embeddings.
    pub fn hupkes_2018() -> Self {
        let mut config = Self::baseline_2018();
        config.encoder.embedding_size = 16;
        config.decoder.full_focus = true;
        config
    }

    pub fn preset(name: &str) -> Seq2seqResult<Self> {
        match name {
            "task_defaults" => Ok(Self::task_defaults()),
            "baseline_2018" => Ok(Self::baseline_2018()),
            "hupkes_2018" | "Hupkes_2018" => Ok(Self::hupkes_2018()),
            other => Err(config_error(format!("unknown preset `{other}`"))),
        }
    }

    pub fn from_json_str(raw: &str) -> Seq2seqResult<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Seq2seqResult<Self> {
        let reader = BufReader::new(File::open(path.as_ref())?);
        let config: Self = serde_json::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Seq2seqResult<()> {
        self.encoder.validate()?;
        self.decoder.validate()?;
        self.trainer.validate()?;
        let expected_hidden = self.encoder.hidden_size * self.encoder.directions();
        if self.decoder.hidden_size != expected_hidden {
            return Err(config_error(format!(
                "decoder hidden_size {} must equal encoder hidden_size x directions = {}",
                self.decoder.hidden_size, expected_hidden
            )));
        }
        if self.decoder.bidirectional_encoder != self.encoder.bidirectional {
            return Err(config_error(
                "decoder.bidirectional_encoder must match encoder.bidirectional",
            ));
        }
        if self.decoder.layers != self.encoder.layers || self.decoder.cell != self.encoder.cell {
            return Err(config_error(
                "encoder and decoder must share layer count and cell kind",
            ));
        }
        if let Some(controller) = &self.controller {
            controller.validate()?;
            if !self.decoder.sparsity.enabled {
                return Err(config_error(
                    "a sparsity controller needs k-sparsity enabled",
                ));
            }
            let tracked = MetricKind::from_log_name(&controller.metric)?;
            if !self.metrics.contains(&tracked) {
                return Err(config_error(format!(
                    "controller tracks `{}` which is not in the metric list",
                    controller.metric
                )));
            }
        }
        if self.losses.use_attention_loss && !self.decoder.uses_attention() {
            return Err(config_error("attention loss needs attention enabled"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sparsity_without_target_is_rejected() {
        let mut config = DecoderConfig::new(10, 8);
        config.sparsity.enabled = true;
        assert!(matches!(config.validate(), Err(Seq2seqError::Config(_))));
        let config = DecoderConfig::new(10, 8).with_sparsity(4, SparsityTarget::EncoderOutputs);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn attention_without_method_is_rejected() {
        let mut config = DecoderConfig::new(10, 8);
        config.attention = AttentionPlacement::PostRnn;
        assert!(matches!(config.validate(), Err(Seq2seqError::Config(_))));
    }

    #[test]
    fn special_tokens_must_fit_the_vocabulary() {
        let config = DecoderConfig::new(10, 8).with_special_tokens(0, 9);
        assert_eq!((config.sos_id, config.eos_id), (0, 9));
        assert!(config.validate().is_ok());
        let config = DecoderConfig::new(10, 8).with_special_tokens(10, 2);
        assert!(matches!(config.validate(), Err(Seq2seqError::Config(_))));
    }

    #[test]
    fn full_focus_needs_pre_rnn() {
        let config = DecoderConfig::new(10, 8)
            .with_attention(AttentionPlacement::PostRnn, AttentionMethod::Dot)
            .with_full_focus(true);
        assert!(config.validate().is_err());
    }

    #[test]
    fn presets_validate() {
        for name in ["task_defaults", "baseline_2018", "Hupkes_2018"] {
            let config = ExperimentConfig::preset(name).unwrap();
            assert!(config.validate().is_ok(), "{name}");
        }
        let hupkes = ExperimentConfig::hupkes_2018();
        assert!(hupkes.decoder.full_focus);
        assert_eq!(hupkes.decoder.attention_method, Some(AttentionMethod::Mlp));
        assert_eq!(hupkes.encoder.embedding_size, 16);
        assert!(ExperimentConfig::preset("nope").is_err());
    }

    #[test]
    fn json_fills_defaults() {
        let raw = r#"{
            "decoder": {
                "vocab_size": 12,
                "hidden_size": 128,
                "attention": "post-rnn",
                "attention_method": "general",
                "sparsity": { "enabled": true, "initial_k": 64, "target": "encoder_outputs" }
            },
            "encoder": { "vocab_size": 9 },
            "metrics": ["word_acc", "seq_acc"],
            "controller": { "patience": 3 }
        }"#;
        let config = ExperimentConfig::from_json_str(raw).unwrap();
        assert_eq!(config.decoder.attention, AttentionPlacement::PostRnn);
        assert_eq!(
            config.decoder.sparsity.target,
            Some(SparsityTarget::EncoderOutputs)
        );
        let controller = config.controller.unwrap();
        assert_eq!(controller.metric, "seq_acc");
        assert_eq!(controller.patience, 3);
        assert_eq!(config.trainer.epochs, 6);
    }

    #[test]
    fn controller_requires_tracked_metric() {
        let mut config = ExperimentConfig::task_defaults();
        assert!(config.validate().is_ok());
        config.metrics = vec![MetricKind::WordAccuracy];
        assert!(config.validate().is_err());
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Epoch loop: train pass, evaluation pass, monitor passes, controller, sink.
//!
//! Loss accumulators and metrics are rebuilt for every pass. Parameter
//! updates only touch the decoder readout; the gradient of the weighted
//! token NLL with respect to the readout has a closed form, so no autograd
//! tape is needed.

use crate::aggregator::LossAggregator;
use crate::batch::{Seq2seqBatch, TokenBatch};
use crate::config::{ExperimentConfig, LossConfig, TrainerConfig};
use crate::controller::SparsityController;
use crate::decoder::{DecodeOptions, DecoderOutput};
use crate::encoder::Encoder;
use crate::error::{Seq2seqError, Seq2seqResult};
use crate::loss::LossInput;
use crate::metrics::{self, Metric, MetricKind};
use crate::model::Seq2seq;
use crate::sink::{MetricsSink, TracingSink};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use spiral_config::determinism;
use st_nn::{Linear, Module, Parameterised};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use tracing::{debug, info, info_span};

/// Per-epoch metric maps in the order they were produced.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingLog {
    pub epochs: Vec<BTreeMap<String, f64>>,
}

impl TrainingLog {
    pub fn last(&self) -> Option<&BTreeMap<String, f64>> {
        self.epochs.last()
    }

    /// Values of `key` across epochs, skipping epochs that lack it.
    pub fn history(&self, key: &str) -> Vec<f64> {
        self.epochs
            .iter()
            .filter_map(|record| record.get(key).copied())
            .collect()
    }

    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Seq2seqResult<()> {
        let writer = BufWriter::new(File::create(path.as_ref())?);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }
}

/// Values produced by one pass, keyed by log name without a split prefix.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PassSummary {
    pub losses: BTreeMap<String, f64>,
    pub weighted_loss: f64,
    pub metrics: BTreeMap<String, f64>,
}

impl PassSummary {
    fn write_into(&self, split: &str, record: &mut BTreeMap<String, f64>) {
        for (name, value) in self.losses.iter().chain(&self.metrics) {
            record.insert(format!("{split}_{name}"), *value);
        }
        record.insert(format!("{split}_loss"), self.weighted_loss);
    }
}

pub struct Trainer<S: MetricsSink = TracingSink> {
    config: TrainerConfig,
    losses: LossConfig,
    metrics: Vec<MetricKind>,
    controller: Option<SparsityController>,
    monitors: Vec<(String, Vec<Seq2seqBatch>)>,
    sink: S,
    rng: StdRng,
}

impl Trainer<TracingSink> {
    /// Trainer for `model` as described by `config`, logging through
    /// `tracing`.
    pub fn from_experiment<E: Encoder>(
        config: &ExperimentConfig,
        model: &Seq2seq<E>,
    ) -> Seq2seqResult<Self> {
        Self::from_experiment_with_sink(config, model, TracingSink)
    }
}

impl<S: MetricsSink> Trainer<S> {
    pub fn new(
        config: TrainerConfig,
        losses: LossConfig,
        metrics: Vec<MetricKind>,
        sink: S,
    ) -> Seq2seqResult<Self> {
        config.validate()?;
        let rng = determinism::rng_from_optional(
            determinism::derive_seed(config.seed, "trainer::shuffle"),
            "st-seq2seq/trainer/shuffle",
        );
        Ok(Self {
            config,
            losses,
            metrics,
            controller: None,
            monitors: Vec::new(),
            sink,
            rng,
        })
    }

    pub fn from_experiment_with_sink<E: Encoder>(
        config: &ExperimentConfig,
        model: &Seq2seq<E>,
        sink: S,
    ) -> Seq2seqResult<Self> {
        config.validate()?;
        let mut trainer = Self::new(
            config.trainer.clone(),
            config.losses.clone(),
            config.metrics.clone(),
            sink,
        )?;
        if let Some(controller) = &config.controller {
            let handle = model.decoder().sparsity().cloned().ok_or_else(|| {
                Seq2seqError::Config("a sparsity controller needs k-sparsity enabled".into())
            })?;
            trainer.set_controller(SparsityController::new(controller.clone(), handle)?)?;
        }
        Ok(trainer)
    }

    /// Installs the controller; its metric must be one of the tracked
    /// metrics.
    pub fn set_controller(&mut self, controller: SparsityController) -> Seq2seqResult<()> {
        let tracked = MetricKind::from_log_name(&controller.config().metric)?;
        if !self.metrics.contains(&tracked) {
            return Err(Seq2seqError::Config(format!(
                "controller metric `{}` is not among the tracked metrics",
                tracked.log_name()
            )));
        }
        self.controller = Some(controller);
        Ok(())
    }

    /// Adds a held-out set scored after every evaluation pass. Its values are
    /// logged as `<name>_<log_name>` and `<name>_loss`.
    pub fn with_monitor(
        mut self,
        name: impl Into<String>,
        batches: Vec<Seq2seqBatch>,
    ) -> Seq2seqResult<Self> {
        let name = name.into();
        if name.is_empty() || matches!(name.as_str(), "train" | "eval") {
            return Err(Seq2seqError::Config(format!(
                "monitor name `{name}` collides with a split prefix"
            )));
        }
        if self.monitors.iter().any(|(existing, _)| *existing == name) {
            return Err(Seq2seqError::Config(format!("monitor `{name}` registered twice")));
        }
        self.monitors.push((name, batches));
        Ok(self)
    }

    pub fn monitors(&self) -> impl Iterator<Item = &str> {
        self.monitors.iter().map(|(name, _)| name.as_str())
    }

    pub fn controller(&self) -> Option<&SparsityController> {
        self.controller.as_ref()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Runs the configured number of epochs and returns every logged record.
    pub fn train<E: Encoder>(
        &mut self,
        model: &mut Seq2seq<E>,
        train: &[Seq2seqBatch],
        eval: &[Seq2seqBatch],
    ) -> Seq2seqResult<TrainingLog> {
        let mut log = TrainingLog::default();
        let mut order: Vec<usize> = (0..train.len()).collect();
        for epoch in 1..=self.config.epochs {
            let _span = info_span!("epoch", epoch).entered();
            order.shuffle(&mut self.rng);
            let train_summary = self.train_pass(model, train, &order)?;
            let eval_summary = self.evaluate(model, eval)?;
            let mut monitor_summaries = Vec::with_capacity(self.monitors.len());
            for (name, batches) in &self.monitors {
                monitor_summaries.push((name.clone(), self.evaluate(model, batches)?));
            }

            if let Some(controller) = self.controller.as_mut() {
                controller.on_epoch_end(&eval_summary.metrics)?;
            }

            let mut record = BTreeMap::new();
            record.insert("epoch".to_string(), epoch as f64);
            train_summary.write_into("train", &mut record);
            eval_summary.write_into("eval", &mut record);
            for (name, summary) in &monitor_summaries {
                summary.write_into(name, &mut record);
            }
            if let Some(k) = model.decoder().k() {
                record.insert("k_sparsity".to_string(), k as f64);
            }
            info!(
                epoch,
                train_loss = train_summary.weighted_loss,
                eval_loss = eval_summary.weighted_loss,
                k = ?model.decoder().k(),
                "epoch finished"
            );
            self.sink.log_metrics(&record)?;
            log.epochs.push(record);
        }
        Ok(log)
    }

    /// Scores `batches` greedily without touching any parameter.
    pub fn evaluate<E: Encoder>(
        &self,
        model: &mut Seq2seq<E>,
        batches: &[Seq2seqBatch],
    ) -> Seq2seqResult<PassSummary> {
        let options = DecodeOptions::default();
        let eos_id = model.decoder().config().eos_id;
        let mut pass = Pass::new(&self.losses, &self.metrics, eos_id);
        for batch in batches {
            let targets = require_targets(batch)?;
            let output = model.forward(batch, &options)?;
            pass.observe(&output, targets, batch)?;
        }
        Ok(pass.finish())
    }

    fn train_pass<E: Encoder>(
        &self,
        model: &mut Seq2seq<E>,
        batches: &[Seq2seqBatch],
        order: &[usize],
    ) -> Seq2seqResult<PassSummary> {
        let options = DecodeOptions::default()
            .with_teacher_forcing(self.config.teacher_forcing_ratio);
        let eos_id = model.decoder().config().eos_id;
        let mut pass = Pass::new(&self.losses, &self.metrics, eos_id);
        for &index in order {
            let batch = &batches[index];
            let targets = require_targets(batch)?;
            let output = model.forward(batch, &options)?;
            pass.observe(&output, targets, batch)?;
            let readout = model.decoder_mut().readout_mut();
            readout_step(
                readout,
                &output,
                targets,
                self.losses.pad_id,
                self.losses.xent,
                self.config.learning_rate,
            )?;
        }
        Ok(pass.finish())
    }
}

impl<S: MetricsSink + std::fmt::Debug> std::fmt::Debug for Trainer<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Trainer")
            .field("config", &self.config)
            .field("losses", &self.losses)
            .field("metrics", &self.metrics)
            .field("controller", &self.controller)
            .field("monitors", &self.monitors().collect::<Vec<_>>())
            .field("sink", &self.sink)
            .finish()
    }
}

struct Pass {
    aggregator: LossAggregator,
    metrics: Vec<Box<dyn Metric>>,
}

impl Pass {
    fn new(losses: &LossConfig, kinds: &[MetricKind], eos_id: usize) -> Self {
        Self {
            aggregator: LossAggregator::from_config(losses),
            metrics: kinds
                .iter()
                .map(|kind| kind.build(losses.pad_id, eos_id))
                .collect(),
        }
    }

    fn observe(
        &mut self,
        output: &DecoderOutput,
        targets: &TokenBatch,
        batch: &Seq2seqBatch,
    ) -> Seq2seqResult<()> {
        self.aggregator
            .eval_batch(&LossInput::new(output, targets, batch.alignment.as_ref()))?;
        for metric in &mut self.metrics {
            metric.eval_batch(output, targets);
        }
        Ok(())
    }

    fn finish(self) -> PassSummary {
        PassSummary {
            losses: self.aggregator.values(),
            weighted_loss: self.aggregator.weighted_total(),
            metrics: metrics::snapshot(&self.metrics),
        }
    }
}

fn require_targets(batch: &Seq2seqBatch) -> Seq2seqResult<&TokenBatch> {
    batch
        .target
        .as_ref()
        .ok_or_else(|| Seq2seqError::MalformedTarget("training and evaluation need targets".into()))
}

/// One gradient step on the readout for the weighted per-step-mean NLL.
///
/// For a step with `n` non-pad rows out of `steps` scored steps the
/// gradient with respect to the logits is `xent * (p - onehot) / (n * steps)`
/// on non-pad rows and zero on pad rows.
pub fn readout_step(
    readout: &mut Linear,
    output: &DecoderOutput,
    targets: &TokenBatch,
    pad_id: Option<usize>,
    xent: f32,
    learning_rate: f32,
) -> Seq2seqResult<()> {
    let steps = output
        .outputs
        .len()
        .min(targets.steps().saturating_sub(1))
        .min(output.projection_inputs.len());
    if steps == 0 {
        return Ok(());
    }
    readout.zero_accumulators()?;
    for t in 0..steps {
        let log_probs = &output.outputs[t];
        let column = targets.column(t + 1);
        let valid = column.iter().filter(|&&id| Some(id) != pad_id).count();
        if valid == 0 {
            continue;
        }
        let vocab = log_probs.cols();
        let scale = xent / (valid * steps) as f32;
        let mut grad = log_probs.map(f32::exp)?;
        for (row, &target) in grad.data_mut().chunks_mut(vocab).zip(&column) {
            if Some(target) == pad_id {
                row.fill(0.0);
                continue;
            }
            if target >= vocab {
                return Err(Seq2seqError::MalformedTarget(format!(
                    "target id {target} outside vocabulary of {vocab}"
                )));
            }
            row[target] -= 1.0;
            row.iter_mut().for_each(|value| *value *= scale);
        }
        readout.backward(&output.projection_inputs[t], &grad)?;
    }
    readout.apply_step(learning_rate)?;
    debug!(steps, learning_rate, "readout step applied");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::{DecodeMode, SideChannel};
    use st_nn::RecurrentState;
    use st_tensor::Tensor;

    fn single_step_output(readout: &Linear, input: &Tensor) -> DecoderOutput {
        let log_probs = readout.forward(input).unwrap().row_log_softmax().unwrap();
        DecoderOutput {
            outputs: vec![log_probs],
            hidden: RecurrentState {
                hidden: Tensor::zeros(1, 1).unwrap(),
                cell: None,
            },
            side: SideChannel::default(),
            mode: DecodeMode::Unrolled,
            teacher_forcing: true,
            projection_inputs: vec![input.clone()],
        }
    }

    fn nll(readout: &Linear, input: &Tensor, target: usize) -> f32 {
        let log_probs = readout.forward(input).unwrap().row_log_softmax().unwrap();
        -log_probs.row(0).unwrap()[target]
    }

    #[test]
    fn readout_step_lowers_token_nll() {
        let mut readout = Linear::new("decoder::out", 3, 4, Some(7)).unwrap();
        let input = Tensor::from_vec(1, 3, vec![0.5, -0.25, 1.0]).unwrap();
        let targets = TokenBatch::new(1, 2, vec![1, 2]).unwrap();
        let before = nll(&readout, &input, 2);
        for _ in 0..5 {
            let output = single_step_output(&readout, &input);
            readout_step(&mut readout, &output, &targets, None, 1.0, 0.5).unwrap();
        }
        assert!(nll(&readout, &input, 2) < before);
    }

    #[test]
    fn pad_rows_leave_readout_untouched() {
        let mut readout = Linear::new("decoder::out", 2, 3, Some(3)).unwrap();
        let weights = readout.weight().value().clone();
        let input = Tensor::from_vec(1, 2, vec![1.0, 2.0]).unwrap();
        let targets = TokenBatch::new(1, 2, vec![1, 0]).unwrap();
        let output = single_step_output(&readout, &input);
        readout_step(&mut readout, &output, &targets, Some(0), 1.0, 1.0).unwrap();
        assert_eq!(readout.weight().value(), &weights);
    }

    #[test]
    fn summary_keys_carry_split_prefix() {
        let summary = PassSummary {
            losses: BTreeMap::from([("nll_loss".to_string(), 0.5)]),
            weighted_loss: 0.5,
            metrics: BTreeMap::from([("seq_acc".to_string(), 0.25)]),
        };
        let mut record = BTreeMap::new();
        summary.write_into("eval", &mut record);
        assert_eq!(record["eval_nll_loss"], 0.5);
        assert_eq!(record["eval_seq_acc"], 0.25);
        assert_eq!(record["eval_loss"], 0.5);
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::decoder::SequenceDecoder;
use crate::encoder::Encoder;
use crate::error::{Seq2seqError, Seq2seqResult};
use crate::model::Seq2seq;
use serde::{Deserialize, Serialize};
use st_nn::{Parameterised, PureResult};
use st_tensor::Tensor;
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use tracing::info;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct StoredTensor {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

impl StoredTensor {
    fn from_tensor(tensor: &Tensor) -> Self {
        let (rows, cols) = tensor.shape();
        Self {
            rows,
            cols,
            data: tensor.data().to_vec(),
        }
    }

    fn to_tensor(&self) -> PureResult<Tensor> {
        Tensor::from_vec(self.rows, self.cols, self.data.clone())
    }
}

/// Named parameter values plus the sparsity k at capture time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    parameters: BTreeMap<String, StoredTensor>,
    k_sparsity: Option<usize>,
}

impl Checkpoint {
    pub fn capture<M: Parameterised + ?Sized>(
        model: &M,
        k_sparsity: Option<usize>,
    ) -> Seq2seqResult<Self> {
        let parameters = model
            .state_dict()?
            .iter()
            .map(|(name, tensor)| (name.clone(), StoredTensor::from_tensor(tensor)))
            .collect();
        Ok(Self {
            parameters,
            k_sparsity,
        })
    }

    pub fn from_decoder(decoder: &SequenceDecoder) -> Seq2seqResult<Self> {
        Self::capture(decoder, decoder.k())
    }

    pub fn from_model<E: Encoder>(model: &Seq2seq<E>) -> Seq2seqResult<Self> {
        Self::capture(model, model.decoder().k())
    }

    pub fn k_sparsity(&self) -> Option<usize> {
        self.k_sparsity
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    pub fn state_dict(&self) -> Seq2seqResult<HashMap<String, Tensor>> {
        let mut state = HashMap::with_capacity(self.parameters.len());
        for (name, stored) in &self.parameters {
            state.insert(name.clone(), stored.to_tensor()?);
        }
        Ok(state)
    }

    /// Loads every parameter `model` owns; unknown names in the checkpoint
    /// are ignored, missing ones are an error.
    pub fn restore_parameters<M: Parameterised + ?Sized>(
        &self,
        model: &mut M,
    ) -> Seq2seqResult<()> {
        model.load_state_dict(&self.state_dict()?)?;
        Ok(())
    }

    /// Restores parameters and, when both sides carry one, the shared k.
    /// This is the one place besides the controller that writes k.
    pub fn restore_decoder(&self, decoder: &mut SequenceDecoder) -> Seq2seqResult<()> {
        self.restore_parameters(decoder)?;
        self.restore_k(decoder)
    }

    pub fn restore_model<E: Encoder>(&self, model: &mut Seq2seq<E>) -> Seq2seqResult<()> {
        self.restore_parameters(model)?;
        self.restore_k(model.decoder())
    }

    fn restore_k(&self, decoder: &SequenceDecoder) -> Seq2seqResult<()> {
        match (self.k_sparsity, decoder.sparsity()) {
            (Some(0), _) => Err(Seq2seqError::InvalidSparsityK),
            (Some(k), Some(handle)) => {
                handle.set(k);
                info!(k, "restored k-sparsity from checkpoint");
                Ok(())
            }
            _ => Ok(()),
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Seq2seqResult<()> {
        let writer = BufWriter::new(File::create(path.as_ref())?);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Seq2seqResult<Self> {
        let reader = BufReader::new(File::open(path.as_ref())?);
        Ok(serde_json::from_reader(reader)?)
    }
}

pub fn save_model<E: Encoder, P: AsRef<Path>>(model: &Seq2seq<E>, path: P) -> Seq2seqResult<()> {
    Checkpoint::from_model(model)?.save(path)
}

pub fn load_model<E: Encoder, P: AsRef<Path>>(
    model: &mut Seq2seq<E>,
    path: P,
) -> Seq2seqResult<()> {
    Checkpoint::load(path)?.restore_model(model)
}

// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::attention::AlignmentTarget;
use crate::error::{Seq2seqError, Seq2seqResult};
use serde::{Deserialize, Serialize};

/// Padded `(batch, steps)` matrix of token ids.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBatch {
    batch: usize,
    steps: usize,
    ids: Vec<usize>,
}

impl TokenBatch {
    pub fn new(batch: usize, steps: usize, ids: Vec<usize>) -> Seq2seqResult<Self> {
        if batch == 0 || steps == 0 || ids.len() != batch * steps {
            return Err(Seq2seqError::MalformedTarget(format!(
                "expected {batch}x{steps} token ids, got {}",
                ids.len()
            )));
        }
        Ok(Self { batch, steps, ids })
    }

    /// Right-pads ragged sequences with `pad_id`.
    pub fn from_sequences(sequences: &[Vec<usize>], pad_id: usize) -> Seq2seqResult<Self> {
        let steps = sequences.iter().map(Vec::len).max().unwrap_or(0);
        let mut ids = Vec::with_capacity(sequences.len() * steps);
        for sequence in sequences {
            ids.extend_from_slice(sequence);
            ids.extend(std::iter::repeat(pad_id).take(steps - sequence.len()));
        }
        Self::new(sequences.len(), steps, ids)
    }

    /// Single-column batch filled with `token`.
    pub fn filled(batch: usize, token: usize) -> Seq2seqResult<Self> {
        Self::new(batch, 1, vec![token; batch])
    }

    pub fn batch(&self) -> usize {
        self.batch
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn ids(&self) -> &[usize] {
        &self.ids
    }

    pub fn get(&self, batch: usize, step: usize) -> usize {
        self.ids[batch * self.steps + step]
    }

    pub fn column(&self, step: usize) -> Vec<usize> {
        (0..self.batch).map(|b| self.get(b, step)).collect()
    }

    pub fn row(&self, batch: usize) -> &[usize] {
        &self.ids[batch * self.steps..(batch + 1) * self.steps]
    }
}

/// One training example before padding.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Example {
    pub source: Vec<usize>,
    /// Includes the leading SOS and trailing EOS ids.
    pub target: Vec<usize>,
    /// Source position attended at each decode step, `-1` to ignore.
    #[serde(default)]
    pub alignment: Option<Vec<i64>>,
}

/// Padded source/target pair plus an optional alignment target.
#[derive(Clone, Debug)]
pub struct Seq2seqBatch {
    pub source: TokenBatch,
    pub target: Option<TokenBatch>,
    pub alignment: Option<AlignmentTarget>,
}

impl Seq2seqBatch {
    pub fn batch(&self) -> usize {
        self.source.batch()
    }
}

/// Groups examples into padded batches of at most `batch_size`, in order.
pub fn batches(
    examples: &[Example],
    batch_size: usize,
    pad_id: usize,
) -> Seq2seqResult<Vec<Seq2seqBatch>> {
    if batch_size == 0 {
        return Err(Seq2seqError::Config("batch_size must be positive".into()));
    }
    examples
        .chunks(batch_size)
        .map(|chunk| {
            let sources: Vec<Vec<usize>> = chunk.iter().map(|e| e.source.clone()).collect();
            let targets: Vec<Vec<usize>> = chunk.iter().map(|e| e.target.clone()).collect();
            let alignment = if chunk.iter().all(|e| e.alignment.is_some()) {
                let rows: Vec<Vec<i64>> = chunk
                    .iter()
                    .filter_map(|e| e.alignment.clone())
                    .collect();
                Some(AlignmentTarget::from_ragged(&rows)?)
            } else {
                None
            };
            Ok(Seq2seqBatch {
                source: TokenBatch::from_sequences(&sources, pad_id)?,
                target: Some(TokenBatch::from_sequences(&targets, pad_id)?),
                alignment,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ragged_sequences_are_right_padded() {
        let batch = TokenBatch::from_sequences(&[vec![1, 2, 3], vec![4]], 0).unwrap();
        assert_eq!(batch.steps(), 3);
        assert_eq!(batch.row(1), &[4, 0, 0]);
        assert_eq!(batch.column(0), vec![1, 4]);
    }

    #[test]
    fn batches_chunk_in_order() {
        let examples: Vec<Example> = (0..5)
            .map(|i| Example {
                source: vec![i + 3],
                target: vec![1, i + 3, 2],
                alignment: Some(vec![0, -1]),
            })
            .collect();
        let grouped = batches(&examples, 2, 0).unwrap();
        assert_eq!(grouped.len(), 3);
        assert_eq!(grouped[2].batch(), 1);
        assert!(grouped[0].alignment.is_some());
        assert!(batches(&examples, 0, 0).is_err());
    }
}

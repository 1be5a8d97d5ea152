// Copyright 2019 Guillaume Becquin
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # Pre-training batch construction
//! Sentence pairs are sampled with an explicit random source so that batch construction is
//! reproducible and independent from any process-wide random state. Each example is the
//! concatenation `[CLS] A [SEP] B [SEP]`, corrupted for the masked language model objective and
//! labelled for the next sentence objective. Batches are balanced between IsNext and NotNext pairs.

use crate::bert::BertConfig;
use crate::pretraining::vocab::{CLS_ID, MASK_ID, NUM_SPECIAL_TOKENS, PAD_ID, SEP_ID};
use crate::MiniBertError;
use rand::seq::SliceRandom;
use rand::Rng;
use tch::{Device, Tensor};
use tracing::debug;

/// Fraction of the sequence tokens selected for prediction
pub const MASKED_LM_PROB: f64 = 0.15;
/// Probability for a selected token to be replaced by `[MASK]`
pub const MASK_TOKEN_PROB: f64 = 0.8;
/// Probability for a selected token not replaced by `[MASK]` to be replaced by a random word
pub const RANDOM_TOKEN_PROB: f64 = 0.5;

const MAX_DRAWS_PER_EXAMPLE: usize = 10_000;

#[derive(Debug, Clone, PartialEq)]
/// # Single pre-training example, padded to the configured geometry
pub struct PreTrainingExample {
    /// Corrupted token ids, `max_len` long
    pub input_ids: Vec<i64>,
    /// Segment ids, `max_len` long
    pub token_type_ids: Vec<i64>,
    /// Original ids at the masked positions, `max_pred` long, zero-padded
    pub masked_lm_labels: Vec<i64>,
    /// Masked positions, `max_pred` long, zero-padded
    pub masked_positions: Vec<i64>,
    /// Number of real (non-padding) entries of `masked_positions`
    pub num_predictions: usize,
    pub is_next: bool,
}

/// Selects and corrupts the masked language model targets of an unpadded sequence.
///
/// `n_pred = min(max_pred, max(1, round(0.15 x len)))`, capped by the number of candidate positions
/// (every position that is neither `[CLS]` nor `[SEP]`). Each selected token is replaced by `[MASK]`
/// with probability 0.8, by a random word with probability 0.1 and kept otherwise.
///
/// # Returns
///
/// * original ids of the selected tokens
/// * selected positions, in sampling order
pub fn mask_tokens<R: Rng>(
    input_ids: &mut [i64],
    max_pred: usize,
    vocab_size: i64,
    rng: &mut R,
) -> (Vec<i64>, Vec<i64>) {
    let n_pred = max_pred.min(1.max((input_ids.len() as f64 * MASKED_LM_PROB).round() as usize));

    let mut candidates: Vec<usize> = input_ids
        .iter()
        .enumerate()
        .filter(|(_, &token)| token != CLS_ID && token != SEP_ID)
        .map(|(position, _)| position)
        .collect();
    candidates.shuffle(rng);

    let mut masked_lm_labels = Vec::with_capacity(n_pred);
    let mut masked_positions = Vec::with_capacity(n_pred);
    for &position in candidates.iter().take(n_pred) {
        masked_positions.push(position as i64);
        masked_lm_labels.push(input_ids[position]);
        if rng.gen::<f64>() < MASK_TOKEN_PROB {
            input_ids[position] = MASK_ID;
        } else if rng.gen::<f64>() < RANDOM_TOKEN_PROB && vocab_size > NUM_SPECIAL_TOKENS {
            input_ids[position] = rng.gen_range(NUM_SPECIAL_TOKENS..vocab_size);
        }
    }
    (masked_lm_labels, masked_positions)
}

/// Builds a padded, corrupted example from two sentences.
///
/// Fails if `[CLS] A [SEP] B [SEP]` is longer than `max_len`.
pub fn build_example<R: Rng>(
    tokens_a: &[i64],
    tokens_b: &[i64],
    is_next: bool,
    config: &BertConfig,
    rng: &mut R,
) -> Result<PreTrainingExample, MiniBertError> {
    let max_len = config.max_len as usize;
    let max_pred = config.max_pred as usize;

    let mut input_ids = Vec::with_capacity(max_len);
    input_ids.push(CLS_ID);
    input_ids.extend_from_slice(tokens_a);
    input_ids.push(SEP_ID);
    input_ids.extend_from_slice(tokens_b);
    input_ids.push(SEP_ID);
    if input_ids.len() > max_len {
        return Err(MiniBertError::ValueError(format!(
            "Sentence pair of {} tokens does not fit in the maximum length {}",
            input_ids.len(),
            max_len
        )));
    }

    let mut token_type_ids = vec![0i64; tokens_a.len() + 2];
    token_type_ids.extend(vec![1i64; tokens_b.len() + 1]);

    let (mut masked_lm_labels, mut masked_positions) =
        mask_tokens(&mut input_ids, max_pred, config.vocab_size, rng);
    let num_predictions = masked_positions.len();

    input_ids.resize(max_len, PAD_ID);
    token_type_ids.resize(max_len, 0);
    masked_lm_labels.resize(max_pred, PAD_ID);
    masked_positions.resize(max_pred, 0);

    Ok(PreTrainingExample {
        input_ids,
        token_type_ids,
        masked_lm_labels,
        masked_positions,
        num_predictions,
        is_next,
    })
}

/// Samples a batch of `batch_size` examples, half IsNext and half NotNext.
///
/// A pair of sentences `(a, b)` is IsNext when `b` directly follows `a` in the corpus.
///
/// # Example
///
/// ```no_run
/// use mini_bert::bert::BertConfig;
/// use mini_bert::pretraining::{sample_batch, Vocabulary, TOY_CORPUS};
/// use rand::rngs::StdRng;
/// use rand::SeedableRng;
///
/// let vocab = Vocabulary::from_text(TOY_CORPUS);
/// let config = BertConfig::default();
/// let mut rng = StdRng::seed_from_u64(42);
/// let examples = sample_batch(&vocab.encoded_sentences(), &config, &mut rng)?;
/// assert_eq!(examples.len(), 6);
/// # Ok::<(), mini_bert::MiniBertError>(())
/// ```
pub fn sample_batch<R: Rng>(
    sentences: &[Vec<i64>],
    config: &BertConfig,
    rng: &mut R,
) -> Result<Vec<PreTrainingExample>, MiniBertError> {
    if config.batch_size % 2 != 0 {
        return Err(MiniBertError::InvalidConfigurationError(format!(
            "Batch size must be even to balance IsNext and NotNext pairs, got {}",
            config.batch_size
        )));
    }
    if sentences.len() < 2 {
        return Err(MiniBertError::ValueError(format!(
            "At least two sentences are required to sample sentence pairs, got {}",
            sentences.len()
        )));
    }

    let batch_size = config.batch_size as usize;
    let half = batch_size / 2;
    let (mut positive, mut negative) = (0usize, 0usize);
    let mut batch = Vec::with_capacity(batch_size);

    for _ in 0..MAX_DRAWS_PER_EXAMPLE * batch_size {
        if positive == half && negative == half {
            break;
        }
        let index_a = rng.gen_range(0..sentences.len());
        let index_b = rng.gen_range(0..sentences.len());
        let is_next = index_a + 1 == index_b;
        if (is_next && positive < half) || (!is_next && negative < half) {
            let example = build_example(
                &sentences[index_a],
                &sentences[index_b],
                is_next,
                config,
                rng,
            )?;
            debug!(
                "Sampled sentence pair ({}, {}), is_next: {}, {} masked tokens",
                index_a, index_b, is_next, example.num_predictions
            );
            if is_next {
                positive += 1;
            } else {
                negative += 1;
            }
            batch.push(example);
        }
    }

    if batch.len() != batch_size {
        return Err(MiniBertError::ValueError(format!(
            "Could not sample a balanced batch: {} IsNext and {} NotNext pairs found",
            positive, negative
        )));
    }
    Ok(batch)
}

/// # Pre-training batch as tensors
pub struct PreTrainingBatch {
    /// Shape (*batch size*, *max_len*)
    pub input_ids: Tensor,
    /// Shape (*batch size*, *max_len*)
    pub token_type_ids: Tensor,
    /// Shape (*batch size*, *max_pred*)
    pub masked_lm_labels: Tensor,
    /// Shape (*batch size*, *max_pred*)
    pub masked_positions: Tensor,
    /// 1 for real predictions, 0 for padding, shape (*batch size*, *max_pred*)
    pub masked_lm_weights: Tensor,
    /// 1 for IsNext, 0 for NotNext, shape (*batch size*)
    pub next_sentence_labels: Tensor,
}

fn stack_rows(rows: Vec<&Vec<i64>>, device: Device) -> Result<Tensor, MiniBertError> {
    let width = rows.first().map(|row| row.len()).unwrap_or(0);
    if rows.iter().any(|row| row.len() != width) {
        return Err(MiniBertError::ValueError(
            "All examples of a batch must share the same length".into(),
        ));
    }
    let flat: Vec<i64> = rows.iter().flat_map(|row| row.iter().copied()).collect();
    Ok(Tensor::of_slice(&flat)
        .view((rows.len() as i64, width as i64))
        .to_device(device))
}

impl PreTrainingBatch {
    /// Stacks padded examples into `Int64` tensors on `device`.
    pub fn from_examples(
        examples: &[PreTrainingExample],
        device: Device,
    ) -> Result<PreTrainingBatch, MiniBertError> {
        if examples.is_empty() {
            return Err(MiniBertError::ValueError(
                "Cannot build a batch from an empty list of examples".into(),
            ));
        }

        let masked_lm_weights: Vec<Vec<i64>> = examples
            .iter()
            .map(|example| {
                (0..example.masked_positions.len())
                    .map(|index| (index < example.num_predictions) as i64)
                    .collect()
            })
            .collect();
        let next_sentence_labels: Vec<i64> = examples
            .iter()
            .map(|example| example.is_next as i64)
            .collect();

        Ok(PreTrainingBatch {
            input_ids: stack_rows(examples.iter().map(|e| &e.input_ids).collect(), device)?,
            token_type_ids: stack_rows(
                examples.iter().map(|e| &e.token_type_ids).collect(),
                device,
            )?,
            masked_lm_labels: stack_rows(
                examples.iter().map(|e| &e.masked_lm_labels).collect(),
                device,
            )?,
            masked_positions: stack_rows(
                examples.iter().map(|e| &e.masked_positions).collect(),
                device,
            )?,
            masked_lm_weights: stack_rows(masked_lm_weights.iter().collect(), device)?,
            next_sentence_labels: Tensor::of_slice(&next_sentence_labels).to_device(device),
        })
    }
}

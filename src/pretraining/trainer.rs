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

//! # Pre-training loop
//! Joint masked language model and next sentence prediction objective, optimized with Adam on a
//! fixed batch.

use crate::bert::{BertForPreTraining, BertForPreTrainingOutput};
use crate::pretraining::batch::PreTrainingBatch;
use crate::{Config, MiniBertError};
use serde::{Deserialize, Serialize};
use tch::nn::OptimizerConfig;
use tch::{nn, no_grad, Kind, Tensor};
use tracing::info;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
/// # Pre-training loop configuration
pub struct TrainingConfig {
    /// Number of optimizer steps on the batch
    pub epochs: i64,
    pub learning_rate: f64,
    /// Loss is logged every `log_every` epochs
    pub log_every: i64,
    /// Seed for the tensor and batch sampling random sources
    pub seed: u64,
}

impl Config for TrainingConfig {}

impl Default for TrainingConfig {
    fn default() -> Self {
        TrainingConfig {
            epochs: 100,
            learning_rate: 0.001,
            log_every: 10,
            seed: 42,
        }
    }
}

/// Joint pre-training loss.
///
/// The masked language model cross-entropy is averaged over the real prediction slots of the batch
/// (padded slots are ignored) and added to the next sentence prediction cross-entropy.
///
/// # Arguments
///
/// * `output` - `BertForPreTrainingOutput` computed on `batch`
/// * `batch` - `PreTrainingBatch` holding the targets
///
/// # Returns
///
/// * `loss` - scalar `Tensor`
pub fn pretraining_loss(
    output: &BertForPreTrainingOutput,
    batch: &PreTrainingBatch,
) -> Result<Tensor, MiniBertError> {
    let prediction_size = output.prediction_scores.size();
    let label_size = batch.masked_lm_labels.size();
    if prediction_size.len() != 3 || prediction_size[..2] != label_size[..] {
        return Err(MiniBertError::ValueError(format!(
            "Prediction scores of shape {:?} do not match masked labels of shape {:?}",
            prediction_size, label_size
        )));
    }
    let vocab_size = prediction_size[2];

    let log_probs = output
        .prediction_scores
        .view((-1, vocab_size))
        .log_softmax(-1, Kind::Float);
    let target_log_probs = log_probs
        .gather(1, &batch.masked_lm_labels.view((-1, 1)), false)
        .view([-1]);
    let weights = batch.masked_lm_weights.view([-1]).to_kind(Kind::Float);
    let lm_loss = -(target_log_probs * &weights).sum(Kind::Float)
        / weights.sum(Kind::Float).clamp_min(1.0);

    let nsp_loss = output
        .seq_relationship_scores
        .cross_entropy_for_logits(&batch.next_sentence_labels);

    Ok(lm_loss + nsp_loss)
}

/// Trains `model` on a single batch, one Adam step per epoch.
///
/// # Returns
///
/// * loss history, one value per epoch
///
/// # Example
///
/// ```no_run
/// use mini_bert::bert::{BertConfig, BertForPreTraining};
/// use mini_bert::pretraining::{sample_batch, train, PreTrainingBatch, TrainingConfig, Vocabulary, TOY_CORPUS};
/// use rand::rngs::StdRng;
/// use rand::SeedableRng;
/// use tch::{nn, Device};
///
/// let vocab = Vocabulary::from_text(TOY_CORPUS);
/// let config = BertConfig::default();
/// let vs = nn::VarStore::new(Device::Cpu);
/// let model = BertForPreTraining::new(&vs.root(), &config)?;
/// let mut rng = StdRng::seed_from_u64(42);
/// let examples = sample_batch(&vocab.encoded_sentences(), &config, &mut rng)?;
/// let batch = PreTrainingBatch::from_examples(&examples, Device::Cpu)?;
/// let losses = train(&model, &vs, &batch, &TrainingConfig::default())?;
/// # Ok::<(), mini_bert::MiniBertError>(())
/// ```
pub fn train(
    model: &BertForPreTraining,
    vs: &nn::VarStore,
    batch: &PreTrainingBatch,
    training_config: &TrainingConfig,
) -> Result<Vec<f64>, MiniBertError> {
    if training_config.learning_rate <= 0.0 {
        return Err(MiniBertError::InvalidConfigurationError(format!(
            "Learning rate must be positive, got {}",
            training_config.learning_rate
        )));
    }
    let mut optimizer = nn::Adam::default().build(vs, training_config.learning_rate)?;

    let mut losses = Vec::with_capacity(training_config.epochs.max(0) as usize);
    for epoch in 0..training_config.epochs {
        let output = model.forward_t(
            &batch.input_ids,
            Some(&batch.token_type_ids),
            &batch.masked_positions,
            true,
        )?;
        let loss = pretraining_loss(&output, batch)?;
        optimizer.backward_step(&loss);

        let loss_value = loss.double_value(&[]);
        if training_config.log_every > 0 && (epoch + 1) % training_config.log_every == 0 {
            info!("Epoch: {:04} cost = {:.6}", epoch + 1, loss_value);
        }
        losses.push(loss_value);
    }
    Ok(losses)
}

/// Model predictions for a pre-training batch
pub struct Predictions {
    /// Arg-max token ids at the masked positions, one row of `max_pred` ids per example
    pub masked_token_ids: Vec<Vec<i64>>,
    /// Predicted IsNext flag per example
    pub is_next: Vec<bool>,
}

/// Runs the model in inference mode and takes the arg-max of both heads.
pub fn predict(
    model: &BertForPreTraining,
    batch: &PreTrainingBatch,
) -> Result<Predictions, MiniBertError> {
    let output = no_grad(|| {
        model.forward_t(
            &batch.input_ids,
            Some(&batch.token_type_ids),
            &batch.masked_positions,
            false,
        )
    })?;

    let masked_token_ids = output.prediction_scores.argmax(-1, false);
    let next_sentence = output.seq_relationship_scores.argmax(-1, false);
    let (batch_size, max_pred) = (
        masked_token_ids.size()[0],
        masked_token_ids.size()[1],
    );

    let masked_token_ids = (0..batch_size)
        .map(|example| {
            (0..max_pred)
                .map(|slot| masked_token_ids.int64_value(&[example, slot]))
                .collect()
        })
        .collect();
    let is_next = (0..batch_size)
        .map(|example| next_sentence.int64_value(&[example]) == 1)
        .collect();

    Ok(Predictions {
        masked_token_ids,
        is_next,
    })
}

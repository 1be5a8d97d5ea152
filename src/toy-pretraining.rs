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

use mini_bert::bert::{BertConfig, BertForPreTraining};
use mini_bert::pretraining::{
    predict, sample_batch, train, PreTrainingBatch, TrainingConfig, Vocabulary, TOY_CORPUS,
};
use mini_bert::{Config, MiniBertError};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tch::{nn, Device};
use tracing::info;

/// Usage: `toy-pretraining [bert_config.json] [training_config.json]`
pub fn main() -> Result<(), MiniBertError> {
    tracing_subscriber::fmt::init();

    let args: Vec<_> = std::env::args().collect();
    let vocab = Vocabulary::from_text(TOY_CORPUS);

    let mut config = match args.get(1) {
        Some(path) => BertConfig::from_file(path)?,
        None => BertConfig::default(),
    };
    config.vocab_size = vocab.len() as i64;
    let training_config = match args.get(2) {
        Some(path) => TrainingConfig::from_file(path)?,
        None => TrainingConfig::default(),
    };
    info!(
        "Vocabulary of {} tokens, {} sentences",
        vocab.len(),
        vocab.sentences().len()
    );

    tch::manual_seed(training_config.seed as i64);
    let mut rng = StdRng::seed_from_u64(training_config.seed);
    let device = Device::cuda_if_available();
    let vs = nn::VarStore::new(device);
    let model = BertForPreTraining::new(&vs.root(), &config)?;

    let examples = sample_batch(&vocab.encoded_sentences(), &config, &mut rng)?;
    let batch = PreTrainingBatch::from_examples(&examples, device)?;
    let losses = train(&model, &vs, &batch, &training_config)?;
    if let Some(loss) = losses.last() {
        info!("Final loss: {:.6}", loss);
    }

    let predictions = predict(&model, &batch)?;
    let example = &examples[0];
    info!("{}", vocab.decode(&example.input_ids)?.join(" "));

    let masked_tokens = &example.masked_lm_labels[..example.num_predictions];
    let predicted_tokens = &predictions.masked_token_ids[0][..example.num_predictions];
    info!("masked tokens list: {:?}", vocab.decode(masked_tokens)?);
    info!("predict masked tokens list: {:?}", vocab.decode(predicted_tokens)?);
    info!("isNext: {}", example.is_next);
    info!("predict isNext: {}", predictions.is_next[0]);
    Ok(())
}

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

//! # Masked language model and next sentence pre-training
//!
//! Builds a whitespace vocabulary from a toy corpus, samples balanced batches of sentence pairs
//! with an explicit random source and trains a `BertForPreTraining` model on them.
//!
//! ```no_run
//! use mini_bert::bert::{BertConfig, BertForPreTraining};
//! use mini_bert::pretraining::{
//!     predict, sample_batch, train, PreTrainingBatch, TrainingConfig, Vocabulary, TOY_CORPUS,
//! };
//! use rand::rngs::StdRng;
//! use rand::SeedableRng;
//! use tch::{nn, Device};
//!
//! let vocab = Vocabulary::from_text(TOY_CORPUS);
//! let config = BertConfig {
//!     vocab_size: vocab.len() as i64,
//!     ..Default::default()
//! };
//! let vs = nn::VarStore::new(Device::Cpu);
//! let model = BertForPreTraining::new(&vs.root(), &config)?;
//!
//! let mut rng = StdRng::seed_from_u64(42);
//! let examples = sample_batch(&vocab.encoded_sentences(), &config, &mut rng)?;
//! let batch = PreTrainingBatch::from_examples(&examples, Device::Cpu)?;
//! let _losses = train(&model, &vs, &batch, &TrainingConfig::default())?;
//! let predictions = predict(&model, &batch)?;
//! # Ok::<(), mini_bert::MiniBertError>(())
//! ```

mod batch;
mod trainer;
mod vocab;

pub use batch::{
    build_example, mask_tokens, sample_batch, PreTrainingBatch, PreTrainingExample,
    MASKED_LM_PROB, MASK_TOKEN_PROB, RANDOM_TOKEN_PROB,
};
pub use trainer::{predict, pretraining_loss, train, Predictions, TrainingConfig};
pub use vocab::{
    Vocabulary, CLS_ID, CLS_TOKEN, MASK_ID, MASK_TOKEN, NUM_SPECIAL_TOKENS, PAD_ID, PAD_TOKEN,
    SEP_ID, SEP_TOKEN, TOY_CORPUS,
};

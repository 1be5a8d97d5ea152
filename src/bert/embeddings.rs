// Copyright 2019-present, the HuggingFace Inc. team, The Google AI Language Team and Facebook, Inc.
// Copyright (c) 2018, NVIDIA CORPORATION.  All rights reserved.
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

use crate::bert::bert_model::BertConfig;
use crate::common::dropout::Dropout;
use crate::MiniBertError;
use std::borrow::Borrow;
use tch::nn::embedding;
use tch::{nn, Kind, Tensor};

/// Checks that every id of `ids` lies in `[0, upper)`.
pub(crate) fn check_id_range(ids: &Tensor, upper: i64, name: &str) -> Result<(), MiniBertError> {
    if ids.size().iter().product::<i64>() == 0 {
        return Ok(());
    }
    let (min_id, max_id) = (ids.min().int64_value(&[]), ids.max().int64_value(&[]));
    if min_id < 0 || max_id >= upper {
        return Err(MiniBertError::ValueError(format!(
            "{} must lie in [0, {}), found values in [{}, {}]",
            name, upper, min_id, max_id
        )));
    }
    Ok(())
}

#[derive(Debug)]
/// # BertEmbeddings implementation for BERT model
/// Sum of the token, position and segment embeddings followed by layer normalization.
/// The token embedding table is the single owner of the vocabulary matrix also read by the
/// masked language model decoder.
pub struct BertEmbeddings {
    word_embeddings: nn::Embedding,
    position_embeddings: nn::Embedding,
    token_type_embeddings: nn::Embedding,
    layer_norm: nn::LayerNorm,
    dropout: Dropout,
    vocab_size: i64,
    max_len: i64,
    n_segments: i64,
}

impl BertEmbeddings {
    /// Build a new `BertEmbeddings`
    ///
    /// # Arguments
    ///
    /// * `p` - Variable store path for the root of the BertEmbeddings model
    /// * `config` - `BertConfig` object defining the model architecture and vocab/hidden size
    ///
    /// # Example
    ///
    /// ```no_run
    /// use mini_bert::bert::{BertConfig, BertEmbeddings};
    /// use tch::{nn, Device};
    ///
    /// let device = Device::Cpu;
    /// let p = nn::VarStore::new(device);
    /// let config = BertConfig::default();
    /// let bert_embeddings = BertEmbeddings::new(&p.root() / "bert_embeddings", &config);
    /// ```
    pub fn new<'p, P>(p: P, config: &BertConfig) -> BertEmbeddings
    where
        P: Borrow<nn::Path<'p>>,
    {
        let p = p.borrow();

        let word_embeddings: nn::Embedding = embedding(
            p / "word_embeddings",
            config.vocab_size,
            config.d_model,
            Default::default(),
        );

        let position_embeddings: nn::Embedding = embedding(
            p / "position_embeddings",
            config.max_len,
            config.d_model,
            Default::default(),
        );

        let token_type_embeddings: nn::Embedding = embedding(
            p / "token_type_embeddings",
            config.n_segments,
            config.d_model,
            Default::default(),
        );

        let layer_norm_config = nn::LayerNormConfig {
            eps: config.layer_norm_eps,
            ..Default::default()
        };
        let layer_norm: nn::LayerNorm =
            nn::layer_norm(p / "LayerNorm", vec![config.d_model], layer_norm_config);
        let dropout: Dropout = Dropout::new(config.hidden_dropout_prob);
        BertEmbeddings {
            word_embeddings,
            position_embeddings,
            token_type_embeddings,
            layer_norm,
            dropout,
            vocab_size: config.vocab_size,
            max_len: config.max_len,
            n_segments: config.n_segments,
        }
    }

    /// Token embedding table of shape (*vocab_size*, *d_model*)
    pub fn word_embeddings(&self) -> &nn::Embedding {
        &self.word_embeddings
    }

    /// Forward pass through the embedding layer
    ///
    /// # Arguments
    ///
    /// * `input_ids` - input tensor of shape (*batch size*, *sequence_length*)
    /// * `token_type_ids` - Optional segment id of shape (*batch size*, *sequence_length*). Convention is value of 0 for the first sentence (incl. *SEP*) and 1 for the second sentence. If None set to 0.
    /// * `train` - boolean flag to turn on/off the dropout layers in the model. Should be set to false for inference.
    ///
    /// # Returns
    ///
    /// * `embedded_output` - `Tensor` of shape (*batch size*, *sequence_length*, *d_model*)
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use mini_bert::bert::{BertConfig, BertEmbeddings};
    /// # use tch::{nn, Device, Tensor, no_grad, Kind};
    /// # let device = Device::Cpu;
    /// # let vs = nn::VarStore::new(device);
    /// # let config = BertConfig::default();
    /// # let bert_embeddings = BertEmbeddings::new(&vs.root(), &config);
    /// let (batch_size, sequence_length) = (6, 30);
    /// let input_tensor = Tensor::randint(10, &[batch_size, sequence_length], (Kind::Int64, device));
    /// let token_type_ids = Tensor::zeros(&[batch_size, sequence_length], (Kind::Int64, device));
    ///
    /// let embedded_output =
    ///     no_grad(|| bert_embeddings.forward_t(&input_tensor, Some(&token_type_ids), false))?;
    /// # Ok::<(), mini_bert::MiniBertError>(())
    /// ```
    pub fn forward_t(
        &self,
        input_ids: &Tensor,
        token_type_ids: Option<&Tensor>,
        train: bool,
    ) -> Result<Tensor, MiniBertError> {
        let input_shape = input_ids.size();
        if input_shape.len() != 2 {
            return Err(MiniBertError::ValueError(format!(
                "Input ids must be of shape (batch size, sequence length), got {:?}",
                input_shape
            )));
        }
        let seq_length = input_shape[1];
        if seq_length > self.max_len {
            return Err(MiniBertError::ValueError(format!(
                "Sequence length {} exceeds the maximum length {}",
                seq_length, self.max_len
            )));
        }
        check_id_range(input_ids, self.vocab_size, "Token ids")?;

        let calc_token_type_ids;
        let token_type_ids = match token_type_ids {
            Some(value) => value,
            None => {
                calc_token_type_ids =
                    Tensor::zeros(&input_shape, (Kind::Int64, input_ids.device()));
                &calc_token_type_ids
            }
        };
        if token_type_ids.size() != input_shape {
            return Err(MiniBertError::ValueError(format!(
                "Segment ids shape {:?} does not match input ids shape {:?}",
                token_type_ids.size(),
                input_shape
            )));
        }
        check_id_range(token_type_ids, self.n_segments, "Segment ids")?;

        let position_ids = Tensor::arange(seq_length, (Kind::Int64, input_ids.device()))
            .unsqueeze(0)
            .expand(&input_shape, true);

        let input_embeddings = input_ids.apply(&self.word_embeddings);
        let position_embeddings = position_ids.apply(&self.position_embeddings);
        let token_type_embeddings = token_type_ids.apply(&self.token_type_embeddings);

        let embeddings: Tensor = input_embeddings + position_embeddings + token_type_embeddings;
        Ok(embeddings
            .apply(&self.layer_norm)
            .apply_t(&self.dropout, train))
    }
}

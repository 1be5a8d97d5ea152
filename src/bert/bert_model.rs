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

use crate::bert::attention::get_attention_pad_mask;
use crate::bert::embeddings::{check_id_range, BertEmbeddings};
use crate::bert::encoder::{BertEncoder, BertPooler};
use crate::common::activations::Activation;
use crate::common::linear::TiedLinear;
use crate::{Config, MiniBertError};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use tch::nn::Init;
use tch::{nn, Tensor};

fn default_layer_norm_eps() -> f64 {
    1e-5
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
/// # BERT model configuration
/// Defines the BERT model architecture and the fixed batch geometry used for pre-training
/// (sequence length, batch size and number of masked predictions per sequence).
pub struct BertConfig {
    /// Number of rows of the token embedding table
    pub vocab_size: i64,
    /// Fixed (padded) sequence length, also the number of position embeddings
    pub max_len: i64,
    pub batch_size: i64,
    /// Maximum number of masked positions predicted per sequence
    pub max_pred: i64,
    pub n_layers: i64,
    pub n_heads: i64,
    /// Model width
    pub d_model: i64,
    /// Width of the position-wise feed-forward sublayer
    pub d_ff: i64,
    /// Per-head query/key width
    pub d_k: i64,
    /// Per-head value width
    pub d_v: i64,
    /// Number of rows of the segment embedding table
    pub n_segments: i64,
    #[serde(default)]
    pub hidden_act: Activation,
    #[serde(default)]
    pub hidden_dropout_prob: f64,
    #[serde(default = "default_layer_norm_eps")]
    pub layer_norm_eps: f64,
    #[serde(default)]
    pub pad_token_id: i64,
    pub output_attentions: Option<bool>,
    pub output_hidden_states: Option<bool>,
}

impl Config for BertConfig {}

impl Default for BertConfig {
    fn default() -> Self {
        BertConfig {
            vocab_size: 29,
            max_len: 30,
            batch_size: 6,
            max_pred: 5,
            n_layers: 12,
            n_heads: 12,
            d_model: 768,
            d_ff: 768 * 4,
            d_k: 64,
            d_v: 64,
            n_segments: 2,
            hidden_act: Activation::gelu,
            hidden_dropout_prob: 0.0,
            layer_norm_eps: default_layer_norm_eps(),
            pad_token_id: 0,
            output_attentions: None,
            output_hidden_states: None,
        }
    }
}

impl BertConfig {
    /// Checks the internal consistency of the hyperparameters.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use mini_bert::bert::BertConfig;
    ///
    /// let config = BertConfig {
    ///     d_k: 32,
    ///     ..Default::default()
    /// };
    /// assert!(config.validate().is_err());
    /// ```
    pub fn validate(&self) -> Result<(), MiniBertError> {
        let dimensions = [
            ("vocab_size", self.vocab_size),
            ("max_len", self.max_len),
            ("batch_size", self.batch_size),
            ("max_pred", self.max_pred),
            ("n_layers", self.n_layers),
            ("n_heads", self.n_heads),
            ("d_model", self.d_model),
            ("d_ff", self.d_ff),
            ("d_k", self.d_k),
            ("d_v", self.d_v),
            ("n_segments", self.n_segments),
        ];
        for (name, value) in dimensions.iter() {
            if *value < 1 {
                return Err(MiniBertError::InvalidConfigurationError(format!(
                    "{} must be strictly positive, got {}",
                    name, value
                )));
            }
        }
        if self.n_heads * self.d_k != self.d_model {
            return Err(MiniBertError::InvalidConfigurationError(format!(
                "n_heads ({}) x d_k ({}) must equal d_model ({})",
                self.n_heads, self.d_k, self.d_model
            )));
        }
        if self.n_heads * self.d_v != self.d_model {
            return Err(MiniBertError::InvalidConfigurationError(format!(
                "n_heads ({}) x d_v ({}) must equal d_model ({})",
                self.n_heads, self.d_v, self.d_model
            )));
        }
        if self.max_pred > self.max_len {
            return Err(MiniBertError::InvalidConfigurationError(format!(
                "max_pred ({}) cannot exceed max_len ({})",
                self.max_pred, self.max_len
            )));
        }
        if self.pad_token_id < 0 || self.pad_token_id >= self.vocab_size {
            return Err(MiniBertError::InvalidConfigurationError(format!(
                "pad_token_id ({}) is outside the vocabulary of size {}",
                self.pad_token_id, self.vocab_size
            )));
        }
        if !(0.0..1.0).contains(&self.hidden_dropout_prob) {
            return Err(MiniBertError::InvalidConfigurationError(format!(
                "hidden_dropout_prob must lie in [0, 1), got {}",
                self.hidden_dropout_prob
            )));
        }
        Ok(())
    }
}

/// # BERT Base model
/// Base architecture for BERT models. Pre-training heads are built on top of it.
/// It is made of the following blocks:
/// - `embeddings`: `token`, `position` and `segment_id` embeddings
/// - `encoder`: Encoder (transformer) made of a vector of layers. Each layer is made of a multi-head self-attention sublayer and a position-wise feed-forward sublayer
pub struct BertModel {
    embeddings: BertEmbeddings,
    encoder: BertEncoder,
    pad_token_id: i64,
}

impl BertModel {
    /// Build a new `BertModel`
    ///
    /// # Arguments
    ///
    /// * `p` - Variable store path for the root of the BERT model
    /// * `config` - `BertConfig` object defining the model architecture
    ///
    /// # Example
    ///
    /// ```no_run
    /// use mini_bert::bert::{BertConfig, BertModel};
    /// use tch::{nn, Device};
    ///
    /// let device = Device::Cpu;
    /// let p = nn::VarStore::new(device);
    /// let config = BertConfig::default();
    /// let bert = BertModel::new(&p.root() / "bert", &config)?;
    /// # Ok::<(), mini_bert::MiniBertError>(())
    /// ```
    pub fn new<'p, P>(p: P, config: &BertConfig) -> Result<BertModel, MiniBertError>
    where
        P: Borrow<nn::Path<'p>>,
    {
        config.validate()?;
        let p = p.borrow();

        let embeddings = BertEmbeddings::new(p / "embeddings", config);
        let encoder = BertEncoder::new(p / "encoder", config);

        Ok(BertModel {
            embeddings,
            encoder,
            pad_token_id: config.pad_token_id,
        })
    }

    /// Embedding layer owning the token embedding table
    pub fn embeddings(&self) -> &BertEmbeddings {
        &self.embeddings
    }

    /// Forward pass through the model
    ///
    /// # Arguments
    ///
    /// * `input_ids` - input tensor of shape (*batch size*, *sequence_length*), padded with `pad_token_id`
    /// * `token_type_ids` - Optional segment id of shape (*batch size*, *sequence_length*). Convention is value of 0 for the first sentence (incl. *SEP*) and 1 for the second sentence. If None set to 0.
    /// * `train` - boolean flag to turn on/off the dropout layers in the model. Should be set to false for inference.
    ///
    /// # Returns
    ///
    /// * `BertModelOutput` containing:
    ///   - `hidden_state` - `Tensor` of shape (*batch size*, *sequence_length*, *d_model*)
    ///   - `all_hidden_states` - `Option<Vec<Tensor>>` of length *n_layers* with shape (*batch size*, *sequence_length*, *d_model*)
    ///   - `all_attentions` - `Option<Vec<Tensor>>` of length *n_layers* with shape (*batch size*, *n_heads*, *sequence_length*, *sequence_length*)
    pub fn forward_t(
        &self,
        input_ids: &Tensor,
        token_type_ids: Option<&Tensor>,
        train: bool,
    ) -> Result<BertModelOutput, MiniBertError> {
        let embedding_output = self.embeddings.forward_t(input_ids, token_type_ids, train)?;
        let attention_mask = get_attention_pad_mask(input_ids, input_ids, self.pad_token_id)?;

        let encoder_output =
            self.encoder
                .forward_t(&embedding_output, Some(&attention_mask), train)?;

        Ok(BertModelOutput {
            hidden_state: encoder_output.hidden_state,
            all_hidden_states: encoder_output.all_hidden_states,
            all_attentions: encoder_output.all_attentions,
        })
    }
}

pub struct BertPredictionHeadTransform {
    dense: nn::Linear,
    activation: fn(&Tensor) -> Tensor,
    layer_norm: nn::LayerNorm,
}

impl BertPredictionHeadTransform {
    pub fn new<'p, P>(p: P, config: &BertConfig) -> BertPredictionHeadTransform
    where
        P: Borrow<nn::Path<'p>>,
    {
        let p = p.borrow();

        let dense = nn::linear(
            p / "dense",
            config.d_model,
            config.d_model,
            Default::default(),
        );
        let activation = config.hidden_act.get_function();
        let layer_norm_config = nn::LayerNormConfig {
            eps: config.layer_norm_eps,
            ..Default::default()
        };
        let layer_norm = nn::layer_norm(p / "LayerNorm", vec![config.d_model], layer_norm_config);

        BertPredictionHeadTransform {
            dense,
            activation,
            layer_norm,
        }
    }

    pub fn forward(&self, hidden_states: &Tensor) -> Tensor {
        (self.activation)(&hidden_states.apply(&self.dense)).apply(&self.layer_norm)
    }
}

/// # Masked language model head
/// Gathers the hidden states of the masked positions, transforms them and projects them onto the
/// vocabulary through the token embedding table (shared storage) plus an independent bias.
pub struct BertLMPredictionHead {
    transform: BertPredictionHeadTransform,
    decoder: TiedLinear,
    bias: Tensor,
    d_model: i64,
    max_pred: i64,
}

impl BertLMPredictionHead {
    pub fn new<'p, P>(
        p: P,
        config: &BertConfig,
        word_embeddings: &nn::Embedding,
    ) -> BertLMPredictionHead
    where
        P: Borrow<nn::Path<'p>>,
    {
        let p = p.borrow() / "predictions";
        let transform = BertPredictionHeadTransform::new(&p / "transform", config);
        let decoder = TiedLinear::new(word_embeddings);
        let bias = p.var("bias", &[config.vocab_size], Init::Const(0.));

        BertLMPredictionHead {
            transform,
            decoder,
            bias,
            d_model: config.d_model,
            max_pred: config.max_pred,
        }
    }

    /// Vocabulary projection weight, shape (*vocab_size*, *d_model*)
    pub fn decoder_weight(&self) -> &Tensor {
        self.decoder.weight()
    }

    /// # Arguments
    ///
    /// * `hidden_states` - final hidden states of shape (*batch size*, *sequence_length*, *d_model*)
    /// * `masked_positions` - positions to predict, shape (*batch size*, *max_pred*)
    ///
    /// # Returns
    ///
    /// * `Tensor` of shape (*batch size*, *max_pred*, *vocab_size*)
    pub fn forward(
        &self,
        hidden_states: &Tensor,
        masked_positions: &Tensor,
    ) -> Result<Tensor, MiniBertError> {
        let hidden_shape = hidden_states.size();
        if hidden_shape.len() != 3 || hidden_shape[2] != self.d_model {
            return Err(MiniBertError::ValueError(format!(
                "Hidden states must be of shape (batch size, sequence length, {}), got {:?}",
                self.d_model, hidden_shape
            )));
        }
        let positions_shape = masked_positions.size();
        if positions_shape.len() != 2
            || positions_shape[0] != hidden_shape[0]
            || positions_shape[1] != self.max_pred
        {
            return Err(MiniBertError::ValueError(format!(
                "Masked positions must be of shape (batch size = {}, max_pred = {}), got {:?}",
                hidden_shape[0], self.max_pred, positions_shape
            )));
        }
        check_id_range(masked_positions, hidden_shape[1], "Masked positions")?;

        let gather_index = masked_positions.unsqueeze(-1).expand(
            &[positions_shape[0], positions_shape[1], hidden_shape[2]],
            true,
        );
        let masked_hidden_states = hidden_states.gather(1, &gather_index, false);

        Ok(self
            .transform
            .forward(&masked_hidden_states)
            .apply(&self.decoder)
            + &self.bias)
    }
}

/// # BERT for pre-training
/// Base BERT model with the two pre-training heads:
/// - `predictions`: masked language model head, predicting the original tokens at masked positions
/// - `pooler` and `seq_relationship`: next sentence prediction head applied to the first (*CLS*) token
pub struct BertForPreTraining {
    bert: BertModel,
    pooler: BertPooler,
    seq_relationship: nn::Linear,
    predictions: BertLMPredictionHead,
}

impl BertForPreTraining {
    /// Build a new `BertForPreTraining`
    ///
    /// # Arguments
    ///
    /// * `p` - Variable store path for the root of the BertForPreTraining model
    /// * `config` - `BertConfig` object defining the model architecture and vocab size
    ///
    /// # Example
    ///
    /// ```no_run
    /// use mini_bert::bert::{BertConfig, BertForPreTraining};
    /// use tch::{nn, Device};
    ///
    /// let device = Device::Cpu;
    /// let p = nn::VarStore::new(device);
    /// let config = BertConfig::default();
    /// let bert = BertForPreTraining::new(&p.root(), &config)?;
    /// # Ok::<(), mini_bert::MiniBertError>(())
    /// ```
    pub fn new<'p, P>(p: P, config: &BertConfig) -> Result<BertForPreTraining, MiniBertError>
    where
        P: Borrow<nn::Path<'p>>,
    {
        let p = p.borrow();

        let bert = BertModel::new(p / "bert", config)?;
        let pooler = BertPooler::new(p / "pooler", config);
        let seq_relationship = nn::linear(
            p / "seq_relationship",
            config.d_model,
            2,
            Default::default(),
        );
        let predictions = BertLMPredictionHead::new(
            p / "cls",
            config,
            bert.embeddings().word_embeddings(),
        );

        Ok(BertForPreTraining {
            bert,
            pooler,
            seq_relationship,
            predictions,
        })
    }

    /// Token embedding table, shape (*vocab_size*, *d_model*)
    pub fn token_embeddings(&self) -> &Tensor {
        &self.bert.embeddings().word_embeddings().ws
    }

    /// Masked language model decoder weight. Shares its storage with `token_embeddings`.
    pub fn decoder_weight(&self) -> &Tensor {
        self.predictions.decoder_weight()
    }

    /// Forward pass through the model
    ///
    /// # Arguments
    ///
    /// * `input_ids` - input tensor of shape (*batch size*, *sequence_length*), padded with `pad_token_id`
    /// * `token_type_ids` - Optional segment id of shape (*batch size*, *sequence_length*). If None set to 0.
    /// * `masked_positions` - positions of the masked tokens to predict, shape (*batch size*, *max_pred*), zero-padded
    /// * `train` - boolean flag to turn on/off the dropout layers in the model. Should be set to false for inference.
    ///
    /// # Returns
    ///
    /// * `BertForPreTrainingOutput` containing:
    ///   - `prediction_scores` - `Tensor` of shape (*batch size*, *max_pred*, *vocab_size*)
    ///   - `seq_relationship_scores` - `Tensor` of shape (*batch size*, 2)
    ///   - `all_hidden_states` - `Option<Vec<Tensor>>` of length *n_layers* with shape (*batch size*, *sequence_length*, *d_model*)
    ///   - `all_attentions` - `Option<Vec<Tensor>>` of length *n_layers* with shape (*batch size*, *n_heads*, *sequence_length*, *sequence_length*)
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use mini_bert::bert::{BertConfig, BertForPreTraining};
    /// # use tch::{nn, Device, Tensor, no_grad, Kind};
    /// # let device = Device::Cpu;
    /// # let vs = nn::VarStore::new(device);
    /// # let config = BertConfig::default();
    /// # let bert_model = BertForPreTraining::new(&vs.root(), &config)?;
    /// let (batch_size, sequence_length, max_pred) = (6, 30, 5);
    /// let input_tensor = Tensor::randint(29, &[batch_size, sequence_length], (Kind::Int64, device));
    /// let token_type_ids = Tensor::zeros(&[batch_size, sequence_length], (Kind::Int64, device));
    /// let masked_positions = Tensor::randint(30, &[batch_size, max_pred], (Kind::Int64, device));
    ///
    /// let model_output = no_grad(|| {
    ///     bert_model.forward_t(&input_tensor, Some(&token_type_ids), &masked_positions, false)
    /// })?;
    /// # Ok::<(), mini_bert::MiniBertError>(())
    /// ```
    pub fn forward_t(
        &self,
        input_ids: &Tensor,
        token_type_ids: Option<&Tensor>,
        masked_positions: &Tensor,
        train: bool,
    ) -> Result<BertForPreTrainingOutput, MiniBertError> {
        let base_model_output = self.bert.forward_t(input_ids, token_type_ids, train)?;

        let seq_relationship_scores = self
            .pooler
            .forward(&base_model_output.hidden_state)
            .apply(&self.seq_relationship);
        let prediction_scores = self
            .predictions
            .forward(&base_model_output.hidden_state, masked_positions)?;

        Ok(BertForPreTrainingOutput {
            prediction_scores,
            seq_relationship_scores,
            all_hidden_states: base_model_output.all_hidden_states,
            all_attentions: base_model_output.all_attentions,
        })
    }
}

/// Container for the BERT model output.
pub struct BertModelOutput {
    /// Last hidden states from the model
    pub hidden_state: Tensor,
    /// Hidden states for all intermediate layers
    pub all_hidden_states: Option<Vec<Tensor>>,
    /// Attention weights for all intermediate layers
    pub all_attentions: Option<Vec<Tensor>>,
}

/// Container for the BERT pre-training model output.
pub struct BertForPreTrainingOutput {
    /// Unnormalized vocabulary scores for every masked position (*batch size*, *max_pred*, *vocab_size*)
    pub prediction_scores: Tensor,
    /// Unnormalized IsNext / NotNext scores (*batch size*, 2)
    pub seq_relationship_scores: Tensor,
    /// Hidden states for all intermediate layers
    pub all_hidden_states: Option<Vec<Tensor>>,
    /// Attention weights for all intermediate layers
    pub all_attentions: Option<Vec<Tensor>>,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(BertConfig::default().validate().is_ok());
    }

    #[test]
    fn config_rejects_inconsistent_head_size() {
        let config = BertConfig {
            n_heads: 5,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(MiniBertError::InvalidConfigurationError(_))
        ));
    }

    #[test]
    fn config_rejects_too_many_predictions() {
        let config = BertConfig {
            max_pred: 31,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_rejects_pad_outside_vocabulary() {
        let config = BertConfig {
            pad_token_id: 29,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_optional_fields_have_defaults() -> anyhow::Result<()> {
        let config: BertConfig = serde_json::from_str(
            r#"{"vocab_size": 13, "max_len": 30, "batch_size": 6, "max_pred": 5,
                "n_layers": 2, "n_heads": 2, "d_model": 32, "d_ff": 128,
                "d_k": 16, "d_v": 16, "n_segments": 2}"#,
        )?;
        assert_eq!(config.hidden_act, Activation::gelu);
        assert_eq!(config.pad_token_id, 0);
        assert!((config.layer_norm_eps - 1e-5).abs() < f64::EPSILON);
        assert!(config.output_attentions.is_none());
        config.validate()?;
        Ok(())
    }
}

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
use crate::common::kind::get_min;
use crate::common::linear::{linear_no_bias, LinearNoBias};
use crate::MiniBertError;
use std::borrow::Borrow;
use tch::{nn, Kind, Tensor};

/// Builds the padding attention mask.
///
/// # Arguments
///
/// * `seq_q` - query side token ids of shape (*batch size*, *query_length*)
/// * `seq_k` - key side token ids of shape (*batch size*, *key_length*)
/// * `pad_token_id` - id of the padding token
///
/// # Returns
///
/// * Boolean `Tensor` of shape (*batch size*, *query_length*, *key_length*), `true` at `(b, i, j)`
///   when the `j`-th key token of batch element `b` is a padding token.
///
/// # Example
///
/// ```no_run
/// use mini_bert::bert::get_attention_pad_mask;
/// use tch::Tensor;
///
/// let input_ids = Tensor::of_slice(&[1i64, 5, 2, 0, 0]).view((1, 5));
/// let mask = get_attention_pad_mask(&input_ids, &input_ids, 0)?;
/// assert_eq!(mask.size(), vec![1, 5, 5]);
/// # Ok::<(), mini_bert::MiniBertError>(())
/// ```
pub fn get_attention_pad_mask(
    seq_q: &Tensor,
    seq_k: &Tensor,
    pad_token_id: i64,
) -> Result<Tensor, MiniBertError> {
    let (query_shape, key_shape) = (seq_q.size(), seq_k.size());
    if query_shape.len() != 2 || key_shape.len() != 2 || query_shape[0] != key_shape[0] {
        return Err(MiniBertError::ValueError(format!(
            "Query and key ids must be 2-dimensional with the same batch size, got {:?} and {:?}",
            query_shape, key_shape
        )));
    }
    Ok(seq_k
        .eq(pad_token_id)
        .unsqueeze(1)
        .expand(&[query_shape[0], query_shape[1], key_shape[1]], true))
}

/// Scaled dot-product attention.
///
/// Scores are `query . key^T / sqrt(head_size)`. Masked scores are replaced by the most negative
/// finite value of the score kind before the softmax over the key axis. A query row for which every
/// key is masked receives all-zero weights (and therefore a zero context vector).
///
/// # Arguments
///
/// * `query` - `Tensor` of shape (*batch size*, *heads*, *query_length*, *head_size*)
/// * `key` - `Tensor` of shape (*batch size*, *heads*, *key_length*, *head_size*)
/// * `value` - `Tensor` of shape (*batch size*, *heads*, *key_length*, *value_head_size*)
/// * `mask` - Optional boolean mask of shape (*batch size* or 1, *heads* or 1, *query_length*, *key_length*),
///   broadcast over the batch and head dimensions, `true` for key positions to be ignored.
///
/// # Returns
///
/// * `context` - `Tensor` of shape (*batch size*, *heads*, *query_length*, *value_head_size*)
/// * `weights` - `Tensor` of shape (*batch size*, *heads*, *query_length*, *key_length*)
pub fn scaled_dot_product_attention(
    query: &Tensor,
    key: &Tensor,
    value: &Tensor,
    mask: Option<&Tensor>,
) -> Result<(Tensor, Tensor), MiniBertError> {
    let (query_shape, key_shape, value_shape) = (query.size(), key.size(), value.size());
    if query_shape.len() != 4 || key_shape.len() != 4 || value_shape.len() != 4 {
        return Err(MiniBertError::ValueError(format!(
            "Query, key and value must be 4-dimensional, got {:?}, {:?} and {:?}",
            query_shape, key_shape, value_shape
        )));
    }
    if query_shape[3] != key_shape[3] {
        return Err(MiniBertError::ValueError(format!(
            "Query and key head sizes differ: {} vs {}",
            query_shape[3], key_shape[3]
        )));
    }
    if key_shape[2] != value_shape[2] || key_shape[..2] != value_shape[..2] {
        return Err(MiniBertError::ValueError(format!(
            "Key and value shapes are incompatible: {:?} vs {:?}",
            key_shape, value_shape
        )));
    }
    if query_shape[..2] != key_shape[..2] {
        return Err(MiniBertError::ValueError(format!(
            "Query and key batch/head dimensions differ: {:?} vs {:?}",
            query_shape, key_shape
        )));
    }

    let (query_length, key_length) = (query_shape[2], key_shape[2]);
    let head_size = query_shape[3];

    let scores = query.matmul(&key.transpose(-1, -2)) / (head_size as f64).sqrt();

    match mask {
        Some(mask) => {
            let mask_shape = mask.size();
            if mask_shape.len() != 4
                || mask_shape[2] != query_length
                || mask_shape[3] != key_length
                || (mask_shape[0] != 1 && mask_shape[0] != query_shape[0])
                || (mask_shape[1] != 1 && mask_shape[1] != query_shape[1])
            {
                return Err(MiniBertError::ValueError(format!(
                    "Attention mask of shape {:?} cannot be broadcast to scores of shape {:?}",
                    mask_shape,
                    scores.size()
                )));
            }
            let mask = mask.to_kind(Kind::Bool);
            let scores = scores.masked_fill(&mask, get_min(scores.kind())?);
            let weights = scores.softmax(-1, scores.kind());

            let masked_keys = mask
                .to_kind(Kind::Int64)
                .sum_dim_intlist(&[-1], true, Kind::Int64);
            let has_visible_key = masked_keys.lt(key_length).to_kind(weights.kind());
            let weights = weights * has_visible_key;

            let context = weights.matmul(value);
            Ok((context, weights))
        }
        None => {
            let weights = scores.softmax(-1, scores.kind());
            let context = weights.matmul(value);
            Ok((context, weights))
        }
    }
}

/// # Multi-head self-attention projections
/// Projects queries, keys and values into `n_heads` subspaces, runs the scaled dot-product
/// attention for every head in one batched operation and merges the heads back.
#[derive(Debug)]
pub struct BertSelfAttention {
    d_model: i64,
    num_attention_heads: i64,
    key_head_size: i64,
    value_head_size: i64,
    query: LinearNoBias,
    key: LinearNoBias,
    value: LinearNoBias,
}

impl BertSelfAttention {
    pub fn new<'p, P>(p: P, config: &BertConfig) -> BertSelfAttention
    where
        P: Borrow<nn::Path<'p>>,
    {
        assert_eq!(
            config.n_heads * config.d_k,
            config.d_model,
            "Number of heads times key head size must equal the model width"
        );
        assert_eq!(
            config.n_heads * config.d_v,
            config.d_model,
            "Number of heads times value head size must equal the model width"
        );
        let p = p.borrow();

        let query = linear_no_bias(
            p / "query",
            config.d_model,
            config.n_heads * config.d_k,
            Default::default(),
        );
        let key = linear_no_bias(
            p / "key",
            config.d_model,
            config.n_heads * config.d_k,
            Default::default(),
        );
        let value = linear_no_bias(
            p / "value",
            config.d_model,
            config.n_heads * config.d_v,
            Default::default(),
        );

        BertSelfAttention {
            d_model: config.d_model,
            num_attention_heads: config.n_heads,
            key_head_size: config.d_k,
            value_head_size: config.d_v,
            query,
            key,
            value,
        }
    }

    fn split_heads(&self, x: Tensor, bs: i64, dim_per_head: i64) -> Tensor {
        x.view((bs, -1, self.num_attention_heads, dim_per_head))
            .transpose(1, 2)
    }

    fn flatten(&self, x: Tensor, bs: i64, dim_per_head: i64) -> Tensor {
        x.transpose(1, 2)
            .contiguous()
            .view((bs, -1, self.num_attention_heads * dim_per_head))
    }

    /// Returns the merged context of shape (*batch size*, *query_length*, *n_heads x d_v*) and the
    /// attention weights of shape (*batch size*, *n_heads*, *query_length*, *key_length*).
    pub fn forward(
        &self,
        query: &Tensor,
        key: &Tensor,
        value: &Tensor,
        mask: Option<&Tensor>,
    ) -> Result<(Tensor, Tensor), MiniBertError> {
        let (query_shape, key_shape, value_shape) = (query.size(), key.size(), value.size());
        for (name, shape) in [("Query", &query_shape), ("Key", &key_shape), ("Value", &value_shape)]
            .iter()
        {
            if shape.len() != 3 || shape[2] != self.d_model {
                return Err(MiniBertError::ValueError(format!(
                    "{} must be of shape (batch size, sequence length, {}), got {:?}",
                    name, self.d_model, shape
                )));
            }
        }
        if query_shape[0] != key_shape[0] || key_shape[..2] != value_shape[..2] {
            return Err(MiniBertError::ValueError(format!(
                "Query, key and value shapes are incompatible: {:?}, {:?} and {:?}",
                query_shape, key_shape, value_shape
            )));
        }
        let bs = query_shape[0];

        let query_layer = self.split_heads(query.apply(&self.query), bs, self.key_head_size);
        let key_layer = self.split_heads(key.apply(&self.key), bs, self.key_head_size);
        let value_layer = self.split_heads(value.apply(&self.value), bs, self.value_head_size);

        let mask = mask.map(|mask| mask.unsqueeze(1));
        let (context, weights) =
            scaled_dot_product_attention(&query_layer, &key_layer, &value_layer, mask.as_ref())?;

        Ok((self.flatten(context, bs, self.value_head_size), weights))
    }
}

#[derive(Debug)]
pub struct BertSelfOutput {
    linear: nn::Linear,
    layer_norm: nn::LayerNorm,
    dropout: Dropout,
}

impl BertSelfOutput {
    pub fn new<'p, P>(p: P, config: &BertConfig) -> BertSelfOutput
    where
        P: Borrow<nn::Path<'p>>,
    {
        let p = p.borrow();

        let linear = nn::linear(
            p / "dense",
            config.n_heads * config.d_v,
            config.d_model,
            Default::default(),
        );
        let layer_norm_config = nn::LayerNormConfig {
            eps: config.layer_norm_eps,
            ..Default::default()
        };
        let layer_norm = nn::layer_norm(p / "LayerNorm", vec![config.d_model], layer_norm_config);
        let dropout = Dropout::new(config.hidden_dropout_prob);

        BertSelfOutput {
            linear,
            layer_norm,
            dropout,
        }
    }

    pub fn forward_t(&self, hidden_states: &Tensor, input_tensor: &Tensor, train: bool) -> Tensor {
        let hidden_states: Tensor = input_tensor
            + hidden_states
                .apply(&self.linear)
                .apply_t(&self.dropout, train);
        hidden_states.apply(&self.layer_norm)
    }
}

/// # Multi-head attention sublayer
/// Self-attention followed by the output projection, the residual connection to the (unprojected)
/// query input and layer normalization. The output has the shape of the query input.
#[derive(Debug)]
pub struct BertAttention {
    _self: BertSelfAttention,
    output: BertSelfOutput,
}

impl BertAttention {
    /// Build a new `BertAttention`
    ///
    /// # Arguments
    ///
    /// * `p` - Variable store path for the root of the attention sublayer
    /// * `config` - `BertConfig` object defining the model width and number of heads
    ///
    /// # Example
    ///
    /// ```no_run
    /// use mini_bert::bert::{BertAttention, BertConfig};
    /// use tch::{nn, Device};
    ///
    /// let vs = nn::VarStore::new(Device::Cpu);
    /// let config = BertConfig::default();
    /// let attention = BertAttention::new(&vs.root() / "attention", &config);
    /// ```
    pub fn new<'p, P>(p: P, config: &BertConfig) -> BertAttention
    where
        P: Borrow<nn::Path<'p>>,
    {
        let p = p.borrow();

        let _self = BertSelfAttention::new(p / "self", config);
        let output = BertSelfOutput::new(p / "output", config);
        BertAttention { _self, output }
    }

    /// Forward pass through the attention sublayer
    ///
    /// # Arguments
    ///
    /// * `query` - query source of shape (*batch size*, *query_length*, *d_model*), also used as residual
    /// * `key` - key source of shape (*batch size*, *key_length*, *d_model*)
    /// * `value` - value source of shape (*batch size*, *key_length*, *d_model*)
    /// * `mask` - Optional boolean padding mask of shape (*batch size*, *query_length*, *key_length*)
    /// * `train` - boolean flag to turn on/off the dropout layers in the model
    ///
    /// # Returns
    ///
    /// * `Tensor` of shape (*batch size*, *query_length*, *d_model*)
    /// * attention weights of shape (*batch size*, *n_heads*, *query_length*, *key_length*)
    pub fn forward_t(
        &self,
        query: &Tensor,
        key: &Tensor,
        value: &Tensor,
        mask: Option<&Tensor>,
        train: bool,
    ) -> Result<(Tensor, Tensor), MiniBertError> {
        let (context, attention_weights) = self._self.forward(query, key, value, mask)?;
        let output = self.output.forward_t(&context, query, train);
        Ok((output, attention_weights))
    }
}

/// # Position-wise feed-forward sublayer
/// `d_model -> d_ff -> d_model` projections with the configured activation in between, applied to
/// every position independently, followed by a residual connection and layer normalization.
pub struct BertFeedForward {
    intermediate: nn::Linear,
    activation: fn(&Tensor) -> Tensor,
    output: nn::Linear,
    layer_norm: nn::LayerNorm,
    dropout: Dropout,
}

impl BertFeedForward {
    pub fn new<'p, P>(p: P, config: &BertConfig) -> BertFeedForward
    where
        P: Borrow<nn::Path<'p>>,
    {
        let p = p.borrow();

        let intermediate = nn::linear(
            p / "intermediate",
            config.d_model,
            config.d_ff,
            Default::default(),
        );
        let output = nn::linear(p / "output", config.d_ff, config.d_model, Default::default());
        let layer_norm_config = nn::LayerNormConfig {
            eps: config.layer_norm_eps,
            ..Default::default()
        };
        let layer_norm = nn::layer_norm(p / "LayerNorm", vec![config.d_model], layer_norm_config);
        let activation = config.hidden_act.get_function();
        let dropout = Dropout::new(config.hidden_dropout_prob);

        BertFeedForward {
            intermediate,
            activation,
            output,
            layer_norm,
            dropout,
        }
    }

    pub fn forward_t(&self, hidden_states: &Tensor, train: bool) -> Tensor {
        let output = (self.activation)(&hidden_states.apply(&self.intermediate))
            .apply(&self.output)
            .apply_t(&self.dropout, train);
        (hidden_states + output).apply(&self.layer_norm)
    }
}

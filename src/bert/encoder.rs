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

use crate::bert::attention::{BertAttention, BertFeedForward};
use crate::bert::bert_model::BertConfig;
use crate::MiniBertError;
use std::borrow::{Borrow, BorrowMut};
use tch::{nn, Tensor};

/// # BERT Layer
/// Layer used in BERT encoders.
/// It is made of the following blocks:
/// - `attention`: multi-head self-attention `BertAttention` sublayer
/// - `feed_forward`: position-wise `BertFeedForward` sublayer
pub struct BertLayer {
    attention: BertAttention,
    feed_forward: BertFeedForward,
}

impl BertLayer {
    /// Build a new `BertLayer`
    ///
    /// # Arguments
    ///
    /// * `p` - Variable store path for the root of the layer
    /// * `config` - `BertConfig` object defining the model architecture
    ///
    /// # Example
    ///
    /// ```no_run
    /// use mini_bert::bert::{BertConfig, BertLayer};
    /// use tch::{nn, Device};
    ///
    /// let device = Device::Cpu;
    /// let p = nn::VarStore::new(device);
    /// let config = BertConfig::default();
    /// let layer: BertLayer = BertLayer::new(&p.root(), &config);
    /// ```
    pub fn new<'p, P>(p: P, config: &BertConfig) -> BertLayer
    where
        P: Borrow<nn::Path<'p>>,
    {
        let p = p.borrow();

        let attention = BertAttention::new(p / "attention", config);
        let feed_forward = BertFeedForward::new(p / "feed_forward", config);

        BertLayer {
            attention,
            feed_forward,
        }
    }

    /// Forward pass through the layer
    ///
    /// # Arguments
    ///
    /// * `hidden_states` - input tensor of shape (*batch size*, *sequence_length*, *d_model*).
    /// * `mask` - Optional boolean padding mask of shape (*batch size*, *sequence_length*, *sequence_length*). Positions set to `true` are not attended to.
    /// * `train` - boolean flag to turn on/off the dropout layers in the model. Should be set to false for inference.
    ///
    /// # Returns
    ///
    /// * `BertLayerOutput` containing:
    ///   - `hidden_state` - `Tensor` of shape (*batch size*, *sequence_length*, *d_model*)
    ///   - `attention_weights` - `Tensor` of shape (*batch size*, *n_heads*, *sequence_length*, *sequence_length*)
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use mini_bert::bert::{BertConfig, BertLayer};
    /// # use tch::{nn, Device, Tensor, no_grad, Kind};
    /// # let device = Device::Cpu;
    /// # let vs = nn::VarStore::new(device);
    /// # let config = BertConfig::default();
    /// let layer: BertLayer = BertLayer::new(&vs.root(), &config);
    /// let (batch_size, sequence_length, hidden_size) = (6, 30, 768);
    /// let input_tensor = Tensor::rand(
    ///     &[batch_size, sequence_length, hidden_size],
    ///     (Kind::Float, device),
    /// );
    ///
    /// let layer_output = no_grad(|| layer.forward_t(&input_tensor, None, false))?;
    /// # Ok::<(), mini_bert::MiniBertError>(())
    /// ```
    pub fn forward_t(
        &self,
        hidden_states: &Tensor,
        mask: Option<&Tensor>,
        train: bool,
    ) -> Result<BertLayerOutput, MiniBertError> {
        let (attention_output, attention_weights) =
            self.attention
                .forward_t(hidden_states, hidden_states, hidden_states, mask, train)?;

        let output = self.feed_forward.forward_t(&attention_output, train);

        Ok(BertLayerOutput {
            hidden_state: output,
            attention_weights,
        })
    }
}

/// # BERT Encoder
/// Encoder used in BERT models.
/// It is made of a Vector of `BertLayer` through which hidden states will be passed, every layer
/// receiving the same attention mask.
pub struct BertEncoder {
    output_attentions: bool,
    output_hidden_states: bool,
    layers: Vec<BertLayer>,
}

impl BertEncoder {
    /// Build a new `BertEncoder`
    ///
    /// # Arguments
    ///
    /// * `p` - Variable store path for the root of the encoder
    /// * `config` - `BertConfig` object defining the model architecture
    ///
    /// # Example
    ///
    /// ```no_run
    /// use mini_bert::bert::{BertConfig, BertEncoder};
    /// use tch::{nn, Device};
    ///
    /// let device = Device::Cpu;
    /// let p = nn::VarStore::new(device);
    /// let config = BertConfig::default();
    /// let encoder: BertEncoder = BertEncoder::new(&p.root(), &config);
    /// ```
    pub fn new<'p, P>(p: P, config: &BertConfig) -> BertEncoder
    where
        P: Borrow<nn::Path<'p>>,
    {
        let p = p.borrow() / "layer";
        let output_attentions = config.output_attentions.unwrap_or(false);
        let output_hidden_states = config.output_hidden_states.unwrap_or(false);

        let mut layers: Vec<BertLayer> = vec![];
        for layer_index in 0..config.n_layers {
            layers.push(BertLayer::new(&p / layer_index, config));
        }

        BertEncoder {
            output_attentions,
            output_hidden_states,
            layers,
        }
    }

    /// Forward pass through the encoder
    ///
    /// # Arguments
    ///
    /// * `input` - input tensor of shape (*batch size*, *sequence_length*, *d_model*).
    /// * `mask` - Optional boolean padding mask of shape (*batch size*, *sequence_length*, *sequence_length*). Positions set to `true` are not attended to.
    /// * `train` - boolean flag to turn on/off the dropout layers in the model. Should be set to false for inference.
    ///
    /// # Returns
    ///
    /// * `BertEncoderOutput` containing:
    ///   - `hidden_state` - `Tensor` of shape (*batch size*, *sequence_length*, *d_model*)
    ///   - `all_hidden_states` - `Option<Vec<Tensor>>` of length *n_layers* with shape (*batch size*, *sequence_length*, *d_model*)
    ///   - `all_attentions` - `Option<Vec<Tensor>>` of length *n_layers* with shape (*batch size*, *n_heads*, *sequence_length*, *sequence_length*)
    pub fn forward_t(
        &self,
        input: &Tensor,
        mask: Option<&Tensor>,
        train: bool,
    ) -> Result<BertEncoderOutput, MiniBertError> {
        let mut all_hidden_states: Option<Vec<Tensor>> = if self.output_hidden_states {
            Some(vec![])
        } else {
            None
        };
        let mut all_attentions: Option<Vec<Tensor>> = if self.output_attentions {
            Some(vec![])
        } else {
            None
        };

        let mut hidden_state = input.shallow_clone();

        for layer in &self.layers {
            let layer_output = layer.forward_t(&hidden_state, mask, train)?;

            hidden_state = layer_output.hidden_state;
            if let Some(attentions) = all_attentions.borrow_mut() {
                attentions.push(layer_output.attention_weights);
            };
            if let Some(hidden_states) = all_hidden_states.borrow_mut() {
                hidden_states.push(hidden_state.copy());
            };
        }

        Ok(BertEncoderOutput {
            hidden_state,
            all_hidden_states,
            all_attentions,
        })
    }
}

/// # BERT Pooler
/// Pooler used in BERT models.
/// It is made of a fully connected layer with a tanh activation applied to the first sequence
/// element (*CLS* token).
pub struct BertPooler {
    lin: nn::Linear,
}

impl BertPooler {
    pub fn new<'p, P>(p: P, config: &BertConfig) -> BertPooler
    where
        P: Borrow<nn::Path<'p>>,
    {
        let p = p.borrow();

        let lin = nn::linear(p / "dense", config.d_model, config.d_model, Default::default());
        BertPooler { lin }
    }

    /// Returns a `Tensor` of shape (*batch size*, *d_model*)
    pub fn forward(&self, hidden_states: &Tensor) -> Tensor {
        hidden_states.select(1, 0).apply(&self.lin).tanh()
    }
}

/// Container for the BERT layer output.
pub struct BertLayerOutput {
    /// Hidden states
    pub hidden_state: Tensor,
    /// Self attention weights
    pub attention_weights: Tensor,
}

/// Container for the BERT encoder output.
pub struct BertEncoderOutput {
    /// Last hidden states from the model
    pub hidden_state: Tensor,
    /// Hidden states for all intermediate layers
    pub all_hidden_states: Option<Vec<Tensor>>,
    /// Attention weights for all intermediate layers
    pub all_attentions: Option<Vec<Tensor>>,
}

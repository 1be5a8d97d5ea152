//! # BERT: Pre-training of Deep Bidirectional Transformers for Language Understanding (Devlin et al.)
//!
//! Compact implementation of the BERT encoder ([https://arxiv.org/abs/1810.04805](https://arxiv.org/abs/1810.04805) Devlin, Chang, Lee, Toutanova, 2018)
//! together with its two pre-training heads.
//! The encoder is implemented in the `bert::BertModel` struct and the pre-training model in `bert::BertForPreTraining`:
//! - Masked language model head: predicts the original tokens at the masked positions, projecting onto the vocabulary with the token embedding table
//! - Next sentence prediction head: classifies from the first (*CLS*) token whether the second segment follows the first one
//!
//! # Model set-up
//!
//! All parameters are allocated once in a `tch::nn::VarStore` when the model is built, from an explicit `BertConfig`.
//!
//! ```no_run
//! # fn main() -> Result<(), mini_bert::MiniBertError> {
//! use mini_bert::bert::{BertConfig, BertForPreTraining};
//! use tch::{nn, Device};
//!
//! let device = Device::cuda_if_available();
//! let vs = nn::VarStore::new(device);
//! let config = BertConfig {
//!     vocab_size: 13,
//!     n_layers: 2,
//!     n_heads: 2,
//!     d_model: 32,
//!     d_ff: 128,
//!     d_k: 16,
//!     d_v: 16,
//!     ..Default::default()
//! };
//! let bert_model = BertForPreTraining::new(&vs.root(), &config)?;
//! # Ok(())
//! # }
//! ```

mod attention;
mod bert_model;
mod embeddings;
mod encoder;

pub use attention::{
    get_attention_pad_mask, scaled_dot_product_attention, BertAttention, BertFeedForward,
    BertSelfAttention,
};
pub use bert_model::{
    BertConfig, BertForPreTraining, BertForPreTrainingOutput, BertLMPredictionHead, BertModel,
    BertModelOutput,
};
pub use embeddings::BertEmbeddings;
pub use encoder::{BertEncoder, BertEncoderOutput, BertLayer, BertLayerOutput, BertPooler};

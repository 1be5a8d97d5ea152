//! Compact BERT encoder with masked language model and next sentence prediction pre-training
//! heads, built on the Rust bindings for libtorch ([tch-rs](https://github.com/LaurentMazare/tch-rs)).
//!
//! The crate is organized in three modules:
//! - `bert`: embeddings, multi-head scaled dot-product attention, encoder stack and the two
//!   pre-training heads (the masked language model decoder shares its weight with the token
//!   embedding table)
//! - `pretraining`: toy corpus, vocabulary, seeded batch sampling, training loop and predictions
//! - `common`: configuration trait, error type, activations and shared layers
//!
//! ```no_run
//! use mini_bert::bert::{BertConfig, BertForPreTraining};
//! use tch::{nn, no_grad, Device, Kind, Tensor};
//!
//! let device = Device::Cpu;
//! let vs = nn::VarStore::new(device);
//! let config = BertConfig::default();
//! let model = BertForPreTraining::new(&vs.root(), &config)?;
//!
//! let input_ids = Tensor::randint(29, &[6, 30], (Kind::Int64, device));
//! let masked_positions = Tensor::randint(30, &[6, 5], (Kind::Int64, device));
//! let output = no_grad(|| model.forward_t(&input_ids, None, &masked_positions, false))?;
//! assert_eq!(output.prediction_scores.size(), vec![6, 5, 29]);
//! assert_eq!(output.seq_relationship_scores.size(), vec![6, 2]);
//! # Ok::<(), mini_bert::MiniBertError>(())
//! ```

pub mod bert;
pub mod common;
pub mod pretraining;

pub use common::error::MiniBertError;
pub use common::Config;

pub(crate) mod activations;
pub mod config;
pub(crate) mod dropout;
pub mod error;
pub(crate) mod kind;
pub(crate) mod linear;

pub use activations::Activation;
pub use config::Config;

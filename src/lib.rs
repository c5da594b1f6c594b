//! Vector-quantized and variational autoencoders built on [burn].
//!
//! - [`VqVae`](model::vqvae::VqVae): convolutional encoder, vector quantization
//!   bottleneck with a straight-through estimator, convolutional decoder.
//! - [`Vae`](model::vae::Vae): fully connected VAE trained with the
//!   reparameterization trick.
//! - [`TrainingSession`](training::TrainingSession): explicit training loop state.
extern crate alloc;

#[cfg(feature = "dataset")]
pub mod data;
pub mod error;
pub mod model;
pub mod training;

pub use error::{ConfigError, Result};

pub mod decoder;
pub mod encoder;
pub mod quantizer;
mod residual;
pub mod stage;
pub mod vae;
pub mod vqvae;

pub use residual::{Residual, ResidualStack};

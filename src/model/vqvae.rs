use burn::{
    config::Config,
    module::Module,
    nn::conv::Conv2d,
    tensor::{backend::Backend, Device, Int, Tensor},
};

use super::{
    decoder::{Decoder, DecoderConfig},
    encoder::{Encoder, EncoderConfig},
    quantizer::{VectorQuantizer, VectorQuantizerConfig},
    stage::{ScaleFactor, StageDescriptor},
};
use crate::error::{non_zero, ConfigError};

/// Output of a [VQ-VAE](VqVae) forward pass.
#[derive(Debug, Clone)]
pub struct VqVaeOutput<B: Backend> {
    /// Reconstructed images, same shape as the input.
    pub reconstruction: Tensor<B, 4>,
    /// Codebook + commitment loss of the bottleneck.
    pub quantization_loss: Tensor<B, 1>,
    /// Codebook index of every latent grid position `[batch, h, w]`.
    pub codes: Tensor<B, 3, Int>,
}

/// Vector-quantized autoencoder from
/// [`Neural Discrete Representation Learning`](https://arxiv.org/abs/1711.00937).
#[derive(Module, Debug)]
pub struct VqVae<B: Backend> {
    encoder: Encoder<B>,
    pre_quantization: Conv2d<B>,
    quantizer: VectorQuantizer<B>,
    decoder: Decoder<B>,
}

impl<B: Backend> VqVae<B> {
    /// Continuous latent grid `[batch, embedding_dim, h, w]` before quantization.
    pub fn latents(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.encoder.forward(images);
        self.pre_quantization.forward(x)
    }

    pub fn forward(&self, images: Tensor<B, 4>) -> VqVaeOutput<B> {
        let latents = self.latents(images);
        let quantized = self.quantizer.forward(latents);
        let reconstruction = self.decoder.forward(quantized.quantized);

        VqVaeOutput {
            reconstruction,
            quantization_loss: quantized.loss,
            codes: quantized.indices,
        }
    }

    /// Discrete codes `[batch, h, w]` for a batch of images.
    pub fn encode(&self, images: Tensor<B, 4>) -> Tensor<B, 3, Int> {
        let latents = self.latents(images);
        let [batch, channels, height, width] = latents.dims();
        let flat = latents
            .permute([0, 2, 3, 1])
            .reshape([batch * height * width, channels]);

        self.quantizer
            .nearest(flat)
            .reshape([batch, height, width])
    }

    /// Images reconstructed from a grid of discrete codes.
    pub fn decode_codes(&self, codes: Tensor<B, 3, Int>) -> Tensor<B, 4> {
        let quantized = self.quantizer.decode_indices(codes);
        self.decoder.forward(quantized)
    }

    pub fn quantizer(&self) -> &VectorQuantizer<B> {
        &self.quantizer
    }
}

/// [VQ-VAE](VqVae) configuration.
#[derive(Config, Debug)]
pub struct VqVaeConfig {
    /// Width of the encoder and decoder stacks.
    #[config(default = "128")]
    pub hidden_units: usize,
    /// Residual blocks in both the encoder and the decoder.
    #[config(default = "2")]
    pub residual_layers: usize,
    #[config(default = "32")]
    pub residual_hidden_units: usize,
    /// Codebook size.
    #[config(default = "512")]
    pub num_embeddings: usize,
    /// Codebook entry size, i.e. channels of the latent grid.
    #[config(default = "64")]
    pub embedding_dim: usize,
    #[config(default = "0.25")]
    pub commitment_cost: f64,
    /// Shared by the encoder and the decoder.
    #[config(default = "ScaleFactor::Four")]
    pub scale_factor: ScaleFactor,
    /// Channels of both the input and the reconstructed images.
    #[config(default = "3")]
    pub image_channels: usize,
}

impl VqVaeConfig {
    pub fn encoder(&self) -> EncoderConfig {
        EncoderConfig::new(
            self.hidden_units,
            self.residual_layers,
            self.residual_hidden_units,
        )
        .with_in_channels(self.image_channels)
        .with_scale_factor(self.scale_factor)
    }

    pub fn decoder(&self) -> DecoderConfig {
        DecoderConfig::new(
            self.embedding_dim,
            self.hidden_units,
            self.residual_layers,
            self.residual_hidden_units,
        )
        .with_out_channels(self.image_channels)
        .with_scale_factor(self.scale_factor)
    }

    pub fn quantizer(&self) -> VectorQuantizerConfig {
        VectorQuantizerConfig::new(self.num_embeddings, self.embedding_dim)
            .with_commitment_cost(self.commitment_cost)
    }

    /// Check every sub-configuration without allocating any parameter.
    pub fn validate(&self) -> Result<(), ConfigError> {
        non_zero("hidden_units", self.hidden_units)?;
        non_zero("embedding_dim", self.embedding_dim)?;
        self.encoder().validate()?;
        self.quantizer().validate()?;
        self.decoder().validate()
    }

    /// Initialize a new [VQ-VAE](VqVae) module.
    ///
    /// # Errors
    ///
    /// Fails on the first invalid sub-configuration, before any parameter is
    /// allocated.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> Result<VqVae<B>, ConfigError> {
        self.validate()?;

        let encoder = self.encoder().init(device)?;
        // 1x1 projection from the encoder width to the codebook entry size
        let pre_quantization = StageDescriptor::same(self.hidden_units, self.embedding_dim, 1)
            .conv2d()
            .init(device);
        let quantizer = self.quantizer().init(device)?;
        let decoder = self.decoder().init(device)?;

        Ok(VqVae {
            encoder,
            pre_quantization,
            quantizer,
            decoder,
        })
    }
}

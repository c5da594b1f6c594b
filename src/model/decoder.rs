use alloc::vec::Vec;

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, ConvTranspose2d},
        Relu,
    },
    tensor::{backend::Backend, Device, Tensor},
};

use super::{
    residual::ResidualStack,
    stage::{check_chain, upsampling_stages, ScaleFactor, StageDescriptor},
};
use crate::error::{non_zero, ConfigError};

/// Convolutional decoder from a latent grid back to pixel space.
///
/// A 3x3 projection, a stack of residual blocks and strided transposed
/// convolutions (ReLU in between). The output is not squashed.
#[derive(Module, Debug)]
pub struct Decoder<B: Backend> {
    project: Conv2d<B>,
    residual: ResidualStack<B>,
    upsample: Vec<ConvTranspose2d<B>>,
    relu: Relu,
}

impl<B: Backend> Decoder<B> {
    /// Decode a `[batch, in_channels, h, w]` grid into
    /// `[batch, out_channels, h * factor, w * factor]` images.
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.project.forward(input);
        let mut x = self.residual.forward(x);

        for (i, conv) in self.upsample.iter().enumerate() {
            if i > 0 {
                x = self.relu.forward(x);
            }
            x = conv.forward(x);
        }

        x
    }
}

/// [Decoder](Decoder) configuration.
#[derive(Config, Debug)]
pub struct DecoderConfig {
    /// Channels of the latent grid.
    pub in_channels: usize,
    /// Width of the projection and residual blocks.
    pub hidden_units: usize,
    /// Number of residual blocks.
    pub num_residual_layers: usize,
    /// Hidden width inside each residual block.
    pub residual_hidden_units: usize,
    /// Channels of the reconstructed images.
    #[config(default = "3")]
    pub out_channels: usize,
    #[config(default = "ScaleFactor::Four")]
    pub scale_factor: ScaleFactor,
}

impl DecoderConfig {
    fn project_stage(&self) -> StageDescriptor {
        StageDescriptor::same(self.in_channels, self.hidden_units, 3)
    }

    /// The projection convolution followed by the stages resolved from the scale factor.
    pub fn stages(&self) -> Vec<StageDescriptor> {
        let mut stages = alloc::vec![self.project_stage()];
        stages.extend(upsampling_stages(
            self.scale_factor,
            self.hidden_units,
            self.out_channels,
        ));
        stages
    }

    /// Check that no dimension is zero and that the resolved stages chain from
    /// `in_channels` to `out_channels`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        non_zero("in_channels", self.in_channels)?;
        non_zero("hidden_units", self.hidden_units)?;
        non_zero("residual_hidden_units", self.residual_hidden_units)?;
        non_zero("out_channels", self.out_channels)?;
        check_chain(&self.stages(), self.in_channels, self.out_channels)
    }

    /// Initialize a new [decoder](Decoder) module.
    ///
    /// # Errors
    ///
    /// See [validate](DecoderConfig::validate).
    pub fn init<B: Backend>(&self, device: &Device<B>) -> Result<Decoder<B>, ConfigError> {
        self.validate()?;

        let upsample = upsampling_stages(self.scale_factor, self.hidden_units, self.out_channels)
            .iter()
            .map(|stage| stage.conv_transpose2d().init(device))
            .collect();

        Ok(Decoder {
            project: self.project_stage().conv2d().init(device),
            residual: ResidualStack::new(
                self.num_residual_layers,
                self.hidden_units,
                self.residual_hidden_units,
                device,
            ),
            upsample,
            relu: Relu::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{model::encoder::EncoderConfig, tests::TestBackend};
    use burn::tensor::Distribution;

    #[test]
    fn decoder_upsamples_to_rgb() {
        let device = Default::default();
        let decoder = DecoderConfig::new(4, 16, 2, 8)
            .init::<TestBackend>(&device)
            .unwrap();
        let latents = Tensor::<TestBackend, 4>::random([2, 4, 7, 7], Distribution::Default, &device);

        assert_eq!(decoder.forward(latents).dims(), [2, 3, 28, 28]);
    }

    #[test]
    fn round_trip_keeps_resolution() {
        let device = Default::default();

        for scale in [ScaleFactor::Two, ScaleFactor::Four] {
            let encoder = EncoderConfig::new(16, 1, 8)
                .with_scale_factor(scale)
                .init::<TestBackend>(&device)
                .unwrap();
            let decoder = DecoderConfig::new(16, 16, 1, 8)
                .with_scale_factor(scale)
                .init::<TestBackend>(&device)
                .unwrap();
            let images =
                Tensor::<TestBackend, 4>::random([1, 3, 16, 12], Distribution::Default, &device);

            let output = decoder.forward(encoder.forward(images));
            assert_eq!(output.dims(), [1, 3, 16, 12], "scale {scale:?}");
        }
    }

    #[test]
    fn zero_output_channels_fail_at_init() {
        let device = Default::default();
        let result = DecoderConfig::new(4, 16, 1, 8)
            .with_out_channels(0)
            .init::<TestBackend>(&device);

        assert!(result.is_err());
    }
}

use alloc::vec::Vec;

use burn::{
    config::Config,
    module::Module,
    nn::{conv::Conv2d, Relu},
    tensor::{backend::Backend, Device, Tensor},
};

use super::{
    residual::ResidualStack,
    stage::{check_chain, downsampling_stages, ScaleFactor, StageDescriptor},
};
use crate::error::{non_zero, ConfigError};

/// Convolutional encoder from pixel space to the latent feature grid.
///
/// Strided convolutions (each followed by a ReLU), a 3x3 refinement
/// convolution, a stack of residual blocks and a final ReLU.
#[derive(Module, Debug)]
pub struct Encoder<B: Backend> {
    downsample: Vec<Conv2d<B>>,
    refine: Conv2d<B>,
    residual: ResidualStack<B>,
    relu: Relu,
}

impl<B: Backend> Encoder<B> {
    /// Encode `[batch, in_channels, height, width]` images into a
    /// `[batch, hidden_units, height / factor, width / factor]` grid.
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut x = input;
        for conv in &self.downsample {
            x = conv.forward(x);
            x = self.relu.forward(x);
        }

        let x = self.refine.forward(x);
        let x = self.residual.forward(x);

        self.relu.forward(x)
    }
}

/// [Encoder](Encoder) configuration.
#[derive(Config, Debug)]
pub struct EncoderConfig {
    /// Channels of the input images.
    #[config(default = "3")]
    pub in_channels: usize,
    /// Channels of the encoded feature grid.
    pub hidden_units: usize,
    /// Number of residual blocks.
    pub num_residual_layers: usize,
    /// Hidden width inside each residual block.
    pub residual_hidden_units: usize,
    #[config(default = "ScaleFactor::Four")]
    pub scale_factor: ScaleFactor,
}

impl EncoderConfig {
    fn refine_stage(&self) -> StageDescriptor {
        StageDescriptor::same(self.hidden_units, self.hidden_units, 3)
    }

    /// Stages resolved from the scale factor, followed by the refinement convolution.
    pub fn stages(&self) -> Vec<StageDescriptor> {
        let mut stages =
            downsampling_stages(self.scale_factor, self.in_channels, self.hidden_units);
        stages.push(self.refine_stage());
        stages
    }

    /// Check that no dimension is zero and that the resolved stages chain from
    /// `in_channels` to `hidden_units`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        non_zero("in_channels", self.in_channels)?;
        non_zero("hidden_units", self.hidden_units)?;
        non_zero("residual_hidden_units", self.residual_hidden_units)?;
        check_chain(&self.stages(), self.in_channels, self.hidden_units)
    }

    /// Initialize a new [encoder](Encoder) module.
    ///
    /// # Errors
    ///
    /// See [validate](EncoderConfig::validate).
    pub fn init<B: Backend>(&self, device: &Device<B>) -> Result<Encoder<B>, ConfigError> {
        self.validate()?;

        let downsample = downsampling_stages(self.scale_factor, self.in_channels, self.hidden_units)
            .iter()
            .map(|stage| stage.conv2d().init(device))
            .collect();

        Ok(Encoder {
            downsample,
            refine: self.refine_stage().conv2d().init(device),
            residual: ResidualStack::new(
                self.num_residual_layers,
                self.hidden_units,
                self.residual_hidden_units,
                device,
            ),
            relu: Relu::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::ConfigError, tests::TestBackend};
    use burn::tensor::Distribution;

    #[test]
    fn encoder_downsamples_by_four() {
        let device = Default::default();
        let encoder = EncoderConfig::new(16, 2, 8).init::<TestBackend>(&device).unwrap();
        let images = Tensor::<TestBackend, 4>::random([2, 3, 32, 32], Distribution::Default, &device);

        assert_eq!(encoder.forward(images).dims(), [2, 16, 8, 8]);
    }

    #[test]
    fn encoder_downsamples_by_two() {
        let device = Default::default();
        let encoder = EncoderConfig::new(16, 1, 8)
            .with_in_channels(1)
            .with_scale_factor(ScaleFactor::Two)
            .init::<TestBackend>(&device)
            .unwrap();
        let images = Tensor::<TestBackend, 4>::random([1, 1, 28, 28], Distribution::Default, &device);

        assert_eq!(encoder.forward(images).dims(), [1, 16, 14, 14]);
    }

    #[test]
    fn encoder_output_is_non_negative() {
        let device = Default::default();
        let encoder = EncoderConfig::new(8, 1, 4).init::<TestBackend>(&device).unwrap();
        let images = Tensor::<TestBackend, 4>::random([1, 3, 8, 8], Distribution::Default, &device);

        let min = encoder.forward(images).min().into_scalar();
        assert!(min >= 0.0);
    }

    #[test]
    fn invalid_configuration_fails_at_init() {
        let device = Default::default();

        let err = EncoderConfig::new(0, 1, 4).init::<TestBackend>(&device).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidDimension {
                name: "hidden_units",
                value: 0
            }
        );

        // hidden_units / 2 collapses to zero channels
        assert!(EncoderConfig::new(1, 1, 4).init::<TestBackend>(&device).is_err());
    }
}

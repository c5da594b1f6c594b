use alloc::{vec, vec::Vec};

use burn::nn::{
    conv::{Conv2dConfig, ConvTranspose2dConfig},
    PaddingConfig2d,
};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

// Strided stages: 4x4 kernel, stride 2, padding 1 halves (or doubles) the resolution
const STRIDED_KERNEL: usize = 4;
const STRIDED_PADDING: usize = 1;

/// Resampling factor between pixel space and the latent grid.
///
/// Each variant resolves to a fixed number of strided stages, so the encoder and
/// decoder topologies are known as soon as the configuration is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScaleFactor {
    /// One strided stage (2x).
    Two,
    /// Two strided stages (4x).
    Four,
}

impl ScaleFactor {
    /// Number of strided (transposed) convolutions.
    pub fn num_stages(&self) -> usize {
        match self {
            ScaleFactor::Two => 1,
            ScaleFactor::Four => 2,
        }
    }

    /// Ratio between the image resolution and the latent grid resolution.
    pub fn factor(&self) -> usize {
        1 << self.num_stages()
    }

    /// Latent grid size for an image dimension, or `None` if the dimension is
    /// not a multiple of the factor.
    pub fn latent_size(&self, size: usize) -> Option<usize> {
        let factor = self.factor();
        (size > 0 && size % factor == 0).then(|| size / factor)
    }
}

impl TryFrom<usize> for ScaleFactor {
    type Error = ConfigError;

    fn try_from(value: usize) -> Result<Self> {
        match value {
            2 => Ok(ScaleFactor::Two),
            4 => Ok(ScaleFactor::Four),
            other => Err(ConfigError::UnsupportedScaleFactor(other)),
        }
    }
}

/// A single convolution stage of an encoder or decoder stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageDescriptor {
    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel_size: usize,
    pub stride: usize,
    pub padding: usize,
}

impl StageDescriptor {
    fn strided(in_channels: usize, out_channels: usize) -> Self {
        Self {
            in_channels,
            out_channels,
            kernel_size: STRIDED_KERNEL,
            stride: 2,
            padding: STRIDED_PADDING,
        }
    }

    /// Stride 1, "same" padding.
    pub fn same(in_channels: usize, out_channels: usize, kernel_size: usize) -> Self {
        Self {
            in_channels,
            out_channels,
            kernel_size,
            stride: 1,
            padding: (kernel_size - 1) / 2,
        }
    }

    pub fn conv2d(&self) -> Conv2dConfig {
        Conv2dConfig::new(
            [self.in_channels, self.out_channels],
            [self.kernel_size, self.kernel_size],
        )
        .with_stride([self.stride, self.stride])
        .with_padding(PaddingConfig2d::Explicit(self.padding, self.padding))
    }

    pub fn conv_transpose2d(&self) -> ConvTranspose2dConfig {
        ConvTranspose2dConfig::new(
            [self.in_channels, self.out_channels],
            [self.kernel_size, self.kernel_size],
        )
        .with_stride([self.stride, self.stride])
        .with_padding([self.padding, self.padding])
    }
}

/// Strided convolutions taking `in_channels` images down to `hidden_units` features.
pub fn downsampling_stages(
    scale: ScaleFactor,
    in_channels: usize,
    hidden_units: usize,
) -> Vec<StageDescriptor> {
    match scale {
        ScaleFactor::Two => vec![StageDescriptor::strided(in_channels, hidden_units)],
        ScaleFactor::Four => vec![
            StageDescriptor::strided(in_channels, hidden_units / 2),
            StageDescriptor::strided(hidden_units / 2, hidden_units),
        ],
    }
}

/// Strided transposed convolutions taking `hidden_units` features back up to
/// `out_channels` images.
pub fn upsampling_stages(
    scale: ScaleFactor,
    hidden_units: usize,
    out_channels: usize,
) -> Vec<StageDescriptor> {
    match scale {
        ScaleFactor::Two => vec![StageDescriptor::strided(hidden_units, out_channels)],
        ScaleFactor::Four => vec![
            StageDescriptor::strided(hidden_units, hidden_units / 2),
            StageDescriptor::strided(hidden_units / 2, out_channels),
        ],
    }
}

/// Check that a list of stages forms a valid chain from `input_channels` to
/// `output_channels`.
pub fn check_chain(
    stages: &[StageDescriptor],
    input_channels: usize,
    output_channels: usize,
) -> Result<()> {
    let mut expected = input_channels;
    for (stage, descriptor) in stages.iter().enumerate() {
        if descriptor.in_channels != expected {
            return Err(ConfigError::ChannelMismatch {
                stage,
                expected,
                found: descriptor.in_channels,
            });
        }
        if descriptor.out_channels == 0 {
            return Err(ConfigError::InvalidDimension {
                name: "out_channels",
                value: 0,
            });
        }
        expected = descriptor.out_channels;
    }

    if expected != output_channels {
        return Err(ConfigError::ChannelMismatch {
            stage: stages.len(),
            expected: output_channels,
            found: expected,
        });
    }

    Ok(())
}

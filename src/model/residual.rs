use alloc::vec::Vec;

use burn::{
    module::Module,
    nn::{conv::Conv2d, Relu},
    tensor::{backend::Backend, Device, Tensor},
};

use super::stage::StageDescriptor;

/// Residual refinement block.
///
/// `x + conv1x1(relu(conv3x3(relu(x))))`, both convolutions without bias.
#[derive(Module, Debug)]
pub struct Residual<B: Backend> {
    conv1: Conv2d<B>,
    conv2: Conv2d<B>,
    relu: Relu,
}

impl<B: Backend> Residual<B> {
    pub fn new(channels: usize, residual_hidden_units: usize, device: &Device<B>) -> Self {
        // conv3x3
        let conv1 = StageDescriptor::same(channels, residual_hidden_units, 3)
            .conv2d()
            .with_bias(false)
            .init(device);
        // conv1x1 back to the block's own width for the skip connection
        let conv2 = StageDescriptor::same(residual_hidden_units, channels, 1)
            .conv2d()
            .with_bias(false)
            .init(device);

        Self {
            conv1,
            conv2,
            relu: Relu::new(),
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let identity = input.clone();

        let out = self.relu.forward(input);
        let out = self.conv1.forward(out);
        let out = self.relu.forward(out);
        let out = self.conv2.forward(out);

        // Skip connection
        out + identity
    }
}

/// Collection of sequential residual blocks.
#[derive(Module, Debug)]
pub struct ResidualStack<B: Backend> {
    blocks: Vec<Residual<B>>,
}

impl<B: Backend> ResidualStack<B> {
    pub fn new(
        num_blocks: usize,
        channels: usize,
        residual_hidden_units: usize,
        device: &Device<B>,
    ) -> Self {
        let blocks = (0..num_blocks)
            .map(|_| Residual::new(channels, residual_hidden_units, device))
            .collect();

        Self { blocks }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut out = input;
        for block in &self.blocks {
            out = block.forward(out);
        }
        out
    }
}

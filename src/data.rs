use alloc::vec::Vec;

use burn::{
    data::{dataloader::batcher::Batcher, dataset::vision::MnistItem},
    prelude::*,
};

// MNIST digit size
pub const WIDTH: usize = 28;
pub const HEIGHT: usize = 28;

#[derive(Clone, Debug)]
pub struct ImageBatch<B: Backend> {
    /// `[batch, channels, HEIGHT, WIDTH]` pixels in `[0, 1]`.
    pub images: Tensor<B, 4>,
}

/// Batches MNIST digits as images with values in `[0, 1]`.
///
/// The grayscale channel is repeated `channels` times so that digits can be fed
/// to models expecting RGB input.
#[derive(Clone, Debug)]
pub struct MnistBatcher {
    channels: usize,
}

impl MnistBatcher {
    pub fn new(channels: usize) -> Self {
        Self { channels }
    }
}

impl Default for MnistBatcher {
    fn default() -> Self {
        Self::new(1)
    }
}

impl<B: Backend> Batcher<B, MnistItem, ImageBatch<B>> for MnistBatcher {
    fn batch(&self, items: Vec<MnistItem>, device: &B::Device) -> ImageBatch<B> {
        let images = items
            .iter()
            .map(|item| TensorData::from(item.image).convert::<B::FloatElem>())
            .map(|data| Tensor::<B, 2>::from_data(data, device))
            .map(|tensor| tensor.reshape([1, 1, HEIGHT, WIDTH]))
            // normalize between [0, 1]
            .map(|tensor| tensor / 255)
            .collect();

        let images = Tensor::cat(images, 0).repeat_dim(1, self.channels);

        ImageBatch { images }
    }
}

use std::{error::Error, path::Path};

use burn::tensor::{backend::Backend, Tensor};
use image::{GrayImage, Luma};
use vqvae_burn::data::{HEIGHT, WIDTH};

/// Save the first channel of the first image of `images` next to the first
/// image of `reconstruction`, like the side-by-side plots of a training run.
pub fn save_comparison<B: Backend>(
    images: Tensor<B, 4>,
    reconstruction: Tensor<B, 4>,
    path: &Path,
) -> Result<(), Box<dyn Error>> {
    let first = |t: Tensor<B, 4>| -> Result<Vec<f32>, Box<dyn Error>> {
        t.slice([0..1, 0..1, 0..HEIGHT, 0..WIDTH])
            .clamp(0.0, 1.0)
            .into_data()
            .convert::<f32>()
            .to_vec()
            .map_err(|err| format!("{err:?}").into())
    };
    let original = first(images)?;
    let reconstructed = first(reconstruction)?;

    let plot = GrayImage::from_fn((2 * WIDTH) as u32, HEIGHT as u32, |x, y| {
        let (x, y) = (x as usize, y as usize);
        let value = if x < WIDTH {
            original[y * WIDTH + x]
        } else {
            reconstructed[y * WIDTH + x - WIDTH]
        };
        Luma([(value * 255.0) as u8])
    });
    plot.save(path)?;

    Ok(())
}

//! Train a VQ-VAE on MNIST digits (replicated to RGB) and write
//! original/reconstruction comparisons to the artifact directory.
//!
//! Run with: `cargo run --release --example train-vqvae --features dataset -- [artifact_dir]`

mod common;

use std::{error::Error, path::Path};

use burn::{
    backend::{Autodiff, NdArray},
    config::Config,
    data::{dataloader::DataLoaderBuilder, dataset::vision::MnistDataset},
    module::AutodiffModule,
    optim::AdamConfig,
    tensor::Tensor,
};
use tracing::info;

use vqvae_burn::{
    data::{MnistBatcher, HEIGHT, WIDTH},
    model::vqvae::VqVaeConfig,
    training::{TrainingConfig, TrainingSession},
};

type B = Autodiff<NdArray<f32>>;

const BATCH_SIZE: usize = 64;
const NUM_ITERATIONS: usize = 10_000;
const ARTIFACT_DIR: &str = "/tmp/vqvae-burn/vqvae";

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt().init();

    let artifact_dir = std::env::args()
        .nth(1)
        .unwrap_or_else(|| ARTIFACT_DIR.to_string());
    std::fs::create_dir_all(&artifact_dir)?;

    let device = Default::default();
    let model_config = VqVaeConfig::new();
    let training_config = TrainingConfig::new();
    model_config.save(format!("{artifact_dir}/model.json"))?;
    training_config.save(format!("{artifact_dir}/training.json"))?;

    for size in [HEIGHT, WIDTH] {
        if model_config.scale_factor.latent_size(size).is_none() {
            return Err(format!(
                "image size {size} is not a multiple of {}",
                model_config.scale_factor.factor()
            )
            .into());
        }
    }

    training_config.seed_backend::<B>();
    let model = model_config.init::<B>(&device)?;
    let mut session =
        TrainingSession::<B, _, _>::new(model, AdamConfig::new().init(), &training_config)?;

    let dataloader = DataLoaderBuilder::new(MnistBatcher::new(model_config.image_channels))
        .batch_size(BATCH_SIZE)
        .shuffle(training_config.seed)
        .num_workers(1)
        .build(MnistDataset::train());
    let test_images: Tensor<B, 4> =
        DataLoaderBuilder::new(MnistBatcher::new(model_config.image_channels))
            .batch_size(BATCH_SIZE)
            .build(MnistDataset::test())
            .iter()
            .next()
            .ok_or("empty test set")?
            .images;

    while session.iteration() < NUM_ITERATIONS {
        for batch in dataloader.iter() {
            session.step(batch.images.clone());

            if session.iteration() % training_config.log_interval == 0 {
                let images = test_images.clone().inner();
                let evaluation = session.evaluate(images.clone());
                info!(
                    iteration = session.iteration(),
                    loss = evaluation.loss,
                    "test batch"
                );

                let output = session.model().valid().forward(images.clone());
                let path = format!("{artifact_dir}/step-{}.png", session.iteration());
                common::save_comparison(images, output.reconstruction, Path::new(&path))?;
                info!(path = %path, "saved reconstruction");
            }
            if session.iteration() >= NUM_ITERATIONS {
                break;
            }
        }
    }

    Ok(())
}

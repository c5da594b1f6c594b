//! Train the fully connected VAE on MNIST digits, write
//! original/reconstruction comparisons and a grid of prior samples.
//!
//! Run with: `cargo run --release --example train-vae --features dataset -- [artifact_dir]`

mod common;

use std::{error::Error, path::Path};

use burn::{
    backend::{Autodiff, NdArray},
    config::Config,
    data::{dataloader::DataLoaderBuilder, dataset::vision::MnistDataset},
    module::AutodiffModule,
    optim::AdamConfig,
};
use tracing::info;

use vqvae_burn::{
    data::{MnistBatcher, HEIGHT, WIDTH},
    model::vae::VaeConfig,
    training::{TrainingConfig, TrainingSession},
};

type B = Autodiff<NdArray<f32>>;

const BATCH_SIZE: usize = 64;
const NUM_ITERATIONS: usize = 10_000;
const ARTIFACT_DIR: &str = "/tmp/vqvae-burn/vae";

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt().init();

    let artifact_dir = std::env::args()
        .nth(1)
        .unwrap_or_else(|| ARTIFACT_DIR.to_string());
    std::fs::create_dir_all(&artifact_dir)?;

    let device = Default::default();
    let model_config = VaeConfig::new().with_input_size(HEIGHT * WIDTH);
    let training_config = TrainingConfig::new();
    model_config.save(format!("{artifact_dir}/model.json"))?;
    training_config.save(format!("{artifact_dir}/training.json"))?;

    training_config.seed_backend::<B>();
    let model = model_config.init::<B>(&device)?;
    let mut session =
        TrainingSession::<B, _, _>::new(model, AdamConfig::new().init(), &training_config)?;

    let dataloader = DataLoaderBuilder::new(MnistBatcher::default())
        .batch_size(BATCH_SIZE)
        .shuffle(training_config.seed)
        .num_workers(1)
        .build(MnistDataset::train());

    while session.iteration() < NUM_ITERATIONS {
        for batch in dataloader.iter() {
            session.step(batch.images.clone());

            if session.iteration() % training_config.log_interval == 0 {
                let images = batch.images.clone().inner();
                let [batch_size, ..] = images.dims();
                let model = session.model().valid();
                let output = model.forward(images.clone().flatten(1, 3));
                let reconstruction = output.reconstruction.reshape([batch_size, 1, HEIGHT, WIDTH]);

                let path = format!("{artifact_dir}/step-{}.png", session.iteration());
                common::save_comparison(images, reconstruction, Path::new(&path))?;
                info!(path = %path, "saved reconstruction");
            }
            if session.iteration() >= NUM_ITERATIONS {
                break;
            }
        }
    }

    // Two digits decoded from the prior
    let model = session.into_model().valid();
    let samples = model
        .generate(2, &device)
        .reshape([2, 1, HEIGHT, WIDTH]);
    let path = format!("{artifact_dir}/samples.png");
    common::save_comparison(
        samples.clone().slice([0..1]),
        samples.slice([1..2]),
        Path::new(&path),
    )?;
    info!(path = %path, "saved prior samples");

    Ok(())
}

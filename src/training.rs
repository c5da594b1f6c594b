use core::marker::PhantomData;

use burn::{
    config::Config,
    module::AutodiffModule,
    nn::loss::{MseLoss, Reduction},
    optim::{GradientsParams, Optimizer},
    tensor::{
        backend::{AutodiffBackend, Backend},
        ElementConversion, Tensor,
    },
};
use tracing::{debug, info};

use crate::{
    error::ConfigError,
    model::{
        vae::{reconstruction_loss, Vae},
        vqvae::VqVae,
    },
};

/// Loss terms of a generative model on one batch.
#[derive(Debug, Clone)]
pub struct ObjectiveOutput<B: Backend> {
    /// `reconstruction_loss + regularization_loss`, the value to minimize.
    pub loss: Tensor<B, 1>,
    pub reconstruction_loss: Tensor<B, 1>,
    /// Quantization loss for the VQ-VAE, KL divergence for the VAE.
    pub regularization_loss: Tensor<B, 1>,
}

impl<B: Backend> ObjectiveOutput<B> {
    pub fn new(reconstruction_loss: Tensor<B, 1>, regularization_loss: Tensor<B, 1>) -> Self {
        Self {
            loss: reconstruction_loss.clone() + regularization_loss.clone(),
            reconstruction_loss,
            regularization_loss,
        }
    }
}

/// Training objective of a model over a batch of `[batch, channels, height, width]` images.
pub trait GenerativeObjective<B: Backend> {
    fn objective(&self, images: Tensor<B, 4>) -> ObjectiveOutput<B>;
}

impl<B: Backend> GenerativeObjective<B> for VqVae<B> {
    /// Pixel-wise mean squared error plus the quantization loss.
    fn objective(&self, images: Tensor<B, 4>) -> ObjectiveOutput<B> {
        let output = self.forward(images.clone());
        let reconstruction = MseLoss::new().forward(output.reconstruction, images, Reduction::Mean);

        ObjectiveOutput::new(reconstruction, output.quantization_loss)
    }
}

impl<B: Backend> GenerativeObjective<B> for Vae<B> {
    /// Binary cross entropy on the flattened images plus the KL divergence.
    fn objective(&self, images: Tensor<B, 4>) -> ObjectiveOutput<B> {
        // [B, C, H, W] -> [B, C * H * W]
        let images: Tensor<B, 2> = images.flatten(1, 3);
        let output = self.forward(images.clone());
        let kl = output.kl_divergence();

        ObjectiveOutput::new(reconstruction_loss(output.logits, images), kl)
    }
}

/// Scalar values of an [objective](ObjectiveOutput).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LossSummary {
    pub loss: f64,
    pub reconstruction: f64,
    pub regularization: f64,
}

impl LossSummary {
    fn from_output<B: Backend>(output: &ObjectiveOutput<B>) -> Self {
        Self {
            loss: output.loss.clone().into_scalar().elem(),
            reconstruction: output.reconstruction_loss.clone().into_scalar().elem(),
            regularization: output.regularization_loss.clone().into_scalar().elem(),
        }
    }
}

#[derive(Config, Debug)]
pub struct TrainingConfig {
    #[config(default = 1e-3)]
    pub learning_rate: f64,

    /// Steps between two `info` level progress reports.
    #[config(default = 1000)]
    pub log_interval: usize,

    /// Seed of the backend random number generator.
    #[config(default = 42)]
    pub seed: u64,
}

impl TrainingConfig {
    /// Seed the backend. Call before initializing the model so the seed covers
    /// parameter initialization as well as sampling noise.
    pub fn seed_backend<B: Backend>(&self) {
        B::seed(self.seed);
    }
}

/// Owns a model, its optimizer state and the iteration counter.
pub struct TrainingSession<B, M, O>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
    O: Optimizer<M, B>,
{
    model: M,
    optimizer: O,
    learning_rate: f64,
    log_interval: usize,
    iteration: usize,
    _backend: PhantomData<B>,
}

impl<B, M, O> TrainingSession<B, M, O>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + GenerativeObjective<B>,
    M::InnerModule: GenerativeObjective<B::InnerBackend>,
    O: Optimizer<M, B>,
{
    /// Create a new session around an initialized model.
    ///
    /// The backend is not reseeded here, see [TrainingConfig::seed_backend].
    ///
    /// # Errors
    ///
    /// Fails on a non-positive learning rate or a zero log interval.
    pub fn new(model: M, optimizer: O, config: &TrainingConfig) -> Result<Self, ConfigError> {
        if !config.learning_rate.is_finite() || config.learning_rate <= 0.0 {
            return Err(ConfigError::InvalidValue {
                name: "learning_rate",
                value: config.learning_rate,
            });
        }
        if config.log_interval == 0 {
            return Err(ConfigError::InvalidDimension {
                name: "log_interval",
                value: 0,
            });
        }

        Ok(Self {
            model,
            optimizer,
            learning_rate: config.learning_rate,
            log_interval: config.log_interval,
            iteration: 0,
            _backend: PhantomData,
        })
    }

    /// Run one optimization step on a batch and return its losses (before the update).
    pub fn step(&mut self, images: Tensor<B, 4>) -> LossSummary {
        let output = self.model.objective(images);
        let summary = LossSummary::from_output(&output);

        let grads = output.loss.backward();
        let grads = GradientsParams::from_grads(grads, &self.model);
        self.model = self
            .optimizer
            .step(self.learning_rate, self.model.clone(), grads);
        self.iteration += 1;

        if self.iteration % self.log_interval == 0 {
            info!(
                iteration = self.iteration,
                loss = summary.loss,
                reconstruction = summary.reconstruction,
                regularization = summary.regularization,
                "training step"
            );
        } else {
            debug!(iteration = self.iteration, loss = summary.loss, "training step");
        }

        summary
    }

    /// Losses of the current parameters on a batch, without tracking gradients.
    pub fn evaluate(&self, images: Tensor<B::InnerBackend, 4>) -> LossSummary {
        let model = self.model.valid();
        let summary = LossSummary::from_output(&model.objective(images));

        debug!(iteration = self.iteration, loss = summary.loss, "evaluation");

        summary
    }

    /// Number of completed steps.
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn into_model(self) -> M {
        self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        model::{vae::VaeConfig, vqvae::VqVaeConfig},
        tests::{TestAutodiffBackend, TestBackend},
    };
    use burn::{optim::AdamConfig, tensor::Distribution};

    #[test]
    fn objective_sums_its_terms() {
        let device = Default::default();
        let model = VqVaeConfig::new()
            .with_hidden_units(8)
            .with_residual_layers(1)
            .with_residual_hidden_units(4)
            .with_num_embeddings(8)
            .with_embedding_dim(2)
            .init::<TestBackend>(&device)
            .unwrap();
        let images = Tensor::<TestBackend, 4>::random([2, 3, 8, 8], Distribution::Default, &device);

        let summary = LossSummary::from_output(&model.objective(images));

        assert!(summary.reconstruction >= 0.0);
        assert!(summary.regularization >= 0.0);
        assert!((summary.loss - summary.reconstruction - summary.regularization).abs() < 1e-5);
    }

    #[test]
    fn vae_objective_flattens_images() {
        let device = Default::default();
        let model = VaeConfig::new()
            .with_input_size(2 * 4 * 4)
            .with_hidden_size(8)
            .with_latent_size(2)
            .init::<TestBackend>(&device)
            .unwrap();
        let images = Tensor::<TestBackend, 4>::random([3, 2, 4, 4], Distribution::Default, &device);

        let summary = LossSummary::from_output(&model.objective(images));

        assert!(summary.loss.is_finite());
        assert!(summary.regularization >= 0.0);
    }

    #[test]
    fn invalid_training_config_is_rejected() {
        let device = Default::default();
        let model = VaeConfig::new()
            .with_input_size(4)
            .with_hidden_size(4)
            .with_latent_size(2)
            .init::<TestAutodiffBackend>(&device)
            .unwrap();

        let result = TrainingSession::<TestAutodiffBackend, _, _>::new(
            model.clone(),
            AdamConfig::new().init(),
            &TrainingConfig::new().with_log_interval(0),
        );
        assert!(result.is_err());

        let result = TrainingSession::<TestAutodiffBackend, _, _>::new(
            model,
            AdamConfig::new().init(),
            &TrainingConfig::new().with_learning_rate(0.0),
        );
        assert!(result.is_err());
    }
}

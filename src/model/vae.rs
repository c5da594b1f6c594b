use burn::{
    config::Config,
    module::Module,
    nn::{Linear, LinearConfig, Relu},
    tensor::{activation::sigmoid, backend::Backend, Device, Distribution, Tensor},
};

use crate::error::{non_zero, ConfigError};

/// Encoder producing the mean and log-variance of a diagonal Gaussian posterior.
#[derive(Module, Debug)]
pub struct VariationalEncoder<B: Backend> {
    first: Linear<B>,
    second: Linear<B>,
    mean: Linear<B>,
    log_var: Linear<B>,
    relu: Relu,
}

impl<B: Backend> VariationalEncoder<B> {
    /// Returns `(mean, log_var)`, each `[batch, latent_size]`.
    pub fn forward(&self, input: Tensor<B, 2>) -> (Tensor<B, 2>, Tensor<B, 2>) {
        let x = self.relu.forward(self.first.forward(input));
        let x = self.relu.forward(self.second.forward(x));

        (self.mean.forward(x.clone()), self.log_var.forward(x))
    }
}

#[derive(Module, Debug)]
pub struct VariationalDecoder<B: Backend> {
    first: Linear<B>,
    second: Linear<B>,
    output: Linear<B>,
    relu: Relu,
}

impl<B: Backend> VariationalDecoder<B> {
    /// Pixel logits `[batch, output_size]`.
    pub fn logits(&self, latent: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = self.relu.forward(self.first.forward(latent));
        let x = self.relu.forward(self.second.forward(x));

        self.output.forward(x)
    }

    /// Pixel probabilities `[batch, output_size]` in `(0, 1)`.
    pub fn forward(&self, latent: Tensor<B, 2>) -> Tensor<B, 2> {
        sigmoid(self.logits(latent))
    }
}

/// Sample `mean + exp(log_var / 2) * eps` with `eps ~ N(0, 1)`.
///
/// The noise is drawn outside the graph, so gradients reach both `mean` and
/// `log_var`.
pub fn reparameterize<B: Backend>(mean: Tensor<B, 2>, log_var: Tensor<B, 2>) -> Tensor<B, 2> {
    let eps = Tensor::random(mean.shape(), Distribution::Normal(0.0, 1.0), &mean.device());
    let std = log_var.div_scalar(2.0).exp();

    mean + std * eps
}

/// Binary cross entropy between `sigmoid(logits)` and `target`, summed over all
/// pixels and averaged over the batch.
///
/// Computed from the logits as `max(x, 0) - x * t + ln(1 + exp(-|x|))`, which
/// keeps both the value and the gradient finite when the sigmoid saturates.
pub fn reconstruction_loss<B: Backend>(
    logits: Tensor<B, 2>,
    target: Tensor<B, 2>,
) -> Tensor<B, 1> {
    let [batch_size, _] = target.dims();

    let softplus_tail = logits.clone().abs().neg().exp().log1p();
    let bce = logits.clone().clamp_min(0.0) - logits * target + softplus_tail;

    bce.sum().div_scalar(batch_size as f64)
}

/// KL divergence between the posterior and the standard normal prior,
/// summed over the latent dimensions and averaged over the batch.
pub fn kl_divergence<B: Backend>(mean: Tensor<B, 2>, log_var: Tensor<B, 2>) -> Tensor<B, 1> {
    let kl = log_var.clone().exp() + mean.powf_scalar(2.0) - log_var;

    kl.sub_scalar(1.0).sum_dim(1).div_scalar(2.0).mean()
}

/// Output of a [VAE](Vae) forward pass.
#[derive(Debug, Clone)]
pub struct VaeOutput<B: Backend> {
    /// Pixel probabilities, `sigmoid(logits)`.
    pub reconstruction: Tensor<B, 2>,
    pub logits: Tensor<B, 2>,
    pub mean: Tensor<B, 2>,
    pub log_var: Tensor<B, 2>,
}

impl<B: Backend> VaeOutput<B> {
    pub fn kl_divergence(&self) -> Tensor<B, 1> {
        kl_divergence(self.mean.clone(), self.log_var.clone())
    }
}

/// Fully connected variational autoencoder over flattened images.
#[derive(Module, Debug)]
pub struct Vae<B: Backend> {
    encoder: VariationalEncoder<B>,
    decoder: VariationalDecoder<B>,
    latent_size: usize,
}

impl<B: Backend> Vae<B> {
    pub fn forward(&self, input: Tensor<B, 2>) -> VaeOutput<B> {
        let (mean, log_var) = self.encoder.forward(input);
        let latent = reparameterize(mean.clone(), log_var.clone());
        let logits = self.decoder.logits(latent);

        VaeOutput {
            reconstruction: sigmoid(logits.clone()),
            logits,
            mean,
            log_var,
        }
    }

    /// Decode `num_samples` latents drawn from the prior.
    pub fn generate(&self, num_samples: usize, device: &Device<B>) -> Tensor<B, 2> {
        let latent = Tensor::random(
            [num_samples, self.latent_size],
            Distribution::Normal(0.0, 1.0),
            device,
        );

        self.decoder.forward(latent)
    }

    pub fn latent_size(&self) -> usize {
        self.latent_size
    }
}

/// [VAE](Vae) configuration. Defaults match flattened 28x28 digits.
#[derive(Config, Debug)]
pub struct VaeConfig {
    #[config(default = "784")]
    pub input_size: usize,
    #[config(default = "100")]
    pub hidden_size: usize,
    #[config(default = "100")]
    pub latent_size: usize,
}

impl VaeConfig {
    /// Initialize a new [VAE](Vae) module.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> Result<Vae<B>, ConfigError> {
        let input_size = non_zero("input_size", self.input_size)?;
        let hidden_size = non_zero("hidden_size", self.hidden_size)?;
        let latent_size = non_zero("latent_size", self.latent_size)?;

        let encoder = VariationalEncoder {
            first: LinearConfig::new(input_size, hidden_size).init(device),
            second: LinearConfig::new(hidden_size, hidden_size).init(device),
            mean: LinearConfig::new(hidden_size, latent_size).init(device),
            log_var: LinearConfig::new(hidden_size, latent_size).init(device),
            relu: Relu::new(),
        };
        let decoder = VariationalDecoder {
            first: LinearConfig::new(latent_size, hidden_size).init(device),
            second: LinearConfig::new(hidden_size, hidden_size).init(device),
            output: LinearConfig::new(hidden_size, input_size).init(device),
            relu: Relu::new(),
        };

        Ok(Vae {
            encoder,
            decoder,
            latent_size,
        })
    }
}

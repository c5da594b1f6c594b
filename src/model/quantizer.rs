use burn::{
    config::Config,
    module::{Module, Param},
    nn::Initializer,
    tensor::{backend::Backend, Device, Int, Tensor},
};

use crate::error::{non_zero, ConfigError};

/// Forward value of `target` with the gradient of `source`.
///
/// The offset `target - source` is detached, so backpropagation sees the
/// identity from the output to `source` and nothing flows into `target`.
pub fn straight_through<B: Backend, const D: usize>(
    source: Tensor<B, D>,
    target: Tensor<B, D>,
) -> Tensor<B, D> {
    let offset = (target - source.clone()).detach();
    source + offset
}

/// Output of the [vector quantizer](VectorQuantizer).
#[derive(Debug, Clone)]
pub struct QuantizerOutput<B: Backend> {
    /// Quantized latent grid `[batch, embedding_dim, height, width]`.
    pub quantized: Tensor<B, 4>,
    /// `commitment_cost * e_loss + q_loss`.
    pub loss: Tensor<B, 1>,
    /// Codebook index of every grid position `[batch, height, width]`.
    pub indices: Tensor<B, 3, Int>,
}

/// Vector quantization bottleneck.
///
/// Each `embedding_dim` vector of the latent grid is replaced by its nearest
/// codebook entry (squared Euclidean distance).
#[derive(Module, Debug)]
pub struct VectorQuantizer<B: Backend> {
    codebook: Param<Tensor<B, 2>>,
    commitment_cost: f64,
}

impl<B: Backend> VectorQuantizer<B> {
    pub fn num_embeddings(&self) -> usize {
        self.codebook.dims()[0]
    }

    pub fn embedding_dim(&self) -> usize {
        self.codebook.dims()[1]
    }

    pub fn commitment_cost(&self) -> f64 {
        self.commitment_cost
    }

    /// The `[num_embeddings, embedding_dim]` codebook.
    pub fn codebook(&self) -> Tensor<B, 2> {
        self.codebook.val()
    }

    /// Index of the nearest codebook entry for each row of `[n, embedding_dim]`.
    ///
    /// Ties resolve to the lowest index.
    pub fn nearest(&self, flat: Tensor<B, 2>) -> Tensor<B, 1, Int> {
        let [n, _] = flat.dims();
        let flat = flat.detach();
        let codebook = self.codebook.val().detach();

        // |a - b|^2 = |a|^2 + |b|^2 - 2 a.b
        let input_sq = flat.clone().powf_scalar(2.0).sum_dim(1); // [n, 1]
        let codebook_sq = codebook.clone().powf_scalar(2.0).sum_dim(1).transpose(); // [1, k]
        let dot = flat.matmul(codebook.transpose()); // [n, k]
        let distances = input_sq + codebook_sq - dot.mul_scalar(2.0);

        distances.argmin(1).reshape([n])
    }

    /// Codebook rows for the given indices, `[n, embedding_dim]`.
    pub fn lookup(&self, indices: Tensor<B, 1, Int>) -> Tensor<B, 2> {
        self.codebook.val().select(0, indices)
    }

    /// Quantize a `[batch, embedding_dim, height, width]` latent grid.
    pub fn forward(&self, inputs: Tensor<B, 4>) -> QuantizerOutput<B> {
        let [batch, channels, height, width] = inputs.dims();
        debug_assert_eq!(channels, self.embedding_dim());

        // [B, D, H, W] -> [B, H, W, D] -> [B * H * W, D]
        let flat = inputs
            .permute([0, 2, 3, 1])
            .reshape([batch * height * width, channels]);

        let indices = self.nearest(flat.clone());
        let selected = self.lookup(indices.clone());

        // Codebook loss pulls the entries towards the encoder outputs
        let q_loss = (selected.clone() - flat.clone().detach())
            .powf_scalar(2.0)
            .mean();
        // Commitment loss pulls the encoder outputs towards their entries
        let e_loss = (selected.clone().detach() - flat.clone())
            .powf_scalar(2.0)
            .mean();
        let loss = e_loss.mul_scalar(self.commitment_cost) + q_loss;

        let quantized = straight_through(flat, selected)
            .reshape([batch, height, width, channels])
            .permute([0, 3, 1, 2]);

        QuantizerOutput {
            quantized,
            loss,
            indices: indices.reshape([batch, height, width]),
        }
    }

    /// Quantized grid `[batch, embedding_dim, height, width]` for a grid of codes.
    pub fn decode_indices(&self, indices: Tensor<B, 3, Int>) -> Tensor<B, 4> {
        let [batch, height, width] = indices.dims();
        let channels = self.embedding_dim();

        self.lookup(indices.reshape([batch * height * width]))
            .reshape([batch, height, width, channels])
            .permute([0, 3, 1, 2])
    }
}

/// [Vector quantizer](VectorQuantizer) configuration.
#[derive(Config, Debug)]
pub struct VectorQuantizerConfig {
    /// Number of codebook entries.
    pub num_embeddings: usize,
    /// Size of each codebook entry.
    pub embedding_dim: usize,
    /// Weight of the commitment loss.
    #[config(default = "0.25")]
    pub commitment_cost: f64,
}

impl VectorQuantizerConfig {
    /// Check that the codebook is non-empty and the commitment cost is a
    /// non-negative number.
    pub fn validate(&self) -> Result<(), ConfigError> {
        non_zero("num_embeddings", self.num_embeddings)?;
        non_zero("embedding_dim", self.embedding_dim)?;
        if !self.commitment_cost.is_finite() || self.commitment_cost < 0.0 {
            return Err(ConfigError::InvalidValue {
                name: "commitment_cost",
                value: self.commitment_cost,
            });
        }
        Ok(())
    }

    /// Initialize a new [vector quantizer](VectorQuantizer) with a codebook drawn
    /// uniformly from `[-1 / num_embeddings, 1 / num_embeddings]`.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> Result<VectorQuantizer<B>, ConfigError> {
        self.validate()?;

        let bound = 1.0 / self.num_embeddings as f64;
        let codebook = Initializer::Uniform {
            min: -bound,
            max: bound,
        }
        .init([self.num_embeddings, self.embedding_dim], device);

        Ok(VectorQuantizer {
            codebook,
            commitment_cost: self.commitment_cost,
        })
    }

    /// Initialize a new [vector quantizer](VectorQuantizer) around an existing codebook.
    ///
    /// # Errors
    ///
    /// Fails if the codebook is not `[num_embeddings, embedding_dim]`.
    pub fn init_with_codebook<B: Backend>(
        &self,
        codebook: Tensor<B, 2>,
    ) -> Result<VectorQuantizer<B>, ConfigError> {
        self.validate()?;

        let [num_embeddings, embedding_dim] = codebook.dims();
        if num_embeddings != self.num_embeddings {
            return Err(ConfigError::InvalidDimension {
                name: "num_embeddings",
                value: num_embeddings,
            });
        }
        if embedding_dim != self.embedding_dim {
            return Err(ConfigError::InvalidDimension {
                name: "embedding_dim",
                value: embedding_dim,
            });
        }

        Ok(VectorQuantizer {
            codebook: Param::from_tensor(codebook),
            commitment_cost: self.commitment_cost,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{TestAutodiffBackend, TestBackend};
    use burn::tensor::Distribution;

    const CODEBOOK: [[f32; 2]; 4] = [[0.0, 0.0], [10.0, 10.0], [5.0, 5.0], [-5.0, -5.0]];

    fn quantizer<B: Backend>(device: &B::Device) -> VectorQuantizer<B> {
        VectorQuantizerConfig::new(4, 2)
            .init_with_codebook(Tensor::from_floats(CODEBOOK, device))
            .unwrap()
    }

    /// A single vector `[x, y]` as a 1x1 latent grid.
    fn grid<B: Backend>(vector: [f32; 2], device: &B::Device) -> Tensor<B, 4> {
        Tensor::<B, 1>::from_floats(vector, device).reshape([1, 2, 1, 1])
    }

    #[test]
    fn nearest_entry_is_selected() {
        let device = Default::default();
        let vq = quantizer::<TestBackend>(&device);

        let output = vq.forward(grid([1.0, 1.0], &device));

        let indices: Vec<i64> = output.indices.into_data().convert::<i64>().to_vec().unwrap();
        let quantized: Vec<f32> = output.quantized.into_data().to_vec().unwrap();

        assert_eq!(indices, vec![0]);
        assert_eq!(quantized, vec![0.0, 0.0]);
    }

    #[test]
    fn ties_resolve_to_first_index() {
        let device = Default::default();
        let codebook = Tensor::<TestBackend, 2>::from_floats([[1.0, 0.0], [-1.0, 0.0]], &device);
        let vq = VectorQuantizerConfig::new(2, 2)
            .init_with_codebook(codebook)
            .unwrap();

        let indices = vq.nearest(Tensor::from_floats([[0.0, 0.0], [0.0, 5.0]], &device));
        let indices: Vec<i64> = indices.into_data().convert::<i64>().to_vec().unwrap();

        assert_eq!(indices, vec![0, 0]);
    }

    #[test]
    fn loss_scenario() {
        let device = Default::default();
        let vq = quantizer::<TestBackend>(&device);

        let output = vq.forward(grid([1.0, 1.0], &device));
        let loss = output.loss.into_scalar();

        // 0.25 * 1.0 + 1.0
        assert!((loss - 1.25).abs() < 1e-6, "loss = {loss}");
    }

    #[test]
    fn quantized_grid_matches_codebook_entries() {
        let device = Default::default();
        let vq = quantizer::<TestBackend>(&device);
        let inputs =
            Tensor::<TestBackend, 4>::random([3, 2, 5, 4], Distribution::Uniform(-12.0, 12.0), &device);

        let output = vq.forward(inputs.clone());
        assert_eq!(output.quantized.dims(), inputs.dims());
        assert_eq!(output.indices.dims(), [3, 5, 4]);
        assert!(output.loss.into_scalar() >= 0.0);

        let vectors: Vec<f32> = output
            .quantized
            .permute([0, 2, 3, 1])
            .reshape([3 * 5 * 4 * 2])
            .into_data()
            .to_vec()
            .unwrap();
        for vector in vectors.chunks(2) {
            let found = CODEBOOK.iter().any(|entry| {
                (entry[0] - vector[0]).abs() < 1e-5 && (entry[1] - vector[1]).abs() < 1e-5
            });
            assert!(found, "{vector:?} is not a codebook entry");
        }

        let indices: Vec<i64> = output.indices.into_data().convert::<i64>().to_vec().unwrap();
        assert!(indices.iter().all(|&i| (0..4).contains(&i)));
    }

    #[test]
    fn decode_indices_matches_forward() {
        let device = Default::default();
        let vq = quantizer::<TestBackend>(&device);
        let inputs =
            Tensor::<TestBackend, 4>::random([2, 2, 3, 3], Distribution::Uniform(-8.0, 8.0), &device);

        let output = vq.forward(inputs);
        let decoded = vq.decode_indices(output.indices);

        let decoded: Vec<f32> = decoded.into_data().to_vec().unwrap();
        let quantized: Vec<f32> = output.quantized.into_data().to_vec().unwrap();
        for (a, b) in decoded.iter().zip(quantized.iter()) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn codebook_is_initialized_in_bounds() {
        let device = Default::default();
        let vq = VectorQuantizerConfig::new(16, 8)
            .init::<TestBackend>(&device)
            .unwrap();

        assert_eq!(vq.num_embeddings(), 16);
        assert_eq!(vq.embedding_dim(), 8);
        let values: Vec<f32> = vq.codebook().into_data().to_vec().unwrap();
        assert!(values.iter().all(|v| v.abs() <= 1.0 / 16.0));
    }

    #[test]
    fn invalid_configuration_fails_at_init() {
        let device = Default::default();

        assert!(VectorQuantizerConfig::new(0, 8).init::<TestBackend>(&device).is_err());
        assert!(VectorQuantizerConfig::new(8, 0).init::<TestBackend>(&device).is_err());
        assert!(VectorQuantizerConfig::new(8, 8)
            .with_commitment_cost(-1.0)
            .init::<TestBackend>(&device)
            .is_err());

        let codebook = Tensor::<TestBackend, 2>::zeros([3, 2], &device);
        assert!(VectorQuantizerConfig::new(4, 2)
            .init_with_codebook(codebook)
            .is_err());
    }

    #[test]
    fn loss_gradient_reaches_encoder_output() {
        let device = Default::default();
        let vq = quantizer::<TestAutodiffBackend>(&device);
        let inputs = grid::<TestAutodiffBackend>([1.0, 1.0], &device).require_grad();

        let output = vq.forward(inputs.clone());
        let grads = output.loss.backward();
        let grad: Vec<f32> = inputs
            .grad(&grads)
            .expect("encoder output should receive a gradient")
            .into_data()
            .to_vec()
            .unwrap();

        // d/dz of 0.25 * mean((e - z)^2) = 0.25 * (z - e) = 0.25 per component
        assert!(grad.iter().all(|g| g.abs() > 0.0));
        for g in grad {
            assert!((g - 0.25).abs() < 1e-6, "grad = {g}");
        }
    }

    #[test]
    fn straight_through_passes_gradient_unchanged() {
        let device = Default::default();
        let vq = quantizer::<TestAutodiffBackend>(&device);
        let inputs = Tensor::<TestAutodiffBackend, 4>::random(
            [2, 2, 3, 3],
            Distribution::Uniform(-8.0, 8.0),
            &device,
        )
        .require_grad();

        let output = vq.forward(inputs.clone());
        let grads = output.quantized.sum().backward();
        let grad: Vec<f32> = inputs.grad(&grads).unwrap().into_data().to_vec().unwrap();

        assert_eq!(grad.len(), 2 * 2 * 3 * 3);
        assert!(grad.iter().all(|g| (g - 1.0).abs() < 1e-6));
    }

    #[test]
    fn straight_through_forwards_target_value() {
        let device = Default::default();
        let source = Tensor::<TestBackend, 1>::from_floats([1.0, 2.0], &device);
        let target = Tensor::<TestBackend, 1>::from_floats([5.0, -3.0], &device);

        let output: Vec<f32> = straight_through(source, target).into_data().to_vec().unwrap();

        assert_eq!(output, vec![5.0, -3.0]);
    }
}

//! GCNII: deep residual graph convolutions (Chen et al., ICML 2020).

use crate::error::Result;
use crate::gnn::conv::GcniiConv;
use crate::gnn::Gnn;
use crate::graph::SparseMatrix;
use crate::nn::layers::{Activation, Dense, Dropout};
use candle_core::Tensor;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GcniiConfig {
    /// Initial-residual tradeoff: weight of `h0` at every depth.
    pub alpha: f64,
    /// Identity-mixing strength, decayed per depth as
    /// `ln(1 + lambda / (k + 1))`.
    pub lambda: f64,
    /// Widths of the initial dense projection(s).
    pub latent_dims: Vec<usize>,
    /// Number of residual convolution layers.
    pub iterations: usize,
    pub dropout: f32,
    /// Whether convolution weights enter the regularization penalty.
    pub convolution_regularization: bool,
    pub spectral_preserving: bool,
}

impl Default for GcniiConfig {
    fn default() -> Self {
        Self {
            alpha: 0.1,
            lambda: 0.5,
            latent_dims: vec![64],
            iterations: 64,
            dropout: 0.6,
            convolution_regularization: true,
            spectral_preserving: false,
        }
    }
}

impl GcniiConfig {
    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    pub fn with_lambda(mut self, lambda: f64) -> Self {
        self.lambda = lambda;
        self
    }

    pub fn with_latent_dims(mut self, dims: Vec<usize>) -> Self {
        self.latent_dims = dims;
        self
    }

    pub fn with_iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }

    pub fn with_dropout(mut self, rate: f32) -> Self {
        self.dropout = rate;
        self
    }

    pub fn without_convolution_regularization(mut self) -> Self {
        self.convolution_regularization = false;
        self
    }

    pub fn spectral_preserving(mut self) -> Self {
        self.spectral_preserving = true;
        self
    }
}

/// Input dropout, dense projection(s) to the latent width, then
/// `iterations` residual convolutions all referencing the projection
/// output `h0`, and a final linear classifier.
pub fn gcnii(
    graph: SparseMatrix,
    features: Tensor,
    num_classes: usize,
    config: &GcniiConfig,
) -> Result<Gnn> {
    let device = features.device().clone();
    let mut gnn = Gnn::new(graph, features, device)?;
    gnn.add(Dropout::new(config.dropout))?;

    let mut h0 = None;
    for &dim in &config.latent_dims {
        h0 = Some(gnn.add(Dense::new(dim).with_regularize(1.0))?);
    }
    let h0 = h0.ok_or_else(|| {
        crate::error::Error::InvalidConfig("gcnii requires at least one latent dim".into())
    })?;

    let conv_weight = if config.convolution_regularization {
        1.0
    } else {
        0.0
    };
    for iteration in 0..config.iterations {
        let mut conv = GcniiConv::new(h0, config.alpha, config.lambda, iteration)
            .with_activation(Activation::Relu)
            .with_dropout(config.dropout)
            .with_regularize(conv_weight);
        if config.spectral_preserving {
            conv = conv.spectral_preserving();
        }
        gnn.add(conv)?;
    }

    gnn.add(Dense::new(num_classes).with_activation(Activation::Linear))?;
    Ok(gnn)
}

//! APPNP: predict then propagate (Klicpera et al., ICLR 2019).

use crate::error::Result;
use crate::gnn::conv::PprConv;
use crate::gnn::Gnn;
use crate::graph::SparseMatrix;
use crate::nn::layers::{Activation, Dense, Dropout};
use candle_core::Tensor;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppnpConfig {
    /// Hidden widths of the prediction MLP.
    pub latent_dims: Vec<usize>,
    /// Teleport probability of the personalized-PageRank propagation.
    pub alpha: f64,
    /// Number of propagation steps.
    pub iterations: usize,
    pub dropout: f32,
}

impl Default for AppnpConfig {
    fn default() -> Self {
        Self {
            latent_dims: vec![64],
            alpha: 0.1,
            iterations: 10,
            dropout: 0.5,
        }
    }
}

impl AppnpConfig {
    pub fn with_latent_dims(mut self, dims: Vec<usize>) -> Self {
        self.latent_dims = dims;
        self
    }

    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
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
}

/// Dropout, an MLP predicting class logits, then `iterations`
/// personalized-PageRank sweeps re-injecting the prediction with
/// probability `alpha` at every step.
pub fn appnp(
    graph: SparseMatrix,
    features: Tensor,
    num_classes: usize,
    config: &AppnpConfig,
) -> Result<Gnn> {
    let device = features.device().clone();
    let mut gnn = Gnn::new(graph, features, device)?;
    gnn.add(Dropout::new(config.dropout))?;

    for &dim in &config.latent_dims {
        gnn.add(
            Dense::new(dim)
                .with_dropout(config.dropout)
                .with_regularize(1.0),
        )?;
    }
    let h0 = gnn.add(Dense::new(num_classes).with_activation(Activation::Linear))?;

    for _ in 0..config.iterations {
        gnn.add(PprConv::new(h0, config.alpha))?;
    }
    Ok(gnn)
}

//! GCN: stacked graph convolutions (Kipf & Welling, ICLR 2017).

use crate::error::Result;
use crate::gnn::conv::GcnConv;
use crate::gnn::Gnn;
use crate::graph::SparseMatrix;
use candle_core::Tensor;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GcnConfig {
    /// Hidden widths, one convolution per entry.
    pub latent_dims: Vec<usize>,
    /// Feature dropout on hidden convolutions.
    pub dropout: f32,
    /// Edge dropout on every convolution's adjacency, output included.
    pub graph_dropout: f32,
    pub spectral_preserving: bool,
}

impl Default for GcnConfig {
    fn default() -> Self {
        Self {
            latent_dims: vec![64],
            dropout: 0.5,
            graph_dropout: 0.5,
            spectral_preserving: false,
        }
    }
}

impl GcnConfig {
    pub fn with_latent_dims(mut self, dims: Vec<usize>) -> Self {
        self.latent_dims = dims;
        self
    }

    pub fn with_dropout(mut self, rate: f32) -> Self {
        self.dropout = rate;
        self
    }

    pub fn with_graph_dropout(mut self, rate: f32) -> Self {
        self.graph_dropout = rate;
        self
    }

    pub fn spectral_preserving(mut self) -> Self {
        self.spectral_preserving = true;
        self
    }
}

/// One convolution per hidden width, then a convolution down to
/// `num_classes`. Adjacency dropout applies to hidden and output layers
/// alike; feature dropout only to hidden layers.
pub fn gcn(
    graph: SparseMatrix,
    features: Tensor,
    num_classes: usize,
    config: &GcnConfig,
) -> Result<Gnn> {
    let device = features.device().clone();
    let mut gnn = Gnn::new(graph, features, device)?;
    for &dim in &config.latent_dims {
        let mut conv = GcnConv::new(dim)
            .with_dropout(config.dropout)
            .with_graph_dropout(config.graph_dropout);
        if config.spectral_preserving {
            conv = conv.spectral_preserving();
        }
        gnn.add(conv)?;
    }
    let mut out = GcnConv::new(num_classes).with_graph_dropout(config.graph_dropout);
    if config.spectral_preserving {
        out = out.spectral_preserving();
    }
    gnn.add(out)?;
    Ok(gnn)
}

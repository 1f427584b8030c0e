//! NGCF: bipartite collaborative-filtering convolutions
//! (Wang et al., SIGIR 2019).

use crate::error::Result;
use crate::gnn::conv::NgcfConv;
use crate::gnn::Gnn;
use crate::graph::SparseMatrix;
use crate::nn::layers::Concatenate;
use candle_core::Tensor;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NgcfConfig {
    /// Hidden widths; defaults to `[num_classes, num_classes]` when empty.
    pub latent_dims: Vec<usize>,
    pub dropout: f32,
    /// Node dropout on the bipartite adjacency.
    pub node_dropout: f32,
}

impl Default for NgcfConfig {
    fn default() -> Self {
        Self {
            latent_dims: Vec::new(),
            dropout: 0.1,
            node_dropout: 0.0,
        }
    }
}

impl NgcfConfig {
    pub fn with_latent_dims(mut self, dims: Vec<usize>) -> Self {
        self.latent_dims = dims;
        self
    }

    pub fn with_dropout(mut self, rate: f32) -> Self {
        self.dropout = rate;
        self
    }

    pub fn with_node_dropout(mut self, rate: f32) -> Self {
        self.node_dropout = rate;
        self
    }
}

/// One convolution per latent width plus one of width `num_classes`, with
/// every convolution's output concatenated as the final representation.
/// Output width is the sum of all convolution widths.
pub fn ngcf(
    graph: SparseMatrix,
    features: Tensor,
    num_classes: usize,
    config: &NgcfConfig,
) -> Result<Gnn> {
    let device = features.device().clone();
    let mut gnn = Gnn::new(graph, features, device)?;

    let latent_dims = if config.latent_dims.is_empty() {
        vec![num_classes; 2]
    } else {
        config.latent_dims.clone()
    };

    let mut ids = Vec::with_capacity(latent_dims.len() + 1);
    for dim in latent_dims {
        ids.push(gnn.add(
            NgcfConv::new(dim)
                .with_dropout(config.dropout)
                .with_node_dropout(config.node_dropout),
        )?);
    }
    ids.push(gnn.add(
        NgcfConv::new(num_classes)
            .with_dropout(config.dropout)
            .with_node_dropout(config.node_dropout),
    )?);

    gnn.add(Concatenate::new(ids))?;
    Ok(gnn)
}

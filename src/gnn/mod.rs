//! Graph-aware pipelines and concrete architectures.

pub mod architectures;
pub mod conv;

pub use architectures::{appnp, gcn, gcnii, ngcf, AppnpConfig, GcnConfig, GcniiConfig, NgcfConfig};
pub use conv::{GcnConv, GcniiConv, NgcfConv, PprConv};

use crate::error::{Error, Result};
use crate::graph::{AdjacencyView, SparseMatrix};
use crate::nn::layered::{LayerId, LayerSpec, Layered, Shape};
use candle_core::{Device, Tensor, Var};

/// A layered pipeline coupled with a graph and its node features.
///
/// The graph is stored sparse and host-side; graph-aware layers derive a
/// fresh perturbed dense view of it on every forward pass through their
/// [`AdjacencyView`], so no perturbation is ever shared between layers or
/// passes.
pub struct Gnn {
    layered: Layered,
    graph: SparseMatrix,
    features: Tensor,
}

impl std::fmt::Debug for Gnn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gnn")
            .field("graph", &self.graph)
            .field("features", &self.features)
            .finish_non_exhaustive()
    }
}

impl Gnn {
    /// Couple a square adjacency with an `N x F` feature matrix.
    pub fn new(graph: SparseMatrix, features: Tensor, device: Device) -> Result<Self> {
        if !graph.is_square() {
            let (rows, cols) = graph.shape();
            return Err(Error::DimensionMismatch {
                expected: rows,
                got: cols,
            });
        }
        let dims = features.dims();
        if dims.len() != 2 {
            return Err(Error::InvalidConfig(format!(
                "features must be 2-D, got {} dims",
                dims.len()
            )));
        }
        if dims[0] != graph.shape().0 {
            return Err(Error::DimensionMismatch {
                expected: graph.shape().0,
                got: dims[0],
            });
        }
        Ok(Self {
            layered: Layered::new((dims[0], dims[1]), device),
            graph,
            features,
        })
    }

    /// Build a layer against the current top shape and append it.
    pub fn add(&mut self, spec: impl LayerSpec + 'static) -> Result<LayerId> {
        self.layered.add(spec)
    }

    pub fn top_shape(&self) -> Shape {
        self.layered.top_shape()
    }

    pub fn training(&self) -> bool {
        self.layered.training()
    }

    pub fn set_training(&mut self, training: bool) {
        self.layered.set_training(training);
    }

    pub fn set_seed(&mut self, seed: u64) {
        self.layered.set_seed(seed);
    }

    pub fn trainable_vars(&self) -> Vec<Var> {
        self.layered.trainable_vars()
    }

    pub fn regularization_loss(&self) -> Result<Option<Tensor>> {
        self.layered.regularization_loss()
    }

    pub fn graph(&self) -> &SparseMatrix {
        &self.graph
    }

    pub fn features(&self) -> &Tensor {
        &self.features
    }

    pub fn layered(&self) -> &Layered {
        &self.layered
    }

    /// Fresh perturbed dense adjacency under `view`. Recomputed per call;
    /// with dropout 0 (or outside training) the result is deterministic.
    pub fn get_adjacency(&mut self, view: &AdjacencyView) -> Result<Tensor> {
        self.layered.derive_adjacency(&self.graph, view)
    }

    /// Run the pipeline over the stored node features.
    pub fn forward(&mut self) -> Result<Tensor> {
        let features = self.features.clone();
        self.layered.forward_with(Some(&self.graph), &features)
    }

    /// Run the pipeline over caller-provided features of the same shape.
    pub fn call(&mut self, features: &Tensor) -> Result<Tensor> {
        self.layered.forward_with(Some(&self.graph), features)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::DropoutMode;
    use candle_core::Device;

    fn triangle() -> SparseMatrix {
        SparseMatrix::from_undirected_edges(3, &[(0, 1), (1, 2), (2, 0)]).unwrap()
    }

    fn features(rows: usize, cols: usize) -> Tensor {
        Tensor::randn(0f32, 1f32, (rows, cols), &Device::Cpu).unwrap()
    }

    #[test]
    fn test_new_rejects_rectangular_graph() {
        let graph = SparseMatrix::new((3, 4));
        assert!(Gnn::new(graph, features(3, 2), Device::Cpu).is_err());
    }

    #[test]
    fn test_new_rejects_row_mismatch() {
        let err = Gnn::new(triangle(), features(5, 2), Device::Cpu).unwrap_err();
        assert!(matches!(
            err,
            Error::DimensionMismatch {
                expected: 3,
                got: 5
            }
        ));
    }

    #[test]
    fn test_top_shape_starts_at_feature_shape() {
        let gnn = Gnn::new(triangle(), features(3, 4), Device::Cpu).unwrap();
        assert_eq!(gnn.top_shape(), (3, 4));
    }

    #[test]
    fn test_adjacency_without_dropout_is_deterministic() {
        let mut gnn = Gnn::new(triangle(), features(3, 2), Device::Cpu).unwrap();
        gnn.set_training(true);
        let view = AdjacencyView::default();
        let a = gnn.get_adjacency(&view).unwrap().to_vec2::<f32>().unwrap();
        let b = gnn.get_adjacency(&view).unwrap().to_vec2::<f32>().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_adjacency_views_are_independent_per_call() {
        // Derivations with dropout must not share a cached perturbation:
        // across many calls the kept-entry pattern has to vary.
        let mut gnn = Gnn::new(triangle(), features(3, 2), Device::Cpu).unwrap();
        gnn.set_training(true);
        let view = AdjacencyView::default()
            .with_dropout(0.5)
            .with_dropout_mode(DropoutMode::Edge);

        let mut patterns = std::collections::HashSet::new();
        for _ in 0..32 {
            let dense = gnn.get_adjacency(&view).unwrap().to_vec2::<f32>().unwrap();
            let mask: Vec<bool> = dense
                .iter()
                .flatten()
                .map(|&v| v != 0.0)
                .collect();
            patterns.insert(mask);
        }
        assert!(patterns.len() > 1);
    }

    #[test]
    fn test_adjacency_dropout_skipped_outside_training() {
        let mut gnn = Gnn::new(triangle(), features(3, 2), Device::Cpu).unwrap();
        gnn.set_training(false);
        let view = AdjacencyView::default().with_dropout(0.9);
        let a = gnn.get_adjacency(&view).unwrap().to_vec2::<f32>().unwrap();
        let b = gnn.get_adjacency(&view).unwrap().to_vec2::<f32>().unwrap();
        assert_eq!(a, b);
    }
}

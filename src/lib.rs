//! `strata` composes layered graph neural networks over sparse adjacency
//! matrices, with `candle` as the differentiable-tensor substrate.
//!
//! The core is the layered pipeline engine ([`nn::Layered`]): layers are
//! declared as configuration structs, built once at insertion against the
//! current top shape, and executed sequentially with an explicit
//! training/inference context. [`gnn::Gnn`] couples a pipeline with a
//! sparse graph whose perturbed adjacency views (edge/node dropout,
//! self-loops, normalization variants) are derived fresh per layer per
//! pass.
//!
//! Concrete architectures — GCN, GCNII, NGCF, APPNP — are declarative
//! recipes over these primitives:
//!
//! ```no_run
//! use strata::gnn::architectures::{gcn, GcnConfig};
//! use strata::graph::SparseMatrix;
//! use strata::training::{NodeClassification, TrainingConfig};
//! use candle_core::{Device, Tensor};
//!
//! # fn main() -> strata::Result<()> {
//! let graph = SparseMatrix::from_undirected_edges(4, &[(0, 1), (1, 2), (2, 3)])?;
//! let features = Tensor::randn(0f32, 1f32, (4, 8), &Device::Cpu)?;
//! let mut gnn = gcn(graph, features, 2, &GcnConfig::default())?;
//!
//! let train = NodeClassification::new(vec![0, 3], vec![0, 1])?;
//! let valid = NodeClassification::new(vec![1], vec![0])?;
//! gnn.train(&train, &valid, &TrainingConfig::default())?;
//! let predictions = gnn.predict(&NodeClassification::unlabeled(vec![2]))?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod gnn;
pub mod graph;
pub mod nn;
pub mod training;

pub use error::{Error, Result};
pub use gnn::Gnn;
pub use graph::{AdjacencyView, DropoutMode, Normalization, SparseMatrix};
pub use nn::{Activation, Concatenate, Dense, Dropout, LayerId, Layered};
pub use training::{accuracy, EpochMetrics, NodeClassification, TrainingConfig};

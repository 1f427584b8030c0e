//! Node-classification task surface: masked loss, training loop with
//! early stopping, prediction extraction.

use crate::error::{Error, Result};
use crate::gnn::Gnn;
use candle_core::{Device, Tensor, D};
use candle_nn::{loss, AdamW, Optimizer, ParamsAdamW};
use serde::Deserialize;

/// A set of node indices to evaluate against, with labels when the task
/// is used for loss computation.
#[derive(Debug, Clone)]
pub struct NodeClassification {
    indices: Vec<u32>,
    labels: Option<Vec<u32>>,
}

impl NodeClassification {
    pub fn new(indices: Vec<u32>, labels: Vec<u32>) -> Result<Self> {
        if indices.len() != labels.len() {
            return Err(Error::DimensionMismatch {
                expected: indices.len(),
                got: labels.len(),
            });
        }
        Ok(Self {
            indices,
            labels: Some(labels),
        })
    }

    /// Label-free task, usable only for prediction.
    pub fn unlabeled(indices: Vec<u32>) -> Self {
        Self {
            indices,
            labels: None,
        }
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    pub fn labels(&self) -> Option<&[u32]> {
        self.labels.as_deref()
    }

    /// Logits restricted to this task's nodes.
    fn select(&self, output: &Tensor, device: &Device) -> Result<Tensor> {
        let ids = Tensor::from_vec(self.indices.clone(), self.indices.len(), device)?;
        Ok(output.index_select(&ids, 0)?)
    }

    /// Cross-entropy over this task's nodes.
    pub fn loss(&self, output: &Tensor, device: &Device) -> Result<Tensor> {
        let labels = self
            .labels
            .as_ref()
            .ok_or_else(|| Error::Training("task has no labels".into()))?;
        let logits = self.select(output, device)?;
        let targets = Tensor::from_vec(labels.clone(), labels.len(), device)?;
        Ok(loss::cross_entropy(&logits, &targets)?)
    }
}

/// Training hyperparameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub learning_rate: f64,
    /// Global weight on the variable regularization penalty.
    pub regularization: f64,
    /// Epochs without validation improvement before stopping.
    pub patience: usize,
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 300,
            learning_rate: 0.01,
            regularization: 5e-4,
            patience: 100,
            seed: 42,
        }
    }
}

impl TrainingConfig {
    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    pub fn with_learning_rate(mut self, lr: f64) -> Self {
        self.learning_rate = lr;
        self
    }

    pub fn with_regularization(mut self, weight: f64) -> Self {
        self.regularization = weight;
        self
    }

    pub fn with_patience(mut self, patience: usize) -> Self {
        self.patience = patience;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

/// Per-epoch observables surfaced to progress callbacks.
#[derive(Debug, Clone, Copy)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub train_loss: f32,
    pub valid_loss: f32,
}

impl Gnn {
    /// Train with AdamW and early stopping on validation loss. Returns the
    /// best validation loss observed.
    pub fn train(
        &mut self,
        train: &NodeClassification,
        valid: &NodeClassification,
        config: &TrainingConfig,
    ) -> Result<f32> {
        self.train_with_callback(train, valid, config, |_| {})
    }

    /// As [`Gnn::train`], invoking `callback` after every epoch.
    pub fn train_with_callback(
        &mut self,
        train: &NodeClassification,
        valid: &NodeClassification,
        config: &TrainingConfig,
        mut callback: impl FnMut(&EpochMetrics),
    ) -> Result<f32> {
        let vars = self.trainable_vars();
        if vars.is_empty() {
            return Err(Error::Training("pipeline has no trainable variables".into()));
        }
        self.set_seed(config.seed);
        let mut optimizer = AdamW::new(
            vars,
            ParamsAdamW {
                lr: config.learning_rate,
                ..Default::default()
            },
        )?;

        let device = self.features().device().clone();
        let mut best = f32::INFINITY;
        let mut epochs_since_best = 0;

        for epoch in 0..config.epochs {
            self.set_training(true);
            let output = self.forward()?;
            let mut train_loss = train.loss(&output, &device)?;
            if config.regularization > 0.0 {
                if let Some(penalty) = self.regularization_loss()? {
                    train_loss = (train_loss + (penalty * config.regularization)?)?;
                }
            }
            optimizer.backward_step(&train_loss)?;
            self.set_training(false);

            let output = self.forward()?;
            let valid_loss = valid.loss(&output, &device)?.to_scalar::<f32>()?;
            callback(&EpochMetrics {
                epoch,
                train_loss: train_loss.to_scalar::<f32>()?,
                valid_loss,
            });

            if valid_loss < best {
                best = valid_loss;
                epochs_since_best = 0;
            } else {
                epochs_since_best += 1;
                if epochs_since_best >= config.patience {
                    break;
                }
            }
        }
        Ok(best)
    }

    /// Inference-mode forward pass followed by argmax over the task's
    /// node logits.
    pub fn predict(&mut self, task: &NodeClassification) -> Result<Vec<u32>> {
        self.set_training(false);
        let device = self.features().device().clone();
        let output = self.forward()?;
        let logits = task.select(&output, &device)?;
        Ok(logits.argmax(D::Minus1)?.to_vec1::<u32>()?)
    }
}

/// Fraction of matching predictions.
pub fn accuracy(predictions: &[u32], labels: &[u32]) -> f32 {
    if predictions.is_empty() || predictions.len() != labels.len() {
        return 0.0;
    }
    let hits = predictions
        .iter()
        .zip(labels)
        .filter(|(p, l)| p == l)
        .count();
    hits as f32 / predictions.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gnn::architectures::{gcn, GcnConfig};
    use crate::graph::SparseMatrix;
    use candle_core::Device;

    fn two_cluster_graph() -> (SparseMatrix, Tensor, Vec<u32>) {
        // Two triangles joined by one edge; features separate the
        // clusters cleanly.
        let graph = SparseMatrix::from_undirected_edges(
            6,
            &[(0, 1), (1, 2), (2, 0), (3, 4), (4, 5), (5, 3), (2, 3)],
        )
        .unwrap();
        let features = Tensor::new(
            &[
                [1.0f32, 0.0],
                [0.9, 0.1],
                [0.8, 0.0],
                [0.0, 0.9],
                [0.1, 1.0],
                [0.0, 0.8],
            ],
            &Device::Cpu,
        )
        .unwrap();
        let labels = vec![0u32, 0, 0, 1, 1, 1];
        (graph, features, labels)
    }

    #[test]
    fn test_node_classification_rejects_length_mismatch() {
        assert!(NodeClassification::new(vec![0, 1], vec![0]).is_err());
    }

    #[test]
    fn test_unlabeled_task_has_no_loss() {
        let task = NodeClassification::unlabeled(vec![0, 1]);
        let output = Tensor::zeros((4, 2), candle_core::DType::F32, &Device::Cpu).unwrap();
        assert!(task.loss(&output, &Device::Cpu).is_err());
    }

    #[test]
    fn test_accuracy() {
        assert_eq!(accuracy(&[0, 1, 1, 0], &[0, 1, 0, 0]), 0.75);
        assert_eq!(accuracy(&[], &[]), 0.0);
        assert_eq!(accuracy(&[1], &[1, 2]), 0.0);
    }

    #[test]
    fn test_train_produces_finite_losses() {
        let (graph, features, labels) = two_cluster_graph();
        let config = GcnConfig::default()
            .with_latent_dims(vec![8])
            .with_dropout(0.0)
            .with_graph_dropout(0.0);
        let mut gnn = gcn(graph, features, 2, &config).unwrap();

        let train = NodeClassification::new(vec![0, 1, 3, 4], vec![labels[0], labels[1], labels[3], labels[4]]).unwrap();
        let valid = NodeClassification::new(vec![2, 5], vec![labels[2], labels[5]]).unwrap();

        let mut seen = Vec::new();
        let best = gnn
            .train_with_callback(
                &train,
                &valid,
                &TrainingConfig::default().with_epochs(10),
                |m| seen.push(*m),
            )
            .unwrap();

        assert_eq!(seen.len(), 10);
        assert!(best.is_finite());
        for m in &seen {
            assert!(m.train_loss.is_finite());
            assert!(m.valid_loss.is_finite());
        }
    }

    #[test]
    fn test_predict_returns_one_class_per_index() {
        let (graph, features, _) = two_cluster_graph();
        let config = GcnConfig::default().with_latent_dims(vec![4]);
        let mut gnn = gcn(graph, features, 2, &config).unwrap();

        let preds = gnn
            .predict(&NodeClassification::unlabeled(vec![0, 2, 5]))
            .unwrap();
        assert_eq!(preds.len(), 3);
        for p in preds {
            assert!(p < 2);
        }
    }

    #[test]
    fn test_training_restores_inference_mode() {
        let (graph, features, labels) = two_cluster_graph();
        let mut gnn = gcn(graph, features, 2, &GcnConfig::default()).unwrap();
        let train = NodeClassification::new(vec![0, 3], vec![labels[0], labels[3]]).unwrap();
        let valid = NodeClassification::new(vec![1, 4], vec![labels[1], labels[4]]).unwrap();

        gnn.train(&train, &valid, &TrainingConfig::default().with_epochs(2))
            .unwrap();
        assert!(!gnn.training());
    }

    #[test]
    fn test_train_without_layers_fails() {
        let (graph, features, _) = two_cluster_graph();
        let mut gnn = Gnn::new(graph, features, Device::Cpu).unwrap();
        let task = NodeClassification::new(vec![0], vec![0]).unwrap();
        let err = gnn
            .train(&task, &task, &TrainingConfig::default())
            .unwrap_err();
        assert!(matches!(err, Error::Training(_)));
    }
}

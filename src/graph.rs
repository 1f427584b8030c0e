//! Sparse adjacency matrices and their per-request perturbed views.
//!
//! A graph enters the pipeline as a [`SparseMatrix`] in COO form. Layers never
//! read it directly: they request a view through
//! [`AdjacencyView`] — self-loop insertion, a normalization variant, and a
//! dropout perturbation — and receive a freshly derived dense tensor each
//! time. Derivation is pure per call; nothing is cached, so two layers in the
//! same forward pass can hold differently-perturbed views of the same graph
//! without interference.
//!
//! # Dropout modes
//!
//! - **Edge**: zero a random subset of stored edge weights. The index
//!   structure is untouched; only values change.
//! - **Node**: post-multiply by a randomly-zeroed diagonal, masking whole
//!   columns so a dropped node contributes nothing through the matrix
//!   product, without deleting its edges outright.
//!
//! Surviving entries are rescaled by `1/(1-rate)` (inverted dropout), so the
//! expected aggregation magnitude is unchanged.

use crate::error::{Error, Result};
use candle_core::{Device, Tensor};
use rand::rngs::StdRng;
use rand::Rng;
use serde::Deserialize;
use std::str::FromStr;

/// Sparse dropout mode for adjacency perturbation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DropoutMode {
    /// Drop individual edge weights directly.
    Edge,
    /// Drop whole nodes via a randomly-masked diagonal product.
    Node,
}

impl FromStr for DropoutMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "edge" => Ok(Self::Edge),
            "node" => Ok(Self::Node),
            other => Err(Error::InvalidDropoutMode(other.to_string())),
        }
    }
}

/// Adjacency normalization variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Normalization {
    /// Leave edge weights as stored.
    None,
    /// Symmetric normalization `D^{-1/2} A D^{-1/2}` from row degrees.
    /// Assumes a square (and in practice symmetric) adjacency.
    #[default]
    Symmetric,
    /// Normalization from separate row and column degrees, suited to
    /// two-sided (user/item) graphs where in- and out-degrees differ.
    Bipartite,
}

/// Parameters of a derived adjacency view.
///
/// Defaults match the common GCN setting: self-loops added, symmetric
/// normalization, no dropout.
#[derive(Debug, Clone)]
pub struct AdjacencyView {
    /// Dropout rate in `[0, 1)`; applied only in training mode.
    pub dropout: f32,
    /// Sparse dropout mode.
    pub dropout_mode: DropoutMode,
    /// Whether to insert self-loops before normalizing.
    pub self_loops: bool,
    /// Normalization variant.
    pub normalization: Normalization,
}

impl Default for AdjacencyView {
    fn default() -> Self {
        Self {
            dropout: 0.0,
            dropout_mode: DropoutMode::Edge,
            self_loops: true,
            normalization: Normalization::Symmetric,
        }
    }
}

impl AdjacencyView {
    pub fn with_dropout(mut self, rate: f32) -> Self {
        self.dropout = rate;
        self
    }

    pub fn with_dropout_mode(mut self, mode: DropoutMode) -> Self {
        self.dropout_mode = mode;
        self
    }

    pub fn without_self_loops(mut self) -> Self {
        self.self_loops = false;
        self
    }

    pub fn with_normalization(mut self, normalization: Normalization) -> Self {
        self.normalization = normalization;
        self
    }
}

/// Sparse matrix in coordinate (COO) form.
///
/// Entries are append-only; duplicate coordinates accumulate when the matrix
/// is densified, matching sparse-tensor semantics.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseMatrix {
    shape: (usize, usize),
    rows: Vec<usize>,
    cols: Vec<usize>,
    values: Vec<f32>,
}

impl SparseMatrix {
    /// Create an empty matrix of the given shape.
    pub fn new(shape: (usize, usize)) -> Self {
        Self {
            shape,
            rows: Vec::new(),
            cols: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Build an adjacency from directed edges, each with weight 1.
    pub fn from_edges(n: usize, edges: &[(usize, usize)]) -> Result<Self> {
        let mut m = Self::new((n, n));
        for &(r, c) in edges {
            m.push(r, c, 1.0)?;
        }
        Ok(m)
    }

    /// Build an adjacency from undirected edges: each pair is inserted in
    /// both directions.
    pub fn from_undirected_edges(n: usize, edges: &[(usize, usize)]) -> Result<Self> {
        let mut m = Self::new((n, n));
        for &(r, c) in edges {
            m.push(r, c, 1.0)?;
            if r != c {
                m.push(c, r, 1.0)?;
            }
        }
        Ok(m)
    }

    /// Build a matrix from parallel coordinate/value triplets.
    pub fn from_triplets(
        shape: (usize, usize),
        rows: Vec<usize>,
        cols: Vec<usize>,
        values: Vec<f32>,
    ) -> Result<Self> {
        if rows.len() != cols.len() || rows.len() != values.len() {
            return Err(Error::InvalidConfig(format!(
                "triplet arrays disagree in length: {} rows, {} cols, {} values",
                rows.len(),
                cols.len(),
                values.len()
            )));
        }
        let mut m = Self::new(shape);
        for ((&r, &c), &v) in rows.iter().zip(cols.iter()).zip(values.iter()) {
            m.push(r, c, v)?;
        }
        Ok(m)
    }

    /// Sparse identity matrix.
    pub fn eye(n: usize) -> Self {
        Self {
            shape: (n, n),
            rows: (0..n).collect(),
            cols: (0..n).collect(),
            values: vec![1.0; n],
        }
    }

    /// Append an entry.
    pub fn push(&mut self, row: usize, col: usize, value: f32) -> Result<()> {
        if row >= self.shape.0 || col >= self.shape.1 {
            return Err(Error::InvalidConfig(format!(
                "entry ({row}, {col}) outside shape {:?}",
                self.shape
            )));
        }
        self.rows.push(row);
        self.cols.push(col);
        self.values.push(value);
        Ok(())
    }

    pub fn shape(&self) -> (usize, usize) {
        self.shape
    }

    pub fn is_square(&self) -> bool {
        self.shape.0 == self.shape.1
    }

    /// Number of stored entries.
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Stored coordinates as parallel `(rows, cols)` slices.
    pub fn indices(&self) -> (&[usize], &[usize]) {
        (&self.rows, &self.cols)
    }

    /// Copy with self-loop entries appended along the diagonal.
    pub fn with_self_loops(&self) -> Result<Self> {
        if !self.is_square() {
            return Err(Error::InvalidConfig(format!(
                "self-loops require a square matrix, got {:?}",
                self.shape
            )));
        }
        let mut out = self.clone();
        for i in 0..self.shape.0 {
            out.rows.push(i);
            out.cols.push(i);
            out.values.push(1.0);
        }
        Ok(out)
    }

    fn row_degrees(&self) -> Vec<f32> {
        let mut deg = vec![0.0; self.shape.0];
        for (&r, &v) in self.rows.iter().zip(self.values.iter()) {
            deg[r] += v;
        }
        deg
    }

    fn col_degrees(&self) -> Vec<f32> {
        let mut deg = vec![0.0; self.shape.1];
        for (&c, &v) in self.cols.iter().zip(self.values.iter()) {
            deg[c] += v;
        }
        deg
    }

    /// Degree-normalized copy.
    pub fn normalized(&self, mode: Normalization) -> Result<Self> {
        match mode {
            Normalization::None => Ok(self.clone()),
            Normalization::Symmetric => {
                if !self.is_square() {
                    return Err(Error::InvalidConfig(format!(
                        "symmetric normalization requires a square matrix, got {:?}",
                        self.shape
                    )));
                }
                let deg = self.row_degrees();
                Ok(self.scaled_by_degrees(&deg, &deg))
            }
            Normalization::Bipartite => {
                let row_deg = self.row_degrees();
                let col_deg = self.col_degrees();
                Ok(self.scaled_by_degrees(&row_deg, &col_deg))
            }
        }
    }

    fn scaled_by_degrees(&self, row_deg: &[f32], col_deg: &[f32]) -> Self {
        let mut out = self.clone();
        for i in 0..out.values.len() {
            let d = row_deg[out.rows[i]] * col_deg[out.cols[i]];
            out.values[i] = if d > 0.0 {
                out.values[i] / d.sqrt()
            } else {
                0.0
            };
        }
        out
    }

    /// Randomly perturbed copy.
    ///
    /// Edge mode zeroes a random subset of values in place; node mode masks
    /// whole columns (equivalent to post-multiplying by a randomly-zeroed
    /// diagonal). Survivors are rescaled by `1/(1-rate)`.
    pub fn dropout(&self, rate: f32, mode: DropoutMode, rng: &mut StdRng) -> Result<Self> {
        if !(0.0..1.0).contains(&rate) {
            return Err(Error::InvalidConfig(format!(
                "dropout rate must be in [0, 1), got {rate}"
            )));
        }
        if rate == 0.0 {
            return Ok(self.clone());
        }
        let scale = 1.0 / (1.0 - rate);
        let mut out = self.clone();
        match mode {
            DropoutMode::Edge => {
                for v in out.values.iter_mut() {
                    *v = if rng.gen::<f32>() < rate {
                        0.0
                    } else {
                        *v * scale
                    };
                }
            }
            DropoutMode::Node => {
                let keep: Vec<bool> = (0..self.shape.1).map(|_| rng.gen::<f32>() >= rate).collect();
                for (v, &c) in out.values.iter_mut().zip(out.cols.iter()) {
                    *v = if keep[c] { *v * scale } else { 0.0 };
                }
            }
        }
        Ok(out)
    }

    /// Densify into a candle tensor; duplicate coordinates accumulate.
    pub fn to_dense(&self, device: &Device) -> Result<Tensor> {
        let (n, m) = self.shape;
        let mut data = vec![0.0f32; n * m];
        for ((&r, &c), &v) in self.rows.iter().zip(self.cols.iter()).zip(self.values.iter()) {
            data[r * m + c] += v;
        }
        Ok(Tensor::from_vec(data, (n, m), device)?)
    }

    /// Derive a perturbed dense view. The perturbation is recomputed on
    /// every call; dropout applies only in training mode.
    pub fn derive(
        &self,
        view: &AdjacencyView,
        training: bool,
        rng: &mut StdRng,
        device: &Device,
    ) -> Result<Tensor> {
        let adj = if view.self_loops {
            self.with_self_loops()?
        } else {
            self.clone()
        };
        let adj = adj.normalized(view.normalization)?;
        let adj = if training && view.dropout > 0.0 {
            adj.dropout(view.dropout, view.dropout_mode, rng)?
        } else {
            adj
        };
        adj.to_dense(device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn path_graph(n: usize) -> SparseMatrix {
        let edges: Vec<(usize, usize)> = (0..n - 1).map(|i| (i, i + 1)).collect();
        SparseMatrix::from_undirected_edges(n, &edges).unwrap()
    }

    #[test]
    fn test_dropout_mode_parsing() {
        assert_eq!("edge".parse::<DropoutMode>().unwrap(), DropoutMode::Edge);
        assert_eq!("node".parse::<DropoutMode>().unwrap(), DropoutMode::Node);

        let err = "banana".parse::<DropoutMode>().unwrap_err();
        assert!(err.to_string().contains("invalid dropout mode"));
        assert!(err.to_string().contains("banana"));
    }

    #[test]
    fn test_self_loops_add_diagonal() {
        let adj = path_graph(4);
        let with_loops = adj.with_self_loops().unwrap();
        assert_eq!(with_loops.nnz(), adj.nnz() + 4);

        let device = Device::Cpu;
        let dense = with_loops.to_dense(&device).unwrap();
        let vals = dense.to_vec2::<f32>().unwrap();
        for (i, row) in vals.iter().enumerate() {
            assert_eq!(row[i], 1.0);
        }
    }

    #[test]
    fn test_symmetric_normalization_row_sums() {
        // For D^{-1/2} A D^{-1/2} with self-loops, every value lies in (0, 1]
        // and the diagonal of an isolated node stays 1.
        let adj = path_graph(5).with_self_loops().unwrap();
        let norm = adj.normalized(Normalization::Symmetric).unwrap();
        for &v in norm.values() {
            assert!(v > 0.0 && v <= 1.0, "normalized value out of range: {v}");
        }
    }

    #[test]
    fn test_bipartite_normalization_rectangular() {
        // 2 users x 3 items
        let m = SparseMatrix::from_triplets(
            (2, 3),
            vec![0, 0, 1],
            vec![0, 1, 2],
            vec![1.0, 1.0, 1.0],
        )
        .unwrap();
        let norm = m.normalized(Normalization::Bipartite).unwrap();
        // user 0 has degree 2, items 0 and 1 have degree 1: 1/sqrt(2*1)
        let expected = 1.0 / 2.0f32.sqrt();
        assert!((norm.values()[0] - expected).abs() < 1e-6);

        // Symmetric normalization must reject the rectangular shape.
        assert!(m.normalized(Normalization::Symmetric).is_err());
    }

    #[test]
    fn test_edge_dropout_preserves_index_structure() {
        let adj = path_graph(20);
        let mut rng = StdRng::seed_from_u64(7);
        let dropped = adj.dropout(0.5, DropoutMode::Edge, &mut rng).unwrap();

        assert_eq!(dropped.nnz(), adj.nnz());
        assert_eq!(dropped.indices(), adj.indices());

        let zeroed = dropped.values().iter().filter(|&&v| v == 0.0).count();
        assert!(zeroed > 0, "expected some values to be zeroed");
        assert!(zeroed < dropped.nnz(), "expected some values to survive");

        // Survivors are rescaled by 1/(1-rate).
        for (&v, &orig) in dropped.values().iter().zip(adj.values().iter()) {
            assert!(v == 0.0 || (v - orig * 2.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_node_dropout_masks_whole_columns() {
        let adj = path_graph(30);
        let mut rng = StdRng::seed_from_u64(11);
        let dropped = adj.dropout(0.5, DropoutMode::Node, &mut rng).unwrap();

        // Every column is either fully zeroed or fully rescaled, which is
        // exactly what multiplying by a randomly-masked diagonal produces.
        let (_, cols) = dropped.indices();
        let mut col_state: Vec<Option<bool>> = vec![None; 30];
        for (&v, &c) in dropped.values().iter().zip(cols.iter()) {
            let kept = v != 0.0;
            match col_state[c] {
                None => col_state[c] = Some(kept),
                Some(prev) => assert_eq!(prev, kept, "column {c} partially dropped"),
            }
        }
    }

    #[test]
    fn test_dropout_rate_zero_is_identity() {
        let adj = path_graph(6);
        let mut rng = StdRng::seed_from_u64(3);
        let out = adj.dropout(0.0, DropoutMode::Edge, &mut rng).unwrap();
        assert_eq!(out, adj);
    }

    #[test]
    fn test_dropout_rejects_rate_one() {
        let adj = path_graph(4);
        let mut rng = StdRng::seed_from_u64(0);
        assert!(adj.dropout(1.0, DropoutMode::Edge, &mut rng).is_err());
    }

    #[test]
    fn test_derive_without_dropout_is_deterministic() {
        let adj = path_graph(8);
        let view = AdjacencyView::default();
        let mut rng = StdRng::seed_from_u64(1);
        let device = Device::Cpu;

        let a = adj.derive(&view, true, &mut rng, &device).unwrap();
        let b = adj.derive(&view, true, &mut rng, &device).unwrap();
        assert_eq!(a.to_vec2::<f32>().unwrap(), b.to_vec2::<f32>().unwrap());
    }

    #[test]
    fn test_derive_skips_dropout_outside_training() {
        let adj = path_graph(8);
        let view = AdjacencyView::default().with_dropout(0.9);
        let mut rng = StdRng::seed_from_u64(1);
        let device = Device::Cpu;

        let a = adj.derive(&view, false, &mut rng, &device).unwrap();
        let b = adj.derive(&view, false, &mut rng, &device).unwrap();
        assert_eq!(a.to_vec2::<f32>().unwrap(), b.to_vec2::<f32>().unwrap());
    }
}

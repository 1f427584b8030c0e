//! Layered pipeline engine.
//!
//! A pipeline is declared as a sequence of layer specifications and built
//! incrementally: each [`LayerSpec`] is consumed exactly once by
//! [`Layered::add`], at which point it sees the current top shape, registers
//! its variables, and becomes a built [`Layer`] with a fixed output shape.
//! Consuming the spec by move makes a second build impossible.
//!
//! A forward pass threads the feature matrix through the layers in order.
//! Each layer's output is recorded in a per-pass arena indexed by
//! [`LayerId`], so later layers (residual connections, concatenation) read
//! earlier outputs through the [`ForwardContext`] instead of holding
//! references of their own.

use crate::error::{Error, Result};
use crate::graph::{AdjacencyView, SparseMatrix};
use crate::nn::vars::{Init, VarId, VariableGenerator};
use candle_core::{Device, Tensor, Var};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::ops::Range;

/// 2-D shape `(rows, columns)` flowing between layers.
pub type Shape = (usize, usize);

const DEFAULT_SEED: u64 = 42;

/// Handle to a built layer within a [`Layered`] pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerId(pub(crate) usize);

impl LayerId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Declaration-time layer configuration, consumed once at insertion.
pub trait LayerSpec {
    /// Resolve shapes, register variables, and produce the built layer.
    fn build(self: Box<Self>, ctx: &mut BuildContext<'_>) -> Result<Box<dyn Layer>>;
}

/// A built layer: fixed output shape, pure forward transformation.
pub trait Layer {
    fn output_shape(&self) -> Shape;

    /// Transform the running feature matrix. Prior layer outputs and the
    /// graph context are reachable through `ctx`.
    fn forward(&self, ctx: &mut ForwardContext<'_>, features: &Tensor) -> Result<Tensor>;
}

/// Build-time view of the pipeline: current top shape, shapes of every
/// already-built layer, and scoped variable creation.
pub struct BuildContext<'a> {
    top_shape: Shape,
    shapes: &'a [Shape],
    vars: &'a mut VariableGenerator,
}

impl<'a> BuildContext<'a> {
    /// Shape the new layer receives as input.
    pub fn top_shape(&self) -> Shape {
        self.top_shape
    }

    /// Output shape of an already-built layer.
    pub fn shape(&self, id: LayerId) -> Result<Shape> {
        self.shapes
            .get(id.0)
            .copied()
            .ok_or(Error::InvalidLayerReference { index: id.0 })
    }

    pub fn device(&self) -> &Device {
        self.vars.device()
    }

    /// Register a variable attributed to the layer under construction.
    pub fn create_var(
        &mut self,
        shape: Shape,
        init: Init,
        regularize: f32,
        normalization: Option<f64>,
    ) -> Result<VarId> {
        self.vars.create_var(shape, init, regularize, normalization)
    }
}

/// Per-pass execution context handed to every layer's `forward`.
///
/// The training flag is snapshotted from the pipeline at the start of the
/// pass, so a toggle mid-pass cannot split one pass across modes.
pub struct ForwardContext<'a> {
    training: bool,
    rng: &'a mut StdRng,
    graph: Option<&'a SparseMatrix>,
    values: &'a [Tensor],
    vars: &'a VariableGenerator,
    device: &'a Device,
}

impl<'a> ForwardContext<'a> {
    pub fn training(&self) -> bool {
        self.training
    }

    pub fn device(&self) -> &Device {
        self.device
    }

    /// Tensor view of a registered variable.
    pub fn var(&self, id: VarId) -> &Tensor {
        self.vars.tensor(id)
    }

    /// Output of an earlier layer in the current pass.
    pub fn value(&self, id: LayerId) -> Result<&Tensor> {
        self.values
            .get(id.0)
            .ok_or(Error::InvalidLayerReference { index: id.0 })
    }

    /// Dense dropout with inverted scaling. Identity when not training or
    /// the rate is zero.
    pub fn dropout(&self, features: &Tensor, rate: f32) -> Result<Tensor> {
        if !self.training || rate == 0.0 {
            return Ok(features.clone());
        }
        Ok(candle_nn::ops::dropout(features, rate)?)
    }

    /// Derive a fresh dense adjacency under the given view. Fails with
    /// [`Error::MissingGraph`] in a pipeline run without graph context.
    pub fn adjacency(&mut self, view: &AdjacencyView) -> Result<Tensor> {
        let graph = self.graph.ok_or(Error::MissingGraph)?;
        graph.derive(view, self.training, self.rng, self.device)
    }
}

/// Reject dropout rates outside `[0, 1)` at declaration time.
pub(crate) fn check_rate(rate: f32) -> Result<()> {
    if !(0.0..1.0).contains(&rate) {
        return Err(Error::InvalidConfig(format!(
            "dropout rate must be in [0, 1), got {rate}"
        )));
    }
    Ok(())
}

/// Ordered pipeline of built layers plus the variables they registered.
pub struct Layered {
    vars: VariableGenerator,
    layers: Vec<Box<dyn Layer>>,
    shapes: Vec<Shape>,
    /// Variable index range registered by each layer's build.
    owned: Vec<Range<usize>>,
    input_shape: Shape,
    training: bool,
    rng: StdRng,
}

impl Layered {
    pub fn new(input_shape: Shape, device: Device) -> Self {
        Self {
            vars: VariableGenerator::new(device),
            layers: Vec::new(),
            shapes: Vec::new(),
            owned: Vec::new(),
            input_shape,
            training: false,
            rng: StdRng::seed_from_u64(DEFAULT_SEED),
        }
    }

    /// Build a layer against the current top shape and append it.
    pub fn add(&mut self, spec: impl LayerSpec + 'static) -> Result<LayerId> {
        let scope = self.vars.open_scope();
        let mut ctx = BuildContext {
            top_shape: self.top_shape(),
            shapes: &self.shapes,
            vars: &mut self.vars,
        };
        let layer = Box::new(spec).build(&mut ctx)?;
        let owned = self.vars.close_scope(scope);

        let id = LayerId(self.layers.len());
        self.shapes.push(layer.output_shape());
        self.layers.push(layer);
        self.owned.push(owned);
        Ok(id)
    }

    /// Output shape of the last layer, or the input shape of an empty
    /// pipeline.
    pub fn top_shape(&self) -> Shape {
        self.shapes.last().copied().unwrap_or(self.input_shape)
    }

    pub fn input_shape(&self) -> Shape {
        self.input_shape
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn training(&self) -> bool {
        self.training
    }

    pub fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    /// Reseed the host-side RNG used for sparse masks.
    pub fn set_seed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    pub fn vars(&self) -> &VariableGenerator {
        &self.vars
    }

    /// Variables registered by a specific layer's build.
    pub fn layer_vars(&self, id: LayerId) -> Result<&[crate::nn::vars::Variable]> {
        let range = self
            .owned
            .get(id.0)
            .cloned()
            .ok_or(Error::InvalidLayerReference { index: id.0 })?;
        Ok(self.vars.slice(range))
    }

    pub fn trainable_vars(&self) -> Vec<Var> {
        self.vars.trainable_vars()
    }

    pub fn regularization_loss(&self) -> Result<Option<Tensor>> {
        self.vars.regularization_loss()
    }

    /// Derive a fresh dense adjacency from `graph` under `view`, using
    /// this pipeline's training flag and RNG. Never cached.
    pub fn derive_adjacency(
        &mut self,
        graph: &SparseMatrix,
        view: &AdjacencyView,
    ) -> Result<Tensor> {
        graph.derive(view, self.training, &mut self.rng, self.vars.device())
    }

    /// Run the pipeline without graph context.
    pub fn forward(&mut self, features: &Tensor) -> Result<Tensor> {
        self.forward_with(None, features)
    }

    /// Run the pipeline, recording each layer's output in the per-pass
    /// arena so later layers can read it by [`LayerId`].
    pub fn forward_with(
        &mut self,
        graph: Option<&SparseMatrix>,
        features: &Tensor,
    ) -> Result<Tensor> {
        let training = self.training;
        let mut values: Vec<Tensor> = Vec::with_capacity(self.layers.len());
        let mut current = features.clone();
        for layer in &self.layers {
            let mut ctx = ForwardContext {
                training,
                rng: &mut self.rng,
                graph,
                values: &values,
                vars: &self.vars,
                device: self.vars.device(),
            };
            current = layer.forward(&mut ctx, &current)?;
            values.push(current.clone());
        }
        Ok(current)
    }
}

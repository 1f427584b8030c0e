//! Graph convolution layers.
//!
//! Each layer derives its own adjacency view per forward pass, so two
//! layers in one pipeline can run under different dropout or normalization
//! settings over the same graph.
//!
//! References:
//! - GCN: Kipf & Welling, "Semi-Supervised Classification with Graph
//!   Convolutional Networks" (ICLR 2017).
//! - GCNII: Chen et al., "Simple and Deep Graph Convolutional Networks"
//!   (ICML 2020).
//! - NGCF: Wang et al., "Neural Graph Collaborative Filtering" (SIGIR 2019).
//! - APPNP: Klicpera et al., "Predict then Propagate" (ICLR 2019).

use crate::error::Result;
use crate::graph::{AdjacencyView, DropoutMode, Normalization};
use crate::nn::layered::{check_rate, BuildContext, ForwardContext, Layer, LayerId, LayerSpec, Shape};
use crate::nn::layers::Activation;
use crate::nn::vars::{Init, VarId};
use candle_core::{DType, Tensor};

/// Graph convolution: neighbor aggregation over the symmetric-normalized
/// adjacency, then dense transform, bias, activation, and dropout.
///
/// The spectral-preserving variant adds the bias before activation,
/// subtracts it after, and doubles the output, keeping the aggregation
/// operator's spectrum intact under dropout.
#[derive(Debug, Clone)]
pub struct GcnConv {
    pub outputs: usize,
    pub activation: Activation,
    pub bias: bool,
    pub dropout: f32,
    pub graph_dropout: f32,
    pub regularize: f32,
    pub spectral_preserving: bool,
}

impl GcnConv {
    pub fn new(outputs: usize) -> Self {
        Self {
            outputs,
            activation: Activation::Relu,
            bias: true,
            dropout: 0.0,
            graph_dropout: 0.0,
            regularize: 0.0,
            spectral_preserving: false,
        }
    }

    pub fn with_activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }

    pub fn without_bias(mut self) -> Self {
        self.bias = false;
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

    pub fn with_regularize(mut self, weight: f32) -> Self {
        self.regularize = weight;
        self
    }

    pub fn spectral_preserving(mut self) -> Self {
        self.spectral_preserving = true;
        self
    }
}

struct GcnConvLayer {
    weight: VarId,
    bias: Option<VarId>,
    activation: Activation,
    dropout: f32,
    graph_dropout: f32,
    spectral_preserving: bool,
    shape: Shape,
}

impl LayerSpec for GcnConv {
    fn build(self: Box<Self>, ctx: &mut BuildContext<'_>) -> Result<Box<dyn Layer>> {
        check_rate(self.dropout)?;
        check_rate(self.graph_dropout)?;
        let (rows, cols) = ctx.top_shape();
        let weight = ctx.create_var((cols, self.outputs), Init::Glorot, self.regularize, None)?;
        let bias = if self.bias {
            Some(ctx.create_var((1, self.outputs), Init::Zero, 0.0, None)?)
        } else {
            None
        };
        Ok(Box::new(GcnConvLayer {
            weight,
            bias,
            activation: self.activation,
            dropout: self.dropout,
            graph_dropout: self.graph_dropout,
            spectral_preserving: self.spectral_preserving,
            shape: (rows, self.outputs),
        }))
    }
}

impl Layer for GcnConvLayer {
    fn output_shape(&self) -> Shape {
        self.shape
    }

    fn forward(&self, ctx: &mut ForwardContext<'_>, features: &Tensor) -> Result<Tensor> {
        let view = AdjacencyView::default().with_dropout(self.graph_dropout);
        let adjacency = ctx.adjacency(&view)?;
        let aggregated = adjacency.matmul(features)?;
        let mut h = aggregated.matmul(ctx.var(self.weight))?;
        if let Some(bias) = self.bias {
            h = h.broadcast_add(ctx.var(bias))?;
        }
        let mut out = self.activation.apply(&h)?;
        if self.spectral_preserving {
            if let Some(bias) = self.bias {
                out = out.broadcast_sub(ctx.var(bias))?;
            }
            out = ctx.dropout(&out, self.dropout)?;
            out = (out * 2.0)?;
        } else {
            out = ctx.dropout(&out, self.dropout)?;
        }
        Ok(out)
    }
}

/// Residual convolution of GCNII.
///
/// Blends neighbor-aggregated features with the fixed initial projection
/// `h0` by `alpha`, and the learned transform with identity by the
/// depth-decaying `beta = ln(1 + lambda / (iteration + 1))`.
#[derive(Debug, Clone)]
pub struct GcniiConv {
    pub h0: LayerId,
    pub alpha: f64,
    pub lambda: f64,
    pub iteration: usize,
    pub activation: Activation,
    pub dropout: f32,
    pub graph_dropout: f32,
    pub regularize: f32,
    pub spectral_preserving: bool,
}

impl GcniiConv {
    pub fn new(h0: LayerId, alpha: f64, lambda: f64, iteration: usize) -> Self {
        Self {
            h0,
            alpha,
            lambda,
            iteration,
            activation: Activation::Linear,
            dropout: 0.0,
            graph_dropout: 0.0,
            regularize: 0.0,
            spectral_preserving: false,
        }
    }

    pub fn with_activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
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

    pub fn with_regularize(mut self, weight: f32) -> Self {
        self.regularize = weight;
        self
    }

    pub fn spectral_preserving(mut self) -> Self {
        self.spectral_preserving = true;
        self
    }
}

struct GcniiConvLayer {
    weight: VarId,
    bias: Option<VarId>,
    h0: LayerId,
    alpha: f64,
    beta: f64,
    activation: Activation,
    dropout: f32,
    graph_dropout: f32,
    shape: Shape,
}

impl LayerSpec for GcniiConv {
    fn build(self: Box<Self>, ctx: &mut BuildContext<'_>) -> Result<Box<dyn Layer>> {
        check_rate(self.dropout)?;
        check_rate(self.graph_dropout)?;
        // Validates the residual reference at model-definition time.
        ctx.shape(self.h0)?;
        let (rows, cols) = ctx.top_shape();
        // Zero-initialized so the transform starts as pure identity mixing.
        let weight = ctx.create_var((cols, cols), Init::Zero, self.regularize, None)?;
        let bias = if self.spectral_preserving {
            Some(ctx.create_var((1, cols), Init::Zero, 0.0, None)?)
        } else {
            None
        };
        Ok(Box::new(GcniiConvLayer {
            weight,
            bias,
            h0: self.h0,
            alpha: self.alpha,
            beta: (self.lambda / (self.iteration + 1) as f64).ln_1p(),
            activation: self.activation,
            dropout: self.dropout,
            graph_dropout: self.graph_dropout,
            shape: (rows, cols),
        }))
    }
}

impl Layer for GcniiConvLayer {
    fn output_shape(&self) -> Shape {
        self.shape
    }

    fn forward(&self, ctx: &mut ForwardContext<'_>, features: &Tensor) -> Result<Tensor> {
        let view = AdjacencyView::default().with_dropout(self.graph_dropout);
        let adjacency = ctx.adjacency(&view)?;
        let aggregated = adjacency.matmul(features)?;

        let h0 = ctx.value(self.h0)?;
        let tradeoff = ((aggregated * (1.0 - self.alpha))? + (h0 * self.alpha)?)?;

        let cols = self.shape.1;
        let eye = Tensor::eye(cols, DType::F32, ctx.device())?;
        let mix = ((eye * (1.0 - self.beta))? + (ctx.var(self.weight) * self.beta)?)?;
        let mut h = tradeoff.matmul(&mix)?;

        match self.bias {
            Some(bias) => {
                h = h.broadcast_add(ctx.var(bias))?;
                let out = self.activation.apply(&h)?.broadcast_sub(ctx.var(bias))?;
                Ok((ctx.dropout(&out, self.dropout)? * 2.0)?)
            }
            None => {
                let out = self.activation.apply(&h)?;
                ctx.dropout(&out, self.dropout)
            }
        }
    }
}

/// NGCF bipartite convolution: linear aggregation plus an
/// elementwise-product interaction term, two independently weighted
/// transforms, L2 row normalization.
#[derive(Debug, Clone)]
pub struct NgcfConv {
    pub outputs: usize,
    pub activation: Activation,
    pub bias: bool,
    pub dropout: f32,
    pub node_dropout: f32,
    pub regularize: f32,
}

impl NgcfConv {
    pub fn new(outputs: usize) -> Self {
        Self {
            outputs,
            activation: Activation::LeakyRelu(0.2),
            bias: true,
            dropout: 0.0,
            node_dropout: 0.0,
            regularize: 0.0,
        }
    }

    pub fn with_activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }

    pub fn without_bias(mut self) -> Self {
        self.bias = false;
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

    pub fn with_regularize(mut self, weight: f32) -> Self {
        self.regularize = weight;
        self
    }
}

struct NgcfConvLayer {
    w1: VarId,
    w2: VarId,
    b1: Option<VarId>,
    b2: Option<VarId>,
    activation: Activation,
    dropout: f32,
    node_dropout: f32,
    shape: Shape,
}

impl LayerSpec for NgcfConv {
    fn build(self: Box<Self>, ctx: &mut BuildContext<'_>) -> Result<Box<dyn Layer>> {
        check_rate(self.dropout)?;
        check_rate(self.node_dropout)?;
        let (rows, cols) = ctx.top_shape();
        // Fan-in scaling by node count keeps the summed interaction and
        // aggregation terms from blowing up on large graphs.
        let scale = Some(1.0 / (rows as f64).sqrt());
        let w1 = ctx.create_var((cols, self.outputs), Init::Glorot, self.regularize, scale)?;
        let w2 = ctx.create_var((cols, self.outputs), Init::Glorot, self.regularize, scale)?;
        let (b1, b2) = if self.bias {
            (
                Some(ctx.create_var((1, self.outputs), Init::Glorot, 0.0, scale)?),
                Some(ctx.create_var((1, self.outputs), Init::Glorot, 0.0, scale)?),
            )
        } else {
            (None, None)
        };
        Ok(Box::new(NgcfConvLayer {
            w1,
            w2,
            b1,
            b2,
            activation: self.activation,
            dropout: self.dropout,
            node_dropout: self.node_dropout,
            shape: (rows, self.outputs),
        }))
    }
}

impl Layer for NgcfConvLayer {
    fn output_shape(&self) -> Shape {
        self.shape
    }

    fn forward(&self, ctx: &mut ForwardContext<'_>, features: &Tensor) -> Result<Tensor> {
        let view = AdjacencyView::default()
            .without_self_loops()
            .with_normalization(Normalization::Bipartite)
            .with_dropout(self.node_dropout)
            .with_dropout_mode(DropoutMode::Node);
        let adjacency = ctx.adjacency(&view)?;
        let aggregated = adjacency.matmul(features)?;

        let mut interaction = (features * &aggregated)?.matmul(ctx.var(self.w1))?;
        if let Some(b1) = self.b1 {
            interaction = interaction.broadcast_add(ctx.var(b1))?;
        }
        let mut linear = aggregated.matmul(ctx.var(self.w2))?;
        if let Some(b2) = self.b2 {
            linear = linear.broadcast_add(ctx.var(b2))?;
        }
        let out = (self.activation.apply(&interaction)? + self.activation.apply(&linear)?)?;
        let out = ctx.dropout(&out, self.dropout)?;

        // L2-normalize each row.
        let norm = out.sqr()?.sum_keepdim(1)?.sqrt()?;
        Ok(out.broadcast_div(&(norm + 1e-12)?)?)
    }
}

/// APPNP propagation step: `(1 - alpha) * Â x + alpha * h0`, where `h0` is
/// the prediction of the preceding feature transform. No parameters.
#[derive(Debug, Clone)]
pub struct PprConv {
    pub h0: LayerId,
    pub alpha: f64,
    pub graph_dropout: f32,
}

impl PprConv {
    pub fn new(h0: LayerId, alpha: f64) -> Self {
        Self {
            h0,
            alpha,
            graph_dropout: 0.0,
        }
    }

    pub fn with_graph_dropout(mut self, rate: f32) -> Self {
        self.graph_dropout = rate;
        self
    }
}

struct PprConvLayer {
    h0: LayerId,
    alpha: f64,
    graph_dropout: f32,
    shape: Shape,
}

impl LayerSpec for PprConv {
    fn build(self: Box<Self>, ctx: &mut BuildContext<'_>) -> Result<Box<dyn Layer>> {
        check_rate(self.graph_dropout)?;
        ctx.shape(self.h0)?;
        Ok(Box::new(PprConvLayer {
            h0: self.h0,
            alpha: self.alpha,
            graph_dropout: self.graph_dropout,
            shape: ctx.top_shape(),
        }))
    }
}

impl Layer for PprConvLayer {
    fn output_shape(&self) -> Shape {
        self.shape
    }

    fn forward(&self, ctx: &mut ForwardContext<'_>, features: &Tensor) -> Result<Tensor> {
        let view = AdjacencyView::default().with_dropout(self.graph_dropout);
        let adjacency = ctx.adjacency(&view)?;
        let propagated = adjacency.matmul(features)?;
        let h0 = ctx.value(self.h0)?;
        Ok(((propagated * (1.0 - self.alpha))? + (h0 * self.alpha)?)?)
    }
}

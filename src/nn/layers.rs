//! Graph-agnostic layers: dense transform, dropout stage, fan-in
//! concatenation.

use crate::error::Result;
use crate::nn::layered::{check_rate, BuildContext, ForwardContext, Layer, LayerId, LayerSpec, Shape};
use crate::nn::vars::{Init, VarId};
use candle_core::Tensor;
use serde::Deserialize;

/// Elementwise nonlinearity applied after a transform.
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    Linear,
    #[default]
    Relu,
    /// Leaky ReLU with the given negative slope.
    LeakyRelu(f64),
    Tanh,
}

impl Activation {
    pub fn apply(&self, x: &Tensor) -> Result<Tensor> {
        Ok(match self {
            Activation::Linear => x.clone(),
            Activation::Relu => x.relu()?,
            Activation::LeakyRelu(slope) => candle_nn::ops::leaky_relu(x, *slope)?,
            Activation::Tanh => x.tanh()?,
        })
    }
}

/// Fully connected transform: input dropout, `x W (+ b)`, activation.
#[derive(Debug, Clone)]
pub struct Dense {
    pub outputs: usize,
    pub activation: Activation,
    pub bias: bool,
    pub dropout: f32,
    pub regularize: f32,
}

impl Dense {
    pub fn new(outputs: usize) -> Self {
        Self {
            outputs,
            activation: Activation::default(),
            bias: true,
            dropout: 0.0,
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

    pub fn with_regularize(mut self, weight: f32) -> Self {
        self.regularize = weight;
        self
    }
}

struct DenseLayer {
    weight: VarId,
    bias: Option<VarId>,
    activation: Activation,
    dropout: f32,
    shape: Shape,
}

impl LayerSpec for Dense {
    fn build(self: Box<Self>, ctx: &mut BuildContext<'_>) -> Result<Box<dyn Layer>> {
        check_rate(self.dropout)?;
        let (rows, cols) = ctx.top_shape();
        let weight = ctx.create_var((cols, self.outputs), Init::Glorot, self.regularize, None)?;
        let bias = if self.bias {
            Some(ctx.create_var((1, self.outputs), Init::Zero, self.regularize, None)?)
        } else {
            None
        };
        Ok(Box::new(DenseLayer {
            weight,
            bias,
            activation: self.activation,
            dropout: self.dropout,
            shape: (rows, self.outputs),
        }))
    }
}

impl Layer for DenseLayer {
    fn output_shape(&self) -> Shape {
        self.shape
    }

    fn forward(&self, ctx: &mut ForwardContext<'_>, features: &Tensor) -> Result<Tensor> {
        let x = ctx.dropout(features, self.dropout)?;
        let mut h = x.matmul(ctx.var(self.weight))?;
        if let Some(bias) = self.bias {
            h = h.broadcast_add(ctx.var(bias))?;
        }
        self.activation.apply(&h)
    }
}

/// Pure dropout stage. Identity outside training.
#[derive(Debug, Clone, Copy)]
pub struct Dropout {
    pub rate: f32,
}

impl Dropout {
    pub fn new(rate: f32) -> Self {
        Self { rate }
    }
}

struct DropoutLayer {
    rate: f32,
    shape: Shape,
}

impl LayerSpec for Dropout {
    fn build(self: Box<Self>, ctx: &mut BuildContext<'_>) -> Result<Box<dyn Layer>> {
        check_rate(self.rate)?;
        Ok(Box::new(DropoutLayer {
            rate: self.rate,
            shape: ctx.top_shape(),
        }))
    }
}

impl Layer for DropoutLayer {
    fn output_shape(&self) -> Shape {
        self.shape
    }

    fn forward(&self, ctx: &mut ForwardContext<'_>, features: &Tensor) -> Result<Tensor> {
        ctx.dropout(features, self.rate)
    }
}

/// Concatenates the recorded outputs of earlier layers along the feature
/// axis. The incoming top features are ignored; fan-in is by explicit id.
#[derive(Debug, Clone)]
pub struct Concatenate {
    pub ids: Vec<LayerId>,
}

impl Concatenate {
    pub fn new(ids: Vec<LayerId>) -> Self {
        Self { ids }
    }
}

struct ConcatLayer {
    ids: Vec<LayerId>,
    shape: Shape,
}

impl LayerSpec for Concatenate {
    fn build(self: Box<Self>, ctx: &mut BuildContext<'_>) -> Result<Box<dyn Layer>> {
        if self.ids.is_empty() {
            return Err(crate::error::Error::InvalidConfig(
                "concatenate requires at least one layer id".into(),
            ));
        }
        let mut rows = 0;
        let mut width = 0;
        for &id in &self.ids {
            let (r, c) = ctx.shape(id)?;
            rows = r;
            width += c;
        }
        Ok(Box::new(ConcatLayer {
            ids: self.ids,
            shape: (rows, width),
        }))
    }
}

impl Layer for ConcatLayer {
    fn output_shape(&self) -> Shape {
        self.shape
    }

    fn forward(&self, ctx: &mut ForwardContext<'_>, _features: &Tensor) -> Result<Tensor> {
        let mut parts = Vec::with_capacity(self.ids.len());
        for &id in &self.ids {
            parts.push(ctx.value(id)?.clone());
        }
        Ok(Tensor::cat(&parts, 1)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::layered::Layered;
    use candle_core::Device;

    fn features(rows: usize, cols: usize) -> Tensor {
        Tensor::randn(0f32, 1f32, (rows, cols), &Device::Cpu).unwrap()
    }

    #[test]
    fn test_dense_shape_and_vars() {
        let mut net = Layered::new((6, 4), Device::Cpu);
        let id = net.add(Dense::new(3)).unwrap();
        assert_eq!(net.top_shape(), (6, 3));
        // Weight plus bias.
        assert_eq!(net.layer_vars(id).unwrap().len(), 2);

        let out = net.forward(&features(6, 4)).unwrap();
        assert_eq!(out.dims(), &[6, 3]);
    }

    #[test]
    fn test_dense_without_bias_registers_one_var() {
        let mut net = Layered::new((6, 4), Device::Cpu);
        let id = net.add(Dense::new(3).without_bias()).unwrap();
        assert_eq!(net.layer_vars(id).unwrap().len(), 1);
    }

    #[test]
    fn test_dense_relu_is_nonnegative() {
        let mut net = Layered::new((8, 4), Device::Cpu);
        net.add(Dense::new(5)).unwrap();
        let out = net.forward(&features(8, 4)).unwrap();
        for row in out.to_vec2::<f32>().unwrap() {
            for v in row {
                assert!(v >= 0.0);
            }
        }
    }

    #[test]
    fn test_dense_regularize_flags_vars() {
        let mut net = Layered::new((4, 4), Device::Cpu);
        net.add(Dense::new(4).with_regularize(5e-4)).unwrap();
        assert!(net.regularization_loss().unwrap().is_some());
    }

    #[test]
    fn test_dense_rejects_bad_dropout_rate() {
        let mut net = Layered::new((4, 4), Device::Cpu);
        assert!(net.add(Dense::new(4).with_dropout(1.0)).is_err());
    }

    #[test]
    fn test_dropout_stage_identity_in_eval() {
        let mut net = Layered::new((5, 3), Device::Cpu);
        net.add(Dropout::new(0.5)).unwrap();
        assert_eq!(net.top_shape(), (5, 3));

        let x = features(5, 3);
        let y = net.forward(&x).unwrap();
        let diff = (&x - &y).unwrap().abs().unwrap().sum_all().unwrap();
        assert_eq!(diff.to_scalar::<f32>().unwrap(), 0.0);
    }

    #[test]
    fn test_concatenate_width_is_sum() {
        let mut net = Layered::new((6, 4), Device::Cpu);
        let a = net.add(Dense::new(3)).unwrap();
        let b = net.add(Dense::new(2)).unwrap();
        net.add(Concatenate::new(vec![a, b])).unwrap();
        assert_eq!(net.top_shape(), (6, 5));

        let out = net.forward(&features(6, 4)).unwrap();
        assert_eq!(out.dims(), &[6, 5]);
    }

    #[test]
    fn test_activation_variants() {
        let x = Tensor::new(&[[-1.0f32, 2.0]], &Device::Cpu).unwrap();
        let linear = Activation::Linear.apply(&x).unwrap();
        assert_eq!(linear.to_vec2::<f32>().unwrap(), vec![vec![-1.0, 2.0]]);

        let relu = Activation::Relu.apply(&x).unwrap();
        assert_eq!(relu.to_vec2::<f32>().unwrap(), vec![vec![0.0, 2.0]]);

        let leaky = Activation::LeakyRelu(0.2).apply(&x).unwrap();
        let vals = leaky.to_vec2::<f32>().unwrap();
        assert!((vals[0][0] + 0.2).abs() < 1e-6);
        assert!((vals[0][1] - 2.0).abs() < 1e-6);
    }
}

//! Trainable variable registry.
//!
//! Every parameter in a pipeline is created through a [`VariableGenerator`],
//! which owns the backing `candle` [`Var`]s for the lifetime of the
//! architecture. The registry is append-only: variables accumulate and are
//! never removed, so a [`VarId`] stays valid forever.
//!
//! Attribution is scoped rather than inferred: the container opens a scope
//! before running a layer build and closes it afterwards, so the variables a
//! build registered are exactly the index range of that scope — no set
//! differencing, no ambiguity.

use crate::error::Result;
use crate::nn::Shape;
use candle_core::{DType, Device, Tensor, Var};
use serde::Deserialize;
use std::ops::Range;

/// Variable initialization policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Init {
    /// All zeros. Used for biases and for GCNII's identity-blended weights.
    Zero,
    /// Glorot/Xavier uniform: `U(-sqrt(6/(fan_in+fan_out)), +...)`.
    #[default]
    Glorot,
}

/// Handle to a variable inside a [`VariableGenerator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VarId(pub(crate) usize);

impl VarId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// A registered trainable parameter.
#[derive(Debug)]
pub struct Variable {
    pub(crate) var: Var,
    /// Whether the optimizer updates this variable.
    pub trainable: bool,
    /// Regularization weight; 0 excludes the variable from the penalty term.
    pub regularize: f32,
}

impl Variable {
    /// Tensor view of the underlying value.
    pub fn tensor(&self) -> &Tensor {
        self.var.as_tensor()
    }

    pub fn shape(&self) -> Shape {
        let dims = self.var.dims();
        (dims[0], dims[1])
    }
}

/// Creation and registry of trainable parameters.
#[derive(Debug)]
pub struct VariableGenerator {
    device: Device,
    dtype: DType,
    vars: Vec<Variable>,
}

impl VariableGenerator {
    pub fn new(device: Device) -> Self {
        Self {
            device,
            dtype: DType::F32,
            vars: Vec::new(),
        }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Create and register a variable.
    ///
    /// `regularize` marks the variable as contributing to the penalty term
    /// with the given weight. `normalization` is an optional scalar
    /// multiplier applied at creation, e.g. fan-in scaling `1/sqrt(n)`.
    pub fn create_var(
        &mut self,
        shape: Shape,
        init: Init,
        regularize: f32,
        normalization: Option<f64>,
    ) -> Result<VarId> {
        let (fan_in, fan_out) = shape;
        let tensor = match init {
            Init::Zero => Tensor::zeros(shape, self.dtype, &self.device)?,
            Init::Glorot => {
                let limit = (6.0 / (fan_in + fan_out) as f64).sqrt();
                Tensor::rand(-limit as f32, limit as f32, shape, &self.device)?
            }
        };
        let tensor = match normalization {
            Some(s) => (tensor * s)?,
            None => tensor,
        };
        let id = VarId(self.vars.len());
        self.vars.push(Variable {
            var: Var::from_tensor(&tensor)?,
            trainable: true,
            regularize,
        });
        Ok(id)
    }

    pub fn get(&self, id: VarId) -> &Variable {
        &self.vars[id.0]
    }

    /// Tensor view of a registered variable.
    pub fn tensor(&self, id: VarId) -> &Tensor {
        self.vars[id.0].tensor()
    }

    /// All variables created so far, in creation order.
    pub fn vars(&self) -> &[Variable] {
        &self.vars
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Slice of variables by attribution range.
    pub fn slice(&self, range: Range<usize>) -> &[Variable] {
        &self.vars[range]
    }

    /// Mark the start of a build scope.
    pub(crate) fn open_scope(&self) -> usize {
        self.vars.len()
    }

    /// Close a build scope, yielding the range of variables registered
    /// while it was open.
    pub(crate) fn close_scope(&self, start: usize) -> Range<usize> {
        start..self.vars.len()
    }

    /// Clones of all trainable `Var`s, for handing to an optimizer.
    /// Clones share storage with the registered variables, so optimizer
    /// steps are visible to subsequent forward passes.
    pub fn trainable_vars(&self) -> Vec<Var> {
        self.vars
            .iter()
            .filter(|v| v.trainable)
            .map(|v| v.var.clone())
            .collect()
    }

    /// Weighted L2 penalty over all variables flagged for regularization,
    /// or `None` if no variable is flagged.
    pub fn regularization_loss(&self) -> Result<Option<Tensor>> {
        let mut total: Option<Tensor> = None;
        for v in self.vars.iter().filter(|v| v.regularize > 0.0) {
            let term = (v.tensor().sqr()?.sum_all()? * v.regularize as f64)?;
            total = Some(match total {
                Some(acc) => (acc + term)?,
                None => term,
            });
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_init() {
        let mut gen = VariableGenerator::new(Device::Cpu);
        let id = gen.create_var((3, 4), Init::Zero, 0.0, None).unwrap();
        let vals = gen.tensor(id).to_vec2::<f32>().unwrap();
        for row in &vals {
            for &v in row {
                assert_eq!(v, 0.0);
            }
        }
    }

    #[test]
    fn test_glorot_init_bounded() {
        let mut gen = VariableGenerator::new(Device::Cpu);
        let id = gen.create_var((16, 16), Init::Glorot, 0.0, None).unwrap();
        let limit = (6.0f32 / 32.0).sqrt();
        let vals = gen.tensor(id).to_vec2::<f32>().unwrap();
        for row in &vals {
            for &v in row {
                assert!(v.abs() <= limit);
            }
        }
    }

    #[test]
    fn test_normalization_scales_init() {
        let mut gen = VariableGenerator::new(Device::Cpu);
        let id = gen
            .create_var((16, 16), Init::Glorot, 0.0, Some(0.01))
            .unwrap();
        let limit = 0.01 * (6.0f32 / 32.0).sqrt();
        let vals = gen.tensor(id).to_vec2::<f32>().unwrap();
        for row in &vals {
            for &v in row {
                assert!(v.abs() <= limit + 1e-7);
            }
        }
    }

    #[test]
    fn test_scope_attribution() {
        let mut gen = VariableGenerator::new(Device::Cpu);
        gen.create_var((2, 2), Init::Zero, 0.0, None).unwrap();

        let scope = gen.open_scope();
        gen.create_var((2, 3), Init::Zero, 0.0, None).unwrap();
        gen.create_var((1, 3), Init::Zero, 0.0, None).unwrap();
        let owned = gen.close_scope(scope);

        assert_eq!(owned, 1..3);
        assert_eq!(gen.slice(owned).len(), 2);
        assert_eq!(gen.len(), 3);
    }

    #[test]
    fn test_regularization_loss_sums_flagged_vars() {
        let mut gen = VariableGenerator::new(Device::Cpu);
        // Unflagged: must not contribute.
        gen.create_var((4, 4), Init::Glorot, 0.0, None).unwrap();
        assert!(gen.regularization_loss().unwrap().is_none());

        // Zero-initialized but flagged: contributes exactly 0.
        gen.create_var((4, 4), Init::Zero, 1.0, None).unwrap();
        let loss = gen.regularization_loss().unwrap().unwrap();
        assert_eq!(loss.to_scalar::<f32>().unwrap(), 0.0);

        gen.create_var((4, 4), Init::Glorot, 0.5, None).unwrap();
        let loss = gen.regularization_loss().unwrap().unwrap();
        assert!(loss.to_scalar::<f32>().unwrap() > 0.0);
    }

    #[test]
    fn test_trainable_vars_share_storage() {
        let mut gen = VariableGenerator::new(Device::Cpu);
        let id = gen.create_var((2, 2), Init::Zero, 0.0, None).unwrap();
        let handles = gen.trainable_vars();
        assert_eq!(handles.len(), 1);

        let update = Tensor::ones((2, 2), DType::F32, &Device::Cpu).unwrap();
        handles[0].set(&update).unwrap();

        let seen = gen.tensor(id).to_vec2::<f32>().unwrap();
        assert_eq!(seen[0][0], 1.0);
    }
}

//! Layered pipelines, trainable variables, and graph-agnostic layers.

pub mod layered;
pub mod layers;
pub mod vars;

pub use layered::{BuildContext, ForwardContext, Layer, LayerId, LayerSpec, Layered, Shape};
pub use layers::{Activation, Concatenate, Dense, Dropout};
pub use vars::{Init, VarId, Variable, VariableGenerator};

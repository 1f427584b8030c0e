//! Declarative architecture recipes built from the layer primitives.
//!
//! Each function couples a graph with node features and declares a layer
//! sequence; the declaration is the model definition, there is no separate
//! compile step.

mod appnp;
mod gcn;
mod gcnii;
mod ngcf;

pub use appnp::{appnp, AppnpConfig};
pub use gcn::{gcn, GcnConfig};
pub use gcnii::{gcnii, GcniiConfig};
pub use ngcf::{ngcf, NgcfConfig};

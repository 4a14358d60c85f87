//! A minimal layer library on top of the autograd engine.
//!
//! Nothing in here has special access to the engine: every layer is a
//! composition of the public operators, except the fused SwiGLU which
//! supplies its own backward function through [`Value::from_op`].
//!
//! # Modules
//!
//! - [`activation`]: Elementwise and gated activation functions.
//! - [`dense`]: Fully connected layer with Xavier initialisation.
//! - [`layer`]: The [`Layer`] and [`BuildLayer`] traits, [`Sequential`].
//! - [`loss`]: Mean square error, cross entropy, softmax.
//! - [`optim`]: Stochastic gradient descent.
//! - [`dataset`]: In-memory datasets with shuffling and batching.
//! - [`metrics`]: Evaluation helpers.
//!
//! [`Value::from_op`]: crate::value::Value::from_op

pub mod activation;
pub mod dataset;
pub mod dense;
pub mod layer;
pub mod loss;
pub mod metrics;
pub mod optim;

pub use activation::{Activation, ActivationKind, Glu, GluLayer, SwiGlu, SwiGluLayer};
pub use dataset::Dataset;
pub use dense::{Dense, DenseLayer};
pub use layer::{BuildLayer, Layer, Sequential};
pub use loss::{cross_entropy, mean_square_error, softmax};
pub use optim::{Optimiser, Sgd};

//! gradlane: a small automatic differentiation engine over batched tensors.
//!
//! Values record the operations applied to them; calling
//! [`Value::backward`](value::Value::backward) on a result computes the
//! gradient of that result with respect to every upstream value that asked
//! for one.
//!
//! # Features
//!
//! - Reverse mode by path replay: every route from the output to a leaf is
//!   replayed and the contributions are summed.
//! - Batched values: a leading axis the operators understand, so one graph
//!   serves a whole mini-batch.
//! - Einsum with automatic gradients for up to four axes per sample.
//! - Host backend on `rayon`, accelerator backend on `wgpu` (feature `wgpu`).
//! - A minimal layer library: activations, dense layers, losses, SGD.
//!
//! # Modules
//!
//! - [`value`]: The differentiable value and graph bookkeeping.
//! - [`backprop`]: The backward pass.
//! - [`unary`], [`binary`], [`contraction`], [`arithmetic`]: The operators.
//! - [`shape`]: Batch-aware shape reconciliation.
//! - [`array`], [`storage`], [`backend`], [`ops`]: Numeric payloads and backends.
//! - [`einsum`]: Subscript parsing and contraction plans.
//! - [`nn`]: Layers, losses, optimisers and datasets.
//!
//! # Example
//!
//! ```rust
//! use gradlane::value::Value;
//!
//! let slope = Value::new(vec![0.02]);
//! let intercept = Value::new(vec![0.01]);
//! let x = Value::constant(vec![1.0]);
//! let y = Value::constant(vec![3.0]);
//!
//! let prediction = (&(&x * &slope).unwrap() + &intercept).unwrap();
//! let loss = (&prediction - &y).unwrap().pow(2).unwrap();
//! loss.backward().unwrap();
//!
//! let grad = slope.grad().unwrap().to_array().unwrap();
//! assert!((grad.data()[0] + 5.94).abs() < 1e-12);
//! ```

pub mod approx;
pub mod arithmetic;
pub mod array;
pub mod backend;
pub mod backprop;
pub mod binary;
pub mod contraction;
pub mod einsum;
pub mod error;
pub mod nn;
pub mod ops;
pub mod shape;
pub mod storage;
pub mod unary;
pub mod value;

pub use array::Array;
pub use backend::Backend;
pub use contraction::einsum;
pub use error::{Error, Result};
pub use value::{to_value, BackwardFn, Value};

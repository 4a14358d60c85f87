//! Activation functions.
//!
//! The plain activations forward to the elementwise methods on
//! [`Value`]. The gated ones split the last axis in two halves, `left` and
//! `right`, and use `right` as the gate:
//!
//! - GLU: `left * sigmoid(right)`
//! - SwiGLU: `left * swish(right)`
//!
//! GLU is a composition of existing operators. SwiGLU is fused into a single
//! operator with its own backward function:
//!
//! ```text
//! d_left  = grad * swish(right)
//! d_right = grad * left * swish'(right)
//! swish'(r) = sigmoid(r) + r * sigmoid(r) * (1 - sigmoid(r))
//! ```

use crate::binary::grad_zip;
use crate::error::{Error, Result};
use crate::nn::dense::{Dense, DenseLayer};
use crate::nn::layer::{BuildLayer, Layer};
use crate::ops::dispatch;
use crate::ops::kernel::{BinaryKernel, UnaryKernel};
use crate::storage::Storage;
use crate::value::{BackwardFn, Value};
use std::rc::Rc;
use tracing::trace;

pub fn relu(x: &Value) -> Result<Value> {
    x.relu()
}

pub fn sigmoid(x: &Value) -> Result<Value> {
    x.sigmoid()
}

pub fn tanh(x: &Value) -> Result<Value> {
    x.tanh()
}

/// `x * sigmoid(x)`, also known as SiLU.
pub fn swish(x: &Value) -> Result<Value> {
    x.swish()
}

/// Tanh approximation of GeLU.
pub fn gelu(x: &Value) -> Result<Value> {
    x.gelu()
}

/// Gated linear unit over the last axis.
pub fn glu(x: &Value) -> Result<Value> {
    let halves = x.split(2)?;
    let [left, right] = halves.as_slice() else {
        return Err(Error::InvariantViolation(format!(
            "split into two produced {} parts",
            halves.len()
        )));
    };
    left * right.sigmoid()?
}

fn halve(x: &Value, storage: &Storage) -> Result<usize> {
    let shape = storage.shape();
    match shape.last() {
        Some(&w) if w > 0 && w % 2 == 0 && shape.len() > usize::from(x.is_batched()) => Ok(w),
        _ => Err(Error::InvalidArray(format!(
            "SwiGLU needs an even, non-empty last axis, got shape {shape:?}"
        ))),
    }
}

/// Swish-gated linear unit over the last axis.
///
/// # Errors
/// [`Error::InvalidArray`] unless the last per-sample axis has even length.
pub fn swiglu(x: &Value) -> Result<Value> {
    let storage = x.storage();
    let width = halve(x, &storage)?;
    let half = width / 2;

    let left = dispatch::slice_last_axis(&storage, 0, half)?;
    let right = dispatch::slice_last_axis(&storage, half, width)?;
    let gate = dispatch::map(&right, UnaryKernel::Swish)?;
    let out = dispatch::zip(&left, &gate, left.shape(), BinaryKernel::Mul)?;
    trace!(shape = ?storage.shape(), "swiglu");

    let back: BackwardFn = Rc::new(move |grad: &Value| -> Result<Value> {
        let d_left = grad_zip(grad, &gate, BinaryKernel::Mul)?;
        let slope = dispatch::map(&right, UnaryKernel::SwishGrad)?;
        let gated_slope = dispatch::zip(&left, &slope, left.shape(), BinaryKernel::Mul)?;
        let d_right = grad_zip(grad, &gated_slope, BinaryKernel::Mul)?;
        let (l, r) = (d_left.storage(), d_right.storage());
        Ok(Value::detached(
            dispatch::concat_last_axis(&[&l, &r])?,
            grad.is_batched(),
        ))
    });
    Value::from_op(out, x.is_batched(), vec![x.clone()], vec![back])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActivationKind {
    ReLU,
    Sigmoid,
    Tanh,
    Swish,
    GeLU,
    /// Halves the last axis.
    Glu,
    /// Halves the last axis.
    SwiGlu,
}

/// A parameter-free layer applying one activation function.
#[derive(Debug, Clone, Copy)]
pub struct Activation {
    kind: ActivationKind,
}

impl Activation {
    pub const fn new(kind: ActivationKind) -> Self {
        Self { kind }
    }

    pub const fn kind(&self) -> ActivationKind {
        self.kind
    }
}

impl Layer for Activation {
    fn forward(&self, input: &Value) -> Result<Value> {
        match self.kind {
            ActivationKind::ReLU => relu(input),
            ActivationKind::Sigmoid => sigmoid(input),
            ActivationKind::Tanh => tanh(input),
            ActivationKind::Swish => swish(input),
            ActivationKind::GeLU => gelu(input),
            ActivationKind::Glu => glu(input),
            ActivationKind::SwiGlu => swiglu(input),
        }
    }
}

/// Builder for a dense projection to twice `size` followed by [`glu`].
#[derive(Debug, Clone, Copy)]
pub struct Glu {
    pub size: usize,
    pub seed: u64,
}

impl Glu {
    pub const fn new(size: usize) -> Self {
        Self { size, seed: 0 }
    }

    #[must_use]
    pub const fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

impl BuildLayer for Glu {
    type Layer = GluLayer;

    fn build(self) -> Result<GluLayer> {
        let linear = Dense::new(self.size, 2 * self.size)
            .with_seed(self.seed)
            .build()?;
        Ok(GluLayer { linear })
    }
}

#[derive(Debug, Clone)]
pub struct GluLayer {
    linear: DenseLayer,
}

impl Layer for GluLayer {
    fn forward(&self, input: &Value) -> Result<Value> {
        glu(&self.linear.forward(input)?)
    }

    fn parameters(&self) -> Vec<Value> {
        self.linear.parameters()
    }
}

/// Builder for a dense projection from `from_size` to twice `to_size`
/// followed by [`swiglu`].
#[derive(Debug, Clone, Copy)]
pub struct SwiGlu {
    pub from_size: usize,
    pub to_size: usize,
    pub seed: u64,
}

impl SwiGlu {
    pub const fn new(from_size: usize, to_size: usize) -> Self {
        Self {
            from_size,
            to_size,
            seed: 0,
        }
    }

    #[must_use]
    pub const fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

impl BuildLayer for SwiGlu {
    type Layer = SwiGluLayer;

    fn build(self) -> Result<SwiGluLayer> {
        let linear = Dense::new(self.from_size, 2 * self.to_size)
            .with_seed(self.seed)
            .build()?;
        Ok(SwiGluLayer { linear })
    }
}

#[derive(Debug, Clone)]
pub struct SwiGluLayer {
    linear: DenseLayer,
}

impl Layer for SwiGluLayer {
    fn forward(&self, input: &Value) -> Result<Value> {
        swiglu(&self.linear.forward(input)?)
    }

    fn parameters(&self) -> Vec<Value> {
        self.linear.parameters()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::Array;

    fn data(v: &Value) -> Vec<f64> {
        v.to_array().unwrap().data().to_vec()
    }

    fn swish_ref(r: f64) -> f64 {
        r / (1.0 + (-r).exp())
    }

    #[test]
    fn swiglu_gates_with_the_right_half() {
        let x = Value::new(vec![2.0, -1.0, 0.5, 1.5]);
        let y = swiglu(&x).unwrap();
        assert_eq!(y.shape(), vec![2]);
        let out = data(&y);
        assert!((out[0] - 2.0 * swish_ref(0.5)).abs() < 1e-12);
        assert!((out[1] + swish_ref(1.5)).abs() < 1e-12);
    }

    #[test]
    fn swiglu_rejects_odd_width() {
        let x = Value::new(vec![1.0, 2.0, 3.0]);
        assert!(matches!(swiglu(&x), Err(Error::InvalidArray(_))));
    }

    #[test]
    fn glu_matches_manual_composition() {
        let x = Value::new(Array::new([2, 2], vec![1.0, 0.0, -2.0, 3.0]).unwrap());
        let out = data(&glu(&x).unwrap());
        let sig = |v: f64| 1.0 / (1.0 + (-v).exp());
        assert!((out[0] - sig(0.0)).abs() < 1e-12);
        assert!((out[1] + 2.0 * sig(3.0)).abs() < 1e-12);
    }

    #[test]
    fn swiglu_layer_owns_the_projection() {
        let layer = SwiGlu::new(3, 2).with_seed(7).build().unwrap();
        let params = layer.parameters();
        assert_eq!(params.len(), 1);
        assert_eq!(params[0].shape(), vec![3, 4]);
        let y = layer.forward(&Value::constant(vec![1.0, 2.0, 3.0])).unwrap();
        assert_eq!(y.shape(), vec![2]);
    }
}

//! Operators of one value, optionally with a scalar constant.
//!
//! `uadd`, `usub`, `umul`, `upow` and `umax` pair a value with a plain
//! number; the number is baked into the operator and is never
//! differentiated. The remaining functions are smooth elementwise maps.
//!
//! Every backward function only needs the forward input, captured as a
//! storage, and is built from the same elementwise kernels as the forward
//! pass, so it runs on whichever backend the input lives on.

use crate::binary::{grad_map, grad_zip};
use crate::error::Result;
use crate::ops::dispatch;
use crate::ops::kernel::{BinaryKernel, UnaryKernel};
use crate::storage::Storage;
use crate::value::{BackwardFn, Value};
use std::rc::Rc;
use tracing::trace;

fn elementwise(
    x: &Value,
    kernel: UnaryKernel,
    back: impl FnOnce(Storage) -> BackwardFn,
) -> Result<Value> {
    let input = x.storage();
    let out = dispatch::map(&input, kernel)?;
    trace!(?kernel, shape = ?input.shape(), "unary op");
    Value::from_op(out, x.is_batched(), vec![x.clone()], vec![back(input)])
}

/// Backward of an op whose derivative is `derivative(x)`.
fn chain(derivative: UnaryKernel) -> impl FnOnce(Storage) -> BackwardFn {
    move |input: Storage| -> BackwardFn {
        Rc::new(move |grad: &Value| {
            let local = dispatch::map(&input, derivative)?;
            grad_zip(grad, &local, BinaryKernel::Mul)
        })
    }
}

fn constant_slope(slope: f64) -> impl FnOnce(Storage) -> BackwardFn {
    move |_: Storage| -> BackwardFn {
        if slope == 1.0 {
            Rc::new(|grad: &Value| -> Result<Value> { Ok(grad.clone()) })
        } else {
            Rc::new(move |grad: &Value| grad_map(grad, UnaryKernel::Mul(slope)))
        }
    }
}

/// `x + c`
pub fn uadd(x: &Value, c: f64) -> Result<Value> {
    elementwise(x, UnaryKernel::Add(c), constant_slope(1.0))
}

/// `x - c`
pub fn usub(x: &Value, c: f64) -> Result<Value> {
    elementwise(x, UnaryKernel::Add(-c), constant_slope(1.0))
}

/// `x * c`
pub fn umul(x: &Value, c: f64) -> Result<Value> {
    elementwise(x, UnaryKernel::Mul(c), constant_slope(c))
}

/// `x ^ c`
pub fn upow(x: &Value, c: f64) -> Result<Value> {
    // x^0 is constant; c * x^(c - 1) would be 0 * inf at x = 0
    if c == 0.0 {
        return elementwise(x, UnaryKernel::Pow(c), constant_slope(0.0));
    }
    elementwise(x, UnaryKernel::Pow(c), move |input: Storage| {
        Rc::new(move |grad: &Value| {
            let lowered = dispatch::map(&input, UnaryKernel::Pow(c - 1.0))?;
            let local = dispatch::map(&lowered, UnaryKernel::Mul(c))?;
            grad_zip(grad, &local, BinaryKernel::Mul)
        })
    })
}

/// `max(x, c)`. The gradient flows where `x > c`.
pub fn umax(x: &Value, c: f64) -> Result<Value> {
    elementwise(x, UnaryKernel::Max(c), chain(UnaryKernel::Step(c)))
}

impl Value {
    pub fn exp(&self) -> Result<Value> {
        elementwise(self, UnaryKernel::Exp, chain(UnaryKernel::Exp))
    }

    /// Natural logarithm.
    pub fn log(&self) -> Result<Value> {
        elementwise(self, UnaryKernel::Log, |input: Storage| {
            Rc::new(move |grad: &Value| grad_zip(grad, &input, BinaryKernel::Div))
        })
    }

    pub fn tanh(&self) -> Result<Value> {
        elementwise(self, UnaryKernel::Tanh, chain(UnaryKernel::TanhGrad))
    }

    pub fn sigmoid(&self) -> Result<Value> {
        elementwise(self, UnaryKernel::Sigmoid, chain(UnaryKernel::SigmoidGrad))
    }

    pub fn relu(&self) -> Result<Value> {
        umax(self, 0.0)
    }

    /// `x * sigmoid(x)`
    pub fn swish(&self) -> Result<Value> {
        elementwise(self, UnaryKernel::Swish, chain(UnaryKernel::SwishGrad))
    }

    /// Tanh approximation of GeLU.
    pub fn gelu(&self) -> Result<Value> {
        elementwise(self, UnaryKernel::Gelu, chain(UnaryKernel::GeluGrad))
    }

    pub fn neg(&self) -> Result<Value> {
        umul(self, -1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grad_of(x: &Value) -> Vec<f64> {
        x.grad().unwrap().to_array().unwrap().data().to_vec()
    }

    #[test]
    fn zeroth_power_has_zero_gradient_at_zero() {
        let x = Value::new(vec![0.0, 2.0]);
        let y = upow(&x, 0.0).unwrap();
        assert_eq!(y.to_array().unwrap().data(), &[1.0, 1.0]);
        y.backward().unwrap();
        assert_eq!(grad_of(&x), vec![0.0, 0.0]);
    }

    #[test]
    fn power_rule() {
        let x = Value::new(vec![3.0]);
        upow(&x, 3.0).unwrap().backward().unwrap();
        assert_eq!(grad_of(&x), vec![27.0]);
    }

    #[test]
    fn relu_blocks_negative_inputs() {
        let x = Value::new(vec![-1.0, 0.0, 2.0]);
        let y = x.relu().unwrap();
        assert_eq!(y.to_array().unwrap().data(), &[0.0, 0.0, 2.0]);
        y.backward().unwrap();
        assert_eq!(grad_of(&x), vec![0.0, 0.0, 1.0]);
    }

    #[test]
    fn log_of_exp_has_unit_slope() {
        let x = Value::new(vec![0.5, 1.5]);
        x.exp().unwrap().log().unwrap().backward().unwrap();
        for g in grad_of(&x) {
            assert!((g - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn scalar_ops_keep_batch_flag() {
        let x = Value::builder(vec![1.0, 2.0]).batched(true).build();
        let y = usub(&umul(&x, 2.0).unwrap(), 1.0).unwrap();
        assert!(y.is_batched());
        assert_eq!(y.to_array().unwrap().data(), &[1.0, 3.0]);
    }
}

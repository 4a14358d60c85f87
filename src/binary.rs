//! Elementwise operators between two values.
//!
//! All four operators reconcile their operands with
//! [`shape::reconcile`](crate::shape::reconcile) first, so an unbatched
//! operand may meet a batched one. The gradient returned for that unbatched
//! operand keeps the batch axis: one gradient per sample, added up when a
//! parameter is updated or when it meets an unbatched gradient of the same
//! value (see [`accumulate`]).

use crate::contraction::sum_over_batch;
use crate::error::{Error, Result};
use crate::ops::dispatch;
use crate::ops::kernel::{BinaryKernel, UnaryKernel};
use crate::shape::reconcile;
use crate::storage::Storage;
use crate::value::{BackwardFn, Value};
use std::rc::Rc;
use tracing::trace;

fn elementwise(
    op: &'static str,
    lhs: &Value,
    rhs: &Value,
    kernel: BinaryKernel,
    back: impl FnOnce(Storage, Storage) -> (BackwardFn, BackwardFn),
) -> Result<Value> {
    let (ls, rs) = (lhs.storage(), rhs.storage());
    let reconciled = reconcile(ls.shape(), lhs.is_batched(), rs.shape(), rhs.is_batched())?;
    let out = dispatch::zip(&ls, &rs, &reconciled.shape, kernel)?;
    trace!(op, shape = ?reconciled.shape, batched = reconciled.is_batched, "binary op");

    let (back_lhs, back_rhs) = back(ls, rs);
    Value::from_op(
        out,
        reconciled.is_batched,
        vec![lhs.clone(), rhs.clone()],
        vec![back_lhs, back_rhs],
    )
}

/// `grad (kernel) other`, shaped like `grad`.
pub(crate) fn grad_zip(grad: &Value, other: &Storage, kernel: BinaryKernel) -> Result<Value> {
    let g = grad.storage();
    if other.is_empty() || g.len() % other.len() != 0 {
        return Err(Error::shape_mismatch(g.shape(), other.shape()));
    }
    let out = dispatch::zip(&g, other, g.shape(), kernel)?;
    Ok(Value::detached(out, grad.is_batched()))
}

pub(crate) fn grad_map(grad: &Value, kernel: UnaryKernel) -> Result<Value> {
    Ok(Value::detached(
        dispatch::map(&grad.storage(), kernel)?,
        grad.is_batched(),
    ))
}

fn pass_through() -> BackwardFn {
    Rc::new(|grad: &Value| -> Result<Value> { Ok(grad.clone()) })
}

fn negated() -> BackwardFn {
    Rc::new(|grad: &Value| grad_map(grad, UnaryKernel::Mul(-1.0)))
}

fn times(other: Storage) -> BackwardFn {
    Rc::new(move |grad: &Value| grad_zip(grad, &other, BinaryKernel::Mul))
}

/// Elementwise `lhs + rhs`.
pub fn badd(lhs: &Value, rhs: &Value) -> Result<Value> {
    elementwise("add", lhs, rhs, BinaryKernel::Add, |_, _| {
        (pass_through(), pass_through())
    })
}

/// Elementwise `lhs - rhs`.
pub fn bsub(lhs: &Value, rhs: &Value) -> Result<Value> {
    elementwise("sub", lhs, rhs, BinaryKernel::Sub, |_, _| {
        (pass_through(), negated())
    })
}

/// Elementwise `lhs * rhs`.
pub fn bmul(lhs: &Value, rhs: &Value) -> Result<Value> {
    elementwise("mul", lhs, rhs, BinaryKernel::Mul, |a, b| (times(b), times(a)))
}

/// Elementwise `lhs / rhs`.
pub fn bdiv(lhs: &Value, rhs: &Value) -> Result<Value> {
    elementwise("div", lhs, rhs, BinaryKernel::Div, |a, b| {
        let divisor = b.clone();
        let back_lhs: BackwardFn =
            Rc::new(move |grad: &Value| grad_zip(grad, &divisor, BinaryKernel::Div));
        // d(a/b)/db = -a / b^2
        let back_rhs: BackwardFn = Rc::new(move |grad: &Value| {
            let scaled = grad_zip(grad, &a, BinaryKernel::Mul)?;
            let squared = dispatch::map(&b, UnaryKernel::Pow(2.0))?;
            let quotient = grad_zip(&scaled, &squared, BinaryKernel::Div)?;
            grad_map(&quotient, UnaryKernel::Mul(-1.0))
        });
        (back_lhs, back_rhs)
    })
}

/// Sums two gradients of one value. Used by the backward pass.
///
/// When exactly one side is a per-sample gradient, it is summed over its
/// batch axis first and the total is unbatched. Broadcasting the unbatched
/// side over the batch instead would count it once per sample.
pub fn accumulate(lhs: &Value, rhs: &Value) -> Result<Value> {
    let (mut ls, mut rs) = (lhs.storage(), rhs.storage());
    match (lhs.is_batched(), rhs.is_batched()) {
        (true, false) => ls = sum_over_batch(&ls)?,
        (false, true) => rs = sum_over_batch(&rs)?,
        _ => {}
    }
    let is_batched = lhs.is_batched() && rhs.is_batched();
    if ls.shape() != rs.shape() {
        return Err(Error::shape_mismatch(lhs.storage().shape(), rhs.storage().shape()));
    }
    let out = dispatch::zip(&ls, &rs, ls.shape(), BinaryKernel::Add)?;
    Ok(Value::detached(out, is_batched))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::Array;

    fn data(v: &Value) -> Vec<f64> {
        v.to_array().unwrap().data().to_vec()
    }

    #[test]
    fn division_gradients() {
        let a = Value::new(vec![6.0]);
        let b = Value::new(vec![2.0]);
        let y = bdiv(&a, &b).unwrap();
        assert_eq!(data(&y), vec![3.0]);
        y.backward().unwrap();
        assert_eq!(data(&a.grad().unwrap()), vec![0.5]);
        assert_eq!(data(&b.grad().unwrap()), vec![-1.5]);
    }

    #[test]
    fn unbatched_operand_broadcasts_over_batch() {
        let x = Value::builder(Array::new(vec![2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap())
            .batched(true)
            .build();
        let w = Value::new(vec![10.0, 100.0]);
        let y = bmul(&x, &w).unwrap();
        assert!(y.is_batched());
        assert_eq!(data(&y), vec![10.0, 200.0, 30.0, 400.0]);

        y.backward().unwrap();
        let gw = w.grad().unwrap();
        assert!(gw.is_batched());
        assert_eq!(gw.shape(), vec![2, 2]);
        assert_eq!(data(&gw), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn mismatched_shapes_fail_without_recording() {
        let a = Value::new(Array::zeros(&[2, 3]));
        let b = Value::new(Array::zeros(&[4, 3]));
        assert!(matches!(badd(&a, &b), Err(Error::ShapeMismatch { .. })));
    }

    #[test]
    fn accumulate_sums_per_sample_side_once() {
        let a = Value::detached(Storage::host(Array::from(vec![1.0, 1.0])), false);
        let b = Value::detached(
            Storage::host(Array::new(vec![2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap()),
            true,
        );
        let sum = accumulate(&a, &b).unwrap();
        assert!(!sum.is_batched());
        assert_eq!(data(&sum), vec![5.0, 7.0]);
        assert_eq!(data(&accumulate(&b, &a).unwrap()), vec![5.0, 7.0]);
    }

    #[test]
    fn accumulate_keeps_two_batched_gradients_batched() {
        let a = Value::detached(Storage::host(Array::ones(&[2, 2])), true);
        let sum = accumulate(&a, &a).unwrap();
        assert!(sum.is_batched());
        assert_eq!(data(&sum), vec![2.0; 4]);
    }
}

//! Optimisers.
//!
//! An optimiser step reads a parameter's accumulated gradient, writes the
//! updated payload back into the parameter with
//! [`Value::assign`](crate::value::Value::assign) and clears the gradient.
//! Parameters keep their identity, so graphs built after the step see the
//! new payload.

use crate::contraction::sum_over_batch;
use crate::error::{Error, Result};
use crate::ops::dispatch;
use crate::ops::kernel::{BinaryKernel, UnaryKernel};
use crate::value::Value;
use tracing::trace;

pub trait Optimiser {
    /// Updates `parameter` from its gradient and zeroes the gradient. A
    /// parameter without a gradient is left alone.
    fn step(&self, parameter: &Value) -> Result<()>;
}

/// Stochastic gradient descent: `w <- w - learning_rate * grad`.
///
/// A batched gradient of an unbatched parameter (one gradient per sample)
/// is summed over the batch first.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sgd {
    pub learning_rate: f64,
}

impl Sgd {
    pub const fn new(learning_rate: f64) -> Self {
        Self { learning_rate }
    }
}

impl Optimiser for Sgd {
    fn step(&self, parameter: &Value) -> Result<()> {
        let Some(grad) = parameter.grad() else {
            return Ok(());
        };
        let mut g = grad.storage();
        if grad.is_batched() && !parameter.is_batched() {
            g = sum_over_batch(&g)?;
        }
        let current = parameter.storage();
        if g.shape() != current.shape() {
            return Err(Error::shape_mismatch(current.shape(), g.shape()));
        }

        let scaled = dispatch::map(&g, UnaryKernel::Mul(-self.learning_rate))?;
        let updated = dispatch::zip(&current, &scaled, current.shape(), BinaryKernel::Add)?;
        parameter.assign(updated)?;
        parameter.zero_grad();
        trace!(id = ?parameter.id(), lr = self.learning_rate, "sgd step");
        Ok(())
    }
}

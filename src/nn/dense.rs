//! Fully connected layer.

use crate::array::Array;
use crate::backend::get_backend;
use crate::contraction::einsum;
use crate::einsum::MAX_RANK;
use crate::error::{Error, Result};
use crate::nn::layer::{BuildLayer, Layer};
use crate::value::Value;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Uniform Xavier (Glorot) initialisation of a `from_size x to_size` matrix.
///
/// Samples from `U(-l, l)` with `l = sqrt(6 / (from_size + to_size))`.
pub fn init_xavier(from_size: usize, to_size: usize, seed: u64) -> Array {
    let limit = (6.0 / (from_size + to_size).max(1) as f64).sqrt();
    let mut rng = StdRng::seed_from_u64(seed);
    let data = (0..from_size * to_size)
        .map(|_| rng.random_range(-limit..=limit))
        .collect();
    Array::from_raw_parts(vec![from_size, to_size], data)
}

/// Builder for a dense layer.
///
/// Performs a right-hand multiplication over the last axis:
/// `output = input * W`.
#[derive(Debug, Clone, Copy)]
pub struct Dense {
    pub from_size: usize,
    pub to_size: usize,
    pub seed: u64,
}

impl Dense {
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

impl BuildLayer for Dense {
    type Layer = DenseLayer;

    /// Weights are created on the default backend.
    fn build(self) -> Result<DenseLayer> {
        let weights = Value::builder(init_xavier(self.from_size, self.to_size, self.seed))
            .name("weights")
            .build();
        weights.to_backend(get_backend())?;
        Ok(DenseLayer { weights })
    }
}

/// An expanded dense layer.
#[derive(Debug, Clone)]
pub struct DenseLayer {
    weights: Value,
}

impl DenseLayer {
    /// Wraps an existing `[from_size, to_size]` weight matrix.
    pub fn from_weights(weights: Value) -> Result<Self> {
        if weights.ndim() != 2 || weights.is_batched() {
            return Err(Error::InvalidArray(format!(
                "dense weights must be an unbatched matrix, got shape {:?}",
                weights.shape()
            )));
        }
        Ok(Self { weights })
    }

    pub fn weights(&self) -> &Value {
        &self.weights
    }
}

/// Subscript multiplying the last of `rank` axes by the weights.
fn subscript(rank: usize) -> Result<&'static str> {
    match rank {
        1 => Ok("a,aw->w"),
        2 => Ok("ta,aw->tw"),
        3 => Ok("zta,aw->ztw"),
        4 => Ok("yzta,aw->yztw"),
        _ => Err(Error::UnsupportedRank { rank, max: MAX_RANK }),
    }
}

impl Layer for DenseLayer {
    fn forward(&self, input: &Value) -> Result<Value> {
        let rank = input.ndim().saturating_sub(usize::from(input.is_batched()));
        einsum(subscript(rank)?, &[input, &self.weights])
    }

    fn parameters(&self) -> Vec<Value> {
        vec![self.weights.clone()]
    }
}

//! In-memory datasets.
//!
//! A [`Dataset`] pairs inputs with targets and iterates over them as
//! constant values. [`Dataset::batch`] stacks consecutive samples along a
//! new leading axis; iterating a batched dataset yields batched values.

use crate::array::Array;
use crate::error::{Error, Result};
use crate::value::Value;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tracing::debug;

/// Inputs and targets held in memory. Not suitable for large datasets.
#[derive(Debug, Clone)]
pub struct Dataset {
    inputs: Vec<Array>,
    outputs: Vec<Array>,
    indices: Vec<usize>,
    index: usize,
    is_batched: bool,
    is_infinite: bool,
    rng: StdRng,
}

/// Stacks arrays of one shape along a new leading axis.
fn stack(arrays: &[&Array]) -> Result<Array> {
    let Some(first) = arrays.first() else {
        return Err(Error::InvalidArray("cannot stack zero arrays".into()));
    };
    let mut data = Vec::with_capacity(arrays.len() * first.len());
    for array in arrays {
        if array.shape() != first.shape() {
            return Err(Error::shape_mismatch(first.shape(), array.shape()));
        }
        data.extend_from_slice(array.data());
    }
    let mut shape = vec![arrays.len()];
    shape.extend_from_slice(first.shape());
    Ok(Array::from_raw_parts(shape, data))
}

impl Dataset {
    /// # Errors
    /// [`Error::InvalidArray`] if there are not as many targets as inputs.
    pub fn new(inputs: Vec<Array>, outputs: Vec<Array>) -> Result<Self> {
        if inputs.len() != outputs.len() {
            return Err(Error::InvalidArray(format!(
                "{} inputs but {} outputs",
                inputs.len(),
                outputs.len()
            )));
        }
        Ok(Self {
            indices: (0..inputs.len()).collect(),
            inputs,
            outputs,
            index: 0,
            is_batched: false,
            is_infinite: false,
            rng: StdRng::seed_from_u64(0),
        })
    }

    /// Seeds the generator used by [`shuffle`](Self::shuffle).
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Makes iteration wrap around forever, reshuffling on every pass.
    #[must_use]
    pub fn infinite(mut self) -> Self {
        self.is_infinite = true;
        self
    }

    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    pub fn is_batched(&self) -> bool {
        self.is_batched
    }

    /// The `idx`-th pair in the current order. Infinite datasets wrap around.
    pub fn get(&self, idx: usize) -> Option<(&Array, &Array)> {
        let idx = if self.is_infinite && !self.is_empty() {
            idx % self.len()
        } else {
            idx
        };
        let &i = self.indices.get(idx)?;
        Some((&self.inputs[i], &self.outputs[i]))
    }

    /// Randomises the iteration order.
    pub fn shuffle(&mut self) -> &mut Self {
        self.indices.shuffle(&mut self.rng);
        self
    }

    /// Restarts iteration from the first pair.
    pub fn reset(&mut self) -> &mut Self {
        self.index = 0;
        self
    }

    /// Groups consecutive pairs (in the current order) into batches of
    /// `size`. The last batch may be smaller.
    ///
    /// # Errors
    /// - [`Error::InvalidArray`] when `size` is zero
    /// - [`Error::ShapeMismatch`] when samples of one batch differ in shape
    pub fn batch(self, size: usize) -> Result<Self> {
        if size == 0 {
            return Err(Error::InvalidArray("batch size must be positive".into()));
        }
        let mut inputs = Vec::with_capacity(self.len().div_ceil(size));
        let mut outputs = Vec::with_capacity(inputs.capacity());
        for chunk in self.indices.chunks(size) {
            let xs: Vec<&Array> = chunk.iter().map(|&i| &self.inputs[i]).collect();
            let ys: Vec<&Array> = chunk.iter().map(|&i| &self.outputs[i]).collect();
            inputs.push(stack(&xs)?);
            outputs.push(stack(&ys)?);
        }
        debug!(batches = inputs.len(), size, "batched dataset");
        Ok(Self {
            indices: (0..inputs.len()).collect(),
            inputs,
            outputs,
            index: 0,
            is_batched: true,
            is_infinite: self.is_infinite,
            rng: self.rng,
        })
    }

    fn to_values(&self, (x, y): (&Array, &Array)) -> (Value, Value) {
        let value = |a: &Array| {
            Value::builder(a.clone())
                .requires_grad(false)
                .batched(self.is_batched)
                .build()
        };
        (value(x), value(y))
    }
}

impl Iterator for Dataset {
    type Item = (Value, Value);

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.len() {
            if !self.is_infinite || self.is_empty() {
                return None;
            }
            self.shuffle();
            self.index = 0;
        }
        let pair = self.get(self.index).map(|pair| self.to_values(pair));
        self.index += 1;
        pair
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset(n: usize) -> Dataset {
        let xs = (0..n).map(|i| Array::from(vec![i as f64])).collect();
        let ys = (0..n).map(|i| Array::from(vec![2.0 * i as f64])).collect();
        Dataset::new(xs, ys).unwrap()
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        let result = Dataset::new(vec![Array::scalar(1.0)], vec![]);
        assert!(matches!(result, Err(Error::InvalidArray(_))));
    }

    #[test]
    fn iterates_once_then_stops() {
        let mut data = dataset(3);
        let seen: Vec<f64> = data
            .by_ref()
            .map(|(x, _)| x.to_array().unwrap().data()[0])
            .collect();
        assert_eq!(seen, vec![0.0, 1.0, 2.0]);
        assert!(data.next().is_none());
        data.reset();
        assert!(data.next().is_some());
    }

    #[test]
    fn batches_stack_and_keep_the_remainder() {
        let batches: Vec<_> = dataset(5).batch(2).unwrap().collect();
        assert_eq!(batches.len(), 3);
        let (x, y) = &batches[0];
        assert!(x.is_batched() && y.is_batched());
        assert_eq!(x.shape(), vec![2, 1]);
        assert_eq!(y.to_array().unwrap().data(), &[0.0, 2.0]);
        assert_eq!(batches[2].0.shape(), vec![1, 1]);
    }

    #[test]
    fn shuffle_is_a_seeded_permutation() {
        let mut a = dataset(10).with_seed(1);
        let mut b = dataset(10).with_seed(1);
        a.shuffle();
        b.shuffle();
        let order = |d: &mut Dataset| -> Vec<f64> {
            d.by_ref().map(|(x, _)| x.to_array().unwrap().data()[0]).collect()
        };
        let (oa, ob) = (order(&mut a), order(&mut b));
        assert_eq!(oa, ob);
        let mut sorted = oa.clone();
        sorted.sort_by(f64::total_cmp);
        assert_eq!(sorted, (0..10).map(f64::from).collect::<Vec<_>>());
    }

    #[test]
    fn infinite_datasets_wrap_around() {
        let taken = dataset(2).infinite().take(5).count();
        assert_eq!(taken, 5);
    }
}

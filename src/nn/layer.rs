//! Layer traits and sequential composition.

use crate::backend::Backend;
use crate::error::Result;
use crate::nn::optim::Optimiser;
use crate::value::Value;

/// Something a value can be passed through.
///
/// Parameters are ordinary leaf values; the provided methods act on every
/// value returned by [`parameters`](Layer::parameters).
pub trait Layer {
    fn forward(&self, input: &Value) -> Result<Value>;

    /// Trainable leaves owned by this layer.
    fn parameters(&self) -> Vec<Value> {
        Vec::new()
    }

    /// Applies one optimiser step to every parameter.
    fn update(&self, optimiser: &dyn Optimiser) -> Result<()> {
        for parameter in self.parameters() {
            optimiser.step(&parameter)?;
        }
        Ok(())
    }

    fn zero_grad(&self) {
        for parameter in self.parameters() {
            parameter.zero_grad();
        }
    }

    /// Moves every parameter to `backend`.
    fn to_backend(&self, backend: Backend) -> Result<()> {
        for parameter in self.parameters() {
            parameter.to_backend(backend)?;
        }
        Ok(())
    }
}

/// A layer description that can be expanded into a [`Layer`].
pub trait BuildLayer {
    type Layer: Layer;

    /// Allocates the parameters.
    fn build(self) -> Result<Self::Layer>;
}

/// Layers applied one after another.
#[derive(Default)]
pub struct Sequential {
    layers: Vec<Box<dyn Layer>>,
}

impl Sequential {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `layer`.
    #[must_use]
    pub fn with(mut self, layer: impl Layer + 'static) -> Self {
        self.layers.push(Box::new(layer));
        self
    }

    pub fn push(&mut self, layer: impl Layer + 'static) {
        self.layers.push(Box::new(layer));
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

impl Layer for Sequential {
    fn forward(&self, input: &Value) -> Result<Value> {
        self.layers
            .iter()
            .try_fold(input.clone(), |x, layer| layer.forward(&x))
    }

    fn parameters(&self) -> Vec<Value> {
        self.layers.iter().flat_map(|l| l.parameters()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::activation::{Activation, ActivationKind};

    #[test]
    fn empty_sequential_is_identity() {
        let x = Value::new(vec![1.0, -2.0]);
        let y = Sequential::new().forward(&x).unwrap();
        assert_eq!(y.id(), x.id());
    }

    #[test]
    fn layers_run_in_order() {
        let model = Sequential::new()
            .with(Activation::new(ActivationKind::ReLU))
            .with(Activation::new(ActivationKind::Tanh));
        assert_eq!(model.len(), 2);
        let y = model.forward(&Value::new(vec![-1.0, 0.5])).unwrap();
        let data = y.to_array().unwrap();
        assert_eq!(data.data()[0], 0.0);
        assert!((data.data()[1] - 0.5f64.tanh()).abs() < 1e-12);
        assert!(model.parameters().is_empty());
    }
}

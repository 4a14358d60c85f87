#![allow(dead_code)]

use gradlane::array::Array;
use gradlane::error::Result;
use gradlane::value::Value;

pub const STEP: f64 = 1e-6;

/// Deterministic, irregular test data of `shape`.
pub fn sample(shape: &[usize], seed: usize) -> Array {
    let len: usize = shape.iter().product();
    let data = (0..len)
        .map(|i| ((i * 7 + seed * 3) % 11) as f64 / 5.0 - 1.0 + 0.01 * seed as f64)
        .collect();
    Array::new(shape.to_vec(), data).unwrap()
}

pub fn leaf(array: &Array, batched: bool) -> Value {
    Value::builder(array.clone()).batched(batched).build()
}

pub fn constant(array: &Array, batched: bool) -> Value {
    Value::builder(array.clone())
        .batched(batched)
        .requires_grad(false)
        .build()
}

fn total(f: &impl Fn(&Value) -> Result<Value>, x: &Array, batched: bool) -> f64 {
    f(&constant(x, batched))
        .unwrap()
        .to_array()
        .unwrap()
        .data()
        .iter()
        .sum()
}

/// Central finite-difference gradient of `sum(f(x))`.
pub fn numeric_grad(f: impl Fn(&Value) -> Result<Value>, x: &Array, batched: bool) -> Vec<f64> {
    (0..x.len())
        .map(|i| {
            let nudged = |delta: f64| {
                let mut data = x.data().to_vec();
                data[i] += delta;
                Array::new(x.shape().to_vec(), data).unwrap()
            };
            let up = total(&f, &nudged(STEP), batched);
            let down = total(&f, &nudged(-STEP), batched);
            (up - down) / (2.0 * STEP)
        })
        .collect()
}

/// Gradient of `sum(f(x))` from `backward`, summed over the batch axis when a
/// per-sample gradient comes back for an unbatched input.
pub fn analytic_grad(f: impl Fn(&Value) -> Result<Value>, x: &Array, batched: bool) -> Vec<f64> {
    let x_value = leaf(x, batched);
    f(&x_value).unwrap().backward().unwrap();
    let grad = x_value.grad().expect("input received no gradient");
    fold(grad.to_array().unwrap().data(), x.len())
}

/// Adds consecutive chunks of `width` together.
pub fn fold(data: &[f64], width: usize) -> Vec<f64> {
    let mut out = vec![0.0; width];
    for chunk in data.chunks(width) {
        for (o, v) in out.iter_mut().zip(chunk) {
            *o += v;
        }
    }
    out
}

pub fn assert_close(actual: &[f64], expected: &[f64], tolerance: f64) {
    assert_eq!(actual.len(), expected.len(), "{actual:?} vs {expected:?}");
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        let scale = 1.0f64.max(e.abs());
        assert!(
            (a - e).abs() <= tolerance * scale,
            "element {i}: {a} vs {e} (all: {actual:?} vs {expected:?})"
        );
    }
}

/// Compares `backward` against finite differences for `f` at `x`.
pub fn check_grad(f: impl Fn(&Value) -> Result<Value>, x: &Array, batched: bool) {
    let numeric = numeric_grad(&f, x, batched);
    let analytic = analytic_grad(&f, x, batched);
    assert_close(&analytic, &numeric, 1e-5);
}

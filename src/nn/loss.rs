//! Loss functions and softmax.
//!
//! All of them reduce over the last per-sample axis only, so a batched input
//! produces one loss per sample (and per remaining axis). Call
//! [`Value::mean`] or [`Value::sum`] on the result for a single number.
//!
//! Softmax and cross entropy subtract the row maximum before exponentiating.
//! The shift is a constant: both functions are invariant to it, so the
//! gradient is unaffected.

use crate::array::Array;
use crate::contraction::{einsum, sample_letters};
use crate::einsum::MAX_RANK;
use crate::error::{Error, Result};
use crate::ops::dispatch;
use crate::value::Value;

/// Letters of `x`'s per-sample axes and the same letters without the last.
fn reduction_letters(x: &Value) -> Result<(String, String)> {
    let letters = sample_letters(x)?;
    if letters.is_empty() {
        return Err(Error::UnsupportedRank { rank: 0, max: MAX_RANK });
    }
    let kept = letters[..letters.len() - 1].to_string();
    Ok((letters, kept))
}

/// A constant shaped like `x` holding the maximum of each last-axis row.
fn row_max(x: &Value) -> Result<Value> {
    let array = x.to_array()?;
    let width = array.shape().last().copied().unwrap_or(1).max(1);
    let data = array
        .data()
        .chunks(width)
        .flat_map(|row| {
            let max = row.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            std::iter::repeat_n(max, row.len())
        })
        .collect();
    let shift = Array::from_raw_parts(array.shape().to_vec(), data);
    let storage = dispatch::backend_of(&x.storage()).allocate(shift)?;
    Ok(Value::detached(storage, x.is_batched()))
}

/// `mean((y_pred - y_true)^2)` over the last axis.
pub fn mean_square_error(y_true: &Value, y_pred: &Value) -> Result<Value> {
    let diff = (y_pred - y_true)?;
    diff.pow(2)?.mean_last_axis()
}

/// Softmax over the last axis.
pub fn softmax(x: &Value) -> Result<Value> {
    let (letters, kept) = reduction_letters(x)?;
    let shifted = (x - &row_max(x)?)?;
    let exp = shifted.exp()?;
    let inverse_total = exp.sum_last_axis()?.pow(-1)?;
    einsum(&format!("{letters},{kept}->{letters}"), &[&exp, &inverse_total])
}

/// Cross entropy between target distributions `y_true` and the logits
/// `y_pred`, over the last axis.
///
/// Computed as `logsumexp(y_pred) * sum(y_true) - sum(y_true * y_pred)`,
/// which equals `-sum(y_true * log_softmax(y_pred))`.
pub fn cross_entropy(y_true: &Value, y_pred: &Value) -> Result<Value> {
    let (letters, kept) = reduction_letters(y_pred)?;
    let shifted = (y_pred - &row_max(y_pred)?)?;
    let log_total = shifted.exp()?.sum_last_axis()?.log()?;
    let target_mass = y_true.sum_last_axis()?;
    let agreement = einsum(
        &format!("{letters},{letters}->{kept}"),
        &[y_true, &shifted],
    )?;
    &(&log_total * &target_mass)? - &agreement
}

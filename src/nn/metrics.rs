//! Evaluation helpers over plain numbers.

use crate::error::{Error, Result};

/// Coefficient of determination, `1 - RSS / TSS`.
///
/// # Errors
/// [`Error::ShapeMismatch`] if the slices differ in length,
/// [`Error::InvalidArray`] if they are empty or `actual` is constant.
pub fn r_squared(actual: &[f64], predicted: &[f64]) -> Result<f64> {
    if actual.len() != predicted.len() {
        return Err(Error::shape_mismatch(&[actual.len()], &[predicted.len()]));
    }
    if actual.is_empty() {
        return Err(Error::InvalidArray("r_squared of no values".into()));
    }
    let mean = actual.iter().sum::<f64>() / actual.len() as f64;
    let tss: f64 = actual.iter().map(|a| (a - mean).powi(2)).sum();
    let rss: f64 = actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| (a - p).powi(2))
        .sum();
    if tss == 0.0 {
        return Err(Error::InvalidArray(
            "r_squared of constant actual values".into(),
        ));
    }
    Ok(1.0 - rss / tss)
}

/// Exponential moving average: `s_t = factor * s_{t-1} + (1 - factor) * x_t`,
/// starting from the first value.
///
/// Useful for plotting noisy training losses.
pub fn smooth<I>(values: I, factor: f64) -> impl Iterator<Item = f64>
where
    I: IntoIterator<Item = f64>,
{
    values.into_iter().scan(None, move |state: &mut Option<f64>, x| {
        let next = match *state {
            Some(prev) => factor * prev + (1.0 - factor) * x,
            None => x,
        };
        *state = Some(next);
        Some(next)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perfect_predictions_score_one() {
        let y = [1.0, 2.0, 4.0];
        assert_eq!(r_squared(&y, &y).unwrap(), 1.0);
    }

    #[test]
    fn predicting_the_mean_scores_zero() {
        let y = [1.0, 2.0, 3.0];
        assert!(r_squared(&y, &[2.0; 3]).unwrap().abs() < 1e-12);
        assert!(r_squared(&y, &[2.0]).is_err());
    }

    #[test]
    fn constant_actual_values_are_rejected() {
        let result = r_squared(&[2.0, 2.0], &[1.0, 3.0]);
        assert!(matches!(result, Err(Error::InvalidArray(_))));
    }

    #[test]
    fn smoothing_starts_at_the_first_value() {
        let out: Vec<f64> = smooth([4.0, 0.0, 0.0], 0.5).collect();
        assert_eq!(out, vec![4.0, 2.0, 1.0]);
    }
}

//! Shape and batch reconciliation for elementwise binary operations.
//!
//! A batched operand carries one extra leading axis. When exactly one operand
//! is batched that axis is set aside before comparing, and the unbatched
//! operand is applied to every sample. No other broadcasting happens: two
//! operands of different per-sample shapes are always an error.

use crate::error::{Error, Result};

/// Outcome of reconciling two operands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciled {
    /// Shape of the combined result, batch axis included.
    pub shape: Vec<usize>,
    pub is_batched: bool,
}

/// Checks that `lhs` and `rhs` can be combined elementwise.
///
/// # Errors
/// [`Error::ShapeMismatch`] carrying both shapes as given.
///
/// # Example
/// ```
/// use gradlane::shape::reconcile;
/// let r = reconcile(&[4, 3], true, &[3], false).unwrap();
/// assert_eq!(r.shape, vec![4, 3]);
/// assert!(r.is_batched);
/// assert!(reconcile(&[2, 3], false, &[4, 3], false).is_err());
/// ```
pub fn reconcile(
    lhs: &[usize],
    lhs_batched: bool,
    rhs: &[usize],
    rhs_batched: bool,
) -> Result<Reconciled> {
    let matches = match (lhs_batched, rhs_batched) {
        (true, false) => !lhs.is_empty() && lhs[1..] == *rhs,
        (false, true) => !rhs.is_empty() && rhs[1..] == *lhs,
        _ => lhs == rhs,
    };
    if !matches {
        return Err(Error::shape_mismatch(lhs, rhs));
    }
    let shape = if rhs_batched && !lhs_batched { rhs } else { lhs };
    Ok(Reconciled {
        shape: shape.to_vec(),
        is_batched: lhs_batched || rhs_batched,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unbatched_shapes_must_match_exactly() {
        match reconcile(&[2, 3], false, &[4, 3], false) {
            Err(Error::ShapeMismatch { lhs, rhs }) => {
                assert_eq!(lhs, vec![2, 3]);
                assert_eq!(rhs, vec![4, 3]);
            }
            other => panic!("expected a shape mismatch, got {other:?}"),
        }
    }

    #[test]
    fn batched_operand_drops_leading_axis() {
        let r = reconcile(&[3], false, &[5, 3], true).unwrap();
        assert_eq!(r.shape, vec![5, 3]);
        assert!(r.is_batched);
    }

    #[test]
    fn both_batched_compare_batch_axis_too() {
        assert!(reconcile(&[5, 3], true, &[4, 3], true).is_err());
        assert!(reconcile(&[5, 3], true, &[5, 3], true).is_ok());
    }

    #[test]
    fn batched_scalar_without_axes_is_rejected() {
        assert!(reconcile(&[], true, &[], false).is_err());
    }
}

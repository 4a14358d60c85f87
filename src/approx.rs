//! Approximate equality of floating point payloads.
//!
//! Used by [`Value::close_to`](crate::value::Value::close_to) and by the
//! finite-difference checks in the test suite. Tolerances are absolute.

/// The max epsilon accepted on `f64`s.
pub const F64_MAX_ERROR: f64 = 1e-3;

/// The expected minimum epsilon accepted on `f64`s.
pub const F64_AVG_ERROR: f64 = 1e-6;

/// The best expected epsilon accepted on `f64`s.
pub const F64_MIN_ERROR: f64 = 1e-13;

/// The approximated equality enumerated, best first.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ApproxEquality {
    /// Very strong epsilon.
    Precise = 0,
    /// Good epsilon.
    Partial = 1,
    /// Acceptable epsilon; what accelerator round trips through `f32` reach.
    Relative = 2,
    /// No relative equality.
    Scarce = 3,
}

/// Checks the distance between two values against the epsilons above.
pub trait RelativeEq<Rhs: ?Sized> {
    fn approx_eq(&self, rhs: &Rhs) -> ApproxEquality;
}

impl RelativeEq<Self> for f64 {
    fn approx_eq(&self, rhs: &Self) -> ApproxEquality {
        let dif = (self - rhs).abs();

        if dif < F64_MIN_ERROR {
            ApproxEquality::Precise
        } else if dif < F64_AVG_ERROR {
            ApproxEquality::Partial
        } else if dif < F64_MAX_ERROR {
            ApproxEquality::Relative
        } else {
            // NaN lands here too
            ApproxEquality::Scarce
        }
    }
}

/// Slices rate as their worst pair; different lengths are never equal.
impl<T: RelativeEq<U>, U> RelativeEq<[U]> for [T] {
    fn approx_eq(&self, rhs: &[U]) -> ApproxEquality {
        if self.len() != rhs.len() {
            return ApproxEquality::Scarce;
        }
        let mut worst = ApproxEquality::Precise;
        for (t_val, u_val) in self.iter().zip(rhs) {
            worst = worst.max(t_val.approx_eq(u_val));
            if worst == ApproxEquality::Scarce {
                break;
            }
        }
        worst
    }
}

/// Whether `a` and `b` are equal within `tolerance` (inclusive).
pub fn approx_eq<A: RelativeEq<B> + ?Sized, B: ?Sized>(
    a: &A,
    b: &B,
    tolerance: ApproxEquality,
) -> bool {
    a.approx_eq(b) <= tolerance
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slices_rate_as_their_worst_element() {
        let a = [1.0, 2.0, 3.0];
        let b = [1.0, 2.0 + 1e-4, 3.0];
        assert_eq!(a[..].approx_eq(&b[..]), ApproxEquality::Relative);
        let c = [1.0, 5.0, 3.0];
        assert_eq!(a[..].approx_eq(&c[..]), ApproxEquality::Scarce);
    }

    #[test]
    fn nan_is_never_close() {
        assert!(!approx_eq(&f64::NAN, &f64::NAN, ApproxEquality::Relative));
    }
}

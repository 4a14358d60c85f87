//! Host-resident numeric arrays.
//!
//! # Arrays
//!
//! [`Array`] is the plain numeric payload underneath every
//! [`Value`](crate::value::Value): a shape plus flat row-major `f64` data. It
//! carries no graph information at all; the autograd facet lives on `Value`.
//!
//! It supports:
//! - Validated construction (shape product must equal the data length)
//! - Constant constructors (`zeros`, `ones`, `full`)
//! - The `array!` macro for nested literals
//!
//! ## Limitations
//! - Row-major only
//! - `f64` only; the accelerator backend narrows to `f32` on upload
//!
//! ## Example
//!
//! ```rust
//! use gradlane::array;
//! let a = array!([[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);
//! assert_eq!(a.shape(), &[2, 3]);
//! ```

use crate::error::{Error, Result};
use briny::prelude::*;

/// An N-dimensional array with a shape and flat row-major data.
#[derive(Debug, Clone, PartialEq)]
pub struct Array {
    shape: Vec<usize>,
    data: Vec<f64>,
}

/// Unchecked shape/data pair awaiting validation.
struct RawArray {
    shape: Vec<usize>,
    data: Vec<f64>,
}

impl Validate for RawArray {
    fn validate(&self) -> core::result::Result<(), ValidationError> {
        if self.shape.iter().product::<usize>() != self.data.len() {
            return Err(ValidationError);
        }
        Ok(())
    }
}

impl Array {
    /// Creates an array from a shape and flat row-major data.
    ///
    /// # Errors
    /// [`Error::InvalidArray`] if the number of elements does not match the
    /// shape product.
    pub fn new(shape: impl Into<Vec<usize>>, data: Vec<f64>) -> Result<Self> {
        let shape = shape.into();
        let len = data.len();
        let trusted = TrustedData::new(RawArray { shape, data }).map_err(|_| {
            Error::InvalidArray(format!("{len} elements do not fill the requested shape"))
        })?;
        let RawArray { shape, data } = trusted.into_inner();
        Ok(Self { shape, data })
    }

    /// Builds an array whose shape is already known to match `data`.
    #[doc(hidden)]
    pub fn from_raw_parts(shape: Vec<usize>, data: Vec<f64>) -> Self {
        debug_assert_eq!(shape.iter().product::<usize>(), data.len());
        Self { shape, data }
    }

    /// A rank-0 array holding one number.
    pub fn scalar(value: f64) -> Self {
        Self::from_raw_parts(Vec::new(), vec![value])
    }

    pub fn full(shape: &[usize], value: f64) -> Self {
        let len = shape.iter().product();
        Self::from_raw_parts(shape.to_vec(), vec![value; len])
    }

    pub fn zeros(shape: &[usize]) -> Self {
        Self::full(shape, 0.0)
    }

    pub fn ones(shape: &[usize]) -> Self {
        Self::full(shape, 1.0)
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn into_parts(self) -> (Vec<usize>, Vec<f64>) {
        (self.shape, self.data)
    }

    /// Returns the same data under a new shape with the same element count.
    pub fn reshape(&self, shape: &[usize]) -> Result<Self> {
        Self::new(shape.to_vec(), self.data.clone())
    }
}

impl From<f64> for Array {
    fn from(value: f64) -> Self {
        Self::scalar(value)
    }
}

impl From<Vec<f64>> for Array {
    fn from(data: Vec<f64>) -> Self {
        Self::from_raw_parts(vec![data.len()], data)
    }
}

impl From<&[f64]> for Array {
    fn from(data: &[f64]) -> Self {
        Self::from(data.to_vec())
    }
}

impl<const N: usize> From<[f64; N]> for Array {
    fn from(data: [f64; N]) -> Self {
        Self::from(data.to_vec())
    }
}

/// Defines an array from nested literal arrays.
///
/// Supports arbitrary dimensionality as long as sublists are uniform in shape.
///
/// # Example
/// ```
/// use gradlane::array;
/// let a = array!([[1.0, 2.0], [3.0, 4.0]]);
/// assert_eq!(a.shape(), &[2, 2]);
/// ```
///
/// # Panics
/// Panics on ragged literals.
#[macro_export]
macro_rules! array {
    ($lit:literal) => {
        $crate::array::Array::scalar($lit as f64)
    };

    ([ $( $inner:tt ),+ $(,)? ]) => {{
        let children = vec![ $( $crate::array!($inner) ),+ ];
        let first_shape = children[0].shape().to_vec();
        assert!(children.iter().all(|c| c.shape() == first_shape.as_slice()),
            "ragged array literal (rows have mismatched shapes)");
        let mut shape = vec![children.len()];
        shape.extend_from_slice(&first_shape);
        let mut data = Vec::with_capacity(children.len() * children[0].len());
        for c in children { data.extend_from_slice(c.data()); }
        $crate::array::Array::from_raw_parts(shape, data)
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_data_that_does_not_fill_shape() {
        assert!(matches!(
            Array::new(vec![2, 2], vec![1.0, 2.0, 3.0]),
            Err(Error::InvalidArray(_))
        ));
    }

    #[test]
    fn literal_macro_builds_row_major_data() {
        let a = crate::array!([[[1.0, 2.0]], [[3.0, 4.0]]]);
        assert_eq!(a.shape(), &[2, 1, 2]);
        assert_eq!(a.data(), &[1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn scalar_has_rank_zero() {
        let a = Array::scalar(3.5);
        assert_eq!(a.ndim(), 0);
        assert_eq!(a.len(), 1);
    }
}

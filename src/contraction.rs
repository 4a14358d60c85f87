//! Einsum and the structural operators built around it.
//!
//! [`einsum`] is the one operator of arbitrary arity. Its gradient with
//! respect to each operand is again an einsum, so one implementation serves
//! matrix products, transposes, reductions, outer products and broadcasts,
//! forward and backward, on every backend.
//!
//! Operands and outputs may have up to [`MAX_RANK`] per-sample axes, batched
//! or not.

use crate::einsum::{ContractionPlan, MAX_RANK, Subscript};
use crate::error::{Error, Result};
use crate::ops::dispatch;
use crate::storage::Storage;
use crate::value::{BackwardFn, Value};
use std::rc::Rc;
use tracing::trace;

const LETTERS: [char; MAX_RANK] = ['a', 'b', 'c', 'd'];

/// Evaluates `notation` over `operands`.
///
/// Batched operands receive a shared batch letter automatically: write the
/// subscript for a single sample.
///
/// # Errors
/// - [`Error::InvalidSubscript`] for malformed notation or a letter count
///   that does not match an operand
/// - [`Error::UnsupportedRank`] beyond [`MAX_RANK`] axes
/// - [`Error::ShapeMismatch`] when one letter names axes of different sizes
/// - [`Error::BackendMismatch`] when operands live on different backends
///
/// # Example
/// ```
/// use gradlane::{array, contraction::einsum, value::Value};
/// let a = Value::new(array!([[1.0, 2.0], [3.0, 4.0]]));
/// let b = Value::new(array!([[5.0, 6.0], [7.0, 8.0]]));
/// let c = einsum("ab,bc->ac", &[&a, &b]).unwrap();
/// assert_eq!(c.to_array().unwrap().data(), &[19.0, 22.0, 43.0, 50.0]);
/// ```
pub fn einsum(notation: &str, operands: &[&Value]) -> Result<Value> {
    let subscript = Subscript::parse(notation)?;
    subscript.check_rank()?;

    let batched: Vec<bool> = operands.iter().map(|v| v.is_batched()).collect();
    let (forward, batch_letter) = subscript.with_batch(&batched)?;

    let storages: Vec<Storage> = operands.iter().map(|v| v.storage()).collect();
    let shapes: Vec<&[usize]> = storages.iter().map(Storage::shape).collect();
    let plan = ContractionPlan::new(&forward, &shapes, &[])?;
    let refs: Vec<&Storage> = storages.iter().collect();
    let out = dispatch::contract(&plan, &refs)?;
    trace!(subscript = %forward, shape = ?plan.out_shape(), "einsum");

    let forward = Rc::new(forward);
    let label_sizes: Rc<[(char, usize)]> = plan.label_sizes().into();
    let back_fns = (0..operands.len())
        .map(|index| {
            operand_backward(
                Rc::clone(&forward),
                index,
                batched[index],
                batch_letter,
                storages.clone(),
                Rc::clone(&label_sizes),
            )
        })
        .collect();

    Value::from_op(
        out,
        batch_letter.is_some(),
        operands.iter().map(|&v| v.clone()).collect(),
        back_fns,
    )
}

/// Gradient of operand `index`: `output, others -> operand`.
fn operand_backward(
    forward: Rc<Subscript>,
    index: usize,
    operand_batched: bool,
    batch_letter: Option<char>,
    storages: Vec<Storage>,
    label_sizes: Rc<[(char, usize)]>,
) -> BackwardFn {
    Rc::new(move |grad: &Value| -> Result<Value> {
        let mut subscript = forward.backward(index);
        let mut result_batched = operand_batched;
        match batch_letter {
            // per-sample gradient for an operand shared by the whole batch
            Some(letter) if !operand_batched => {
                subscript = subscript.with_output_axis(letter);
                result_batched = true;
            }
            None if grad.is_batched() => {
                subscript = subscript.with_leading_axis(forward.free_letter()?);
                result_batched = true;
            }
            _ => {}
        }

        let grad_storage = grad.storage();
        let mut operands: Vec<&Storage> = Vec::with_capacity(storages.len());
        operands.push(&grad_storage);
        operands.extend(
            storages
                .iter()
                .enumerate()
                .filter(|&(i, _)| i != index)
                .map(|(_, s)| s),
        );
        let shapes: Vec<&[usize]> = operands.iter().map(|s| s.shape()).collect();
        let plan = ContractionPlan::new(&subscript, &shapes, &label_sizes)?;
        let out = dispatch::contract(&plan, &operands)?;
        Ok(Value::detached(out, result_batched))
    })
}

/// Letters for the per-sample axes of `value`.
pub(crate) fn sample_letters(value: &Value) -> Result<String> {
    let rank = value.ndim().saturating_sub(usize::from(value.is_batched()));
    if rank > MAX_RANK {
        return Err(Error::UnsupportedRank {
            rank,
            max: MAX_RANK,
        });
    }
    Ok(LETTERS[..rank].iter().collect())
}

/// Letters for per-sample axes when summing out a batch axis; `z` is the
/// batch axis.
const SAMPLE_LETTERS: &str = "abcdefghijklmnopqrstuvwxy";

/// Sums a per-sample storage over its leading (batch) axis.
pub(crate) fn sum_over_batch(per_sample: &Storage) -> Result<Storage> {
    let rank = per_sample.shape().len().saturating_sub(1);
    let Some(letters) = SAMPLE_LETTERS.get(..rank) else {
        return Err(Error::UnsupportedRank {
            rank,
            max: SAMPLE_LETTERS.len(),
        });
    };
    let subscript = Subscript::parse(&format!("z{letters}->{letters}"))?;
    let plan = ContractionPlan::new(&subscript, &[per_sample.shape()], &[])?;
    dispatch::contract(&plan, &[per_sample])
}

impl Value {
    /// Einsum of this value alone, e.g. `x.e("ab->ba")`.
    pub fn e(&self, notation: &str) -> Result<Value> {
        einsum(notation, &[self])
    }

    /// Sum over every per-sample axis. A batched value keeps one total per
    /// sample.
    pub fn sum(&self) -> Result<Value> {
        let letters = sample_letters(self)?;
        self.e(&format!("{letters}->"))
    }

    /// Mean over every per-sample axis.
    pub fn mean(&self) -> Result<Value> {
        let shape = self.shape();
        let skip = usize::from(self.is_batched());
        let count: usize = shape.iter().skip(skip).product();
        crate::unary::umul(&self.sum()?, 1.0 / count.max(1) as f64)
    }

    /// Sum over the last axis.
    pub fn sum_last_axis(&self) -> Result<Value> {
        let letters = sample_letters(self)?;
        if letters.is_empty() {
            return Err(Error::UnsupportedRank { rank: 0, max: MAX_RANK });
        }
        let kept = &letters[..letters.len() - 1];
        self.e(&format!("{letters}->{kept}"))
    }

    /// Mean over the last axis.
    pub fn mean_last_axis(&self) -> Result<Value> {
        let width = self.shape().last().copied().unwrap_or(1);
        crate::unary::umul(&self.sum_last_axis()?, 1.0 / width.max(1) as f64)
    }

    /// Splits the last axis into `parts` equally wide pieces.
    ///
    /// The gradient of each piece is written back into its own slice of the
    /// input; the rest of the input receives zeros.
    pub fn split(&self, parts: usize) -> Result<Vec<Value>> {
        let storage = self.storage();
        let shape = storage.shape().to_vec();
        let width = match shape.last() {
            Some(&w) if parts > 0 && w % parts == 0 && shape.len() > usize::from(self.is_batched()) => w,
            _ => {
                return Err(Error::InvalidArray(format!(
                    "cannot split shape {shape:?} into {parts} equal parts along the last axis"
                )));
            }
        };
        let step = width / parts;

        (0..parts)
            .map(|part| {
                let (start, end) = (part * step, (part + 1) * step);
                let piece = dispatch::slice_last_axis(&storage, start, end)?;
                let back: BackwardFn = Rc::new(move |grad: &Value| -> Result<Value> {
                    let g = grad.storage();
                    let mut pad_shape = g.shape().to_vec();
                    let mut pieces: Vec<Storage> = Vec::with_capacity(3);
                    if start > 0 {
                        if let Some(last) = pad_shape.last_mut() {
                            *last = start;
                        }
                        pieces.push(dispatch::full_like(&g, &pad_shape, 0.0)?);
                    }
                    pieces.push(g.clone());
                    if end < width {
                        if let Some(last) = pad_shape.last_mut() {
                            *last = width - end;
                        }
                        pieces.push(dispatch::full_like(&g, &pad_shape, 0.0)?);
                    }
                    let refs: Vec<&Storage> = pieces.iter().collect();
                    Ok(Value::detached(
                        dispatch::concat_last_axis(&refs)?,
                        grad.is_batched(),
                    ))
                });
                Value::from_op(piece, self.is_batched(), vec![self.clone()], vec![back])
            })
            .collect()
    }

    /// Reinterprets the leading axis as the batch axis.
    pub fn to_batched(&self) -> Result<Value> {
        self.with_batch_flag(true)
    }

    /// Reinterprets the batch axis as an ordinary leading axis.
    pub fn from_batched(&self) -> Result<Value> {
        self.with_batch_flag(false)
    }

    fn with_batch_flag(&self, is_batched: bool) -> Result<Value> {
        if is_batched && self.ndim() == 0 {
            return Err(Error::InvalidArray("a rank-0 value has no axis to batch over".into()));
        }
        let original = self.is_batched();
        let shape = self.shape();
        let back: BackwardFn = Rc::new(move |grad: &Value| -> Result<Value> {
            let g = grad.storage();
            if g.shape() == shape.as_slice() {
                return Ok(Value::detached(g, original));
            }
            // per-sample gradient: one copy of the input's shape per sample
            if grad.is_batched() && g.shape().get(1..) == Some(shape.as_slice()) {
                return Ok(Value::detached(sum_over_batch(&g)?, original));
            }
            Err(Error::shape_mismatch(&shape, g.shape()))
        });
        Value::from_op(self.storage(), is_batched, vec![self.clone()], vec![back])
    }
}

//! Einsum subscripts and contraction plans.
//!
//! # Notation
//!
//! `"ab,bc->ac"`: one group of lowercase letters per operand, separated by
//! commas, then `->` and the output letters. Each letter names an axis.
//!
//! - A letter shared between operands is multiplied along.
//! - A letter missing from the output is summed over.
//! - A letter repeated inside one operand reads its diagonal (`"aa->a"`).
//! - A letter that only appears in the output broadcasts; its size has to be
//!   supplied separately (backward passes do this).
//! - Without `->` the output is every letter appearing exactly once, sorted.
//!
//! # Batching
//!
//! Subscripts written by users only describe the per-sample axes.
//! [`Subscript::with_batch`] prepends a fresh letter to every batched operand
//! and to the output, so a batched operand of shape `(n, a, b)` matches `ab`.
//!
//! # Backward
//!
//! The gradient of operand `i` is another contraction:
//! `output, others... -> input_i` over the incoming gradient and the other
//! operands (see [`Subscript::backward`]).

use crate::error::{Error, Result};
use briny::prelude::*;
use std::collections::HashMap;
use std::fmt;

/// Most per-sample axes any operand or output may have.
pub const MAX_RANK: usize = 4;

/// Unparsed notation, checked for its alphabet before parsing.
struct Notation<'a>(&'a str);

impl Validate for Notation<'_> {
    fn validate(&self) -> core::result::Result<(), ValidationError> {
        let src = self.0;
        if src.matches("->").count() > 1 {
            return Err(ValidationError);
        }
        let stripped = src.replacen("->", "", 1);
        if stripped.chars().all(|c| c.is_ascii_lowercase() || c == ',') {
            Ok(())
        } else {
            Err(ValidationError)
        }
    }
}

/// A parsed einsum expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscript {
    inputs: Vec<Vec<char>>,
    output: Vec<char>,
}

impl Subscript {
    /// Parses `notation`, ignoring whitespace.
    pub fn parse(notation: &str) -> Result<Self> {
        let compact: String = notation.chars().filter(|c| !c.is_whitespace()).collect();
        let checked = TrustedData::new(Notation(&compact)).map_err(|_| {
            Error::invalid_subscript(
                notation,
                "expected lowercase letters, ',' and at most one '->'",
            )
        })?;
        let compact = checked.into_inner().0;

        let (inputs_str, output_str) = match compact.split_once("->") {
            Some((inputs, output)) => (inputs, Some(output)),
            None => (compact, None),
        };

        let inputs: Vec<Vec<char>> = inputs_str.split(',').map(|s| s.chars().collect()).collect();
        if inputs_str.is_empty() && inputs.len() == 1 && output_str.is_none() {
            return Err(Error::invalid_subscript(notation, "no operands"));
        }

        let output = match output_str {
            Some(out) => {
                let output: Vec<char> = out.chars().collect();
                for (i, c) in output.iter().enumerate() {
                    if output[..i].contains(c) {
                        return Err(Error::invalid_subscript(
                            notation,
                            format!("output letter '{c}' appears twice"),
                        ));
                    }
                }
                output
            }
            None => {
                let mut counts: HashMap<char, usize> = HashMap::new();
                for c in inputs.iter().flatten() {
                    *counts.entry(*c).or_insert(0) += 1;
                }
                let mut output: Vec<char> = counts
                    .into_iter()
                    .filter(|&(_, count)| count == 1)
                    .map(|(c, _)| c)
                    .collect();
                output.sort_unstable();
                output
            }
        };

        Ok(Self { inputs, output })
    }

    pub fn inputs(&self) -> &[Vec<char>] {
        &self.inputs
    }

    pub fn output(&self) -> &[char] {
        &self.output
    }

    /// Fails with [`Error::UnsupportedRank`] if any operand or the output has
    /// more than [`MAX_RANK`] letters.
    pub fn check_rank(&self) -> Result<()> {
        let widest = self
            .inputs
            .iter()
            .map(Vec::len)
            .chain(std::iter::once(self.output.len()))
            .max()
            .unwrap_or(0);
        if widest > MAX_RANK {
            return Err(Error::UnsupportedRank {
                rank: widest,
                max: MAX_RANK,
            });
        }
        Ok(())
    }

    /// First lowercase letter this expression does not use.
    pub fn free_letter(&self) -> Result<char> {
        ('a'..='z')
            .find(|c| !self.output.contains(c) && !self.inputs.iter().any(|s| s.contains(c)))
            .ok_or_else(|| Error::invalid_subscript(&self.to_string(), "no letter left for the batch axis"))
    }

    /// Prepends a batch letter to every operand flagged in `batched` and, if
    /// any is, to the output. Returns the letter used.
    pub fn with_batch(&self, batched: &[bool]) -> Result<(Self, Option<char>)> {
        if !batched.iter().any(|&b| b) {
            return Ok((self.clone(), None));
        }
        let letter = self.free_letter()?;
        let inputs = self
            .inputs
            .iter()
            .zip(batched.iter().copied().chain(std::iter::repeat(false)))
            .map(|(subs, is_batched)| prepend(letter, subs, is_batched))
            .collect();
        let output = prepend(letter, &self.output, true);
        Ok((Self { inputs, output }, Some(letter)))
    }

    /// Subscript computing the gradient of operand `index`: the output letters
    /// followed by every other operand, contracted into operand `index`.
    pub fn backward(&self, index: usize) -> Self {
        let mut inputs = Vec::with_capacity(self.inputs.len());
        inputs.push(self.output.clone());
        inputs.extend(
            self.inputs
                .iter()
                .enumerate()
                .filter(|&(i, _)| i != index)
                .map(|(_, subs)| subs.clone()),
        );
        Self {
            inputs,
            output: self.inputs[index].clone(),
        }
    }

    /// Same expression with `letter` prepended to the output only.
    pub(crate) fn with_output_axis(&self, letter: char) -> Self {
        Self {
            inputs: self.inputs.clone(),
            output: prepend(letter, &self.output, true),
        }
    }

    /// Same expression with `letter` prepended to the first input and to the
    /// output.
    pub(crate) fn with_leading_axis(&self, letter: char) -> Self {
        let mut inputs = self.inputs.clone();
        if let Some(first) = inputs.first_mut() {
            first.insert(0, letter);
        }
        Self {
            inputs,
            output: prepend(letter, &self.output, true),
        }
    }
}

fn prepend(letter: char, subs: &[char], yes: bool) -> Vec<char> {
    let mut out = Vec::with_capacity(subs.len() + 1);
    if yes {
        out.push(letter);
    }
    out.extend_from_slice(subs);
    out
}

impl fmt::Display for Subscript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, subs) in self.inputs.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            for c in subs {
                write!(f, "{c}")?;
            }
        }
        f.write_str("->")?;
        for c in &self.output {
            write!(f, "{c}")?;
        }
        Ok(())
    }
}

/// A subscript bound to concrete operand shapes, ready for a backend.
///
/// Labels are numbered; every axis of every operand and of the output refers
/// to a label index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractionPlan {
    labels: Vec<char>,
    sizes: Vec<usize>,
    inputs: Vec<Vec<usize>>,
    output: Vec<usize>,
    out_shape: Vec<usize>,
}

impl ContractionPlan {
    /// Binds `subscript` to operand shapes.
    ///
    /// `extra_sizes` supplies the size of letters that occur in the output
    /// only.
    ///
    /// # Errors
    /// - [`Error::InvalidSubscript`] on an operand count or rank that does not
    ///   match the letters, or an output letter without a size
    /// - [`Error::ShapeMismatch`] when one letter names axes of different sizes
    pub fn new(
        subscript: &Subscript,
        shapes: &[&[usize]],
        extra_sizes: &[(char, usize)],
    ) -> Result<Self> {
        let text = subscript.to_string();
        if shapes.len() != subscript.inputs.len() {
            return Err(Error::invalid_subscript(
                &text,
                format!(
                    "{} operands described but {} supplied",
                    subscript.inputs.len(),
                    shapes.len()
                ),
            ));
        }

        let mut labels: Vec<char> = Vec::new();
        let mut sizes: Vec<usize> = Vec::new();
        let mut owner: Vec<usize> = Vec::new();
        let mut inputs = Vec::with_capacity(shapes.len());

        for (op, (subs, shape)) in subscript.inputs.iter().zip(shapes).enumerate() {
            if subs.len() != shape.len() {
                return Err(Error::invalid_subscript(
                    &text,
                    format!(
                        "operand {op} has {} axes but {} letters",
                        shape.len(),
                        subs.len()
                    ),
                ));
            }
            let mut axes = Vec::with_capacity(subs.len());
            for (&c, &size) in subs.iter().zip(shape.iter()) {
                let idx = match labels.iter().position(|&l| l == c) {
                    Some(idx) => {
                        if sizes[idx] != size {
                            return Err(Error::shape_mismatch(shapes[owner[idx]], shape));
                        }
                        idx
                    }
                    None => {
                        labels.push(c);
                        sizes.push(size);
                        owner.push(op);
                        labels.len() - 1
                    }
                };
                axes.push(idx);
            }
            inputs.push(axes);
        }

        let mut output = Vec::with_capacity(subscript.output.len());
        for &c in &subscript.output {
            let idx = match labels.iter().position(|&l| l == c) {
                Some(idx) => idx,
                None => {
                    let size = extra_sizes
                        .iter()
                        .find(|(l, _)| *l == c)
                        .map(|&(_, s)| s)
                        .ok_or_else(|| {
                            Error::invalid_subscript(
                                &text,
                                format!("output letter '{c}' has no size"),
                            )
                        })?;
                    labels.push(c);
                    sizes.push(size);
                    labels.len() - 1
                }
            };
            output.push(idx);
        }

        let out_shape = output.iter().map(|&i| sizes[i]).collect();
        Ok(Self {
            labels,
            sizes,
            inputs,
            output,
            out_shape,
        })
    }

    pub fn out_shape(&self) -> &[usize] {
        &self.out_shape
    }

    /// Every letter with the size it was bound to.
    pub fn label_sizes(&self) -> Vec<(char, usize)> {
        self.labels.iter().copied().zip(self.sizes.iter().copied()).collect()
    }

    pub(crate) fn sizes(&self) -> &[usize] {
        &self.sizes
    }

    pub(crate) fn input_labels(&self) -> &[Vec<usize>] {
        &self.inputs
    }

    pub(crate) fn output_labels(&self) -> &[usize] {
        &self.output
    }

    /// Per-label element strides of an axis list laid out row-major with the
    /// plan's sizes. Repeated labels add their strides, which walks the
    /// diagonal.
    pub(crate) fn label_strides(&self, axes: &[usize]) -> Vec<usize> {
        let mut strides = vec![0; self.labels.len()];
        let mut step = 1;
        for &label in axes.iter().rev() {
            strides[label] += step;
            step *= self.sizes[label];
        }
        strides
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_explicit_notation() {
        let s = Subscript::parse("ab, bc -> ac").unwrap();
        assert_eq!(s.inputs(), &[vec!['a', 'b'], vec!['b', 'c']]);
        assert_eq!(s.output(), &['a', 'c']);
        assert_eq!(s.to_string(), "ab,bc->ac");
    }

    #[test]
    fn implicit_output_keeps_letters_seen_once() {
        let s = Subscript::parse("ba,bc").unwrap();
        assert_eq!(s.output(), &['a', 'c']);
    }

    #[test]
    fn rejects_foreign_characters() {
        assert!(matches!(
            Subscript::parse("aB->a"),
            Err(Error::InvalidSubscript { .. })
        ));
        assert!(matches!(
            Subscript::parse("a->b->c"),
            Err(Error::InvalidSubscript { .. })
        ));
    }

    #[test]
    fn batch_letter_is_first_unused() {
        let s = Subscript::parse("ab,bc->ac").unwrap();
        let (batched, letter) = s.with_batch(&[true, false]).unwrap();
        assert_eq!(letter, Some('d'));
        assert_eq!(batched.to_string(), "dab,bc->dac");
    }

    #[test]
    fn backward_moves_operand_to_output() {
        let s = Subscript::parse("ab,bc->ac").unwrap();
        assert_eq!(s.backward(0).to_string(), "ac,bc->ab");
        assert_eq!(s.backward(1).to_string(), "ac,ab->bc");
    }

    #[test]
    fn rank_above_four_is_rejected() {
        let s = Subscript::parse("abcde->a").unwrap();
        assert!(matches!(
            s.check_rank(),
            Err(Error::UnsupportedRank { rank: 5, max: 4 })
        ));
    }

    #[test]
    fn plan_detects_inconsistent_sizes() {
        let s = Subscript::parse("ab,bc->ac").unwrap();
        let err = ContractionPlan::new(&s, &[&[2, 3], &[4, 5]], &[]).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
    }

    #[test]
    fn plan_requires_sizes_for_broadcast_letters() {
        let s = Subscript::parse("a->ab").unwrap();
        assert!(ContractionPlan::new(&s, &[&[2]], &[]).is_err());
        let plan = ContractionPlan::new(&s, &[&[2]], &[('b', 3)]).unwrap();
        assert_eq!(plan.out_shape(), &[2, 3]);
    }

    #[test]
    fn diagonal_strides_accumulate() {
        let s = Subscript::parse("aa->a").unwrap();
        let plan = ContractionPlan::new(&s, &[&[3, 3]], &[]).unwrap();
        assert_eq!(plan.label_strides(&plan.input_labels()[0]), vec![4]);
    }
}

//! Parallel host backend.
//!
//! # CPU Backend
//!
//! Default [`ArrayBackend`]: arrays live in host memory and every kernel runs
//! on the `rayon` thread pool. Calls block until the pool has finished, so
//! callers never observe partially written results.
//!
//! ## Implemented Ops
//!
//! - `map`: elementwise unary kernels
//! - `zip`: elementwise binary kernels with batch broadcasting
//! - `contract`: generic einsum over any number of operands
//! - `slice_last_axis` / `concat_last_axis`: used by `split` and its backward
//!
//! ## Design Goals
//!
//! - Deterministic results (each output element is reduced by one task)
//! - No dependencies beyond `rayon`

use crate::array::Array;
use crate::backend::{ArrayBackend, Backend};
use crate::einsum::ContractionPlan;
use crate::error::Result;
use crate::ops::kernel::{BinaryKernel, UnaryKernel};
use crate::storage::Storage;
use rayon::prelude::*;
use std::rc::Rc;

/// Host backend singleton.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuBackend;

fn host(storage: &Storage) -> Result<&Array> {
    match storage {
        Storage::Host(array) => Ok(array.as_ref()),
        #[cfg(feature = "wgpu")]
        Storage::Device(_) => Err(crate::error::Error::BackendMismatch {
            lhs: Backend::Cpu,
            rhs: storage.backend(),
        }),
    }
}

fn store(shape: Vec<usize>, data: Vec<f64>) -> Storage {
    Storage::Host(Rc::new(Array::from_raw_parts(shape, data)))
}

/// Decodes `index` into one coordinate per entry of `radices` (last varies
/// fastest).
fn decode(mut index: usize, radices: &[usize], out: &mut [usize]) {
    for (slot, &radix) in out.iter_mut().zip(radices).rev() {
        *slot = index % radix;
        index /= radix;
    }
}

impl CpuBackend {
    /// Elementwise unary kernel over a slice.
    pub fn map_slice(input: &[f64], kernel: UnaryKernel) -> Vec<f64> {
        input.par_iter().map(|&x| kernel.apply(x)).collect()
    }

    /// Elementwise binary kernel, repeating the shorter operand.
    pub fn zip_slices(lhs: &[f64], rhs: &[f64], len: usize, kernel: BinaryKernel) -> Vec<f64> {
        if lhs.is_empty() || rhs.is_empty() {
            return vec![0.0; len];
        }
        (0..len)
            .into_par_iter()
            .map(|i| kernel.apply(lhs[i % lhs.len()], rhs[i % rhs.len()]))
            .collect()
    }

    /// Evaluates `plan` over host slices.
    ///
    /// Every combination of output labels is one parallel task that walks all
    /// combinations of the summed labels. Distinct output combinations always
    /// land on distinct output offsets, so results are scattered without
    /// synchronisation.
    pub fn contract_slices(plan: &ContractionPlan, operands: &[&[f64]]) -> Vec<f64> {
        let sizes = plan.sizes();
        let out_len: usize = plan.out_shape().iter().product();

        let mut outer: Vec<usize> = Vec::new();
        for &label in plan.output_labels() {
            if !outer.contains(&label) {
                outer.push(label);
            }
        }
        let inner: Vec<usize> = (0..sizes.len()).filter(|l| !outer.contains(l)).collect();

        let outer_radices: Vec<usize> = outer.iter().map(|&l| sizes[l]).collect();
        let inner_radices: Vec<usize> = inner.iter().map(|&l| sizes[l]).collect();
        let outer_count: usize = outer_radices.iter().product();
        let inner_count: usize = inner_radices.iter().product();

        let in_strides: Vec<Vec<usize>> = plan
            .input_labels()
            .iter()
            .map(|axes| plan.label_strides(axes))
            .collect();
        let out_strides = plan.label_strides(plan.output_labels());

        let cells: Vec<(usize, f64)> = (0..outer_count)
            .into_par_iter()
            .map(|k| {
                let mut coord = vec![0; outer.len()];
                decode(k, &outer_radices, &mut coord);

                let mut base = vec![0usize; operands.len()];
                let mut out_offset = 0;
                for (&label, &c) in outer.iter().zip(&coord) {
                    out_offset += c * out_strides[label];
                    for (b, strides) in base.iter_mut().zip(&in_strides) {
                        *b += c * strides[label];
                    }
                }

                let mut inner_coord = vec![0; inner.len()];
                let mut acc = 0.0;
                for j in 0..inner_count {
                    decode(j, &inner_radices, &mut inner_coord);
                    let mut product = 1.0;
                    for ((data, strides), &b) in operands.iter().zip(&in_strides).zip(&base) {
                        let mut offset = b;
                        for (&label, &c) in inner.iter().zip(&inner_coord) {
                            offset += c * strides[label];
                        }
                        product *= data[offset];
                    }
                    acc += product;
                }
                (out_offset, acc)
            })
            .collect();

        let mut out = vec![0.0; out_len];
        for (offset, value) in cells {
            out[offset] = value;
        }
        out
    }

    pub fn slice_last_axis_slice(
        data: &[f64],
        shape: &[usize],
        start: usize,
        end: usize,
    ) -> (Vec<usize>, Vec<f64>) {
        let width = shape.last().copied().unwrap_or(1);
        let mut out_shape = shape.to_vec();
        if let Some(last) = out_shape.last_mut() {
            *last = end - start;
        }
        let data = data
            .par_chunks(width.max(1))
            .flat_map_iter(|row| row[start..end].iter().copied())
            .collect();
        (out_shape, data)
    }

    pub fn concat_last_axis_slices(parts: &[(&[usize], &[f64])]) -> (Vec<usize>, Vec<f64>) {
        let widths: Vec<usize> = parts
            .iter()
            .map(|(shape, _)| shape.last().copied().unwrap_or(1))
            .collect();
        let total: usize = widths.iter().sum();
        let rows = parts.first().map_or(0, |(shape, data)| {
            data.len() / shape.last().copied().unwrap_or(1).max(1)
        });
        let mut out_shape = parts.first().map_or_else(Vec::new, |(shape, _)| shape.to_vec());
        if let Some(last) = out_shape.last_mut() {
            *last = total;
        }
        let mut data = vec![0.0; rows * total];
        data.par_chunks_mut(total.max(1)).enumerate().for_each(|(r, row)| {
            let mut col = 0;
            for ((_, part), &w) in parts.iter().zip(&widths) {
                row[col..col + w].copy_from_slice(&part[r * w..(r + 1) * w]);
                col += w;
            }
        });
        (out_shape, data)
    }
}

impl ArrayBackend for CpuBackend {
    fn kind(&self) -> Backend {
        Backend::Cpu
    }

    fn allocate(&self, array: Array) -> Result<Storage> {
        Ok(Storage::host(array))
    }

    fn to_host(&self, storage: &Storage) -> Result<Array> {
        Ok(host(storage)?.clone())
    }

    fn map(&self, input: &Storage, kernel: UnaryKernel) -> Result<Storage> {
        let array = host(input)?;
        Ok(store(
            array.shape().to_vec(),
            Self::map_slice(array.data(), kernel),
        ))
    }

    fn zip(
        &self,
        lhs: &Storage,
        rhs: &Storage,
        out_shape: &[usize],
        kernel: BinaryKernel,
    ) -> Result<Storage> {
        let (a, b) = (host(lhs)?, host(rhs)?);
        let len = out_shape.iter().product();
        Ok(store(
            out_shape.to_vec(),
            Self::zip_slices(a.data(), b.data(), len, kernel),
        ))
    }

    fn contract(&self, plan: &ContractionPlan, operands: &[&Storage]) -> Result<Storage> {
        let slices = operands
            .iter()
            .map(|s| host(s).map(Array::data))
            .collect::<Result<Vec<_>>>()?;
        Ok(store(
            plan.out_shape().to_vec(),
            Self::contract_slices(plan, &slices),
        ))
    }

    fn slice_last_axis(&self, input: &Storage, start: usize, end: usize) -> Result<Storage> {
        let array = host(input)?;
        let (shape, data) = Self::slice_last_axis_slice(array.data(), array.shape(), start, end);
        Ok(store(shape, data))
    }

    fn concat_last_axis(&self, parts: &[&Storage]) -> Result<Storage> {
        let arrays = parts.iter().map(|s| host(s)).collect::<Result<Vec<_>>>()?;
        let views: Vec<(&[usize], &[f64])> =
            arrays.iter().map(|a| (a.shape(), a.data())).collect();
        let (shape, data) = Self::concat_last_axis_slices(&views);
        Ok(store(shape, data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::einsum::Subscript;

    fn contract(notation: &str, shapes: &[&[usize]], data: &[&[f64]]) -> Vec<f64> {
        let subscript = Subscript::parse(notation).unwrap();
        let plan = ContractionPlan::new(&subscript, shapes, &[]).unwrap();
        CpuBackend::contract_slices(&plan, data)
    }

    #[test]
    fn matmul_contraction() {
        let a = [1.0, 2.0, 3.0, 4.0];
        let b = [5.0, 6.0, 7.0, 8.0];
        let out = contract("ab,bc->ac", &[&[2, 2], &[2, 2]], &[&a, &b]);
        assert_eq!(out, vec![19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn trace_and_diagonal() {
        let a = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(contract("aa->", &[&[2, 2]], &[&a]), vec![5.0]);
        assert_eq!(contract("aa->a", &[&[2, 2]], &[&a]), vec![1.0, 4.0]);
    }

    #[test]
    fn transpose_and_sum() {
        let a = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        assert_eq!(
            contract("ab->ba", &[&[2, 3]], &[&a]),
            vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]
        );
        assert_eq!(contract("ab->a", &[&[2, 3]], &[&a]), vec![6.0, 15.0]);
    }

    #[test]
    fn writing_a_diagonal_leaves_zeros_elsewhere() {
        let subscript = Subscript::parse("a->aa").unwrap();
        let plan = ContractionPlan::new(&subscript, &[&[2]], &[]).unwrap();
        let out = CpuBackend::contract_slices(&plan, &[&[3.0, 4.0]]);
        assert_eq!(out, vec![3.0, 0.0, 0.0, 4.0]);
    }

    #[test]
    fn zip_repeats_the_shorter_operand() {
        let out = CpuBackend::zip_slices(&[1.0, 2.0, 3.0, 4.0], &[10.0, 20.0], 4, BinaryKernel::Add);
        assert_eq!(out, vec![11.0, 22.0, 13.0, 24.0]);
    }

    #[test]
    fn split_then_concat_restores_rows() {
        let data = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let (ls, left) = CpuBackend::slice_last_axis_slice(&data, &[2, 3], 0, 1);
        let (rs, right) = CpuBackend::slice_last_axis_slice(&data, &[2, 3], 1, 3);
        assert_eq!(left, vec![1.0, 4.0]);
        let (shape, joined) = CpuBackend::concat_last_axis_slices(&[
            (ls.as_slice(), left.as_slice()),
            (rs.as_slice(), right.as_slice()),
        ]);
        assert_eq!(shape, vec![2, 3]);
        assert_eq!(joined, data.to_vec());
    }
}

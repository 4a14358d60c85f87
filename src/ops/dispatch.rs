//! Operation Dispatch Layer
//!
//! Picks the [`ArrayBackend`] for each storage-level computation from the
//! storages themselves. A storage can only exist on a backend that was
//! compiled in, so resolving from a storage never fails; resolving from a
//! bare [`Backend`] (a transfer target) can.
//!
//! Multi-operand computations require every operand on the same backend and
//! fail with [`Error::BackendMismatch`] otherwise. Nothing is copied behind
//! the caller's back.

use crate::backend::{ArrayBackend, Backend};
use crate::einsum::ContractionPlan;
use crate::error::{Error, Result};
use crate::ops::cpu::CpuBackend;
use crate::ops::kernel::{BinaryKernel, UnaryKernel};
use crate::storage::Storage;

static CPU: CpuBackend = CpuBackend;

#[cfg(feature = "wgpu")]
static WGPU: crate::ops::wgpu::WgpuBackend = crate::ops::wgpu::WgpuBackend;

/// The implementation serving `backend`.
///
/// # Errors
/// [`Error::BackendUnavailable`] when the backend was not compiled in.
pub fn backend_for(backend: Backend) -> Result<&'static dyn ArrayBackend> {
    match backend {
        Backend::Cpu => Ok(&CPU),
        #[cfg(feature = "wgpu")]
        Backend::Wgpu => Ok(&WGPU),
        #[cfg(not(feature = "wgpu"))]
        Backend::Wgpu => Err(Error::BackendUnavailable(backend)),
    }
}

/// The implementation owning `storage`.
pub fn backend_of(storage: &Storage) -> &'static dyn ArrayBackend {
    match storage {
        Storage::Host(_) => &CPU,
        #[cfg(feature = "wgpu")]
        Storage::Device(_) => &WGPU,
    }
}

/// The single backend shared by all `storages`.
pub fn common_backend(storages: &[&Storage]) -> Result<&'static dyn ArrayBackend> {
    let Some(first) = storages.first() else {
        return Ok(&CPU);
    };
    let kind = first.backend();
    if let Some(other) = storages.iter().find(|s| s.backend() != kind) {
        return Err(Error::BackendMismatch {
            lhs: kind,
            rhs: other.backend(),
        });
    }
    Ok(backend_of(first))
}

pub fn map(input: &Storage, kernel: UnaryKernel) -> Result<Storage> {
    backend_of(input).map(input, kernel)
}

pub fn zip(lhs: &Storage, rhs: &Storage, out_shape: &[usize], kernel: BinaryKernel) -> Result<Storage> {
    common_backend(&[lhs, rhs])?.zip(lhs, rhs, out_shape, kernel)
}

pub fn contract(plan: &ContractionPlan, operands: &[&Storage]) -> Result<Storage> {
    common_backend(operands)?.contract(plan, operands)
}

pub fn slice_last_axis(input: &Storage, start: usize, end: usize) -> Result<Storage> {
    backend_of(input).slice_last_axis(input, start, end)
}

pub fn concat_last_axis(parts: &[&Storage]) -> Result<Storage> {
    common_backend(parts)?.concat_last_axis(parts)
}

/// A constant array placed on the same backend as `like`.
pub fn full_like(like: &Storage, shape: &[usize], value: f64) -> Result<Storage> {
    backend_of(like).allocate(crate::array::Array::full(shape, value))
}

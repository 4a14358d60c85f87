//! Backend selection and the array-backend capability interface.
//!
//! This module defines the available array backends, the [`ArrayBackend`]
//! trait every backend implements, and a process-wide *default* backend.
//!
//! # Supported Backends
//!
//! - `Cpu`: Pure Rust host backend parallelised with `rayon` (default).
//! - `Wgpu`: GPU backend using `wgpu` (requires the `wgpu` feature).
//!
//! # Resolution
//!
//! Operators never look at the default backend. They resolve the backend from
//! the [`Storage`] of their operands (see [`crate::ops::dispatch`]), so a graph
//! built from accelerator-resident values stays on the accelerator.
//!
//! The default backend is stored globally using an `AtomicU8` and is only
//! consulted where values are created from nothing, i.e. layer parameters.

use crate::array::Array;
use crate::einsum::ContractionPlan;
use crate::error::Result;
use crate::ops::kernel::{BinaryKernel, UnaryKernel};
use crate::storage::Storage;
use core::convert::TryFrom;
use core::sync::atomic::{AtomicU8, Ordering};

/// Enumeration of supported array backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum Backend {
    /// Host memory, computed with `rayon` (default).
    #[default]
    Cpu = 0,
    /// Accelerator memory managed through `wgpu`.
    Wgpu,
}

impl TryFrom<u8> for Backend {
    type Error = ();

    fn try_from(value: u8) -> core::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Cpu),
            1 => Ok(Self::Wgpu),
            _ => Err(()),
        }
    }
}

/// What an array backend must be able to do for the operator registry.
///
/// Every method receives storages that live on `self` and returns storage on
/// `self`. Shapes have already been checked by the caller; implementations
/// only compute.
pub trait ArrayBackend: Sync {
    fn kind(&self) -> Backend;

    /// Places a host array on this backend.
    fn allocate(&self, array: Array) -> Result<Storage>;

    /// Blocking copy of `storage` back into host memory.
    fn to_host(&self, storage: &Storage) -> Result<Array>;

    /// Applies `kernel` to every element.
    fn map(&self, input: &Storage, kernel: UnaryKernel) -> Result<Storage>;

    /// Combines two storages elementwise into an array of `out_shape`.
    ///
    /// The shorter operand is repeated across the leading axis of the longer
    /// one, which is exactly how an unbatched operand meets a batched one.
    fn zip(
        &self,
        lhs: &Storage,
        rhs: &Storage,
        out_shape: &[usize],
        kernel: BinaryKernel,
    ) -> Result<Storage>;

    /// Evaluates a validated einsum contraction.
    fn contract(&self, plan: &ContractionPlan, operands: &[&Storage]) -> Result<Storage>;

    /// Copies `start..end` of the last axis.
    fn slice_last_axis(&self, input: &Storage, start: usize, end: usize) -> Result<Storage>;

    /// Joins storages that agree on every axis but the last.
    fn concat_last_axis(&self, parts: &[&Storage]) -> Result<Storage>;
}

/// Internal global state for the default backend.
///
/// Relaxed semantics are enough: the default only changes between training
/// runs, never while values are being created.
static GLOBAL_DEFAULT_BACKEND: AtomicU8 = AtomicU8::new(Backend::Cpu as u8);

/// Sets the backend new parameters are created on.
///
/// # Example
///
/// ```
/// use gradlane::backend::{get_backend, set_backend, Backend};
/// set_backend(Backend::Cpu);
/// assert_eq!(get_backend(), Backend::Cpu);
/// ```
pub fn set_backend(b: Backend) {
    GLOBAL_DEFAULT_BACKEND.store(b as u8, Ordering::Release);
}

/// Returns the default backend.
///
/// If the stored value is invalid, defaults to [`Backend::Cpu`].
pub fn get_backend() -> Backend {
    Backend::try_from(GLOBAL_DEFAULT_BACKEND.load(Ordering::Acquire)).unwrap_or_default()
}

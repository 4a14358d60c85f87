//! # Array Backends
//!
//! Storage-level computation behind every operator, split by backend.
//!
//! ## Submodules
//!
//! - [`kernel`]: Elementwise kernel descriptions shared by all backends
//! - [`cpu`]: Multi-threaded host backend (always available)
//! - [`wgpu`] *(opt-in)*: Accelerator backend using `wgpu` compute shaders
//! - [`dispatch`]: Resolves the backend from operand storages
//!
//! ## Extending the Backend
//!
//! To add a new elementwise kernel:
//!
//! 1. Add a variant to [`kernel::UnaryKernel`] or [`kernel::BinaryKernel`]
//! 2. Evaluate it in `apply` and give it an opcode
//! 3. Handle the opcode in `shaders/elementwise.wgsl`
//!
//! ## Feature Flags
//!
//! - `wgpu`: Enables the `wgpu` (WebGPU) backend

pub mod cpu;
pub mod dispatch;
pub mod kernel;
#[cfg(feature = "wgpu")]
pub mod wgpu;

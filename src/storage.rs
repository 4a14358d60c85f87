//! Backend-resident numeric payloads.

use crate::array::Array;
use crate::backend::Backend;
use crate::error::Result;
use crate::ops::dispatch;
use std::rc::Rc;

/// An immutable array living on one backend.
///
/// Cloning is cheap: storages are shared, never written through. Replacing a
/// value's payload swaps the whole storage.
#[derive(Debug, Clone)]
pub enum Storage {
    Host(Rc<Array>),
    #[cfg(feature = "wgpu")]
    Device(Rc<crate::ops::wgpu::DeviceArray>),
}

impl Storage {
    pub fn host(array: Array) -> Self {
        Self::Host(Rc::new(array))
    }

    pub fn backend(&self) -> Backend {
        match self {
            Self::Host(_) => Backend::Cpu,
            #[cfg(feature = "wgpu")]
            Self::Device(_) => Backend::Wgpu,
        }
    }

    pub fn shape(&self) -> &[usize] {
        match self {
            Self::Host(array) => array.shape(),
            #[cfg(feature = "wgpu")]
            Self::Device(array) => array.shape(),
        }
    }

    pub fn len(&self) -> usize {
        self.shape().iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Host copy of the payload, downloading if necessary.
    pub fn to_array(&self) -> Result<Array> {
        match self {
            Self::Host(array) => Ok(Array::clone(array)),
            #[cfg(feature = "wgpu")]
            Self::Device(_) => dispatch::backend_of(self).to_host(self),
        }
    }

    /// Moves the payload to `backend`, returning `self` unchanged if it is
    /// already there.
    pub fn transfer(&self, backend: Backend) -> Result<Self> {
        if self.backend() == backend {
            return Ok(self.clone());
        }
        let array = self.to_array()?;
        dispatch::backend_for(backend)?.allocate(array)
    }
}

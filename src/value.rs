//! The differentiable value.
//!
//! # Values
//!
//! A [`Value`] is a cheap handle to one node of a computational graph: a
//! numeric payload ([`Storage`]) plus the bookkeeping needed to differentiate
//! through it.
//!
//! - **Leaves** are built directly from data. They have no arguments and are
//!   where gradients accumulate.
//! - **Internal nodes** are produced by operators. They remember their
//!   arguments and one backward function per argument.
//!
//! Graph edges are only recorded when at least one argument requires a
//! gradient; anything computed purely from constants is itself a constant
//! leaf.
//!
//! Cloning a `Value` clones the handle, not the node. Identity, not equality,
//! distinguishes nodes: [`Value::id`] is unique per node.
//!
//! ## Example
//!
//! ```rust
//! use gradlane::value::Value;
//!
//! let x = Value::new(2.0);
//! let y = (&x * &x).unwrap();
//! y.backward().unwrap();
//! assert_eq!(x.grad().unwrap().to_array().unwrap().data(), &[4.0]);
//! ```

use crate::approx::{ApproxEquality, RelativeEq};
use crate::array::Array;
use crate::backend::Backend;
use crate::backprop;
use crate::error::{Error, Result};
use crate::storage::Storage;
use std::cell::{Cell, Ref, RefCell};
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Maps the gradient of an operator's output to the gradient of one of its
/// arguments.
///
/// Backward functions capture plain storages taken at forward time, never
/// graph nodes, so computed gradients hold no references into the graph.
pub type BackwardFn = Rc<dyn Fn(&Value) -> Result<Value>>;

/// Unique identity of a graph node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(u64);

static NEXT_ID: AtomicU64 = AtomicU64::new(0);

impl ValueId {
    fn fresh() -> Self {
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

struct Node {
    id: ValueId,
    storage: RefCell<Storage>,
    is_batched: Cell<bool>,
    requires_grad: Cell<bool>,
    name: RefCell<Option<String>>,
    args: Option<Vec<Value>>,
    back_fns: Option<Vec<BackwardFn>>,
    grad: RefCell<Option<Value>>,
}

/// Handle to a node of the computational graph.
#[derive(Clone)]
pub struct Value(Rc<Node>);

/// Options for building a leaf.
#[derive(Debug, Clone)]
pub struct ValueBuilder {
    array: Array,
    requires_grad: bool,
    is_batched: bool,
    name: Option<String>,
}

impl ValueBuilder {
    pub fn requires_grad(mut self, requires_grad: bool) -> Self {
        self.requires_grad = requires_grad;
        self
    }

    pub fn batched(mut self, is_batched: bool) -> Self {
        self.is_batched = is_batched;
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Builds a host-resident leaf.
    pub fn build(self) -> Value {
        let value = Value::leaf(Storage::host(self.array), self.is_batched, self.requires_grad);
        *value.0.name.borrow_mut() = self.name;
        value
    }
}

/// Shorthand for [`Value::new`].
pub fn to_value(data: impl Into<Array>) -> Value {
    Value::new(data)
}

impl Value {
    /// A differentiable, unbatched, unnamed leaf on the host.
    pub fn new(data: impl Into<Array>) -> Self {
        Self::builder(data).build()
    }

    /// A leaf that never receives a gradient.
    pub fn constant(data: impl Into<Array>) -> Self {
        Self::builder(data).requires_grad(false).build()
    }

    pub fn builder(data: impl Into<Array>) -> ValueBuilder {
        ValueBuilder {
            array: data.into(),
            requires_grad: true,
            is_batched: false,
            name: None,
        }
    }

    /// A leaf over an existing storage.
    pub fn leaf(storage: Storage, is_batched: bool, requires_grad: bool) -> Self {
        Self(Rc::new(Node {
            id: ValueId::fresh(),
            storage: RefCell::new(storage),
            is_batched: Cell::new(is_batched),
            requires_grad: Cell::new(requires_grad),
            name: RefCell::new(None),
            args: None,
            back_fns: None,
            grad: RefCell::new(None),
        }))
    }

    /// A non-differentiable leaf, the form every gradient takes.
    pub fn detached(storage: Storage, is_batched: bool) -> Self {
        Self::leaf(storage, is_batched, false)
    }

    /// Result of an operator applied to `args`.
    ///
    /// `back_fns[i]` must differentiate with respect to `args[i]`. The edges
    /// are only kept if some argument requires a gradient.
    ///
    /// # Errors
    /// [`Error::InvariantViolation`] if the two lists differ in length.
    pub fn from_op(
        storage: Storage,
        is_batched: bool,
        args: Vec<Value>,
        back_fns: Vec<BackwardFn>,
    ) -> Result<Self> {
        if args.len() != back_fns.len() {
            return Err(Error::InvariantViolation(format!(
                "{} arguments but {} backward functions",
                args.len(),
                back_fns.len()
            )));
        }
        if !args.iter().any(Value::requires_grad) {
            return Ok(Self::detached(storage, is_batched));
        }
        Ok(Self(Rc::new(Node {
            id: ValueId::fresh(),
            storage: RefCell::new(storage),
            is_batched: Cell::new(is_batched),
            requires_grad: Cell::new(true),
            name: RefCell::new(None),
            args: Some(args),
            back_fns: Some(back_fns),
            grad: RefCell::new(None),
        })))
    }

    pub fn id(&self) -> ValueId {
        self.0.id
    }

    /// Snapshot of the payload. Cheap: storages are shared.
    pub fn storage(&self) -> Storage {
        self.0.storage.borrow().clone()
    }

    pub fn storage_ref(&self) -> Ref<'_, Storage> {
        self.0.storage.borrow()
    }

    /// Host copy of the payload, downloading from the accelerator if needed.
    pub fn to_array(&self) -> Result<Array> {
        self.0.storage.borrow().to_array()
    }

    pub fn shape(&self) -> Vec<usize> {
        self.0.storage.borrow().shape().to_vec()
    }

    pub fn ndim(&self) -> usize {
        self.0.storage.borrow().shape().len()
    }

    pub fn backend(&self) -> Backend {
        self.0.storage.borrow().backend()
    }

    pub fn is_batched(&self) -> bool {
        self.0.is_batched.get()
    }

    pub fn requires_grad(&self) -> bool {
        self.0.requires_grad.get()
    }

    pub fn is_leaf(&self) -> bool {
        self.0.args.is_none() && self.0.back_fns.is_none()
    }

    /// Marks a leaf as batched or not.
    ///
    /// # Errors
    /// [`Error::InvariantViolation`] on an internal node.
    pub fn set_batched(&self, is_batched: bool) -> Result<()> {
        self.ensure_leaf("change the batch flag of")?;
        self.0.is_batched.set(is_batched);
        Ok(())
    }

    /// Turns gradient tracking on or off for a leaf.
    ///
    /// # Errors
    /// [`Error::InvariantViolation`] on an internal node.
    pub fn set_requires_grad(&self, requires_grad: bool) -> Result<()> {
        self.ensure_leaf("change gradient tracking of")?;
        self.0.requires_grad.set(requires_grad);
        Ok(())
    }

    pub fn name(&self) -> Option<String> {
        self.0.name.borrow().clone()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        *self.0.name.borrow_mut() = Some(name.into());
    }

    pub fn args(&self) -> Option<&[Value]> {
        self.0.args.as_deref()
    }

    pub fn back_fns(&self) -> Option<&[BackwardFn]> {
        self.0.back_fns.as_deref()
    }

    pub fn grad(&self) -> Option<Value> {
        self.0.grad.borrow().clone()
    }

    pub fn set_grad(&self, grad: Option<Value>) {
        *self.0.grad.borrow_mut() = grad;
    }

    /// Clears the accumulated gradient. Calling it twice is the same as once.
    pub fn zero_grad(&self) {
        self.0.grad.borrow_mut().take();
    }

    /// Differentiates this value with respect to every reachable leaf that
    /// requires a gradient, adding the result onto each leaf's gradient.
    pub fn backward(&self) -> Result<()> {
        backprop::backward(self)
    }

    /// Replaces a leaf's payload, e.g. after an optimiser step.
    ///
    /// # Errors
    /// - [`Error::InvariantViolation`] on an internal node
    /// - [`Error::ShapeMismatch`] if the shape would change
    pub fn assign(&self, storage: Storage) -> Result<()> {
        self.ensure_leaf("assign to")?;
        let current = self.shape();
        if storage.shape() != current.as_slice() {
            return Err(Error::shape_mismatch(&current, storage.shape()));
        }
        *self.0.storage.borrow_mut() = storage;
        Ok(())
    }

    /// Moves the payload to `backend` with a blocking copy. Identity, graph
    /// edges, flags, name and gradient are untouched.
    pub fn to_backend(&self, backend: Backend) -> Result<()> {
        let moved = self.0.storage.borrow().transfer(backend)?;
        debug!(id = self.0.id.0, ?backend, "transferred value");
        *self.0.storage.borrow_mut() = moved;
        Ok(())
    }

    /// Moves the payload to the accelerator.
    ///
    /// # Errors
    /// [`Error::BackendUnavailable`] when built without the `wgpu` feature.
    pub fn to_accelerator(&self) -> Result<()> {
        self.to_backend(Backend::Wgpu)
    }

    /// Moves the payload to host memory.
    pub fn to_host(&self) -> Result<()> {
        self.to_backend(Backend::Cpu)
    }

    /// Whether the payloads agree elementwise within [`ApproxEquality::Relative`]
    /// tolerance. Batch flags must agree as well.
    pub fn close_to(&self, other: &Value) -> Result<bool> {
        if self.is_batched() != other.is_batched() {
            return Ok(false);
        }
        let (a, b) = (self.to_array()?, other.to_array()?);
        if a.shape() != b.shape() {
            return Ok(false);
        }
        Ok(a.data().approx_eq(b.data()) != ApproxEquality::Scarce)
    }

    fn ensure_leaf(&self, action: &str) -> Result<()> {
        if self.is_leaf() {
            Ok(())
        } else {
            Err(Error::InvariantViolation(format!(
                "cannot {action} an internal node"
            )))
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let storage = self.0.storage.borrow();
        let mut s = f.debug_struct("Value");
        s.field("id", &self.0.id.0);
        if let Some(name) = self.0.name.borrow().as_deref() {
            s.field("name", &name);
        }
        s.field("shape", &storage.shape())
            .field("backend", &storage.backend())
            .field("is_batched", &self.is_batched())
            .field("requires_grad", &self.requires_grad());
        if let Storage::Host(array) = &*storage {
            s.field("data", &array.data());
        }
        if let Some(args) = self.args() {
            s.field("args", &args.len());
        }
        s.finish()
    }
}

impl From<Array> for Value {
    fn from(array: Array) -> Self {
        Self::new(array)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> BackwardFn {
        Rc::new(|g: &Value| -> Result<Value> { Ok(g.clone()) })
    }

    #[test]
    fn defaults_follow_construction_rules() {
        let v = Value::new(vec![1.0, 2.0]);
        assert!(v.requires_grad());
        assert!(!v.is_batched());
        assert!(v.is_leaf());
        assert!(v.grad().is_none());
        assert_eq!(v.name(), None);
    }

    #[test]
    fn mismatched_edges_are_rejected() {
        let x = Value::new(1.0);
        let err = Value::from_op(x.storage(), false, vec![x.clone()], vec![]).unwrap_err();
        assert!(matches!(err, Error::InvariantViolation(_)));
    }

    #[test]
    fn constants_do_not_record_edges() {
        let c = Value::constant(1.0);
        let out = Value::from_op(c.storage(), false, vec![c], vec![identity()]).unwrap();
        assert!(out.is_leaf());
        assert!(!out.requires_grad());
    }

    #[test]
    fn ids_are_unique() {
        let a = Value::new(1.0);
        let b = Value::new(1.0);
        assert_ne!(a.id(), b.id());
        assert_eq!(a.id(), a.clone().id());
    }

    #[test]
    fn internal_nodes_refuse_flag_changes() {
        let x = Value::new(1.0);
        let y = Value::from_op(x.storage(), false, vec![x.clone()], vec![identity()]).unwrap();
        assert!(y.set_batched(true).is_err());
        assert!(y.assign(Storage::host(Array::scalar(3.0))).is_err());
        assert!(x.set_batched(true).is_ok());
    }

    #[test]
    fn host_transfer_keeps_identity() {
        let x = Value::builder(vec![1.0]).name("x").build();
        let id = x.id();
        x.to_host().unwrap();
        assert_eq!(x.id(), id);
        assert_eq!(x.name().as_deref(), Some("x"));
    }

    #[cfg(not(feature = "wgpu"))]
    #[test]
    fn accelerator_needs_the_feature() {
        let x = Value::new(1.0);
        assert!(matches!(
            x.to_accelerator(),
            Err(Error::BackendUnavailable(Backend::Wgpu))
        ));
        assert_eq!(x.backend(), Backend::Cpu);
    }
}

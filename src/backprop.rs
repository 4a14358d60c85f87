//! Reverse-mode differentiation by path replay.
//!
//! # Backward Pass
//!
//! Gradients are computed in two phases.
//!
//! 1. **Discovery.** A depth-first walk from the root follows every argument
//!    that requires a gradient, carrying the backward functions met so far.
//!    Reaching a leaf records that list as one *path* to the leaf. A value
//!    used twice is reached twice, so it collects two paths.
//! 2. **Replay.** Every path starts from a seed of ones shaped like the root
//!    and applies its backward functions in order, closest to the root
//!    first. A leaf's gradient is the sum over its paths, added onto
//!    whatever gradient it already holds.
//!
//! Discovery hands its results to replay as an explicit [`Traversal`]; no
//! scratch state is left on the values.
//!
//! The number of paths grows with the number of distinct routes through the
//! graph, which is exponential for some diamond-heavy graphs. Graphs built by
//! the layer library stay small enough for this to be irrelevant.

use crate::array::Array;
use crate::binary::accumulate;
use crate::error::{Error, Result};
use crate::ops::dispatch;
use crate::value::{BackwardFn, Value, ValueId};
use std::collections::HashMap;
use tracing::{debug, trace};

/// The backward functions between the root and one leaf, root side first.
pub type Path = Vec<BackwardFn>;

/// A leaf reached during discovery with every path leading to it.
pub struct PendingLeaf {
    pub value: Value,
    pub paths: Vec<Path>,
}

/// Result of the discovery phase.
#[derive(Default)]
pub struct Traversal {
    leaves: Vec<PendingLeaf>,
    index: HashMap<ValueId, usize>,
}

impl Traversal {
    /// Leaves in first-reached order.
    pub fn leaves(&self) -> &[PendingLeaf] {
        &self.leaves
    }

    pub fn path_count(&self) -> usize {
        self.leaves.iter().map(|l| l.paths.len()).sum()
    }

    fn record(&mut self, leaf: &Value, path: Path) {
        match self.index.get(&leaf.id()) {
            Some(&slot) => self.leaves[slot].paths.push(path),
            None => {
                self.index.insert(leaf.id(), self.leaves.len());
                self.leaves.push(PendingLeaf {
                    value: leaf.clone(),
                    paths: vec![path],
                });
            }
        }
    }
}

/// Phase one: every path from `root` to every leaf that requires a gradient.
///
/// # Errors
/// [`Error::InvariantViolation`] if a node's arguments and backward functions
/// disagree.
pub fn discover(root: &Value) -> Result<Traversal> {
    let mut traversal = Traversal::default();
    let mut stack: Vec<(Value, Path)> = vec![(root.clone(), Vec::new())];

    while let Some((node, path)) = stack.pop() {
        match (node.args(), node.back_fns()) {
            (None, None) => {
                if node.requires_grad() {
                    traversal.record(&node, path);
                }
            }
            (Some(args), Some(back_fns)) if args.len() == back_fns.len() => {
                for (arg, back_fn) in args.iter().zip(back_fns) {
                    if !arg.requires_grad() {
                        continue;
                    }
                    let mut next = path.clone();
                    next.push(back_fn.clone());
                    stack.push((arg.clone(), next));
                }
            }
            _ => {
                return Err(Error::InvariantViolation(format!(
                    "node {:?} has mismatched arguments and backward functions",
                    node.id()
                )));
            }
        }
    }

    Ok(traversal)
}

/// Phase two: replays every path from a seed of ones and accumulates onto
/// the leaves.
///
/// All gradients are computed before any leaf is written, so an error leaves
/// every gradient as it was.
pub fn replay(root: &Value, traversal: Traversal) -> Result<()> {
    if traversal.leaves.is_empty() {
        return Ok(());
    }

    let root_storage = root.storage();
    let seed_storage = dispatch::backend_of(&root_storage)
        .allocate(Array::ones(root_storage.shape()))?;
    let seed = Value::detached(seed_storage, root.is_batched());

    let mut updates = Vec::with_capacity(traversal.leaves.len());
    for PendingLeaf { value, paths } in traversal.leaves {
        let mut total: Option<Value> = None;
        for path in &paths {
            let mut grad = seed.clone();
            for back_fn in path {
                grad = back_fn(&grad)?;
            }
            total = Some(match total {
                None => grad,
                Some(sum) => accumulate(&sum, &grad)?,
            });
        }
        let Some(total) = total else { continue };
        let updated = match value.grad() {
            None => total,
            Some(existing) => accumulate(&existing, &total)?,
        };
        trace!(leaf = ?value.id(), paths = paths.len(), "leaf gradient ready");
        updates.push((value, updated));
    }

    for (leaf, grad) in updates {
        leaf.set_grad(Some(grad));
    }
    Ok(())
}

/// Runs both phases from `root`.
pub fn backward(root: &Value) -> Result<()> {
    let traversal = discover(root)?;
    debug!(
        root = ?root.id(),
        leaves = traversal.leaves.len(),
        paths = traversal.path_count(),
        "backward pass"
    );
    replay(root, traversal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Storage;
    use std::rc::Rc;

    fn scale(by: f64) -> BackwardFn {
        Rc::new(move |g: &Value| -> Result<Value> {
            let data: Vec<f64> = g.to_array()?.data().iter().map(|x| x * by).collect();
            Ok(Value::detached(Storage::host(Array::from(data)), g.is_batched()))
        })
    }

    #[test]
    fn shared_leaf_collects_one_path_per_use() {
        let x = Value::new(vec![1.0]);
        let y = Value::from_op(
            x.storage(),
            false,
            vec![x.clone(), x.clone()],
            vec![scale(2.0), scale(3.0)],
        )
        .unwrap();
        let traversal = discover(&y).unwrap();
        assert_eq!(traversal.leaves().len(), 1);
        assert_eq!(traversal.path_count(), 2);

        replay(&y, traversal).unwrap();
        assert_eq!(x.grad().unwrap().to_array().unwrap().data(), &[5.0]);
    }

    #[test]
    fn root_leaf_gets_ones() {
        let x = Value::new(vec![3.0, 4.0]);
        x.backward().unwrap();
        assert_eq!(x.grad().unwrap().to_array().unwrap().data(), &[1.0, 1.0]);
    }

    #[test]
    fn constant_root_is_a_no_op() {
        let c = Value::constant(vec![3.0]);
        c.backward().unwrap();
        assert!(c.grad().is_none());
    }

    #[test]
    fn failing_backward_fn_leaves_grads_untouched() {
        let a = Value::new(vec![1.0]);
        let b = Value::new(vec![1.0]);
        let boom: BackwardFn =
            Rc::new(|_: &Value| -> Result<Value> { Err(Error::UnsupportedOperation("boom")) });
        let y = Value::from_op(
            a.storage(),
            false,
            vec![a.clone(), b.clone()],
            vec![scale(1.0), boom],
        )
        .unwrap();
        assert!(y.backward().is_err());
        assert!(a.grad().is_none());
        assert!(b.grad().is_none());
    }
}

//! Reusable leaf buffers, sized once per strategy.
//!
//! At every schedule leaf the engine assembles contiguous column-major A and
//! B operands and computes a C contribution. The pool allocates those three
//! arenas up front from the strategy's largest possible leaf dimensions, so
//! the recursion never allocates leaf storage, and a context reused across
//! multiply calls reuses the arenas too.

use crate::error::{Error, Result};
use crate::strategy::Strategy;
use crate::types::Scalar;

/// The three leaf arenas of one process.
#[derive(Debug)]
pub struct BufferPool<T> {
    leaf_a: Vec<T>,
    leaf_b: Vec<T>,
    leaf_c: Vec<T>,
}

impl<T: Scalar> BufferPool<T> {
    /// Sizes the arenas for `strategy`'s largest leaf.
    pub fn for_strategy(strategy: &Strategy) -> Result<Self> {
        let (lm, ln, lk) = strategy.max_leaf_dims();
        let sizes = [lm * lk, lk * ln, lm * ln];
        if sizes.iter().any(|&s| s == 0) {
            return Err(Error::InvalidInput(
                "strategy admits an empty leaf problem".into(),
            ));
        }
        Ok(BufferPool {
            leaf_a: vec![T::zero(); sizes[0]],
            leaf_b: vec![T::zero(); sizes[1]],
            leaf_c: vec![T::zero(); sizes[2]],
        })
    }

    /// Total elements held by the arenas.
    pub fn capacity_elements(&self) -> usize {
        self.leaf_a.len() + self.leaf_b.len() + self.leaf_c.len()
    }

    /// Mutable views of the three arenas; the leaf slices what it needs.
    pub fn leaf_buffers(&mut self) -> (&mut [T], &mut [T], &mut [T]) {
        (&mut self.leaf_a, &mut self.leaf_b, &mut self.leaf_c)
    }
}

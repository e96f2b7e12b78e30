//! Owned rectangular matrix pieces.
//!
//! A [`Block`] pairs an [`Interval2D`](crate::interval::Interval2D) region
//! with its elements in column-major order; a [`BlockSet`] is a disjoint
//! collection of blocks of the same matrix. The engine's resident data for A
//! and B, and the contribution sets flowing back for C, are block sets whose
//! regions both sides of every transfer derive independently, so only raw
//! elements travel over the transport.

use crate::error::{Error, Result};
use crate::interval::Interval2D;
use crate::types::Scalar;

/// A rectangular piece of a matrix with column-major storage.
#[derive(Debug, Clone, PartialEq)]
pub struct Block<T> {
    region: Interval2D,
    data: Vec<T>,
}

impl<T: Scalar> Block<T> {
    /// A zero-filled block covering `region`.
    pub fn zeros(region: Interval2D) -> Self {
        Self {
            region,
            data: vec![T::zero(); region.size()],
        }
    }

    /// Wraps existing column-major data.
    ///
    /// # Panics
    ///
    /// Panics if `data.len()` differs from `region.size()`.
    pub fn from_parts(region: Interval2D, data: Vec<T>) -> Self {
        assert_eq!(
            data.len(),
            region.size(),
            "block data length {} does not match region size {}",
            data.len(),
            region.size()
        );
        Self { region, data }
    }

    pub fn region(&self) -> Interval2D {
        self.region
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn into_data(self) -> Vec<T> {
        self.data
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> T {
        let idx = self
            .region
            .local_index(row, col)
            .expect("element outside block region");
        self.data[idx]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, value: T) {
        let idx = self
            .region
            .local_index(row, col)
            .expect("element outside block region");
        self.data[idx] = value;
    }

    /// Copies the overlap of `src` into this block.
    pub fn paste(&mut self, src: &Block<T>) {
        let Some(overlap) = self.region.intersection(src.region) else {
            return;
        };
        let dst_rows = self.region.rows.length();
        let src_rows = src.region.rows.length();
        let seg = overlap.rows.length();
        for c in overlap.cols.first()..=overlap.cols.last() {
            let d0 = (c - self.region.cols.first()) * dst_rows
                + (overlap.rows.first() - self.region.rows.first());
            let s0 = (c - src.region.cols.first()) * src_rows
                + (overlap.rows.first() - src.region.rows.first());
            self.data[d0..d0 + seg].copy_from_slice(&src.data[s0..s0 + seg]);
        }
    }

    /// Adds the overlap of `src` into this block element-wise.
    pub fn accumulate(&mut self, src: &Block<T>) {
        let Some(overlap) = self.region.intersection(src.region) else {
            return;
        };
        let dst_rows = self.region.rows.length();
        let src_rows = src.region.rows.length();
        let seg = overlap.rows.length();
        for c in overlap.cols.first()..=overlap.cols.last() {
            let d0 = (c - self.region.cols.first()) * dst_rows
                + (overlap.rows.first() - self.region.rows.first());
            let s0 = (c - src.region.cols.first()) * src_rows
                + (overlap.rows.first() - src.region.rows.first());
            for i in 0..seg {
                self.data[d0 + i] += src.data[s0 + i];
            }
        }
    }

    /// Adds another block covering the identical region.
    pub fn add_same_region(&mut self, src: &Block<T>) {
        debug_assert_eq!(self.region, src.region);
        for (d, s) in self.data.iter_mut().zip(src.data.iter()) {
            *d += *s;
        }
    }
}

/// A set of disjoint blocks of one matrix held by one process.
#[derive(Debug, Clone, Default)]
pub struct BlockSet<T> {
    blocks: Vec<Block<T>>,
}

impl<T: Scalar> BlockSet<T> {
    pub fn new() -> Self {
        Self { blocks: Vec::new() }
    }

    pub fn from_blocks(blocks: Vec<Block<T>>) -> Self {
        Self { blocks }
    }

    pub fn push(&mut self, block: Block<T>) {
        self.blocks.push(block);
    }

    pub fn blocks(&self) -> &[Block<T>] {
        &self.blocks
    }

    pub fn blocks_mut(&mut self) -> &mut [Block<T>] {
        &mut self.blocks
    }

    pub fn into_blocks(self) -> Vec<Block<T>> {
        self.blocks
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Total elements held.
    pub fn element_count(&self) -> usize {
        self.blocks.iter().map(|b| b.region().size()).sum()
    }

    /// Assembles `region` into a contiguous column-major buffer from the
    /// pieces of the set.
    ///
    /// Fails if the set does not cover the region completely; a gap means a
    /// transfer plan and the data actually resident have diverged.
    pub fn assemble_into(&self, region: Interval2D, out: &mut [T]) -> Result<()> {
        debug_assert!(out.len() >= region.size());
        let mut covered = 0usize;
        let rows = region.rows.length();
        for block in &self.blocks {
            let Some(overlap) = region.intersection(block.region()) else {
                continue;
            };
            covered += overlap.size();
            let src_rows = block.region().rows.length();
            let seg = overlap.rows.length();
            for c in overlap.cols.first()..=overlap.cols.last() {
                let d0 = (c - region.cols.first()) * rows
                    + (overlap.rows.first() - region.rows.first());
                let s0 = (c - block.region().cols.first()) * src_rows
                    + (overlap.rows.first() - block.region().rows.first());
                out[d0..d0 + seg].copy_from_slice(&block.data()[s0..s0 + seg]);
            }
        }
        if covered != region.size() {
            return Err(Error::Layout(format!(
                "resident data covers {covered} of {} elements of {region}",
                region.size()
            )));
        }
        Ok(())
    }

    /// Assembles `region` into a fresh block.
    pub fn assemble(&self, region: Interval2D) -> Result<Block<T>> {
        let mut out = vec![T::zero(); region.size()];
        self.assemble_into(region, &mut out)?;
        Ok(Block::from_parts(region, out))
    }
}

/// Splits a received payload into blocks along a deterministic region list.
///
/// Both endpoints derive the same list from the schedule, so the payload
/// carries elements only; a length mismatch means the two ranks disagree.
pub(crate) fn split_regions<T: Scalar>(
    regions: &[Interval2D],
    data: Vec<T>,
) -> Result<Vec<Block<T>>> {
    let expected: usize = regions.iter().map(|r| r.size()).sum();
    if data.len() != expected {
        return Err(Error::Transport(format!(
            "payload of {} elements does not match planned {expected}",
            data.len()
        )));
    }
    let mut out = Vec::with_capacity(regions.len());
    let mut offset = 0;
    for &region in regions {
        let next = offset + region.size();
        out.push(Block::from_parts(region, data[offset..next].to_vec()));
        offset = next;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interval::Interval2D;

    fn counting_block(region: Interval2D) -> Block<f64> {
        // Element (r, c) holds 100*r + c so misplaced copies are visible.
        let mut b = Block::zeros(region);
        for r in region.rows.first()..=region.rows.last() {
            for c in region.cols.first()..=region.cols.last() {
                b.set(r, c, (100 * r + c) as f64);
            }
        }
        b
    }

    #[test]
    fn paste_copies_overlap() {
        let mut dst: Block<f64> = Block::zeros(Interval2D::from_corners(0, 3, 0, 3));
        let src = counting_block(Interval2D::from_corners(2, 5, 1, 2));
        dst.paste(&src);
        assert_eq!(dst.get(2, 1), 201.0);
        assert_eq!(dst.get(3, 2), 302.0);
        assert_eq!(dst.get(0, 0), 0.0);
    }

    #[test]
    fn accumulate_adds() {
        let region = Interval2D::from_corners(0, 1, 0, 1);
        let mut dst = counting_block(region);
        let src = counting_block(region);
        dst.accumulate(&src);
        assert_eq!(dst.get(1, 1), 202.0);
    }

    #[test]
    fn assemble_from_pieces() {
        let whole = Interval2D::from_corners(0, 3, 0, 5);
        let mut set = BlockSet::new();
        set.push(counting_block(Interval2D::from_corners(0, 3, 0, 2)));
        set.push(counting_block(Interval2D::from_corners(0, 1, 3, 5)));
        set.push(counting_block(Interval2D::from_corners(2, 3, 3, 5)));

        let assembled = set.assemble(whole).unwrap();
        for r in 0..=3 {
            for c in 0..=5 {
                assert_eq!(assembled.get(r, c), (100 * r + c) as f64);
            }
        }
    }

    #[test]
    fn assemble_detects_gap() {
        let mut set: BlockSet<f64> = BlockSet::new();
        set.push(Block::zeros(Interval2D::from_corners(0, 1, 0, 1)));
        let err = set.assemble(Interval2D::from_corners(0, 3, 0, 1));
        assert!(err.is_err());
    }
}

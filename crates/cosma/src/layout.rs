//! Caller-facing data layouts and matrix descriptors.
//!
//! A layout answers three questions about a distributed matrix: which rank
//! owns global element `(i, j)`, at which offset of that rank's local buffer
//! it lives, and which rectangular regions a given rank owns. Two concrete
//! layouts are provided:
//!
//! - [`GridLayout`]: a `prow x pcol` process grid where each rank owns one
//!   contiguous block, stored column-major. This is the engine's native
//!   shape for caller data.
//! - [`BlockCyclicLayout`]: the classic `mb x nb` block-cyclic distribution
//!   over a column-major process grid, with locally column-major storage.
//!
//! Both are pure index algebra; translating between a caller layout and the
//! schedule's internal distribution is the mapper's job and happens once per
//! multiply in each direction.

use crate::error::{Error, Result};
use crate::interval::{Interval, Interval2D};
use crate::types::{Op, Scalar};

/// One contiguous block per rank on a `prow x pcol` grid.
///
/// Rank order is row-major over the grid: rank `r` sits at grid coordinates
/// `(r / pcol, r % pcol)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridLayout {
    rows: usize,
    cols: usize,
    prow: usize,
    pcol: usize,
    row_pieces: Vec<Interval>,
    col_pieces: Vec<Interval>,
}

impl GridLayout {
    pub fn new(rows: usize, cols: usize, prow: usize, pcol: usize) -> Result<Self> {
        if rows == 0 || cols == 0 {
            return Err(Error::Layout(format!(
                "matrix dimensions must be positive, got {rows}x{cols}"
            )));
        }
        if prow == 0 || pcol == 0 || rows < prow || cols < pcol {
            return Err(Error::Layout(format!(
                "cannot place a {rows}x{cols} matrix on a {prow}x{pcol} grid"
            )));
        }
        Ok(GridLayout {
            rows,
            cols,
            prow,
            pcol,
            row_pieces: Interval::of_length(rows).divide_by(prow),
            col_pieces: Interval::of_length(cols).divide_by(pcol),
        })
    }

    /// The whole matrix on one rank.
    pub fn single(rows: usize, cols: usize) -> Result<Self> {
        GridLayout::new(rows, cols, 1, 1)
    }

    fn region(&self, rank: usize) -> Interval2D {
        let ri = rank / self.pcol;
        let rj = rank % self.pcol;
        Interval2D::new(self.row_pieces[ri], self.col_pieces[rj])
    }
}

/// ScaLAPACK-style block-cyclic distribution with `mb x nb` blocks.
///
/// The process grid is column-major: rank `r` sits at `(r % prow, r / prow)`.
/// Each rank stores its blocks column-major in a local matrix whose leading
/// dimension is the rank's total local row count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockCyclicLayout {
    rows: usize,
    cols: usize,
    mb: usize,
    nb: usize,
    prow: usize,
    pcol: usize,
}

/// Number of rows or columns of a block-cyclically distributed dimension
/// that land on process `iproc` of `nprocs`.
fn numroc(n: usize, nb: usize, iproc: usize, nprocs: usize) -> usize {
    let nblocks = n / nb;
    let base = (nblocks / nprocs) * nb;
    let extra = nblocks % nprocs;
    if iproc < extra {
        base + nb
    } else if iproc == extra {
        base + n % nb
    } else {
        base
    }
}

impl BlockCyclicLayout {
    pub fn new(
        rows: usize,
        cols: usize,
        mb: usize,
        nb: usize,
        prow: usize,
        pcol: usize,
    ) -> Result<Self> {
        if rows == 0 || cols == 0 || mb == 0 || nb == 0 || prow == 0 || pcol == 0 {
            return Err(Error::Layout(format!(
                "invalid block-cyclic descriptor: {rows}x{cols} in {mb}x{nb} \
                 blocks on a {prow}x{pcol} grid"
            )));
        }
        Ok(BlockCyclicLayout {
            rows,
            cols,
            mb,
            nb,
            prow,
            pcol,
        })
    }

    fn grid_coords(&self, rank: usize) -> (usize, usize) {
        (rank % self.prow, rank / self.prow)
    }

    fn local_rows(&self, pi: usize) -> usize {
        numroc(self.rows, self.mb, pi, self.prow)
    }
}

/// A caller-supplied data layout: the owner rank, the local offset and the
/// owned regions of every element are all derivable from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Layout {
    Grid(GridLayout),
    BlockCyclic(BlockCyclicLayout),
}

impl Layout {
    /// Global matrix dimensions described by the layout.
    pub fn dims(&self) -> (usize, usize) {
        match self {
            Layout::Grid(g) => (g.rows, g.cols),
            Layout::BlockCyclic(b) => (b.rows, b.cols),
        }
    }

    /// Number of ranks the layout spreads data over.
    pub fn rank_count(&self) -> usize {
        match self {
            Layout::Grid(g) => g.prow * g.pcol,
            Layout::BlockCyclic(b) => b.prow * b.pcol,
        }
    }

    /// Owner rank of global element `(i, j)`.
    pub fn rank_of(&self, i: usize, j: usize) -> usize {
        match self {
            Layout::Grid(g) => {
                let (ri, _) = Interval::of_length(g.rows).locate_in_subinterval(g.prow, i);
                let (rj, _) = Interval::of_length(g.cols).locate_in_subinterval(g.pcol, j);
                ri * g.pcol + rj
            }
            Layout::BlockCyclic(b) => {
                let pi = (i / b.mb) % b.prow;
                let pj = (j / b.nb) % b.pcol;
                pi + pj * b.prow
            }
        }
    }

    /// Offset of global element `(i, j)` within its owner's local buffer.
    pub fn local_offset(&self, i: usize, j: usize) -> usize {
        match self {
            Layout::Grid(g) => {
                let rank = self.rank_of(i, j);
                g.region(rank)
                    .local_index(i, j)
                    .expect("owner region must contain its element")
            }
            Layout::BlockCyclic(b) => {
                let pi = (i / b.mb) % b.prow;
                let li = (i / b.mb / b.prow) * b.mb + i % b.mb;
                let lj = (j / b.nb / b.pcol) * b.nb + j % b.nb;
                lj * b.local_rows(pi) + li
            }
        }
    }

    /// The rectangular regions `rank` owns, in a deterministic order.
    pub fn owned_regions(&self, rank: usize) -> Vec<Interval2D> {
        if rank >= self.rank_count() {
            return Vec::new();
        }
        match self {
            Layout::Grid(g) => vec![g.region(rank)],
            Layout::BlockCyclic(b) => {
                let (pi, pj) = b.grid_coords(rank);
                let row_blocks = b.rows.div_ceil(b.mb);
                let col_blocks = b.cols.div_ceil(b.nb);
                let mut out = Vec::new();
                for bj in (pj..col_blocks).step_by(b.pcol) {
                    let c0 = bj * b.nb;
                    let c1 = (c0 + b.nb - 1).min(b.cols - 1);
                    for bi in (pi..row_blocks).step_by(b.prow) {
                        let r0 = bi * b.mb;
                        let r1 = (r0 + b.mb - 1).min(b.rows - 1);
                        out.push(Interval2D::from_corners(r0, r1, c0, c1));
                    }
                }
                out
            }
        }
    }

    /// Elements `rank` must provide storage for.
    pub fn local_len(&self, rank: usize) -> usize {
        self.owned_regions(rank).iter().map(|r| r.size()).sum()
    }
}

/// An input matrix of a multiply call: stored dimensions, the operator
/// applied to it, its layout, and this rank's local elements.
#[derive(Debug)]
pub struct MatrixDescriptor<'a, T> {
    stored_rows: usize,
    stored_cols: usize,
    op: Op,
    layout: Layout,
    data: &'a [T],
}

impl<'a, T: Scalar> MatrixDescriptor<'a, T> {
    /// Describes a stored `rows x cols` matrix to be used as `op(X)`.
    ///
    /// `data` is the calling rank's local buffer under `layout`; its length
    /// is checked against the layout when the multiply starts.
    pub fn new(rows: usize, cols: usize, op: Op, layout: Layout, data: &'a [T]) -> Result<Self> {
        if layout.dims() != (rows, cols) {
            return Err(Error::Layout(format!(
                "layout describes a {}x{} matrix, descriptor says {rows}x{cols}",
                layout.dims().0,
                layout.dims().1
            )));
        }
        Ok(MatrixDescriptor {
            stored_rows: rows,
            stored_cols: cols,
            op,
            layout,
            data,
        })
    }

    pub fn op(&self) -> Op {
        self.op
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn data(&self) -> &[T] {
        self.data
    }

    /// Dimensions after applying the operator.
    pub fn logical_dims(&self) -> (usize, usize) {
        if self.op.is_transposed() {
            (self.stored_cols, self.stored_rows)
        } else {
            (self.stored_rows, self.stored_cols)
        }
    }

    /// Regions of the *logical* matrix owned by `rank`.
    pub fn logical_regions(&self, rank: usize) -> Vec<Interval2D> {
        self.layout
            .owned_regions(rank)
            .into_iter()
            .map(|r| {
                if self.op.is_transposed() {
                    Interval2D::new(r.cols, r.rows)
                } else {
                    r
                }
            })
            .collect()
    }

    /// Copies a logical region out of this rank's local data, column-major,
    /// applying the operator.
    pub fn extract_logical(&self, region: Interval2D) -> Vec<T> {
        let mut out = Vec::with_capacity(region.size());
        for c in region.cols.first()..=region.cols.last() {
            for r in region.rows.first()..=region.rows.last() {
                let (si, sj) = if self.op.is_transposed() {
                    (c, r)
                } else {
                    (r, c)
                };
                let value = self.data[self.layout.local_offset(si, sj)];
                out.push(self.op.apply(value));
            }
        }
        out
    }
}

/// The output matrix of a multiply call.
#[derive(Debug)]
pub struct MatrixDescriptorMut<'a, T> {
    rows: usize,
    cols: usize,
    layout: Layout,
    data: &'a mut [T],
}

impl<'a, T: Scalar> MatrixDescriptorMut<'a, T> {
    pub fn new(rows: usize, cols: usize, layout: Layout, data: &'a mut [T]) -> Result<Self> {
        if layout.dims() != (rows, cols) {
            return Err(Error::Layout(format!(
                "layout describes a {}x{} matrix, descriptor says {rows}x{cols}",
                layout.dims().0,
                layout.dims().1
            )));
        }
        Ok(MatrixDescriptorMut {
            rows,
            cols,
            layout,
            data,
        })
    }

    pub fn dims(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn data_mut(&mut self) -> &mut [T] {
        self.data
    }

    /// Scales this rank's local elements by `beta`; `beta == 0` overwrites
    /// with zeros so stale values never leak through.
    pub fn scale(&mut self, beta: T) {
        if beta.is_zero() {
            self.data.fill(T::zero());
        } else if !beta.is_one() {
            for v in self.data.iter_mut() {
                *v *= beta;
            }
        }
    }

    /// Adds `values` (column-major over `region`) into the local buffer.
    pub fn add_region(&mut self, region: Interval2D, values: &[T]) {
        debug_assert_eq!(values.len(), region.size());
        for (idx, &v) in values.iter().enumerate() {
            let (r, c) = region.global_index(idx);
            let off = self.layout.local_offset(r, c);
            self.data[off] += v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_layout_regions_tile_the_matrix() {
        let layout = Layout::Grid(GridLayout::new(10, 10, 2, 2).unwrap());
        let mut seen = vec![false; 100];
        for rank in 0..4 {
            for region in layout.owned_regions(rank) {
                for local in 0..region.size() {
                    let (i, j) = region.global_index(local);
                    assert_eq!(layout.rank_of(i, j), rank);
                    assert!(!seen[i * 10 + j], "element ({i},{j}) owned twice");
                    seen[i * 10 + j] = true;
                }
            }
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn grid_local_offsets_are_column_major() {
        let layout = Layout::Grid(GridLayout::new(4, 4, 2, 2).unwrap());
        // Rank 0 owns rows 0..=1, cols 0..=1.
        assert_eq!(layout.local_offset(0, 0), 0);
        assert_eq!(layout.local_offset(1, 0), 1);
        assert_eq!(layout.local_offset(0, 1), 2);
        assert_eq!(layout.local_offset(1, 1), 3);
    }

    #[test]
    fn block_cyclic_ownership_matches_scalapack() {
        // 10x10 matrix, 3x3 blocks, 2x2 grid, column-major ranks.
        let layout = Layout::BlockCyclic(BlockCyclicLayout::new(10, 10, 3, 3, 2, 2).unwrap());
        // Element (0,0): block (0,0), grid (0,0), rank 0.
        assert_eq!(layout.rank_of(0, 0), 0);
        // Element (3,0): block row 1 -> grid row 1 -> rank 1.
        assert_eq!(layout.rank_of(3, 0), 1);
        // Element (0,3): block col 1 -> grid col 1 -> rank 2.
        assert_eq!(layout.rank_of(0, 3), 2);
        // Element (9,9): block (3,3) -> grid (1,1) -> rank 3.
        assert_eq!(layout.rank_of(9, 9), 3);
    }

    #[test]
    fn block_cyclic_regions_tile_the_matrix() {
        let layout = Layout::BlockCyclic(BlockCyclicLayout::new(10, 7, 3, 2, 2, 3).unwrap());
        let mut seen = vec![false; 70];
        let mut offsets_ok = true;
        for rank in 0..6 {
            let len = layout.local_len(rank);
            for region in layout.owned_regions(rank) {
                for local in 0..region.size() {
                    let (i, j) = region.global_index(local);
                    assert_eq!(layout.rank_of(i, j), rank);
                    assert!(!seen[i * 7 + j]);
                    seen[i * 7 + j] = true;
                    offsets_ok &= layout.local_offset(i, j) < len;
                }
            }
        }
        assert!(seen.iter().all(|&s| s));
        assert!(offsets_ok);
    }

    #[test]
    fn block_cyclic_offsets_are_unique_per_rank() {
        let layout = Layout::BlockCyclic(BlockCyclicLayout::new(9, 9, 2, 2, 2, 2).unwrap());
        for rank in 0..4 {
            let len = layout.local_len(rank);
            let mut used = vec![false; len];
            for region in layout.owned_regions(rank) {
                for local in 0..region.size() {
                    let (i, j) = region.global_index(local);
                    let off = layout.local_offset(i, j);
                    assert!(off < len);
                    assert!(!used[off], "offset {off} reused on rank {rank}");
                    used[off] = true;
                }
            }
            assert!(used.iter().all(|&u| u));
        }
    }

    #[test]
    fn transposed_descriptor_swaps_dims() {
        let data = vec![0.0f64; 12];
        // Stored 3x4, used transposed: logical 4x3.
        let layout = Layout::Grid(GridLayout::single(3, 4).unwrap());
        let desc = MatrixDescriptor::new(3, 4, Op::Trans, layout, &data).unwrap();
        assert_eq!(desc.logical_dims(), (4, 3));
        let regions = desc.logical_regions(0);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0], Interval2D::from_corners(0, 3, 0, 2));
    }

    #[test]
    fn extract_logical_applies_conjugation() {
        use crate::types::Complex64;
        // Stored 2x2 column-major: [1+i, 2; 3, 4-i].
        let data = vec![
            Complex64::new(1.0, 1.0),
            Complex64::new(3.0, 0.0),
            Complex64::new(2.0, 0.0),
            Complex64::new(4.0, -1.0),
        ];
        let layout = Layout::Grid(GridLayout::single(2, 2).unwrap());
        let desc = MatrixDescriptor::new(2, 2, Op::ConjTrans, layout, &data).unwrap();
        let out = desc.extract_logical(Interval2D::from_corners(0, 1, 0, 1));
        // Logical element (0,0) is conj(stored (0,0)) = 1-i; logical (0,1) is
        // conj(stored (1,0)) = 3; column-major out: [(0,0), (1,0), (0,1), (1,1)].
        assert_eq!(out[0], Complex64::new(1.0, -1.0));
        assert_eq!(out[1], Complex64::new(2.0, 0.0));
        assert_eq!(out[2], Complex64::new(3.0, 0.0));
        assert_eq!(out[3], Complex64::new(4.0, 1.0));
    }
}

//! The multiply entry points.
//!
//! A call site builds a [`MultiplyContext`] once per problem shape (it owns
//! the compiled strategy and the buffer pool, both reusable across calls),
//! then invokes [`multiply`] collectively: every rank of the communicator
//! enters with its own local pieces of A, B and C.
//!
//! The call proceeds in four phases on every active rank, with validation
//! completing before any message is sent:
//!
//! 1. validate shapes, layouts and local buffer lengths;
//! 2. import A and B from their caller layouts into the schedule's native
//!    distribution (an all-to-all of rectangular pieces);
//! 3. run the schedule;
//! 4. export C: scale the caller's local C by `beta` and add the
//!    contributions arriving from the native distribution.
//!
//! Ranks the strategy leaves idle return immediately after validation: they
//! send and receive nothing, and their buffers are untouched.

use std::collections::BTreeMap;

use log::debug;
use once_cell::sync::Lazy;

use crate::block::{split_regions, Block, BlockSet};
use crate::buffer::BufferPool;
use crate::comm::{tag_for, Communicator};
use crate::engine;
use crate::error::{Error, Result};
use crate::gemm::{LocalGemm, PortableGemm};
use crate::interval::Interval2D;
use crate::layout::{MatrixDescriptor, MatrixDescriptorMut};
use crate::mapper::{self, MatrixKind};
use crate::strategy::Strategy;
use crate::types::Scalar;

const PHASE_SPREAD: u8 = 3;
const PHASE_COLLECT: u8 = 4;

/// Fallback per-process memory budget, in elements, taken from
/// `COSMA_MEMORY_LIMIT` when the options leave it unset.
static ENV_MEMORY_LIMIT: Lazy<Option<usize>> = Lazy::new(|| {
    std::env::var("COSMA_MEMORY_LIMIT")
        .ok()
        .and_then(|v| v.parse().ok())
});

/// Tuning knobs of a context.
#[derive(Debug, Clone, Default)]
pub struct MultiplyOptions {
    /// Explicit schedule, e.g. `pm2,sm2,pk2`. Derived automatically when
    /// unset. The parallel divisor product may use fewer ranks than the
    /// communicator has; the surplus stays idle.
    pub strategy_spec: Option<String>,
    /// Per-process budget in elements. Falls back to `COSMA_MEMORY_LIMIT`,
    /// then to unlimited.
    pub memory_limit: Option<usize>,
}

/// Per-problem state reused across multiply calls of the same shape.
#[derive(Debug)]
pub struct MultiplyContext<T> {
    m: usize,
    n: usize,
    k: usize,
    strategy: Strategy,
    pool: BufferPool<T>,
}

impl<T: Scalar> MultiplyContext<T> {
    /// Compiles the schedule for `C (m x n) = A (m x k) * B (k x n)` on
    /// `processes` ranks with default options.
    pub fn new(m: usize, n: usize, k: usize, processes: usize) -> Result<Self> {
        Self::with_options(m, n, k, processes, MultiplyOptions::default())
    }

    pub fn with_options(
        m: usize,
        n: usize,
        k: usize,
        processes: usize,
        options: MultiplyOptions,
    ) -> Result<Self> {
        if m == 0 || n == 0 || k == 0 {
            return Err(Error::InvalidInput(format!(
                "matrix dimensions must be positive, got m={m} n={n} k={k}"
            )));
        }
        if processes == 0 {
            return Err(Error::InvalidInput("need at least one process".into()));
        }
        let limit = options.memory_limit.or(*ENV_MEMORY_LIMIT);
        let strategy = match &options.strategy_spec {
            Some(spec) => {
                let steps = crate::strategy::parse_steps(spec)?;
                let used: usize = steps
                    .iter()
                    .filter(|s| s.is_parallel())
                    .map(|s| s.divisor)
                    .product();
                if used > processes {
                    return Err(Error::Strategy(format!(
                        "strategy `{spec}` needs {used} processes, only {processes} available"
                    )));
                }
                let s = Strategy::from_steps(m, n, k, used, steps)?;
                if let Some(l) = limit {
                    s.check_memory(l)?;
                }
                s
            }
            None => Strategy::derive(m, n, k, processes, limit)?,
        };
        debug!("multiply context {m}x{n}x{k}: strategy `{strategy}`");
        let pool = BufferPool::for_strategy(&strategy)?;
        Ok(MultiplyContext {
            m,
            n,
            k,
            strategy,
            pool,
        })
    }

    pub fn strategy(&self) -> &Strategy {
        &self.strategy
    }
}

/// Distributed `C = alpha op(A) op(B) + beta C` with the bundled kernel.
///
/// Collective: every rank of `comm` must call it with the same context
/// shape, scalars and strategy. Each rank passes its local pieces.
///
/// # Example
///
/// ```
/// use cosma::comm::SelfComm;
/// use cosma::{
///     GridLayout, Layout, MatrixDescriptor, MatrixDescriptorMut, MultiplyContext, Op,
/// };
///
/// // A = [1 2; 3 4] (column-major), B = identity, single process.
/// let a = vec![1.0f64, 3.0, 2.0, 4.0];
/// let b = vec![1.0, 0.0, 0.0, 1.0];
/// let mut c = vec![0.0; 4];
///
/// let layout = || Layout::Grid(GridLayout::single(2, 2).unwrap());
/// let mut ctx = MultiplyContext::new(2, 2, 2, 1).unwrap();
/// let da = MatrixDescriptor::new(2, 2, Op::NoTrans, layout(), &a).unwrap();
/// let db = MatrixDescriptor::new(2, 2, Op::NoTrans, layout(), &b).unwrap();
/// let mut dc = MatrixDescriptorMut::new(2, 2, layout(), &mut c).unwrap();
///
/// cosma::multiply(&SelfComm, &mut ctx, &da, &db, &mut dc, 1.0, 0.0).unwrap();
/// assert_eq!(c, vec![1.0, 3.0, 2.0, 4.0]);
/// ```
pub fn multiply<T, C>(
    comm: &C,
    ctx: &mut MultiplyContext<T>,
    a: &MatrixDescriptor<'_, T>,
    b: &MatrixDescriptor<'_, T>,
    c: &mut MatrixDescriptorMut<'_, T>,
    alpha: T,
    beta: T,
) -> Result<()>
where
    T: Scalar,
    C: Communicator<T>,
{
    multiply_with_kernel(comm, ctx, a, b, c, alpha, beta, &PortableGemm::new())
}

/// [`multiply`] with a caller-supplied local kernel.
#[allow(clippy::too_many_arguments)]
pub fn multiply_with_kernel<T, C, G>(
    comm: &C,
    ctx: &mut MultiplyContext<T>,
    a: &MatrixDescriptor<'_, T>,
    b: &MatrixDescriptor<'_, T>,
    c: &mut MatrixDescriptorMut<'_, T>,
    alpha: T,
    beta: T,
    kernel: &G,
) -> Result<()>
where
    T: Scalar,
    C: Communicator<T>,
    G: LocalGemm<T>,
{
    let (m, n, k) = (ctx.m, ctx.n, ctx.k);
    let rank = comm.rank();
    let active = ctx.strategy.processes();

    // Validation first, identically on every rank, before any send.
    if comm.size() < active {
        return Err(Error::InvalidInput(format!(
            "schedule uses {active} processes, communicator has {}",
            comm.size()
        )));
    }
    if a.logical_dims() != (m, k) {
        return Err(Error::Shape(format!(
            "op(A) is {:?}, expected {m}x{k}",
            a.logical_dims()
        )));
    }
    if b.logical_dims() != (k, n) {
        return Err(Error::Shape(format!(
            "op(B) is {:?}, expected {k}x{n}",
            b.logical_dims()
        )));
    }
    if c.dims() != (m, n) {
        return Err(Error::Shape(format!(
            "C is {:?}, expected {m}x{n}",
            c.dims()
        )));
    }
    for (name, count) in [
        ("A", a.layout().rank_count()),
        ("B", b.layout().rank_count()),
        ("C", c.layout().rank_count()),
    ] {
        if count > active {
            return Err(Error::Layout(format!(
                "{name} places data on {count} ranks but the schedule uses {active}; \
                 idle ranks cannot hold matrix data"
            )));
        }
    }
    if rank < a.layout().rank_count() && a.data().len() < a.layout().local_len(rank) {
        return Err(Error::Layout("local A buffer too short".into()));
    }
    if rank < b.layout().rank_count() && b.data().len() < b.layout().local_len(rank) {
        return Err(Error::Layout("local B buffer too short".into()));
    }
    if rank < c.layout().rank_count() {
        let need = c.layout().local_len(rank);
        if c.data_mut().len() < need {
            return Err(Error::Layout("local C buffer too short".into()));
        }
    }

    // Idle ranks take no further part; their buffers stay as they are.
    if rank >= active {
        return Ok(());
    }

    let a_set = spread(comm, &ctx.strategy, MatrixKind::A, a)?;
    let b_set = spread(comm, &ctx.strategy, MatrixKind::B, b)?;
    let c_set = engine::execute(
        comm,
        kernel,
        &ctx.strategy,
        &mut ctx.pool,
        alpha,
        &a_set,
        &b_set,
    )?;
    collect(comm, &ctx.strategy, c, &c_set, beta)
}

/// Imports one input matrix from its caller layout into the native
/// distribution.
fn spread<T, C>(
    comm: &C,
    strategy: &Strategy,
    kind: MatrixKind,
    desc: &MatrixDescriptor<'_, T>,
) -> Result<BlockSet<T>>
where
    T: Scalar,
    C: Communicator<T>,
{
    let me = comm.rank();
    let src: Vec<Vec<Interval2D>> = (0..desc.layout().rank_count())
        .map(|r| desc.logical_regions(r))
        .collect();
    let dst: Vec<Vec<Interval2D>> = (0..strategy.processes())
        .map(|r| mapper::native_regions(strategy, kind, r))
        .collect();
    let plan = mapper::transfers(&src, &dst);
    let tag = tag_for(0, kind.code(), PHASE_SPREAD);

    let mut native: Vec<Block<T>> = dst[me].iter().map(|&r| Block::zeros(r)).collect();

    let mut outgoing: BTreeMap<usize, Vec<T>> = BTreeMap::new();
    let mut local: Vec<Block<T>> = Vec::new();
    for t in &plan {
        if t.from != me {
            continue;
        }
        let data = desc.extract_logical(t.region);
        if t.to == me {
            local.push(Block::from_parts(t.region, data));
        } else {
            outgoing.entry(t.to).or_default().extend(data);
        }
    }
    for (dest, payload) in outgoing {
        comm.send(dest, tag, payload)?;
    }
    for piece in &local {
        for block in &mut native {
            block.paste(piece);
        }
    }

    let mut incoming: BTreeMap<usize, Vec<Interval2D>> = BTreeMap::new();
    for t in &plan {
        if t.to == me && t.from != me {
            incoming.entry(t.from).or_default().push(t.region);
        }
    }
    for (src_rank, regions) in incoming {
        let data = comm.recv(src_rank, tag)?;
        for piece in split_regions(&regions, data)? {
            for block in &mut native {
                block.paste(&piece);
            }
        }
    }
    Ok(BlockSet::from_blocks(native))
}

/// Exports the C contributions back to the caller layout, applying `beta`.
fn collect<T, C>(
    comm: &C,
    strategy: &Strategy,
    c: &mut MatrixDescriptorMut<'_, T>,
    c_set: &BlockSet<T>,
    beta: T,
) -> Result<()>
where
    T: Scalar,
    C: Communicator<T>,
{
    let me = comm.rank();
    let src: Vec<Vec<Interval2D>> = (0..strategy.processes())
        .map(|r| mapper::native_regions(strategy, MatrixKind::C, r))
        .collect();
    let dst: Vec<Vec<Interval2D>> = (0..c.layout().rank_count())
        .map(|r| c.layout().owned_regions(r))
        .collect();
    let plan = mapper::transfers(&src, &dst);
    let tag = tag_for(0, MatrixKind::C.code(), PHASE_COLLECT);

    let mut outgoing: BTreeMap<usize, Vec<T>> = BTreeMap::new();
    let mut local: Vec<(Interval2D, Vec<T>)> = Vec::new();
    for t in &plan {
        if t.from != me {
            continue;
        }
        let data = c_set.assemble(t.region)?.into_data();
        if t.to == me {
            local.push((t.region, data));
        } else {
            outgoing.entry(t.to).or_default().extend(data);
        }
    }
    for (dest, payload) in outgoing {
        comm.send(dest, tag, payload)?;
    }

    if me < c.layout().rank_count() {
        c.scale(beta);
    }
    for (region, data) in local {
        c.add_region(region, &data);
    }

    let mut incoming: BTreeMap<usize, Vec<Interval2D>> = BTreeMap::new();
    for t in &plan {
        if t.to == me && t.from != me {
            incoming.entry(t.from).or_default().push(t.region);
        }
    }
    for (src_rank, regions) in incoming {
        let data = comm.recv(src_rank, tag)?;
        for piece in split_regions(&regions, data)? {
            c.add_region(piece.region(), piece.data());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::SelfComm;
    use crate::layout::GridLayout;
    use crate::layout::Layout;
    use crate::types::Op;

    fn single_layout(rows: usize, cols: usize) -> Layout {
        Layout::Grid(GridLayout::single(rows, cols).unwrap())
    }

    #[test]
    fn context_rejects_degenerate_problems() {
        assert!(MultiplyContext::<f64>::new(0, 4, 4, 1).is_err());
        assert!(MultiplyContext::<f64>::new(4, 4, 4, 0).is_err());
    }

    #[test]
    fn context_rejects_oversized_user_strategy() {
        let options = MultiplyOptions {
            strategy_spec: Some("pm2,pn2".into()),
            memory_limit: None,
        };
        let err = MultiplyContext::<f64>::with_options(8, 8, 8, 2, options).unwrap_err();
        assert!(matches!(err, Error::Strategy(_)));
    }

    #[test]
    fn shape_mismatch_is_rejected_before_any_message() {
        let a = vec![0.0f64; 16];
        let b = vec![0.0f64; 16];
        let mut c = vec![0.0f64; 16];
        let mut ctx = MultiplyContext::new(4, 4, 4, 1).unwrap();
        // B described as 2x8: logical dims disagree with k x n.
        let da = MatrixDescriptor::new(4, 4, Op::NoTrans, single_layout(4, 4), &a).unwrap();
        let db = MatrixDescriptor::new(2, 8, Op::NoTrans, single_layout(2, 8), &b).unwrap();
        let mut dc = MatrixDescriptorMut::new(4, 4, single_layout(4, 4), &mut c).unwrap();
        let err = multiply(&SelfComm, &mut ctx, &da, &db, &mut dc, 1.0, 0.0).unwrap_err();
        assert!(matches!(err, Error::Shape(_)));
    }

    #[test]
    fn beta_scales_existing_contents() {
        // 1x1 problem: C = 2*(3*4) + 10*5 = 74.
        let a = vec![3.0f64];
        let b = vec![4.0f64];
        let mut c = vec![5.0f64];
        let mut ctx = MultiplyContext::new(1, 1, 1, 1).unwrap();
        let da = MatrixDescriptor::new(1, 1, Op::NoTrans, single_layout(1, 1), &a).unwrap();
        let db = MatrixDescriptor::new(1, 1, Op::NoTrans, single_layout(1, 1), &b).unwrap();
        let mut dc = MatrixDescriptorMut::new(1, 1, single_layout(1, 1), &mut c).unwrap();
        multiply(&SelfComm, &mut ctx, &da, &db, &mut dc, 2.0, 10.0).unwrap();
        assert_eq!(c[0], 74.0);
    }

    #[test]
    fn transposed_input_single_rank() {
        // A stored 2x3, used transposed: logical 3x2. B is 2x1 of ones, so
        // C row i sums row i of logical A.
        let a = vec![1.0f64, 4.0, 2.0, 5.0, 3.0, 6.0]; // stored col-major 2x3
        let b = vec![1.0f64, 1.0];
        let mut c = vec![0.0f64; 3];
        let mut ctx = MultiplyContext::new(3, 1, 2, 1).unwrap();
        let da = MatrixDescriptor::new(2, 3, Op::Trans, single_layout(2, 3), &a).unwrap();
        let db = MatrixDescriptor::new(2, 1, Op::NoTrans, single_layout(2, 1), &b).unwrap();
        let mut dc = MatrixDescriptorMut::new(3, 1, single_layout(3, 1), &mut c).unwrap();
        multiply(&SelfComm, &mut ctx, &da, &db, &mut dc, 1.0, 0.0).unwrap();
        // Logical A = [[1,4],[2,5],[3,6]]; row sums 5, 7, 9.
        assert_eq!(c, vec![5.0, 7.0, 9.0]);
    }
}

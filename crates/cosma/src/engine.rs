//! The recursive executor driving one multiply call.
//!
//! The engine walks the strategy's step list depth-first, carrying the
//! current m/n/k intervals, the rank group, and references to the resident
//! A and B block sets. Data moves at exactly three points:
//!
//! - **Parallel step, descending.** The matrices carrying the split axis need
//!   no movement: their slices already live inside the right subgroups. The
//!   matrix that does not carry the axis is allgathered over the cross-peer
//!   ring; each peer contributes the pieces [`holdings`] assigns to it, so
//!   both ends of every message derive its layout independently.
//! - **Parallel-K step, unwinding.** The ring's C contributions cover the
//!   same region; a reduce-scatter sums them and leaves each rank its
//!   column-wise share, which is exactly what the level above expects.
//! - **Leaf.** The remaining problem is local: A and B are assembled into
//!   the pool's contiguous column-major arenas and handed to the kernel with
//!   `alpha`; `beta` is the write-back pass's business.
//!
//! Sequential steps move no data on their own: they re-enter the subtree
//! once per slice with a restricted interval, accumulating C in place for
//! K-slices and concatenating disjoint C pieces for M/N-slices. Gathers that
//! sit below a sequential step re-run per slice on the restricted region;
//! that repetition is the time the schedule trades for memory.

use log::trace;

use crate::block::{split_regions, Block, BlockSet};
use crate::buffer::BufferPool;
use crate::comm::{tag_for, Communicator};
use crate::error::{Error, Result};
use crate::gemm::LocalGemm;
use crate::interval::{Interval, Interval2D};
use crate::mapper::{holdings, level_plans, LevelPlan, MatrixKind};
use crate::strategy::{Axis, Step, StepKind, Strategy};
use crate::types::{Op, Scalar};

const PHASE_GATHER: u8 = 1;
const PHASE_REDUCE: u8 = 2;

/// Runs the schedule on this rank's native data and returns the C
/// contribution set in native distribution.
pub(crate) fn execute<T, C, G>(
    comm: &C,
    kernel: &G,
    strategy: &Strategy,
    pool: &mut BufferPool<T>,
    alpha: T,
    a: &BlockSet<T>,
    b: &BlockSet<T>,
) -> Result<BlockSet<T>>
where
    T: Scalar,
    C: Communicator<T>,
    G: LocalGemm<T>,
{
    let engine = Engine {
        comm,
        kernel,
        strategy,
        plans: level_plans(strategy, comm.rank()),
        rank: comm.rank(),
        alpha,
    };
    engine.recurse(
        0,
        Interval::of_length(strategy.m()),
        Interval::of_length(strategy.n()),
        Interval::of_length(strategy.k()),
        a,
        b,
        pool,
    )
}

struct Engine<'a, T, C, G> {
    comm: &'a C,
    kernel: &'a G,
    strategy: &'a Strategy,
    plans: Vec<LevelPlan>,
    rank: usize,
    alpha: T,
}

impl<'a, T, C, G> Engine<'a, T, C, G>
where
    T: Scalar,
    C: Communicator<T>,
    G: LocalGemm<T>,
{
    #[allow(clippy::too_many_arguments)]
    fn recurse(
        &self,
        level: usize,
        mi: Interval,
        ni: Interval,
        ki: Interval,
        a_res: &BlockSet<T>,
        b_res: &BlockSet<T>,
        pool: &mut BufferPool<T>,
    ) -> Result<BlockSet<T>> {
        match self.strategy.steps().get(level) {
            None => self.leaf(mi, ni, ki, a_res, b_res, pool),
            Some(&step) if step.kind == StepKind::Parallel => {
                self.parallel_step(step, level, mi, ni, ki, a_res, b_res, pool)
            }
            Some(&step) => self.sequential_step(step, level, mi, ni, ki, a_res, b_res, pool),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn parallel_step(
        &self,
        step: Step,
        level: usize,
        mi: Interval,
        ni: Interval,
        ki: Interval,
        a_res: &BlockSet<T>,
        b_res: &BlockSet<T>,
        pool: &mut BufferPool<T>,
    ) -> Result<BlockSet<T>> {
        let d = step.divisor;
        let index = self.plans[level].subgroup_index;

        let mut gathered_a = None;
        let mut gathered_b = None;
        let (cmi, cni, cki) = match step.axis {
            Axis::M => {
                gathered_b =
                    Some(self.gather(level, MatrixKind::B, Interval2D::new(ki, ni), b_res)?);
                (mi.subinterval(d, index), ni, ki)
            }
            Axis::N => {
                gathered_a =
                    Some(self.gather(level, MatrixKind::A, Interval2D::new(mi, ki), a_res)?);
                (mi, ni.subinterval(d, index), ki)
            }
            Axis::K => (mi, ni, ki.subinterval(d, index)),
        };

        let child = self.recurse(
            level + 1,
            cmi,
            cni,
            cki,
            gathered_a.as_ref().unwrap_or(a_res),
            gathered_b.as_ref().unwrap_or(b_res),
            pool,
        )?;

        if step.axis == Axis::K {
            self.reduce_scatter(level, Interval2D::new(mi, ni), &child)
        } else {
            Ok(child)
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn sequential_step(
        &self,
        step: Step,
        level: usize,
        mi: Interval,
        ni: Interval,
        ki: Interval,
        a_res: &BlockSet<T>,
        b_res: &BlockSet<T>,
        pool: &mut BufferPool<T>,
    ) -> Result<BlockSet<T>> {
        let d = step.divisor;
        match step.axis {
            // K-slices contribute to the same C region: accumulate in place.
            Axis::K => {
                let mut acc: Option<BlockSet<T>> = None;
                for t in 0..d {
                    let child = self.recurse(
                        level + 1,
                        mi,
                        ni,
                        ki.subinterval(d, t),
                        a_res,
                        b_res,
                        pool,
                    )?;
                    match acc.as_mut() {
                        None => acc = Some(child),
                        Some(existing) => accumulate_set(existing, &child)?,
                    }
                }
                Ok(acc.expect("sequential divisor is at least 2"))
            }
            // M/N-slices produce disjoint C pieces back-to-back.
            Axis::M | Axis::N => {
                let mut out = Vec::new();
                for t in 0..d {
                    let (smi, sni) = match step.axis {
                        Axis::M => (mi.subinterval(d, t), ni),
                        _ => (mi, ni.subinterval(d, t)),
                    };
                    let child = self.recurse(level + 1, smi, sni, ki, a_res, b_res, pool)?;
                    out.extend(child.into_blocks());
                }
                Ok(BlockSet::from_blocks(out))
            }
        }
    }

    /// Allgather over the cross-peer ring: every peer contributes its
    /// holdings of `region`, every peer ends up with all of them.
    fn gather(
        &self,
        level: usize,
        kind: MatrixKind,
        region: Interval2D,
        resident: &BlockSet<T>,
    ) -> Result<BlockSet<T>> {
        let tag = tag_for(level, kind.code(), PHASE_GATHER);
        let steps = self.strategy.steps();
        let plan = &self.plans[level];
        let (peers, group) = (&plan.cross_peers, plan.group);

        let my_regions = holdings(steps, level, kind, region, self.rank, group);
        let mut mine = Vec::with_capacity(my_regions.len());
        for &r in &my_regions {
            mine.push(resident.assemble(r)?);
        }
        let payload: Vec<T> = mine
            .iter()
            .flat_map(|b| b.data().iter().copied())
            .collect();
        trace!(
            "rank {} gathers {:?} at level {level}: {} own elements, ring {:?}",
            self.rank,
            kind,
            payload.len(),
            peers
        );

        for &peer in peers {
            if peer != self.rank {
                self.comm.send(peer, tag, payload.clone())?;
            }
        }
        let mut out = BlockSet::from_blocks(mine);
        for &peer in peers {
            if peer == self.rank {
                continue;
            }
            let their_regions = holdings(steps, level, kind, region, peer, group);
            let data = self.comm.recv(peer, tag)?;
            for block in split_regions(&their_regions, data)? {
                out.push(block);
            }
        }
        Ok(out)
    }

    /// Reduce-scatter over the ring: sums the peers' C contributions and
    /// keeps this rank's share.
    fn reduce_scatter(
        &self,
        level: usize,
        region: Interval2D,
        child: &BlockSet<T>,
    ) -> Result<BlockSet<T>> {
        let tag = tag_for(level, MatrixKind::C.code(), PHASE_REDUCE);
        let steps = self.strategy.steps();
        let plan = &self.plans[level];
        let (peers, group) = (&plan.cross_peers, plan.group);

        for &peer in peers {
            if peer == self.rank {
                continue;
            }
            let regions = holdings(steps, level, MatrixKind::C, region, peer, group);
            let mut payload = Vec::new();
            for &r in &regions {
                payload.extend_from_slice(child.assemble(r)?.data());
            }
            self.comm.send(peer, tag, payload)?;
        }

        let my_regions = holdings(steps, level, MatrixKind::C, region, self.rank, group);
        let mut mine = Vec::with_capacity(my_regions.len());
        for &r in &my_regions {
            mine.push(child.assemble(r)?);
        }
        for &peer in peers {
            if peer == self.rank {
                continue;
            }
            let data = self.comm.recv(peer, tag)?;
            let incoming = split_regions(&my_regions, data)?;
            for (acc, inc) in mine.iter_mut().zip(&incoming) {
                acc.add_same_region(inc);
            }
        }
        trace!(
            "rank {} reduced C at level {level} to {} pieces",
            self.rank,
            mine.len()
        );
        Ok(BlockSet::from_blocks(mine))
    }

    fn leaf(
        &self,
        mi: Interval,
        ni: Interval,
        ki: Interval,
        a_res: &BlockSet<T>,
        b_res: &BlockSet<T>,
        pool: &mut BufferPool<T>,
    ) -> Result<BlockSet<T>> {
        let a_region = Interval2D::new(mi, ki);
        let b_region = Interval2D::new(ki, ni);
        let c_region = Interval2D::new(mi, ni);
        let (m, n, k) = (mi.length(), ni.length(), ki.length());

        let (a_buf, b_buf, c_buf) = pool.leaf_buffers();
        let a_leaf = &mut a_buf[..a_region.size()];
        let b_leaf = &mut b_buf[..b_region.size()];
        let c_leaf = &mut c_buf[..c_region.size()];
        a_res.assemble_into(a_region, a_leaf)?;
        b_res.assemble_into(b_region, b_leaf)?;

        self.kernel.gemm(
            m,
            n,
            k,
            self.alpha,
            a_leaf,
            m,
            Op::NoTrans,
            b_leaf,
            k,
            Op::NoTrans,
            T::zero(),
            c_leaf,
            m,
        )?;
        Ok(BlockSet::from_blocks(vec![Block::from_parts(
            c_region,
            c_leaf.to_vec(),
        )]))
    }
}

/// Adds `inc` into `acc`; both must carry identical region lists.
fn accumulate_set<T: Scalar>(acc: &mut BlockSet<T>, inc: &BlockSet<T>) -> Result<()> {
    if acc.blocks().len() != inc.blocks().len() {
        return Err(Error::Layout(
            "accumulation sets have diverging shapes".into(),
        ));
    }
    for (a, b) in acc.blocks_mut().iter_mut().zip(inc.blocks()) {
        if a.region() != b.region() {
            return Err(Error::Layout(
                "accumulation sets have diverging regions".into(),
            ));
        }
        a.add_same_region(b);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::SelfComm;
    use crate::gemm::PortableGemm;
    use crate::mapper::native_regions;

    /// Fills native block sets from a dense column-major matrix.
    fn native_set(
        strategy: &Strategy,
        kind: MatrixKind,
        rows: usize,
        data: &[f64],
    ) -> BlockSet<f64> {
        let mut set = BlockSet::new();
        for region in native_regions(strategy, kind, 0) {
            let mut block = Block::zeros(region);
            for local in 0..region.size() {
                let (r, c) = region.global_index(local);
                block.set(r, c, data[c * rows + r]);
            }
            set.push(block);
        }
        set
    }

    fn dense(rows: usize, cols: usize, f: impl Fn(usize, usize) -> f64) -> Vec<f64> {
        let mut out = vec![0.0; rows * cols];
        for c in 0..cols {
            for r in 0..rows {
                out[c * rows + r] = f(r, c);
            }
        }
        out
    }

    fn run_single(spec: &str, m: usize, n: usize, k: usize) {
        let strategy = if spec.is_empty() {
            Strategy::from_steps(m, n, k, 1, vec![]).unwrap()
        } else {
            Strategy::from_spec(m, n, k, 1, spec).unwrap()
        };
        let a = dense(m, k, |r, c| (r * 3 + c) as f64 - 4.0);
        let b = dense(k, n, |r, c| (r + 2 * c) as f64 * 0.5);

        let a_set = native_set(&strategy, MatrixKind::A, m, &a);
        let b_set = native_set(&strategy, MatrixKind::B, k, &b);
        let mut pool = BufferPool::for_strategy(&strategy).unwrap();
        let result = execute(
            &SelfComm,
            &PortableGemm::new(),
            &strategy,
            &mut pool,
            1.0,
            &a_set,
            &b_set,
        )
        .unwrap();

        // Reference triple loop.
        let mut expect = vec![0.0; m * n];
        for j in 0..n {
            for i in 0..m {
                for l in 0..k {
                    expect[j * m + i] += a[l * m + i] * b[j * k + l];
                }
            }
        }

        let mut got = vec![f64::NAN; m * n];
        for block in result.blocks() {
            for local in 0..block.region().size() {
                let (r, c) = block.region().global_index(local);
                got[c * m + r] = block.data()[local];
            }
        }
        for (g, e) in got.iter().zip(&expect) {
            assert!((g - e).abs() < 1e-9, "got {g}, expected {e}");
        }
    }

    #[test]
    fn single_rank_leaf_only() {
        run_single("", 5, 4, 6);
    }

    #[test]
    fn single_rank_sequential_splits() {
        run_single("sm2", 6, 5, 4);
        run_single("sk2", 5, 6, 8);
        run_single("sn3", 4, 9, 5);
        run_single("sm2,sk2", 8, 5, 6);
        run_single("sk2,sn2,sm2", 8, 8, 8);
    }

    #[test]
    fn single_rank_uneven_sequential_splits() {
        run_single("sm3", 7, 4, 5);
        run_single("sk3,sn2", 5, 7, 7);
    }
}

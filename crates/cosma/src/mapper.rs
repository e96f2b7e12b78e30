//! Ties ranks to matrix regions at every level of the schedule.
//!
//! Three questions are answered here, all as pure functions of the strategy
//! so every rank derives identical answers without communicating:
//!
//! 1. **Who owns what between steps.** [`holdings`] walks the step list from
//!    a given level: a parallel step restricts the matrices that carry the
//!    split axis to the subgroup's slice; the matrix that does not carry it
//!    is instead cut column-wise across the subgroups, applied on top of the
//!    deeper pieces (the `Interval2D` column-split contract). A sequential
//!    step branches over its slices, since one process serves all of them.
//!    [`native_regions`] is the walk from level 0: the distribution in which
//!    the engine expects its inputs and leaves its output.
//! 2. **Who talks to whom.** [`level_plans`] precomputes, per step, the rank
//!    group, this rank's subgroup, and the cross-peer ring: the ranks with
//!    the same position in each sibling subgroup, which exchange data at
//!    gathers and reductions.
//! 3. **How caller data reaches that distribution.** [`transfers`] intersects
//!    two region families into the all-to-all plan used to import caller
//!    layouts and export the result; the plan is total and duplication-free
//!    because each family tiles the matrix.

use crate::interval::{Interval, Interval2D};
use crate::strategy::{Axis, Step, StepKind, Strategy};

/// Which matrix of the product a region belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatrixKind {
    A,
    B,
    C,
}

/// How an axis lands on a matrix: its rows, its columns, or not at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placement {
    Rows,
    Cols,
    None,
}

impl MatrixKind {
    /// Wire code used in message tags.
    pub(crate) fn code(self) -> u8 {
        match self {
            MatrixKind::A => 0,
            MatrixKind::B => 1,
            MatrixKind::C => 2,
        }
    }

    fn placement(self, axis: Axis) -> Placement {
        match (self, axis) {
            (MatrixKind::A, Axis::M) | (MatrixKind::B, Axis::K) | (MatrixKind::C, Axis::M) => {
                Placement::Rows
            }
            (MatrixKind::A, Axis::K) | (MatrixKind::B, Axis::N) | (MatrixKind::C, Axis::N) => {
                Placement::Cols
            }
            _ => Placement::None,
        }
    }

    /// The whole matrix as a region, in logical coordinates.
    pub fn full_region(self, m: usize, n: usize, k: usize) -> Interval2D {
        match self {
            MatrixKind::A => Interval2D::new(Interval::of_length(m), Interval::of_length(k)),
            MatrixKind::B => Interval2D::new(Interval::of_length(k), Interval::of_length(n)),
            MatrixKind::C => Interval2D::new(Interval::of_length(m), Interval::of_length(n)),
        }
    }
}

/// Subgroup bookkeeping of one rank at one parallel step.
#[derive(Debug, Clone, Copy)]
struct GroupSplit {
    index: usize,
    subgroup: Interval,
    position: usize,
}

fn split_group(group: Interval, divisor: usize, rank: usize) -> GroupSplit {
    let q = group.length();
    debug_assert_eq!(q % divisor, 0, "group size must divide evenly");
    let sub = q / divisor;
    let rel = rank - group.first();
    let index = rel / sub;
    GroupSplit {
        index,
        subgroup: Interval::new(
            group.first() + index * sub,
            group.first() + (index + 1) * sub - 1,
        ),
        position: rel % sub,
    }
}

/// Regions of `kind` that `rank` holds when entering `level` with the given
/// current region and rank group.
///
/// With `level == 0`, the group spanning all active ranks and the full
/// region, this is the native distribution.
pub fn holdings(
    steps: &[Step],
    level: usize,
    kind: MatrixKind,
    region: Interval2D,
    rank: usize,
    group: Interval,
) -> Vec<Interval2D> {
    let Some(step) = steps.get(level) else {
        return vec![region];
    };
    let d = step.divisor;
    match step.kind {
        StepKind::Parallel => {
            let split = split_group(group, d, rank);
            match kind.placement(step.axis) {
                Placement::Rows => {
                    let restricted =
                        Interval2D::new(region.rows.subinterval(d, split.index), region.cols);
                    holdings(steps, level + 1, kind, restricted, rank, split.subgroup)
                }
                Placement::Cols => {
                    let restricted =
                        Interval2D::new(region.rows, region.cols.subinterval(d, split.index));
                    holdings(steps, level + 1, kind, restricted, rank, split.subgroup)
                }
                Placement::None => {
                    // The untouched matrix is cut column-wise across the
                    // subgroups, on top of the deeper pieces.
                    holdings(steps, level + 1, kind, region, rank, split.subgroup)
                        .into_iter()
                        .map(|piece| piece.submatrix(d, split.index))
                        .collect()
                }
            }
        }
        StepKind::Sequential => match kind.placement(step.axis) {
            Placement::Rows => (0..d)
                .flat_map(|t| {
                    let restricted =
                        Interval2D::new(region.rows.subinterval(d, t), region.cols);
                    holdings(steps, level + 1, kind, restricted, rank, group)
                })
                .collect(),
            Placement::Cols => (0..d)
                .flat_map(|t| {
                    let restricted =
                        Interval2D::new(region.rows, region.cols.subinterval(d, t));
                    holdings(steps, level + 1, kind, restricted, rank, group)
                })
                .collect(),
            Placement::None => holdings(steps, level + 1, kind, region, rank, group),
        },
    }
}

/// The native distribution of `kind` for `rank` under `strategy`.
pub fn native_regions(strategy: &Strategy, kind: MatrixKind, rank: usize) -> Vec<Interval2D> {
    let p = strategy.processes();
    if rank >= p {
        return Vec::new();
    }
    let region = kind.full_region(strategy.m(), strategy.n(), strategy.k());
    holdings(
        strategy.steps(),
        0,
        kind,
        region,
        rank,
        Interval::new(0, p - 1),
    )
}

/// Elements `rank` owns natively across all three matrices.
pub fn native_len(strategy: &Strategy, kind: MatrixKind, rank: usize) -> usize {
    native_regions(strategy, kind, rank)
        .iter()
        .map(|r| r.size())
        .sum()
}

/// The static per-step context of one rank: its group, subgroup and
/// cross-peer ring. Sequential steps keep the group and have no ring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelPlan {
    pub step: Step,
    pub group: Interval,
    pub subgroup: Interval,
    pub subgroup_index: usize,
    pub cross_peers: Vec<usize>,
}

/// Precomputes the [`LevelPlan`] of every step for `rank`.
///
/// Groups depend only on the parallel structure, never on sequential slice
/// indices, so the whole list is static for the duration of a call; the
/// engine walks it instead of re-deriving group algebra mid-schedule.
pub fn level_plans(strategy: &Strategy, rank: usize) -> Vec<LevelPlan> {
    let mut plans = Vec::with_capacity(strategy.steps().len());
    let mut group = Interval::new(0, strategy.processes() - 1);
    for &step in strategy.steps() {
        match step.kind {
            StepKind::Parallel => {
                let split = split_group(group, step.divisor, rank);
                let sub = group.length() / step.divisor;
                let cross_peers = (0..step.divisor)
                    .map(|i| group.first() + i * sub + split.position)
                    .collect();
                plans.push(LevelPlan {
                    step,
                    group,
                    subgroup: split.subgroup,
                    subgroup_index: split.index,
                    cross_peers,
                });
                group = split.subgroup;
            }
            StepKind::Sequential => {
                plans.push(LevelPlan {
                    step,
                    group,
                    subgroup: group,
                    subgroup_index: 0,
                    cross_peers: Vec::new(),
                });
            }
        }
    }
    plans
}

/// One block movement of a layout translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transfer {
    pub from: usize,
    pub to: usize,
    pub region: Interval2D,
}

/// The all-to-all plan moving data from one tiling of a matrix to another.
///
/// `src[r]` and `dst[r]` list the regions rank `r` owns on each side. The
/// result is ordered by destination rank, then destination piece, then
/// source rank, then source piece; every rank derives the same list.
pub fn transfers(src: &[Vec<Interval2D>], dst: &[Vec<Interval2D>]) -> Vec<Transfer> {
    let mut out = Vec::new();
    for (to, dst_pieces) in dst.iter().enumerate() {
        for dst_piece in dst_pieces {
            for (from, src_pieces) in src.iter().enumerate() {
                for src_piece in src_pieces {
                    if let Some(region) = dst_piece.intersection(*src_piece) {
                        out.push(Transfer { from, to, region });
                    }
                }
            }
        }
    }
    out
}

//! Multiplication schedules: ordered lists of parallel and sequential steps.
//!
//! A [`Strategy`] is the compiled schedule of one multiply call: an ordered
//! list of [`Step`]s, each splitting one problem axis by an integer divisor.
//!
//! | Step | Meaning |
//! |------|---------|
//! | parallel (`p`) | partition the process group into `divisor` subgroups, one per slice |
//! | sequential (`s`) | one process handles `divisor` slices back-to-back, trading time for memory |
//!
//! The textual form is a comma-separated list of `<kind><axis><divisor>`
//! triplets, e.g. `pm2,sm2,pk2`: parallel-split M by 2, sequential-split M by
//! 2, parallel-split K by 2.
//!
//! Two invariants hold for every valid strategy and are checked at
//! construction:
//!
//! 1. the product of parallel divisors equals the number of participating
//!    processes;
//! 2. every split is feasible, including the column sub-splits the data
//!    layout performs on the matrix a parallel step does not touch.
//!
//! [`Strategy::required_memory`] evaluates the closed-form peak working set
//! per process; [`Strategy::derive`] (see [`compile`](self)) picks steps
//! automatically so that this value stays within the caller's budget.

mod compile;

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// A problem axis: rows of C (`M`), columns of C (`N`), or the contracted
/// dimension (`K`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    M,
    N,
    K,
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = match self {
            Axis::M => 'm',
            Axis::N => 'n',
            Axis::K => 'k',
        };
        write!(f, "{c}")
    }
}

/// Whether a step splits processes or time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Parallel,
    Sequential,
}

/// One schedule step: split `axis` by `divisor`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    pub kind: StepKind,
    pub axis: Axis,
    pub divisor: usize,
}

impl Step {
    pub fn parallel(axis: Axis, divisor: usize) -> Self {
        Step {
            kind: StepKind::Parallel,
            axis,
            divisor,
        }
    }

    pub fn sequential(axis: Axis, divisor: usize) -> Self {
        Step {
            kind: StepKind::Sequential,
            axis,
            divisor,
        }
    }

    pub fn is_parallel(&self) -> bool {
        self.kind == StepKind::Parallel
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            StepKind::Parallel => 'p',
            StepKind::Sequential => 's',
        };
        write!(f, "{kind}{}{}", self.axis, self.divisor)
    }
}

impl FromStr for Step {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let bad = || Error::Strategy(format!("malformed step `{s}`"));
        let mut chars = s.chars();
        let kind = match chars.next().ok_or_else(bad)? {
            'p' => StepKind::Parallel,
            's' => StepKind::Sequential,
            _ => return Err(bad()),
        };
        let axis = match chars.next().ok_or_else(bad)? {
            'm' => Axis::M,
            'n' => Axis::N,
            'k' => Axis::K,
            _ => return Err(bad()),
        };
        let divisor: usize = chars.as_str().parse().map_err(|_| bad())?;
        if divisor < 2 {
            return Err(Error::Strategy(format!(
                "step `{s}` has divisor {divisor}, need at least 2"
            )));
        }
        Ok(Step {
            kind,
            axis,
            divisor,
        })
    }
}

/// Parses a comma-separated step list such as `pm2,sm2,pk2`.
pub fn parse_steps(spec: &str) -> Result<Vec<Step>> {
    spec.split(',')
        .map(|part| part.trim().parse())
        .collect::<Result<Vec<_>>>()
}

/// The compiled schedule of one multiply call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Strategy {
    m: usize,
    n: usize,
    k: usize,
    processes: usize,
    steps: Vec<Step>,
}

impl Strategy {
    /// Builds and validates a strategy from an explicit step list.
    ///
    /// The product of parallel divisors must equal `processes`, and every
    /// split must be feasible for the given dimensions.
    pub fn from_steps(
        m: usize,
        n: usize,
        k: usize,
        processes: usize,
        steps: Vec<Step>,
    ) -> Result<Self> {
        if m == 0 || n == 0 || k == 0 {
            return Err(Error::Strategy(format!(
                "dimensions must be positive, got {m}x{n}x{k}"
            )));
        }
        if processes == 0 {
            return Err(Error::Strategy("need at least one process".into()));
        }
        let product: usize = steps
            .iter()
            .filter(|s| s.is_parallel())
            .map(|s| s.divisor)
            .product();
        if product != processes {
            return Err(Error::Strategy(format!(
                "parallel divisors multiply to {product}, expected {processes}"
            )));
        }
        let mut state = PartitionState::new(m, n, k);
        for step in &steps {
            state.apply(*step)?;
        }
        Ok(Strategy {
            m,
            n,
            k,
            processes,
            steps,
        })
    }

    /// Parses a DSL step list and validates it, e.g. `pm2,pn2` for four
    /// processes.
    pub fn from_spec(m: usize, n: usize, k: usize, processes: usize, spec: &str) -> Result<Self> {
        Strategy::from_steps(m, n, k, processes, parse_steps(spec)?)
    }

    pub fn m(&self) -> usize {
        self.m
    }

    pub fn n(&self) -> usize {
        self.n
    }

    pub fn k(&self) -> usize {
        self.k
    }

    /// Number of processes the schedule actually uses. Ranks at or beyond
    /// this count are idle for the whole call.
    pub fn processes(&self) -> usize {
        self.processes
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Upper bound on the leaf sub-problem dimensions, following the
    /// largest-piece rule of the interval split contract.
    pub fn max_leaf_dims(&self) -> (usize, usize, usize) {
        let (mut lm, mut ln, mut lk) = (self.m, self.n, self.k);
        for step in &self.steps {
            let dim = match step.axis {
                Axis::M => &mut lm,
                Axis::N => &mut ln,
                Axis::K => &mut lk,
            };
            if *dim >= step.divisor {
                *dim = dim.div_ceil(step.divisor);
            }
        }
        (lm, ln, lk)
    }

    /// Peak per-process working set in elements, evaluated by walking the
    /// step list.
    ///
    /// The walk counts the initial per-process shares, the block a process
    /// holds after each gather (a parallel step grows the matrices it does
    /// not split to the full current block), the reduction scratch of
    /// parallel-K steps, and the three contiguous leaf buffers. The estimate
    /// is deliberately conservative; the compiler keeps it within the budget,
    /// so the engine never has to re-check.
    pub fn required_memory(&self) -> usize {
        let p = self.processes;
        let share_a = (self.m * self.k).div_ceil(p);
        let share_b = (self.k * self.n).div_ceil(p);
        let share_c = (self.m * self.n).div_ceil(p);

        let (mut cm, mut cn, mut ck) = (self.m, self.n, self.k);
        let mut held_a = share_a;
        let mut held_b = share_b;
        let mut c_up = share_c;
        let mut peak = held_a + held_b + c_up;

        for step in &self.steps {
            let d = step.divisor;
            let dim = match step.axis {
                Axis::M => &mut cm,
                Axis::N => &mut cn,
                Axis::K => &mut ck,
            };
            if *dim >= d {
                *dim = dim.div_ceil(d);
            }
            if step.is_parallel() {
                match step.axis {
                    // B is not split: gathered to the full current block.
                    Axis::M => held_b = ck * cn,
                    // A is not split: gathered to the full current block.
                    Axis::N => held_a = cm * ck,
                    // C contributions of the whole block are reduced here.
                    Axis::K => c_up = c_up.max(2 * cm * cn),
                }
            }
            peak = peak.max(held_a + held_b + c_up);
        }

        let leaf = cm * ck + ck * cn + cm * cn;
        peak.max(held_a + held_b + c_up + leaf)
    }

    /// Checks the memory invariant against an explicit per-process budget.
    pub fn check_memory(&self, limit: usize) -> Result<()> {
        let needed = self.required_memory();
        if needed > limit {
            return Err(Error::Memory { needed, limit });
        }
        Ok(())
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.steps.is_empty() {
            return write!(f, "local");
        }
        let mut first = true;
        for step in &self.steps {
            if !first {
                write!(f, ",")?;
            }
            write!(f, "{step}")?;
            first = false;
        }
        Ok(())
    }
}

/// Split-feasibility walk shared by validation and derivation.
///
/// Tracks, per axis, the smallest piece a process can end up with, and per
/// matrix the column capacity left for the sub-splits performed on the matrix
/// a parallel step does not touch (those always split columns, per the
/// `Interval2D` contract).
#[derive(Debug, Clone)]
pub(crate) struct PartitionState {
    pub cm: usize,
    pub cn: usize,
    pub ck: usize,
    // Column length of each matrix after the splits that genuinely shrink it.
    a_cols: usize,
    b_cols: usize,
    c_cols: usize,
    // Product of column sub-split divisors accumulated per matrix.
    a_sub: usize,
    b_sub: usize,
    c_sub: usize,
}

impl PartitionState {
    pub fn new(m: usize, n: usize, k: usize) -> Self {
        PartitionState {
            cm: m,
            cn: n,
            ck: k,
            a_cols: k,
            b_cols: n,
            c_cols: n,
            a_sub: 1,
            b_sub: 1,
            c_sub: 1,
        }
    }

    /// True if a parallel step on `axis` with `divisor` is feasible from this
    /// state, requiring exact divisibility of the axis.
    pub fn parallel_fits(&self, axis: Axis, divisor: usize) -> bool {
        let (dim, cols, sub) = match axis {
            Axis::M => (self.cm, self.b_cols, self.b_sub),
            Axis::N => (self.cn, self.a_cols, self.a_sub),
            Axis::K => (self.ck, self.c_cols, self.c_sub),
        };
        dim % divisor == 0 && cols >= sub * divisor
    }

    pub fn apply(&mut self, step: Step) -> Result<()> {
        let d = step.divisor;
        let dim = match step.axis {
            Axis::M => self.cm,
            Axis::N => self.cn,
            Axis::K => self.ck,
        };
        if dim < d {
            return Err(Error::Strategy(format!(
                "cannot split axis {} of length {dim} by {d}",
                step.axis
            )));
        }
        match step.axis {
            Axis::M => {
                self.cm /= d;
                if step.is_parallel() {
                    self.b_sub *= d;
                    if self.b_cols < self.b_sub {
                        return Err(Error::Strategy(format!(
                            "column capacity of B exhausted by parallel-m split by {d}"
                        )));
                    }
                }
            }
            Axis::N => {
                self.cn /= d;
                self.b_cols /= d;
                self.c_cols /= d;
                if step.is_parallel() {
                    self.a_sub *= d;
                    if self.a_cols < self.a_sub {
                        return Err(Error::Strategy(format!(
                            "column capacity of A exhausted by parallel-n split by {d}"
                        )));
                    }
                }
                if self.b_cols < self.b_sub || self.c_cols < self.c_sub {
                    return Err(Error::Strategy(
                        "column capacity exhausted by n split".into(),
                    ));
                }
            }
            Axis::K => {
                self.ck /= d;
                self.a_cols /= d;
                if step.is_parallel() {
                    self.c_sub *= d;
                    if self.c_cols < self.c_sub {
                        return Err(Error::Strategy(format!(
                            "column capacity of C exhausted by parallel-k split by {d}"
                        )));
                    }
                }
                if self.a_cols < self.a_sub {
                    return Err(Error::Strategy(
                        "column capacity exhausted by k split".into(),
                    ));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display_round_trip() {
        let steps = parse_steps("pm2,sm2,pk2").unwrap();
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[0], Step::parallel(Axis::M, 2));
        assert_eq!(steps[1], Step::sequential(Axis::M, 2));
        assert_eq!(steps[2], Step::parallel(Axis::K, 2));

        let s = Strategy::from_steps(100, 100, 100, 4, steps).unwrap();
        assert_eq!(s.to_string(), "pm2,sm2,pk2");
    }

    #[test]
    fn parse_rejects_malformed() {
        assert!(parse_steps("xm2").is_err());
        assert!(parse_steps("p2").is_err());
        assert!(parse_steps("pm").is_err());
        assert!(parse_steps("pm1").is_err());
        assert!(parse_steps("pm2,,pk2").is_err());
    }

    #[test]
    fn divisor_product_must_match_processes() {
        let steps = parse_steps("pm2,pn2").unwrap();
        assert!(Strategy::from_steps(64, 64, 64, 4, steps.clone()).is_ok());
        let err = Strategy::from_steps(64, 64, 64, 8, steps).unwrap_err();
        assert!(matches!(err, Error::Strategy(_)));
    }

    #[test]
    fn oversplit_rejected() {
        // Splitting an axis of length 2 by 4 is infeasible.
        let steps = parse_steps("pm4").unwrap();
        assert!(Strategy::from_steps(2, 64, 64, 4, steps).is_err());
    }

    #[test]
    fn column_capacity_guard() {
        // pk8 sub-splits C's columns eight ways; n = 4 cannot host that.
        let steps = parse_steps("pk8").unwrap();
        assert!(Strategy::from_steps(64, 4, 64, 8, steps).is_err());
    }

    #[test]
    fn max_leaf_dims_follow_splits() {
        let s = Strategy::from_spec(100, 100, 100, 4, "pm2,sm2,pk2").unwrap();
        // m: 100 -> 50 -> 25, k: 100 -> 50, n untouched.
        assert_eq!(s.max_leaf_dims(), (25, 100, 50));
    }

    #[test]
    fn required_memory_single_process() {
        let s = Strategy::from_steps(8, 8, 8, 1, vec![]).unwrap();
        // Shares are the whole matrices and the leaf buffers duplicate them.
        assert_eq!(s.required_memory(), 2 * (64 + 64 + 64));
    }

    #[test]
    fn sequential_steps_reduce_required_memory() {
        let base = Strategy::from_spec(64, 64, 64, 4, "pm2,pn2").unwrap();
        let seq = Strategy::from_spec(64, 64, 64, 4, "sk2,pm2,pn2").unwrap();
        assert!(seq.required_memory() < base.required_memory());
    }

    #[test]
    fn local_strategy_displays_as_local() {
        let s = Strategy::from_steps(4, 4, 4, 1, vec![]).unwrap();
        assert_eq!(s.to_string(), "local");
    }
}

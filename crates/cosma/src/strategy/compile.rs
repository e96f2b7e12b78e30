//! Automatic strategy derivation.
//!
//! The compiler turns `(m, n, k, P, memory limit)` into a step list:
//!
//! 1. Parallel factors are the prime factorisation of the process count,
//!    consumed largest first. Each prime is assigned to the axis whose split
//!    moves the least data: an M-split gathers B, an N-split gathers A and a
//!    K-split reduces C, so the per-process received volume of splitting by
//!    `d` at group size `q` is `(d-1)` times that matrix's share. Ties are
//!    broken K over M over N.
//! 2. Whenever the projected peak working set exceeds the budget, a
//!    sequential step is emitted first, splitting the largest current
//!    dimension by the smallest divisor that restores feasibility.
//! 3. If the requested process count admits no feasible assignment (a prime
//!    divides no axis), the compiler retries with fewer processes; the
//!    surplus ranks stay idle for the whole call.
//!
//! The procedure is deterministic: identical inputs produce bit-identical
//! strategies on every rank, which is what lets all processes traverse the
//! same schedule without ever negotiating it.

use log::debug;

use super::{Axis, PartitionState, Step, Strategy};
use crate::error::{Error, Result};

/// Prime factors of `x` in ascending order, with multiplicity.
pub(crate) fn prime_factors(mut x: usize) -> Vec<usize> {
    let mut out = Vec::new();
    let mut q = 2;
    while q * q <= x {
        while x % q == 0 {
            out.push(q);
            x /= q;
        }
        q += 1;
    }
    if x > 1 {
        out.push(x);
    }
    out
}

impl Strategy {
    /// Derives a strategy for multiplying an `m x k` by a `k x n` matrix on
    /// `processes` ranks, keeping the per-process working set within
    /// `memory_limit` elements when one is given.
    ///
    /// The derivation may leave ranks idle when the full process count admits
    /// no feasible factorisation; [`Strategy::processes`] reports the count
    /// actually used.
    ///
    /// # Example
    ///
    /// ```
    /// use cosma::Strategy;
    ///
    /// let s = Strategy::derive(64, 64, 64, 3, None).unwrap();
    /// // 3 does not divide 64, so one rank is left idle.
    /// assert_eq!(s.processes(), 2);
    /// ```
    pub fn derive(
        m: usize,
        n: usize,
        k: usize,
        processes: usize,
        memory_limit: Option<usize>,
    ) -> Result<Strategy> {
        if m == 0 || n == 0 || k == 0 {
            return Err(Error::Strategy(format!(
                "dimensions must be positive, got {m}x{n}x{k}"
            )));
        }
        if processes == 0 {
            return Err(Error::Strategy("need at least one process".into()));
        }

        let mut last_err = None;
        for p_try in (1..=processes).rev() {
            match derive_for(m, n, k, p_try, memory_limit) {
                Ok(strategy) => {
                    if p_try < processes {
                        debug!(
                            "strategy uses {p_try} of {processes} processes; \
                             ranks {p_try}..{processes} stay idle"
                        );
                    }
                    debug!(
                        "derived strategy `{strategy}` for {m}x{n}x{k}, \
                         peak {} elements per process",
                        strategy.required_memory()
                    );
                    return Ok(strategy);
                }
                // Shrinking the process count only grows per-process shares,
                // so a budget failure is final.
                Err(e @ Error::Memory { .. }) => return Err(e),
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| Error::Strategy("no feasible decomposition".into())))
    }
}

/// Derives a strategy using exactly `p` processes, or fails.
fn derive_for(
    m: usize,
    n: usize,
    k: usize,
    p: usize,
    memory_limit: Option<usize>,
) -> Result<Strategy> {
    let mut primes = prime_factors(p);
    let mut steps: Vec<Step> = Vec::new();
    let mut state = PartitionState::new(m, n, k);
    let mut group = p;

    loop {
        let completion = complete_parallel(&state, &primes, group)?;

        if let Some(limit) = memory_limit {
            let mut hyp = steps.clone();
            hyp.extend(completion.iter().copied());
            let projected = Strategy::from_steps(m, n, k, p, hyp)?;
            if projected.required_memory() > limit {
                let step = pick_sequential(
                    &state, &primes, group, limit, &steps, m, n, k, p,
                )?;
                state.apply(step)?;
                steps.push(step);
                continue;
            }
        }

        let Some(&step) = completion.first() else {
            break;
        };
        state.apply(step)?;
        let used = primes
            .iter()
            .rposition(|&q| q == step.divisor)
            .expect("completion uses an available prime");
        primes.remove(used);
        group /= step.divisor;
        steps.push(step);
    }

    let strategy = Strategy::from_steps(m, n, k, p, steps)?;
    if let Some(limit) = memory_limit {
        strategy.check_memory(limit)?;
    }
    Ok(strategy)
}

/// Assigns all remaining primes to axes, largest prime first, lowest
/// communication cost first, without memory checks.
fn complete_parallel(
    state: &PartitionState,
    primes: &[usize],
    group: usize,
) -> Result<Vec<Step>> {
    let mut st = state.clone();
    let mut rem = primes.to_vec();
    let mut q_rem = group;
    let mut out = Vec::new();

    while let Some(&q) = rem.last() {
        // Preference encodes the deterministic tie-break: K over M over N.
        let mut best: Option<(usize, u8, Axis)> = None;
        for (axis, pref) in [(Axis::K, 0u8), (Axis::M, 1), (Axis::N, 2)] {
            if !st.parallel_fits(axis, q) {
                continue;
            }
            let moved = match axis {
                Axis::M => st.ck * st.cn,
                Axis::N => st.cm * st.ck,
                Axis::K => st.cm * st.cn,
            };
            let cost = (q - 1) * moved.div_ceil(q_rem);
            if best.map_or(true, |(bc, bp, _)| (cost, pref) < (bc, bp)) {
                best = Some((cost, pref, axis));
            }
        }
        let Some((_, _, axis)) = best else {
            return Err(Error::Strategy(format!(
                "prime factor {q} divides no splittable axis"
            )));
        };
        let step = Step::parallel(axis, q);
        st.apply(step)?;
        rem.pop();
        q_rem /= q;
        out.push(step);
    }
    Ok(out)
}

/// Picks the sequential step emitted when the projected working set exceeds
/// the budget: the largest current dimension, split by the smallest divisor
/// that restores feasibility.
#[allow(clippy::too_many_arguments)]
fn pick_sequential(
    state: &PartitionState,
    primes: &[usize],
    group: usize,
    limit: usize,
    steps: &[Step],
    m: usize,
    n: usize,
    k: usize,
    p: usize,
) -> Result<Step> {
    let project = |cand: Step| -> Option<usize> {
        let mut st = state.clone();
        st.apply(cand).ok()?;
        let completion = complete_parallel(&st, primes, group).ok()?;
        let mut hyp = steps.to_vec();
        hyp.push(cand);
        hyp.extend(completion);
        Strategy::from_steps(m, n, k, p, hyp)
            .ok()
            .map(|s| s.required_memory())
    };

    // Axes ordered by current length; max_by_key keeps the last maximum, so
    // listing N, M, K resolves ties in favour of K, then M.
    let mut axes = [
        (state.cn, Axis::N),
        (state.cm, Axis::M),
        (state.ck, Axis::K),
    ];
    axes.sort_by_key(|&(len, _)| len);

    // Smallest divisor of the largest dimension that fits the budget.
    for &(len, axis) in axes.iter().rev() {
        for d in 2..=len {
            let cand = Step::sequential(axis, d);
            if let Some(needed) = project(cand) {
                if needed <= limit {
                    return Ok(cand);
                }
            }
        }
    }

    // Nothing fits outright: take the deepest feasible split of the largest
    // dimension so the walk keeps making progress.
    for &(len, axis) in axes.iter().rev() {
        for d in (2..=len).rev() {
            let cand = Step::sequential(axis, d);
            if project(cand).is_some() {
                return Ok(cand);
            }
        }
    }

    let needed = project_current(state, primes, group, steps, m, n, k, p)?;
    Err(Error::Memory { needed, limit })
}

fn project_current(
    state: &PartitionState,
    primes: &[usize],
    group: usize,
    steps: &[Step],
    m: usize,
    n: usize,
    k: usize,
    p: usize,
) -> Result<usize> {
    let completion = complete_parallel(state, primes, group)?;
    let mut hyp = steps.to_vec();
    hyp.extend(completion);
    Ok(Strategy::from_steps(m, n, k, p, hyp)?.required_memory())
}

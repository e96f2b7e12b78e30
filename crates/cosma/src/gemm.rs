//! The local matrix-multiply kernel invoked at schedule leaves.
//!
//! When the schedule bottoms out, the remaining problem is a plain
//! single-process `C = alpha op(A) op(B) + beta C` on contiguous column-major
//! buffers. The engine talks to that kernel through [`LocalGemm`], so a
//! BLAS- or GPU-backed implementation can be dropped in; [`PortableGemm`] is
//! the bundled pure-Rust implementation.
//!
//! `PortableGemm` uses cache blocking over the three loops (columns of C,
//! the contracted dimension, rows of C) with the innermost loop running down
//! contiguous columns of A and C. Tile sizes come from [`TilingParams`] and
//! can be overridden through the `COSMA_TILE_M`, `COSMA_TILE_N` and
//! `COSMA_TILE_K` environment variables.

use once_cell::sync::Lazy;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::types::{Op, Scalar};

/// Work below this many scalar multiplications stays single-threaded.
#[cfg(feature = "parallel")]
const PARALLEL_THRESHOLD: usize = 1 << 18;

/// Cache-blocking tile sizes for the portable kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TilingParams {
    pub mc: usize,
    pub nc: usize,
    pub kc: usize,
}

impl Default for TilingParams {
    fn default() -> Self {
        TilingParams {
            mc: 128,
            nc: 128,
            kc: 128,
        }
    }
}

impl TilingParams {
    /// Defaults overridden by `COSMA_TILE_{M,N,K}` where set.
    pub fn from_env() -> Self {
        let read = |name: &str, fallback: usize| {
            std::env::var(name)
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .filter(|&v| v > 0)
                .unwrap_or(fallback)
        };
        let d = TilingParams::default();
        TilingParams {
            mc: read("COSMA_TILE_M", d.mc),
            nc: read("COSMA_TILE_N", d.nc),
            kc: read("COSMA_TILE_K", d.kc),
        }
    }
}

static DEFAULT_TILES: Lazy<TilingParams> = Lazy::new(TilingParams::from_env);

/// Single-process GEMM on column-major buffers.
///
/// `a` holds the stored operand of `op_a` with leading dimension `lda`
/// (`m x k` as used, possibly `k x m` as stored); likewise `b` and `op_b`.
/// `c` is `m x n` with leading dimension `ldc` and is updated in place.
pub trait LocalGemm<T: Scalar> {
    #[allow(clippy::too_many_arguments)]
    fn gemm(
        &self,
        m: usize,
        n: usize,
        k: usize,
        alpha: T,
        a: &[T],
        lda: usize,
        op_a: Op,
        b: &[T],
        ldb: usize,
        op_b: Op,
        beta: T,
        c: &mut [T],
        ldc: usize,
    ) -> Result<()>;
}

/// The bundled cache-blocked kernel.
#[derive(Debug, Clone, Copy)]
pub struct PortableGemm {
    tiles: TilingParams,
}

impl Default for PortableGemm {
    fn default() -> Self {
        Self::new()
    }
}

impl PortableGemm {
    pub fn new() -> Self {
        PortableGemm {
            tiles: *DEFAULT_TILES,
        }
    }

    pub fn with_tiles(tiles: TilingParams) -> Self {
        PortableGemm { tiles }
    }
}

#[inline]
fn a_element<T: Scalar>(a: &[T], lda: usize, op: Op, i: usize, l: usize) -> T {
    match op {
        Op::NoTrans => a[l * lda + i],
        Op::Trans => a[i * lda + l],
        Op::ConjTrans => a[i * lda + l].conj(),
    }
}

#[inline]
fn b_element<T: Scalar>(b: &[T], ldb: usize, op: Op, l: usize, j: usize) -> T {
    match op {
        Op::NoTrans => b[j * ldb + l],
        Op::Trans => b[l * ldb + j],
        Op::ConjTrans => b[l * ldb + j].conj(),
    }
}

/// Scales the `m x n` window of `c` by `beta`; zero overwrites.
fn scale_c<T: Scalar>(m: usize, n: usize, beta: T, c: &mut [T], ldc: usize) {
    if beta.is_one() {
        return;
    }
    for j in 0..n {
        let col = &mut c[j * ldc..j * ldc + m];
        if beta.is_zero() {
            col.fill(T::zero());
        } else {
            for v in col {
                *v *= beta;
            }
        }
    }
}

/// The blocked update of one stripe of columns of C. `j0` is the stripe's
/// first column in the full problem.
#[allow(clippy::too_many_arguments)]
fn update_stripe<T: Scalar>(
    tiles: TilingParams,
    m: usize,
    cols: usize,
    k: usize,
    alpha: T,
    a: &[T],
    lda: usize,
    op_a: Op,
    b: &[T],
    ldb: usize,
    op_b: Op,
    c: &mut [T],
    ldc: usize,
    j0: usize,
) {
    for pc in (0..k).step_by(tiles.kc) {
        let kb = tiles.kc.min(k - pc);
        for ic in (0..m).step_by(tiles.mc) {
            let mb = tiles.mc.min(m - ic);
            for j in 0..cols {
                for l in pc..pc + kb {
                    let blj = alpha * b_element(b, ldb, op_b, l, j0 + j);
                    if blj.is_zero() {
                        continue;
                    }
                    let col = &mut c[j * ldc + ic..j * ldc + ic + mb];
                    match op_a {
                        Op::NoTrans => {
                            let acol = &a[l * lda + ic..l * lda + ic + mb];
                            for (cv, av) in col.iter_mut().zip(acol) {
                                *cv += *av * blj;
                            }
                        }
                        _ => {
                            for (i, cv) in col.iter_mut().enumerate() {
                                *cv += a_element(a, lda, op_a, ic + i, l) * blj;
                            }
                        }
                    }
                }
            }
        }
    }
}

impl<T: Scalar> LocalGemm<T> for PortableGemm {
    fn gemm(
        &self,
        m: usize,
        n: usize,
        k: usize,
        alpha: T,
        a: &[T],
        lda: usize,
        op_a: Op,
        b: &[T],
        ldb: usize,
        op_b: Op,
        beta: T,
        c: &mut [T],
        ldc: usize,
    ) -> Result<()> {
        if m == 0 || n == 0 {
            return Ok(());
        }
        let (a_rows, a_cols) = if op_a.is_transposed() { (k, m) } else { (m, k) };
        let (b_rows, b_cols) = if op_b.is_transposed() { (n, k) } else { (k, n) };
        if lda < a_rows || ldb < b_rows || ldc < m {
            return Err(Error::InvalidInput(
                "leading dimension smaller than stored row count".into(),
            ));
        }
        let need = |ld: usize, rows: usize, cols: usize| {
            if cols == 0 {
                0
            } else {
                ld * (cols - 1) + rows
            }
        };
        if a.len() < need(lda, a_rows, a_cols)
            || b.len() < need(ldb, b_rows, b_cols)
            || c.len() < need(ldc, m, n)
        {
            return Err(Error::InvalidInput("operand buffer too short".into()));
        }

        scale_c(m, n, beta, c, ldc);
        if alpha.is_zero() || k == 0 {
            return Ok(());
        }

        #[cfg(feature = "parallel")]
        if c.len() == ldc * n && m * n * k >= PARALLEL_THRESHOLD {
            let tiles = self.tiles;
            c.par_chunks_mut(ldc * tiles.nc)
                .enumerate()
                .for_each(|(chunk, c_stripe)| {
                    let j0 = chunk * tiles.nc;
                    let cols = c_stripe.len() / ldc;
                    update_stripe(
                        tiles, m, cols, k, alpha, a, lda, op_a, b, ldb, op_b, c_stripe, ldc, j0,
                    );
                });
            return Ok(());
        }

        let tiles = self.tiles;
        for jc in (0..n).step_by(tiles.nc) {
            let cols = tiles.nc.min(n - jc);
            update_stripe(
                tiles,
                m,
                cols,
                k,
                alpha,
                a,
                lda,
                op_a,
                b,
                ldb,
                op_b,
                &mut c[jc * ldc..],
                ldc,
                jc,
            );
        }
        Ok(())
    }
}

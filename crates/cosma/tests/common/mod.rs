//! Shared helpers for the distributed multiply suites.
#![allow(dead_code)]

use cosma::{Layout, Scalar};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Dense column-major matrix with values in [-1, 1].
pub fn random_matrix(rows: usize, cols: usize, seed: u64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..rows * cols).map(|_| rng.gen_range(-1.0..1.0)).collect()
}

/// Unblocked reference product: C = A * B, column-major.
pub fn reference_product(
    m: usize,
    n: usize,
    k: usize,
    a: &[f64],
    b: &[f64],
) -> Vec<f64> {
    let mut c = vec![0.0; m * n];
    for j in 0..n {
        for l in 0..k {
            let blj = b[j * k + l];
            for i in 0..m {
                c[j * m + i] += a[l * m + i] * blj;
            }
        }
    }
    c
}

/// Carves one rank's local buffer out of a dense column-major matrix.
pub fn local_slice<T: Scalar>(layout: &Layout, rank: usize, global: &[T], rows: usize) -> Vec<T> {
    let mut out = vec![T::zero(); layout.local_len(rank)];
    for region in layout.owned_regions(rank) {
        for local in 0..region.size() {
            let (r, c) = region.global_index(local);
            out[layout.local_offset(r, c)] = global[c * rows + r];
        }
    }
    out
}

/// Reassembles a dense column-major matrix from per-rank local buffers.
pub fn assemble_global<T: Scalar>(
    layout: &Layout,
    locals: &[Vec<T>],
    rows: usize,
    cols: usize,
) -> Vec<T> {
    let mut out = vec![T::zero(); rows * cols];
    for (rank, local) in locals.iter().enumerate() {
        for region in layout.owned_regions(rank) {
            for idx in 0..region.size() {
                let (r, c) = region.global_index(idx);
                out[c * rows + r] = local[layout.local_offset(r, c)];
            }
        }
    }
    out
}

/// Asserts two dense matrices agree within `scale * (m+n+k) * eps`.
pub fn assert_close(got: &[f64], expect: &[f64], dims_sum: usize) {
    assert_eq!(got.len(), expect.len());
    let tol = 8.0 * dims_sum as f64 * f64::EPSILON;
    for (idx, (g, e)) in got.iter().zip(expect).enumerate() {
        assert!(
            (g - e).abs() <= tol,
            "element {idx}: got {g}, expected {e}, tolerance {tol}"
        );
    }
}

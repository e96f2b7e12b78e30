//! Communication-optimal distributed dense matrix multiplication.
//!
//! cosma computes `C = alpha op(A) op(B) + beta C` across a group of
//! cooperating processes that jointly hold the three matrices in
//! caller-specified layouts, with `op` one of identity, transpose or
//! conjugate transpose. The schedule it runs is derived per problem from
//! `(m, n, k, P, memory limit)` and trades memory for communication
//! explicitly: give it more memory per process and it moves less data.
//!
//! # How a multiply runs
//!
//! | Stage | Component | What happens |
//! |-------|-----------|--------------|
//! | compile | [`Strategy`] | `(m, n, k, P, S)` becomes an ordered list of parallel and sequential splits |
//! | map | [`mapper`] | every rank derives who owns which region at every level, with no messages |
//! | import | [`layout`] | caller layouts (grid or block-cyclic) are translated into the native distribution |
//! | execute | engine | parallel steps gather/reduce over cross-peer rings, sequential steps iterate slices, leaves call the local kernel |
//! | export | [`layout`] | contributions return to the caller's C layout with `beta` applied |
//!
//! Determinism is load-bearing: interval splitting, strategy derivation and
//! transfer planning are exact contracts, so all ranks compute identical
//! plans independently and the transport carries nothing but elements.
//!
//! # Example
//!
//! ```
//! use cosma::comm::{Communicator, ThreadComm};
//! use cosma::{
//!     GridLayout, Layout, MatrixDescriptor, MatrixDescriptorMut, MultiplyContext, Op,
//! };
//!
//! // Four ranks each own one quadrant of every matrix.
//! let (m, n, k) = (8, 8, 8);
//! let layout = || Layout::Grid(GridLayout::new(8, 8, 2, 2).unwrap());
//!
//! let results = ThreadComm::<f64>::run(4, |comm| {
//!     let rank = comm.rank();
//!     // A = 2*I and B = I, held quadrant-wise: diagonal quadrants of the
//!     // identity live on ranks 0 and 3.
//!     let eye = |scale: f64| -> Vec<f64> {
//!         let mut q = vec![0.0; 16];
//!         if rank == 0 || rank == 3 {
//!             for i in 0..4 {
//!                 q[i * 4 + i] = scale;
//!             }
//!         }
//!         q
//!     };
//!     let a = eye(2.0);
//!     let b = eye(1.0);
//!     let mut c = vec![0.0; 16];
//!
//!     let mut ctx = MultiplyContext::new(m, n, k, comm.size()).unwrap();
//!     let da = MatrixDescriptor::new(m, k, Op::NoTrans, layout(), &a).unwrap();
//!     let db = MatrixDescriptor::new(k, n, Op::NoTrans, layout(), &b).unwrap();
//!     let mut dc = MatrixDescriptorMut::new(m, n, layout(), &mut c).unwrap();
//!     cosma::multiply(&comm, &mut ctx, &da, &db, &mut dc, 1.0, 0.0).unwrap();
//!     c
//! });
//!
//! // C = 2*I, so diagonal quadrants match A and the others are zero.
//! assert_eq!(results[0][0], 2.0);
//! assert!(results[1].iter().all(|&v| v == 0.0));
//! ```
//!
//! # The pieces
//!
//! - [`interval`]: closed ranges and rectangular regions with the exact
//!   splitting contract everything else leans on.
//! - [`strategy`]: the schedule DSL (`pm2,sm2,pk2`), validation, automatic
//!   derivation and the closed-form memory recurrence.
//! - [`layout`]: grid and ScaLAPACK-style block-cyclic descriptors plus the
//!   matrix descriptors passed to [`multiply`].
//! - [`mapper`]: rank/region algebra: native distributions, per-level rank
//!   groups and cross-peer rings, transfer plans.
//! - [`buffer`]: the per-process arena pool sized from the strategy.
//! - [`comm`]: the transport trait, with [`comm::ThreadComm`] bundled for
//!   in-process groups; an MPI binding slots in behind the same trait.
//! - [`gemm`]: the local kernel trait and the bundled portable blocked
//!   implementation.

pub mod block;
pub mod buffer;
pub mod comm;
pub mod error;
pub mod gemm;
pub mod interval;
pub mod layout;
pub mod mapper;
pub mod strategy;
pub mod types;

mod api;
mod engine;

pub use api::{multiply, multiply_with_kernel, MultiplyContext, MultiplyOptions};
pub use error::{Error, Result};
pub use gemm::{LocalGemm, PortableGemm, TilingParams};
pub use interval::{Interval, Interval2D};
pub use layout::{
    BlockCyclicLayout, GridLayout, Layout, MatrixDescriptor, MatrixDescriptorMut,
};
pub use strategy::{parse_steps, Axis, Step, StepKind, Strategy};
pub use types::{Complex32, Complex64, Op, Scalar};

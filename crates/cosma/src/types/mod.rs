//! Element types and operator flags.
//!
//! The multiply engine is generic over a small closed family of element
//! types, the four types dense linear algebra actually uses:
//!
//! | Type | Precision | Field |
//! |------|-----------|-------|
//! | `f32` | single | real |
//! | `f64` | double | real |
//! | [`Complex32`] | single | complex |
//! | [`Complex64`] | double | complex |
//!
//! The family is captured by the [`Scalar`] trait so dispatch is resolved at
//! compile time; there is no dynamic dispatch inside the inner loops.
//!
//! [`Op`] describes the operator applied to an input matrix before the
//! product is formed: identity, transpose, or conjugate transpose. For real
//! element types conjugation is the identity, so `Op::ConjTrans` and
//! `Op::Trans` coincide there.

mod scalar;

pub use num_complex::{Complex32, Complex64};
pub use scalar::Scalar;

/// Operator applied to an input matrix: `op(A)` in `C = alpha op(A) op(B) + beta C`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Op {
    /// Use the matrix as stored.
    #[default]
    NoTrans,
    /// Use the transpose of the stored matrix.
    Trans,
    /// Use the conjugate transpose of the stored matrix.
    ConjTrans,
}

impl Op {
    /// True if the operator swaps the stored row and column dimensions.
    pub fn is_transposed(self) -> bool {
        !matches!(self, Op::NoTrans)
    }

    /// True if the operator conjugates elements.
    pub fn conjugates(self) -> bool {
        matches!(self, Op::ConjTrans)
    }

    /// Applies the element-wise part of the operator.
    #[inline]
    pub fn apply<T: Scalar>(self, value: T) -> T {
        if self.conjugates() {
            value.conj()
        } else {
            value
        }
    }
}

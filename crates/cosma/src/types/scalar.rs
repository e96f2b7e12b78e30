//! The scalar trait behind the generic engine.

use std::fmt::{Debug, Display};
use std::iter::Sum;

use num_complex::{Complex32, Complex64};
use num_traits::NumAssign;

/// Element types the engine multiplies: `f32`, `f64`, [`Complex32`] and
/// [`Complex64`].
///
/// Beyond ordinary field arithmetic the engine needs conjugation (for the
/// conjugate-transpose operator), a modulus for error bounds, and conversion
/// from `f64` so tests and benches can fill matrices generically.
pub trait Scalar:
    Copy + PartialEq + Debug + Display + Send + Sync + NumAssign + Sum<Self> + 'static
{
    /// True for the complex members of the family.
    const COMPLEX: bool;

    /// Complex conjugate; the identity for real types.
    fn conj(self) -> Self;

    /// Modulus as `f64`, used for tolerance checks.
    fn modulus(self) -> f64;

    /// Embeds a real value.
    fn from_f64(value: f64) -> Self;

    /// Machine epsilon of the underlying precision, as `f64`.
    fn eps() -> f64;
}

impl Scalar for f32 {
    const COMPLEX: bool = false;

    #[inline]
    fn conj(self) -> Self {
        self
    }

    #[inline]
    fn modulus(self) -> f64 {
        f64::from(self.abs())
    }

    #[inline]
    fn from_f64(value: f64) -> Self {
        value as f32
    }

    fn eps() -> f64 {
        f64::from(f32::EPSILON)
    }
}

impl Scalar for f64 {
    const COMPLEX: bool = false;

    #[inline]
    fn conj(self) -> Self {
        self
    }

    #[inline]
    fn modulus(self) -> f64 {
        self.abs()
    }

    #[inline]
    fn from_f64(value: f64) -> Self {
        value
    }

    fn eps() -> f64 {
        f64::EPSILON
    }
}

impl Scalar for Complex32 {
    const COMPLEX: bool = true;

    #[inline]
    fn conj(self) -> Self {
        Complex32::new(self.re, -self.im)
    }

    #[inline]
    fn modulus(self) -> f64 {
        f64::from(self.norm())
    }

    #[inline]
    fn from_f64(value: f64) -> Self {
        Complex32::new(value as f32, 0.0)
    }

    fn eps() -> f64 {
        f64::from(f32::EPSILON)
    }
}

impl Scalar for Complex64 {
    const COMPLEX: bool = true;

    #[inline]
    fn conj(self) -> Self {
        Complex64::new(self.re, -self.im)
    }

    #[inline]
    fn modulus(self) -> f64 {
        self.norm()
    }

    #[inline]
    fn from_f64(value: f64) -> Self {
        Complex64::new(value, 0.0)
    }

    fn eps() -> f64 {
        f64::EPSILON
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conjugation() {
        assert_eq!(Scalar::conj(2.0f64), 2.0);
        let z = Complex64::new(3.0, 4.0);
        assert_eq!(Scalar::conj(z), Complex64::new(3.0, -4.0));
        // |3 + 4i| = 5.
        assert!((z.modulus() - 5.0).abs() < 1e-12);
    }

    #[test]
    fn embedding() {
        assert_eq!(f32::from_f64(1.5), 1.5f32);
        assert_eq!(Complex32::from_f64(2.0), Complex32::new(2.0, 0.0));
    }
}

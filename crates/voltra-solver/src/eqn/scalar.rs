//! Scalar capability trait shared by the real and complex solvers.

use nalgebra::ComplexField;
use num_complex::Complex64;

/// Number field the MNA machinery is generic over.
///
/// DC and transient analyses run over `f64`, AC and noise over
/// `Complex<f64>`. Device stamps are always complex; `from_stamp` performs
/// the per-field conversion (taking the real part for `f64`), which is the
/// only place the two code paths diverge.
pub trait MnaScalar: ComplexField<RealField = f64> + Copy + 'static {
    /// Converts a device stamp into this field.
    fn from_stamp(value: Complex64) -> Self;

    /// Converts a solved value back into the stamp domain for write-back.
    fn into_stamp(self) -> Complex64;

    /// Magnitude of the value.
    fn mag(self) -> f64;

    /// True when neither component is NaN or infinite.
    fn finite(self) -> bool;
}

impl MnaScalar for f64 {
    #[inline]
    fn from_stamp(value: Complex64) -> Self {
        value.re
    }

    #[inline]
    fn into_stamp(self) -> Complex64 {
        Complex64::new(self, 0.0)
    }

    #[inline]
    fn mag(self) -> f64 {
        self.abs()
    }

    #[inline]
    fn finite(self) -> bool {
        self.is_finite()
    }
}

impl MnaScalar for Complex64 {
    #[inline]
    fn from_stamp(value: Complex64) -> Self {
        value
    }

    #[inline]
    fn into_stamp(self) -> Complex64 {
        self
    }

    #[inline]
    fn mag(self) -> f64 {
        self.norm()
    }

    #[inline]
    fn finite(self) -> bool {
        self.re.is_finite() && self.im.is_finite()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn real_field_takes_real_part() {
        let x = f64::from_stamp(Complex64::new(3.0, 4.0));
        assert_eq!(x, 3.0);
    }

    #[test]
    fn complex_field_keeps_full_value() {
        let z = Complex64::from_stamp(Complex64::new(3.0, 4.0));
        assert_eq!(z.mag(), 5.0);
    }

    #[test]
    fn finiteness() {
        assert!(1.0f64.finite());
        assert!(!f64::NAN.finite());
        assert!(!Complex64::new(0.0, f64::INFINITY).finite());
    }
}

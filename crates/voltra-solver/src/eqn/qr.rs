//! Householder QR and LQ solvers.
//!
//! QR solves square systems by orthogonal triangularization; the LQ
//! variant yields the minimum-norm least-squares solution and is selected
//! with the `HouseholderLQ` solver property.

use nalgebra::{DMatrix, DVector};
use voltra_core::error::{Error, Result};

use super::scalar::MnaScalar;

const PIVOT_EPSILON: f64 = f64::EPSILON;

/// Householder reflectors and the triangular factor of a QR decomposition.
#[derive(Debug, Clone)]
pub struct QrFactors<T: MnaScalar> {
    r: DMatrix<T>,
    /// One reflector per column; an empty vector marks an identity step.
    reflectors: Vec<DVector<T>>,
}

impl<T: MnaScalar> QrFactors<T> {
    /// Factorizes a copy of `a` into Q (as reflectors) and R.
    pub fn factorize(a: &DMatrix<T>) -> Result<Self> {
        let n = a.nrows();
        if n != a.ncols() {
            return Err(Error::DimensionMismatch {
                expected: n,
                actual: a.ncols(),
            });
        }
        let mut r = a.clone();
        let mut reflectors = Vec::with_capacity(n);
        for k in 0..n {
            reflectors.push(make_reflector(&mut r, k));
        }
        Ok(Self { r, reflectors })
    }

    /// Solves `A x = z` via `R x = Q^H z`.
    pub fn substitute(&self, z: &DVector<T>) -> Result<DVector<T>> {
        let n = self.r.nrows();
        if z.len() != n {
            return Err(Error::DimensionMismatch {
                expected: n,
                actual: z.len(),
            });
        }
        let mut y = z.clone();
        for v in &self.reflectors {
            apply_reflector_to_vector(v, &mut y);
        }
        back_substitute(&self.r, &y)
    }

    /// Applies the stored reflectors in reverse order, i.e. multiplies by Q.
    fn apply_q(&self, y: &mut DVector<T>) {
        for v in self.reflectors.iter().rev() {
            apply_reflector_to_vector(v, y);
        }
    }
}

/// Minimum-norm least-squares solve through an LQ factorization.
///
/// `A = L Q` is obtained as the adjoint of the QR factorization of `A^H`;
/// the solution is `x = Q^H y` with `L y = z`.
pub fn solve_lq<T: MnaScalar>(a: &DMatrix<T>, z: &DVector<T>) -> Result<DVector<T>> {
    let qr = QrFactors::factorize(&a.adjoint())?;
    let n = qr.r.nrows();
    if z.len() != n {
        return Err(Error::DimensionMismatch {
            expected: n,
            actual: z.len(),
        });
    }
    // forward substitution with L = R^H
    let mut y: DVector<T> = DVector::zeros(n);
    for i in 0..n {
        let mut sum = z[i];
        for k in 0..i {
            sum -= qr.r[(k, i)].conjugate() * y[k];
        }
        let diag = qr.r[(i, i)].conjugate();
        if diag.mag() == 0.0 {
            return Err(Error::Pivot);
        }
        if diag.mag() < PIVOT_EPSILON {
            return Err(Error::Singular);
        }
        y[i] = sum / diag;
    }
    qr.apply_q(&mut y);
    Ok(y)
}

/// Builds the Householder reflector eliminating column `k` below the
/// diagonal and applies it to the trailing submatrix. Returns the
/// reflector vector (empty when the column is already reduced).
fn make_reflector<T: MnaScalar>(r: &mut DMatrix<T>, k: usize) -> DVector<T> {
    let n = r.nrows();
    let norm = column_norm(r, k, k);
    if norm == 0.0 {
        return DVector::zeros(0);
    }
    let akk = r[(k, k)];
    let phase = if akk.mag() > 0.0 {
        akk / T::from_real(akk.mag())
    } else {
        T::one()
    };
    let alpha = -phase * T::from_real(norm);

    let mut v: DVector<T> = DVector::zeros(n);
    for i in k..n {
        v[i] = r[(i, k)];
    }
    v[k] -= alpha;
    let vnorm2: f64 = (k..n).map(|i| v[i].mag() * v[i].mag()).sum();
    if vnorm2 == 0.0 {
        return DVector::zeros(0);
    }
    let tau = T::from_real(2.0 / vnorm2);

    for col in k..n {
        let mut dot = T::zero();
        for i in k..n {
            dot += v[i].conjugate() * r[(i, col)];
        }
        let s = tau * dot;
        for i in k..n {
            let sub = s * v[i];
            r[(i, col)] -= sub;
        }
    }
    v
}

/// Applies `H = I - tau v v^H` to a vector in place.
fn apply_reflector_to_vector<T: MnaScalar>(v: &DVector<T>, y: &mut DVector<T>) {
    if v.len() == 0 {
        return;
    }
    let vnorm2: f64 = v.iter().map(|vi| vi.mag() * vi.mag()).sum();
    if vnorm2 == 0.0 {
        return;
    }
    let tau = T::from_real(2.0 / vnorm2);
    let mut dot = T::zero();
    for i in 0..v.len() {
        dot += v[i].conjugate() * y[i];
    }
    let s = tau * dot;
    for i in 0..v.len() {
        let sub = s * v[i];
        y[i] -= sub;
    }
}

fn column_norm<T: MnaScalar>(r: &DMatrix<T>, from_row: usize, col: usize) -> f64 {
    (from_row..r.nrows())
        .map(|i| {
            let m = r[(i, col)].mag();
            m * m
        })
        .sum::<f64>()
        .sqrt()
}

fn back_substitute<T: MnaScalar>(r: &DMatrix<T>, y: &DVector<T>) -> Result<DVector<T>> {
    let n = r.nrows();
    let mut x: DVector<T> = DVector::zeros(n);
    for i in (0..n).rev() {
        let mut sum = y[i];
        for k in i + 1..n {
            sum -= r[(i, k)] * x[k];
        }
        let diag = r[(i, i)];
        if diag.mag() == 0.0 {
            return Err(Error::Pivot);
        }
        if diag.mag() < PIVOT_EPSILON {
            return Err(Error::Singular);
        }
        x[i] = sum / diag;
    }
    Ok(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{dmatrix, dvector};
    use num_complex::Complex64;

    #[test]
    fn qr_solves_real_system() {
        let a = dmatrix![2.0, 1.0; 1.0, 3.0];
        let b = dvector![5.0, 6.0];
        let x = QrFactors::factorize(&a).unwrap().substitute(&b).unwrap();
        assert!((x[0] - 1.8).abs() < 1e-12);
        assert!((x[1] - 1.4).abs() < 1e-12);
    }

    #[test]
    fn qr_solves_complex_system() {
        let a = dmatrix![
            Complex64::new(1.0, 1.0), Complex64::new(0.0, 2.0);
            Complex64::new(2.0, 0.0), Complex64::new(1.0, -1.0)
        ];
        let b = dvector![Complex64::new(1.0, 0.0), Complex64::new(0.0, 1.0)];
        let x = QrFactors::factorize(&a).unwrap().substitute(&b).unwrap();
        let r = &a * &x - &b;
        assert!(r.iter().all(|v| v.norm() < 1e-12));
    }

    #[test]
    fn qr_rejects_singular_matrix() {
        let a = dmatrix![1.0, 2.0; 2.0, 4.0];
        let b = dvector![1.0, 2.0];
        let result = QrFactors::factorize(&a).unwrap().substitute(&b);
        assert!(matches!(result, Err(Error::Pivot | Error::Singular)));
    }

    #[test]
    fn lq_matches_qr_on_well_conditioned_system() {
        let a = dmatrix![4.0, 1.0, 0.5; 1.0, 3.0, 1.0; 0.5, 1.0, 2.0];
        let b = dvector![1.0, 2.0, 3.0];
        let x_qr = QrFactors::factorize(&a).unwrap().substitute(&b).unwrap();
        let x_lq = solve_lq(&a, &b).unwrap();
        for i in 0..3 {
            assert!((x_qr[i] - x_lq[i]).abs() < 1e-10);
        }
    }

    #[test]
    fn qr_larger_system_residual() {
        let n = 12;
        let a = DMatrix::from_fn(n, n, |i, j| {
            if i == j {
                (n as f64) + 1.0
            } else {
                1.0 / ((i as f64 - j as f64).abs() + 1.0)
            }
        });
        let b = DVector::from_fn(n, |i, _| (i + 1) as f64);
        let x = QrFactors::factorize(&a).unwrap().substitute(&b).unwrap();
        let r = &a * &x - &b;
        assert!(r.amax() < 1e-10);
    }
}

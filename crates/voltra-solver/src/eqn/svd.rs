//! Golub-Reinsch singular value decomposition.
//!
//! Householder bidiagonalization reduces the (possibly complex) matrix to
//! a real bidiagonal, absorbing phases into U and V; implicit-shift QR
//! iterations then diagonalize it with real Givens rotations. Substitution
//! applies the threshold-chopped pseudoinverse, which keeps rank-deficient
//! systems solvable.

use nalgebra::{DMatrix, DVector};
use voltra_core::error::{Error, Result};

use super::scalar::MnaScalar;

/// Iteration cap per singular value during diagonalization.
const MAX_ITERATIONS: usize = 30;

/// A full SVD `A = U diag(sigma) V^H` with non-negative singular values.
#[derive(Debug, Clone)]
pub struct SvdFactors<T: MnaScalar> {
    u: DMatrix<T>,
    v: DMatrix<T>,
    sigma: Vec<f64>,
}

impl<T: MnaScalar> SvdFactors<T> {
    /// Factorizes a copy of `a`.
    pub fn factorize(a: &DMatrix<T>) -> Result<Self> {
        let n = a.nrows();
        if n != a.ncols() {
            return Err(Error::DimensionMismatch {
                expected: n,
                actual: a.ncols(),
            });
        }
        let mut b = a.clone();
        let mut u = DMatrix::identity(n, n);
        let mut v = DMatrix::identity(n, n);
        let (mut d, mut e) = bidiagonalize(&mut b, &mut u, &mut v);
        diagonalize(&mut d, &mut e, &mut u, &mut v)?;
        Ok(Self { u, v, sigma: d })
    }

    pub fn singular_values(&self) -> &[f64] {
        &self.sigma
    }

    /// Pseudoinverse solve `x = V diag(1/sigma) U^H z`, chopping singular
    /// values below `n * eps * sigma_max`.
    pub fn substitute(&self, z: &DVector<T>) -> Result<DVector<T>> {
        let n = self.u.nrows();
        if z.len() != n {
            return Err(Error::DimensionMismatch {
                expected: n,
                actual: z.len(),
            });
        }
        let smax = self.sigma.iter().cloned().fold(0.0, f64::max);
        let threshold = smax * f64::EPSILON * n as f64;

        // w = chopped(sigma)^-1 * U^H z
        let mut w: DVector<T> = DVector::zeros(n);
        for j in 0..n {
            if self.sigma[j] > threshold {
                let mut dot = T::zero();
                for i in 0..n {
                    dot += self.u[(i, j)].conjugate() * z[i];
                }
                w[j] = dot / T::from_real(self.sigma[j]);
            }
        }

        let mut x: DVector<T> = DVector::zeros(n);
        for i in 0..n {
            let mut sum = T::zero();
            for j in 0..n {
                sum += self.v[(i, j)] * w[j];
            }
            x[i] = sum;
        }
        Ok(x)
    }
}

/// Reduces `b` to a real bidiagonal (diagonal `d`, superdiagonal `e`)
/// while accumulating the transformations into `u` and `v`.
fn bidiagonalize<T: MnaScalar>(
    b: &mut DMatrix<T>,
    u: &mut DMatrix<T>,
    v: &mut DMatrix<T>,
) -> (Vec<f64>, Vec<f64>) {
    let n = b.nrows();
    let mut d = vec![0.0; n];
    let mut e = vec![0.0; n];

    for k in 0..n {
        // left reflector on column k
        left_reflector(b, u, k);
        absorb_left_phase(b, u, k);
        d[k] = b[(k, k)].into_stamp().re;

        if k + 1 < n {
            // right reflector on row k
            right_reflector(b, v, k);
            absorb_right_phase(b, v, k);
            e[k] = b[(k, k + 1)].into_stamp().re;
        }
    }
    (d, e)
}

fn left_reflector<T: MnaScalar>(b: &mut DMatrix<T>, u: &mut DMatrix<T>, k: usize) {
    let n = b.nrows();
    let norm: f64 = (k..n)
        .map(|i| {
            let m = b[(i, k)].mag();
            m * m
        })
        .sum::<f64>()
        .sqrt();
    if norm == 0.0 {
        return;
    }
    let akk = b[(k, k)];
    let phase = if akk.mag() > 0.0 {
        akk / T::from_real(akk.mag())
    } else {
        T::one()
    };
    let alpha = -phase * T::from_real(norm);

    let mut hv: Vec<T> = vec![T::zero(); n];
    for i in k..n {
        hv[i] = b[(i, k)];
    }
    hv[k] -= alpha;
    let vnorm2: f64 = hv.iter().map(|x| x.mag() * x.mag()).sum();
    if vnorm2 == 0.0 {
        return;
    }
    let tau = T::from_real(2.0 / vnorm2);

    // B <- H B on the trailing columns
    for col in k..n {
        let mut dot = T::zero();
        for i in k..n {
            dot += hv[i].conjugate() * b[(i, col)];
        }
        let s = tau * dot;
        for i in k..n {
            let sub = s * hv[i];
            b[(i, col)] -= sub;
        }
    }
    // U <- U H
    for row in 0..n {
        let mut dot = T::zero();
        for i in k..n {
            dot += u[(row, i)] * hv[i];
        }
        let s = tau * dot;
        for i in k..n {
            let sub = s * hv[i].conjugate();
            u[(row, i)] -= sub;
        }
    }
}

fn right_reflector<T: MnaScalar>(b: &mut DMatrix<T>, v: &mut DMatrix<T>, k: usize) {
    let n = b.nrows();
    let start = k + 1;
    let norm: f64 = (start..n)
        .map(|j| {
            let m = b[(k, j)].mag();
            m * m
        })
        .sum::<f64>()
        .sqrt();
    if norm == 0.0 {
        return;
    }
    // reflector built from the conjugated row so that row * H = conj(alpha) e1
    let y0 = b[(k, start)].conjugate();
    let phase = if y0.mag() > 0.0 {
        y0 / T::from_real(y0.mag())
    } else {
        T::one()
    };
    let alpha = -phase * T::from_real(norm);

    let mut hv: Vec<T> = vec![T::zero(); n];
    for j in start..n {
        hv[j] = b[(k, j)].conjugate();
    }
    hv[start] -= alpha;
    let vnorm2: f64 = hv.iter().map(|x| x.mag() * x.mag()).sum();
    if vnorm2 == 0.0 {
        return;
    }
    let tau = T::from_real(2.0 / vnorm2);

    // B <- B H on the trailing rows
    for row in k..n {
        let mut dot = T::zero();
        for j in start..n {
            dot += b[(row, j)] * hv[j];
        }
        let s = tau * dot;
        for j in start..n {
            let sub = s * hv[j].conjugate();
            b[(row, j)] -= sub;
        }
    }
    // V <- V H
    for row in 0..n {
        let mut dot = T::zero();
        for j in start..n {
            dot += v[(row, j)] * hv[j];
        }
        let s = tau * dot;
        for j in start..n {
            let sub = s * hv[j].conjugate();
            v[(row, j)] -= sub;
        }
    }
}

/// Makes the diagonal entry real by moving its phase into U.
fn absorb_left_phase<T: MnaScalar>(b: &mut DMatrix<T>, u: &mut DMatrix<T>, k: usize) {
    let n = b.nrows();
    let akk = b[(k, k)];
    if akk.mag() == 0.0 {
        return;
    }
    let phase = akk / T::from_real(akk.mag());
    let conj_phase = phase.conjugate();
    for j in k..n {
        b[(k, j)] *= conj_phase;
    }
    for i in 0..n {
        u[(i, k)] *= phase;
    }
}

/// Makes the superdiagonal entry real by moving its phase into V.
fn absorb_right_phase<T: MnaScalar>(b: &mut DMatrix<T>, v: &mut DMatrix<T>, k: usize) {
    let n = b.nrows();
    let entry = b[(k, k + 1)];
    if entry.mag() == 0.0 {
        return;
    }
    let phase = entry / T::from_real(entry.mag());
    let conj_phase = phase.conjugate();
    for i in 0..n {
        b[(i, k + 1)] *= conj_phase;
        v[(i, k + 1)] *= conj_phase;
    }
}

/// Implicit-shift QR diagonalization of the real bidiagonal (d, e).
fn diagonalize<T: MnaScalar>(
    d: &mut [f64],
    e: &mut [f64],
    u: &mut DMatrix<T>,
    v: &mut DMatrix<T>,
) -> Result<()> {
    let n = d.len();
    if n == 0 {
        return Ok(());
    }
    let anorm = (0..n)
        .map(|i| d[i].abs() + e[i].abs())
        .fold(0.0, f64::max);
    let tol = anorm * f64::EPSILON;

    for k in (0..n).rev() {
        let mut iterations = 0;
        loop {
            // look for a split point; `cancel` means d[l-1] vanished and
            // e[l-1] must be rotated away first
            let mut l = k;
            let mut cancel = false;
            while l > 0 {
                if e[l - 1].abs() <= tol {
                    e[l - 1] = 0.0;
                    break;
                }
                if d[l - 1].abs() <= tol {
                    cancel = true;
                    break;
                }
                l -= 1;
            }

            if cancel {
                let mut c = 0.0;
                let mut s = 1.0;
                for i in l..=k {
                    let f = s * e[i - 1];
                    e[i - 1] *= c;
                    if f.abs() <= tol {
                        break;
                    }
                    let g = d[i];
                    let h = f.hypot(g);
                    d[i] = h;
                    c = g / h;
                    s = -f / h;
                    rotate_columns(u, l - 1, i, c, s);
                }
            }

            let z = d[k];
            if l == k {
                // converged
                if z < 0.0 {
                    d[k] = -z;
                    negate_column(v, k);
                }
                break;
            }

            iterations += 1;
            if iterations > MAX_ITERATIONS {
                return Err(Error::Math(
                    "singular value iteration did not converge".into(),
                ));
            }

            // Wilkinson-like shift from the trailing 2x2
            let x = d[l];
            let y = d[k - 1];
            let g = if k >= 2 { e[k - 2] } else { 0.0 };
            let h = e[k - 1];
            let mut f = ((y - z) * (y + z) + (g - h) * (g + h)) / (2.0 * h * y);
            let gp = f.hypot(1.0);
            let denom = f + if f >= 0.0 { gp } else { -gp };
            f = ((x - z) * (x + z) + h * (y / denom - h)) / x;

            // chase the bulge
            let mut c = 1.0;
            let mut s = 1.0;
            let mut x = x;
            for j in l..k {
                let i = j + 1;
                let mut g = e[j];
                let mut y = d[i];
                let mut h = s * g;
                g *= c;
                let mut z = f.hypot(h);
                if j > l {
                    e[j - 1] = z;
                }
                c = f / z;
                s = h / z;
                f = x * c + g * s;
                g = g * c - x * s;
                h = y * s;
                y *= c;
                rotate_columns(v, j, i, c, s);
                z = f.hypot(h);
                d[j] = z;
                if z != 0.0 {
                    c = f / z;
                    s = h / z;
                }
                f = c * g + s * y;
                x = c * y - s * g;
                rotate_columns(u, j, i, c, s);
            }
            if l > 0 {
                e[l - 1] = 0.0;
            }
            e[k - 1] = f;
            d[k] = x;
        }
    }
    Ok(())
}

/// Real Givens rotation of two (possibly complex) columns.
fn rotate_columns<T: MnaScalar>(m: &mut DMatrix<T>, a: usize, b: usize, c: f64, s: f64) {
    let cc = T::from_real(c);
    let ss = T::from_real(s);
    for row in 0..m.nrows() {
        let x = m[(row, a)];
        let z = m[(row, b)];
        m[(row, a)] = x * cc + z * ss;
        m[(row, b)] = z * cc - x * ss;
    }
}

fn negate_column<T: MnaScalar>(m: &mut DMatrix<T>, col: usize) {
    for row in 0..m.nrows() {
        m[(row, col)] = -m[(row, col)];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{dmatrix, dvector};
    use num_complex::Complex64;

    #[test]
    fn singular_values_of_diagonal_matrix() {
        let a = dmatrix![3.0, 0.0; 0.0, -2.0];
        let svd = SvdFactors::factorize(&a).unwrap();
        let mut sv = svd.singular_values().to_vec();
        sv.sort_by(|a, b| b.partial_cmp(a).unwrap());
        assert!((sv[0] - 3.0).abs() < 1e-12);
        assert!((sv[1] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn svd_solve_matches_direct_solution() {
        let a = dmatrix![2.0, 1.0; 1.0, 3.0];
        let b = dvector![5.0, 6.0];
        let x = SvdFactors::factorize(&a).unwrap().substitute(&b).unwrap();
        assert!((x[0] - 1.8).abs() < 1e-10, "x0 = {}", x[0]);
        assert!((x[1] - 1.4).abs() < 1e-10, "x1 = {}", x[1]);
    }

    #[test]
    fn svd_reconstructs_matrix() {
        let a = dmatrix![
            1.0, 2.0, 0.5;
            0.0, 3.0, 1.0;
            2.0, -1.0, 4.0
        ];
        let svd = SvdFactors::factorize(&a).unwrap();
        let n = 3;
        for i in 0..n {
            for j in 0..n {
                let mut sum = 0.0;
                for k in 0..n {
                    sum += svd.u[(i, k)] * svd.sigma[k] * svd.v[(j, k)];
                }
                assert!((sum - a[(i, j)]).abs() < 1e-10, "entry ({i},{j}) = {sum}");
            }
        }
    }

    #[test]
    fn svd_solves_complex_system() {
        let a = dmatrix![
            Complex64::new(1.0, 1.0), Complex64::new(0.0, 2.0);
            Complex64::new(2.0, 0.0), Complex64::new(1.0, -1.0)
        ];
        let b = dvector![Complex64::new(1.0, 0.0), Complex64::new(0.0, 1.0)];
        let x = SvdFactors::factorize(&a).unwrap().substitute(&b).unwrap();
        let r = &a * &x - &b;
        assert!(r.iter().all(|v| v.norm() < 1e-10));
    }

    #[test]
    fn rank_deficient_system_yields_least_squares_solution() {
        // rank-1 matrix; pseudoinverse gives the minimum-norm solution
        let a = dmatrix![1.0, 1.0; 1.0, 1.0];
        let b = dvector![2.0, 2.0];
        let x = SvdFactors::factorize(&a).unwrap().substitute(&b).unwrap();
        assert!((x[0] - 1.0).abs() < 1e-10);
        assert!((x[1] - 1.0).abs() < 1e-10);
    }
}

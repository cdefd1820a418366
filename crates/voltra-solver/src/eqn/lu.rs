//! Dense LU factorization, Crout and Doolittle variants.
//!
//! Both variants use partial (row) pivoting and keep the permutation in a
//! row map so a factorization can be reused for many right-hand sides.
//! Crout produces a unit upper triangle, Doolittle a unit lower triangle.

use nalgebra::{DMatrix, DVector};
use voltra_core::error::{Error, Result};

use super::scalar::MnaScalar;

/// Pivot magnitudes below this threshold flag the matrix as singular.
const PIVOT_EPSILON: f64 = f64::EPSILON;

/// LU variant selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LuVariant {
    /// Unit diagonal in U, divisions happen on the U rows.
    Crout,
    /// Unit diagonal in L, divisions happen on the multipliers.
    Doolittle,
}

/// A retained LU factorization with its row permutation.
#[derive(Debug, Clone)]
pub struct LuFactors<T: MnaScalar> {
    lu: DMatrix<T>,
    rmap: Vec<usize>,
    variant: LuVariant,
}

impl<T: MnaScalar> LuFactors<T> {
    /// Factorizes a copy of `a`.
    pub fn factorize(variant: LuVariant, a: &DMatrix<T>) -> Result<Self> {
        let n = a.nrows();
        if n != a.ncols() {
            return Err(Error::DimensionMismatch {
                expected: n,
                actual: a.ncols(),
            });
        }
        let mut lu = a.clone();
        let mut rmap: Vec<usize> = (0..n).collect();
        match variant {
            LuVariant::Crout => factorize_crout(&mut lu, &mut rmap)?,
            LuVariant::Doolittle => factorize_doolittle(&mut lu, &mut rmap)?,
        }
        Ok(Self { lu, rmap, variant })
    }

    /// Solves for one right-hand side using the retained factorization.
    pub fn substitute(&self, z: &DVector<T>) -> Result<DVector<T>> {
        let n = self.lu.nrows();
        if z.len() != n {
            return Err(Error::DimensionMismatch {
                expected: n,
                actual: z.len(),
            });
        }
        match self.variant {
            LuVariant::Crout => Ok(substitute_crout(&self.lu, &self.rmap, z)),
            LuVariant::Doolittle => Ok(substitute_doolittle(&self.lu, &self.rmap, z)),
        }
    }
}

/// Finds the partial pivot for column `j` starting at row `j` and swaps it
/// into place. Errors when the best pivot is numerically unusable.
fn pivot_column<T: MnaScalar>(
    lu: &mut DMatrix<T>,
    rmap: &mut [usize],
    j: usize,
) -> Result<()> {
    let n = lu.nrows();
    let mut best = j;
    let mut best_mag = lu[(j, j)].mag();
    for i in j + 1..n {
        let mag = lu[(i, j)].mag();
        if mag > best_mag {
            best = i;
            best_mag = mag;
        }
    }
    if best_mag == 0.0 {
        return Err(Error::Pivot);
    }
    if best_mag < PIVOT_EPSILON {
        return Err(Error::Singular);
    }
    if best != j {
        lu.swap_rows(j, best);
        rmap.swap(j, best);
    }
    Ok(())
}

fn factorize_crout<T: MnaScalar>(lu: &mut DMatrix<T>, rmap: &mut [usize]) -> Result<()> {
    let n = lu.nrows();
    for j in 0..n {
        // column j of L
        for i in j..n {
            let mut sum = lu[(i, j)];
            for k in 0..j {
                sum -= lu[(i, k)] * lu[(k, j)];
            }
            lu[(i, j)] = sum;
        }
        pivot_column(lu, rmap, j)?;
        // row j of the unit upper triangle
        let diag = lu[(j, j)];
        for k in j + 1..n {
            let mut sum = lu[(j, k)];
            for m in 0..j {
                sum -= lu[(j, m)] * lu[(m, k)];
            }
            lu[(j, k)] = sum / diag;
        }
    }
    Ok(())
}

fn factorize_doolittle<T: MnaScalar>(lu: &mut DMatrix<T>, rmap: &mut [usize]) -> Result<()> {
    let n = lu.nrows();
    for k in 0..n {
        pivot_column(lu, rmap, k)?;
        let diag = lu[(k, k)];
        for i in k + 1..n {
            let mult = lu[(i, k)] / diag;
            lu[(i, k)] = mult;
            for j in k + 1..n {
                let sub = mult * lu[(k, j)];
                lu[(i, j)] -= sub;
            }
        }
    }
    Ok(())
}

fn substitute_crout<T: MnaScalar>(
    lu: &DMatrix<T>,
    rmap: &[usize],
    z: &DVector<T>,
) -> DVector<T> {
    let n = lu.nrows();
    let mut x = DVector::zeros(n);
    // forward substitution with the non-unit lower triangle
    for i in 0..n {
        let mut sum = z[rmap[i]];
        for k in 0..i {
            sum -= lu[(i, k)] * x[k];
        }
        x[i] = sum / lu[(i, i)];
    }
    // backward substitution with the unit upper triangle
    for i in (0..n).rev() {
        let mut sum = x[i];
        for k in i + 1..n {
            sum -= lu[(i, k)] * x[k];
        }
        x[i] = sum;
    }
    x
}

fn substitute_doolittle<T: MnaScalar>(
    lu: &DMatrix<T>,
    rmap: &[usize],
    z: &DVector<T>,
) -> DVector<T> {
    let n = lu.nrows();
    let mut x = DVector::zeros(n);
    // forward substitution with the unit lower triangle
    for i in 0..n {
        let mut sum = z[rmap[i]];
        for k in 0..i {
            sum -= lu[(i, k)] * x[k];
        }
        x[i] = sum;
    }
    // backward substitution with the non-unit upper triangle
    for i in (0..n).rev() {
        let mut sum = x[i];
        for k in i + 1..n {
            sum -= lu[(i, k)] * x[k];
        }
        x[i] = sum / lu[(i, i)];
    }
    x
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{dmatrix, dvector};
    use num_complex::Complex64;

    fn check_real(variant: LuVariant) {
        // 2x + y = 5, x + 3y = 6 -> x = 1.8, y = 1.4
        let a = dmatrix![2.0, 1.0; 1.0, 3.0];
        let b = dvector![5.0, 6.0];
        let factors = LuFactors::factorize(variant, &a).unwrap();
        let x = factors.substitute(&b).unwrap();
        assert!((x[0] - 1.8).abs() < 1e-12);
        assert!((x[1] - 1.4).abs() < 1e-12);
    }

    #[test]
    fn crout_solves_real_system() {
        check_real(LuVariant::Crout);
    }

    #[test]
    fn doolittle_solves_real_system() {
        check_real(LuVariant::Doolittle);
    }

    #[test]
    fn pivoting_handles_zero_leading_entry() {
        let a = dmatrix![0.0, 1.0; 1.0, 0.0];
        let b = dvector![2.0, 3.0];
        for variant in [LuVariant::Crout, LuVariant::Doolittle] {
            let x = LuFactors::factorize(variant, &a)
                .unwrap()
                .substitute(&b)
                .unwrap();
            assert!((x[0] - 3.0).abs() < 1e-12);
            assert!((x[1] - 2.0).abs() < 1e-12);
        }
    }

    #[test]
    fn singular_matrix_is_detected() {
        let a = dmatrix![1.0, 2.0; 2.0, 4.0];
        for variant in [LuVariant::Crout, LuVariant::Doolittle] {
            assert!(matches!(
                LuFactors::factorize(variant, &a),
                Err(Error::Pivot | Error::Singular)
            ));
        }
    }

    #[test]
    fn complex_system_round_trips() {
        let a = dmatrix![
            Complex64::new(2.0, 1.0), Complex64::new(1.0, 0.0);
            Complex64::new(1.0, 0.0), Complex64::new(3.0, -1.0)
        ];
        let b = dvector![Complex64::new(5.0, 1.0), Complex64::new(6.0, 0.0)];
        let x = LuFactors::factorize(LuVariant::Crout, &a)
            .unwrap()
            .substitute(&b)
            .unwrap();
        let r0 = a[(0, 0)] * x[0] + a[(0, 1)] * x[1] - b[0];
        let r1 = a[(1, 0)] * x[0] + a[(1, 1)] * x[1] - b[1];
        assert!(r0.norm() < 1e-12);
        assert!(r1.norm() < 1e-12);
    }

    #[test]
    fn factorization_reuse_for_many_rhs() {
        let a = dmatrix![4.0, 1.0, 0.0; 1.0, 3.0, 1.0; 0.0, 1.0, 2.0];
        let factors = LuFactors::factorize(LuVariant::Crout, &a).unwrap();
        for i in 0..3 {
            let mut e = DVector::zeros(3);
            e[i] = 1.0;
            let x = factors.substitute(&e).unwrap();
            let r = &a * &x - &e;
            assert!(r.amax() < 1e-12);
        }
    }
}

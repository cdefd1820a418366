//! Dense direct equation-system drivers.
//!
//! The driver owns no storage beyond the retained factorization; every
//! solve works on a copy of the caller's matrix. Factorization and
//! substitution are separate phases for the LU algorithms so a single
//! factorization can serve many right-hand sides (the noise solver factors
//! the transposed Jacobian once and substitutes N+M unit vectors).

pub mod lu;
pub mod qr;
pub mod scalar;
pub mod svd;

use nalgebra::{DMatrix, DVector};
use voltra_core::error::{Error, Result};

pub use lu::{LuFactors, LuVariant};
pub use qr::QrFactors;
pub use scalar::MnaScalar;
pub use svd::SvdFactors;

/// Equation-system algorithm, selected per analysis with the `Solver`
/// property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Algorithm {
    /// LU decomposition, Crout variant. The default.
    #[default]
    CroutLu,
    /// LU decomposition, Doolittle variant.
    DoolittleLu,
    /// Householder QR decomposition.
    HouseholderQr,
    /// Householder LQ (least-squares) decomposition.
    HouseholderLq,
    /// Golub-Reinsch singular value decomposition.
    GolubSvd,
}

impl Algorithm {
    /// Parses the configuration property value.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "CroutLU" => Some(Self::CroutLu),
            "DoolittleLU" => Some(Self::DoolittleLu),
            "HouseholderQR" => Some(Self::HouseholderQr),
            "HouseholderLQ" => Some(Self::HouseholderLq),
            "GolubSVD" => Some(Self::GolubSvd),
            _ => None,
        }
    }
}

/// Driver for one analysis' equation solves.
#[derive(Debug, Clone, Default)]
pub struct EquationSystem<T: MnaScalar> {
    algo: Algorithm,
    lu: Option<LuFactors<T>>,
}

impl<T: MnaScalar> EquationSystem<T> {
    pub fn new(algo: Algorithm) -> Self {
        Self { algo, lu: None }
    }

    pub fn algo(&self) -> Algorithm {
        self.algo
    }

    pub fn set_algo(&mut self, algo: Algorithm) {
        self.algo = algo;
    }

    /// Factors `a` and solves for `z` in one call. LU factorizations are
    /// retained for later [`substitute`](Self::substitute) calls.
    pub fn solve(&mut self, a: &DMatrix<T>, z: &DVector<T>) -> Result<DVector<T>> {
        match self.algo {
            Algorithm::CroutLu | Algorithm::DoolittleLu => {
                self.factorize(a)?;
                self.substitute(z)
            }
            Algorithm::HouseholderQr => QrFactors::factorize(a)?.substitute(z),
            Algorithm::HouseholderLq => qr::solve_lq(a, z),
            Algorithm::GolubSvd => SvdFactors::factorize(a)?.substitute(z),
        }
    }

    /// Factors `a` with the selected LU variant and retains the factors.
    pub fn factorize(&mut self, a: &DMatrix<T>) -> Result<()> {
        let variant = match self.algo {
            Algorithm::DoolittleLu => LuVariant::Doolittle,
            _ => LuVariant::Crout,
        };
        self.lu = Some(LuFactors::factorize(variant, a)?);
        Ok(())
    }

    /// Solves with the retained LU factorization only.
    pub fn substitute(&self, z: &DVector<T>) -> Result<DVector<T>> {
        match &self.lu {
            Some(factors) => factors.substitute(z),
            None => Err(Error::Math("substitution without a factorization".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{dmatrix, dvector};

    #[test]
    fn every_algorithm_solves_the_same_system() {
        let a = dmatrix![4.0, 1.0, 0.5; 1.0, 3.0, 1.0; 0.5, 1.0, 2.0];
        let b = dvector![1.0, 2.0, 3.0];
        let reference = EquationSystem::new(Algorithm::CroutLu)
            .solve(&a, &b)
            .unwrap();
        for algo in [
            Algorithm::DoolittleLu,
            Algorithm::HouseholderQr,
            Algorithm::HouseholderLq,
            Algorithm::GolubSvd,
        ] {
            let x = EquationSystem::new(algo).solve(&a, &b).unwrap();
            for i in 0..3 {
                assert!(
                    (x[i] - reference[i]).abs() < 1e-9,
                    "{algo:?} differs at {i}: {} vs {}",
                    x[i],
                    reference[i]
                );
            }
        }
    }

    #[test]
    fn substitute_requires_factorization() {
        let eqns: EquationSystem<f64> = EquationSystem::new(Algorithm::CroutLu);
        assert!(eqns.substitute(&dvector![1.0]).is_err());
    }

    #[test]
    fn algorithm_names() {
        assert_eq!(Algorithm::from_name("CroutLU"), Some(Algorithm::CroutLu));
        assert_eq!(Algorithm::from_name("GolubSVD"), Some(Algorithm::GolubSvd));
        assert_eq!(Algorithm::from_name("unknown"), None);
    }
}

//! Solvers and analyses for Voltra.
//!
//! This crate contains:
//! - Dense direct equation-system drivers: LU (Crout and Doolittle with
//!   partial pivoting), Householder QR/LQ and Golub-Reinsch SVD, all
//!   generic over real and complex scalars
//! - The MNA nodal solver with Newton-Raphson iteration and convergence
//!   helpers (attenuation, line search, steepest descent, gMin stepping,
//!   source stepping)
//! - The DC, transient (variable-step multistep with LTE control) and
//!   AC/AC-noise analyses

pub mod ac;
pub mod dc;
pub mod eqn;
pub mod nasolver;
pub mod transient;

pub use ac::{AcAnalysis, AcParams};
pub use dc::{DcAnalysis, DcParams};
pub use eqn::{Algorithm, EquationSystem, MnaScalar};
pub use nasolver::{ConvHelper, NodalSolver, Stage};
pub use transient::{TranParams, TransientSolver};

//! Error types shared by the analyses.

use thiserror::Error;

/// Result alias for fallible core and solver operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Hard failures surfaced by the solver core.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The circuit has no `gnd` reference node.
    #[error("reference node `gnd` is missing from the circuit")]
    GroundMissing,

    /// A pivot fell below the numeric threshold during factorization.
    #[error("singular matrix in equation system")]
    Singular,

    /// Zero pivot even after partial pivoting.
    #[error("pivot is zero in equation system")]
    Pivot,

    /// NaN or infinity detected in the system matrix or solution.
    #[error("non-finite value in equation system")]
    NonFinite,

    /// Newton-Raphson exhausted its iteration budget.
    #[error("no convergence after {0} iterations")]
    NoConvergence(usize),

    /// Matrix/vector dimensions do not agree.
    #[error("dimension mismatch: expected {expected}, actual {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Underflow or domain error in device math.
    #[error("math error: {0}")]
    Math(String),

    /// A device attempted to divide by zero.
    #[error("division by zero: {0}")]
    ZeroDivision(String),

    /// A device reported an invalid operating-point voltage.
    #[error("invalid voltage: {0}")]
    WrongVoltage(String),
}

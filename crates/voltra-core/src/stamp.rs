//! Per-device MNA stamp storage.
//!
//! Every device owns one [`Stamps`] record sized by its port count `s` and
//! voltage-source row count `u`. Devices write their contributions here;
//! the assembler reads them and sums them into the global MNA system.
//! All entries are complex; real-valued analyses take the real part at
//! assembly time.

use nalgebra::{DMatrix, DVector};
use num_complex::Complex64;

/// Matrices and vectors a device exposes to the MNA assembler.
///
/// Layout per the MNA block structure: admittance `Y[s x s]`, couplings
/// `B[s x u]` and `C[u x s]`, dependent-source block `D[u x u]`, current
/// injections `I[s]`, source values `E[u]` and the noise correlation
/// matrix `N[(s+u) x (s+u)]`. `V[s]` and `J[u]` hold the solved port
/// voltages and branch currents written back after each solve.
#[derive(Debug, Clone)]
pub struct Stamps {
    pub y: DMatrix<Complex64>,
    pub b: DMatrix<Complex64>,
    pub c: DMatrix<Complex64>,
    pub d: DMatrix<Complex64>,
    pub i: DVector<Complex64>,
    pub e: DVector<Complex64>,
    pub n: DMatrix<Complex64>,
    pub v: DVector<Complex64>,
    pub j: DVector<Complex64>,
}

impl Stamps {
    /// Allocates zeroed stamps for `ports` ports and `vsources` rows.
    pub fn new(ports: usize, vsources: usize) -> Self {
        Self {
            y: DMatrix::zeros(ports, ports),
            b: DMatrix::zeros(ports, vsources),
            c: DMatrix::zeros(vsources, ports),
            d: DMatrix::zeros(vsources, vsources),
            i: DVector::zeros(ports),
            e: DVector::zeros(vsources),
            n: DMatrix::zeros(ports + vsources, ports + vsources),
            v: DVector::zeros(ports),
            j: DVector::zeros(vsources),
        }
    }

    /// Re-allocates for a new voltage-source row count, keeping the port
    /// count. Used by devices whose MNA shape differs between analyses.
    pub fn resize_vsources(&mut self, vsources: usize) {
        let ports = self.y.nrows();
        *self = Stamps::new(ports, vsources);
    }

    pub fn clear_y(&mut self) {
        self.y.fill(Complex64::ZERO);
    }

    pub fn clear_i(&mut self) {
        self.i.fill(Complex64::ZERO);
    }

    pub fn clear_e(&mut self) {
        self.e.fill(Complex64::ZERO);
    }

    pub fn clear_n(&mut self) {
        self.n.fill(Complex64::ZERO);
    }

    /// Adds to an admittance entry.
    pub fn add_y(&mut self, r: usize, c: usize, value: Complex64) {
        self.y[(r, c)] += value;
    }

    /// Adds to a current injection entry.
    pub fn add_i(&mut self, port: usize, value: Complex64) {
        self.i[port] += value;
    }

    /// Stamps the two-node admittance pattern `+y -y / -y +y`.
    pub fn stamp_admittance(&mut self, p1: usize, p2: usize, y: Complex64) {
        self.y[(p1, p1)] += y;
        self.y[(p2, p2)] += y;
        self.y[(p1, p2)] -= y;
        self.y[(p2, p1)] -= y;
    }

    /// Stamps the two-node noise correlation pattern `+n -n / -n +n`.
    pub fn stamp_noise(&mut self, p1: usize, p2: usize, n: f64) {
        let n = Complex64::new(n, 0.0);
        self.n[(p1, p1)] += n;
        self.n[(p2, p2)] += n;
        self.n[(p1, p2)] -= n;
        self.n[(p2, p1)] -= n;
    }

    /// Wires voltage-source row `vs` between ports `pos` and `neg` with the
    /// given source value: `B[pos,vs]=+1`, `B[neg,vs]=-1`, the symmetric
    /// `C` entries, and `E[vs]`.
    pub fn voltage_source(&mut self, vs: usize, pos: usize, neg: usize, value: Complex64) {
        self.b[(pos, vs)] = Complex64::ONE;
        self.b[(neg, vs)] = -Complex64::ONE;
        self.c[(vs, pos)] = Complex64::ONE;
        self.c[(vs, neg)] = -Complex64::ONE;
        self.e[vs] = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admittance_pattern() {
        let mut s = Stamps::new(2, 0);
        s.stamp_admittance(0, 1, Complex64::new(0.5, 0.0));
        assert_eq!(s.y[(0, 0)].re, 0.5);
        assert_eq!(s.y[(1, 1)].re, 0.5);
        assert_eq!(s.y[(0, 1)].re, -0.5);
        assert_eq!(s.y[(1, 0)].re, -0.5);
    }

    #[test]
    fn voltage_source_pattern() {
        let mut s = Stamps::new(2, 1);
        s.voltage_source(0, 0, 1, Complex64::new(5.0, 0.0));
        assert_eq!(s.b[(0, 0)].re, 1.0);
        assert_eq!(s.b[(1, 0)].re, -1.0);
        assert_eq!(s.c[(0, 0)].re, 1.0);
        assert_eq!(s.c[(0, 1)].re, -1.0);
        assert_eq!(s.e[0].re, 5.0);
    }

    #[test]
    fn resize_vsources_preserves_port_count() {
        let mut s = Stamps::new(2, 1);
        s.resize_vsources(0);
        assert_eq!(s.y.nrows(), 2);
        assert_eq!(s.e.len(), 0);
        assert_eq!(s.n.nrows(), 2);
    }
}

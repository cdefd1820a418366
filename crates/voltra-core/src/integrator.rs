//! Companion-model integration for reactive elements.
//!
//! The transient controller derives the corrector coefficients each step
//! and loads them into an [`Integrator`]; devices call
//! [`Integrator::integrate`] from `calc_tr` to turn a charge or flux state
//! into an equivalent conductance and current source.

use crate::states::StateRing;

/// Multistep integration method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// Backward Euler as corrector, forward Euler as predictor. Order 1.
    Euler,
    /// Trapezoidal (bilinear). Fixed order 2.
    Trapezoidal,
    /// Gear (BDF), orders 1 to 6.
    Gear,
    /// Adams-Moulton, orders 1 to 6.
    AdamsMoulton,
    /// Adams-Bashforth; predictor only.
    AdamsBashforth,
}

impl Method {
    /// Parses the configuration property value.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Euler" => Some(Self::Euler),
            "Trapezoidal" => Some(Self::Trapezoidal),
            "Gear" => Some(Self::Gear),
            "AdamsMoulton" => Some(Self::AdamsMoulton),
            "AdamsBashforth" => Some(Self::AdamsBashforth),
            _ => None,
        }
    }
}

/// Integrator phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// First time step: states are seeded from the initial solution.
    Init,
    /// Normal running mode.
    #[default]
    Running,
}

/// Maximum number of corrector coefficients (order 6 plus beta0, padded to
/// the state-ring depth).
pub const MAX_COEFF: usize = 8;

/// Coefficient set and method state shared by all reactive devices during
/// one transient step.
#[derive(Debug, Clone)]
pub struct Integrator {
    method: Method,
    order: usize,
    mode: Mode,
    coeff: [f64; MAX_COEFF],
}

impl Integrator {
    pub fn new(method: Method, order: usize) -> Self {
        Self {
            method,
            order,
            mode: Mode::Init,
            coeff: [0.0; MAX_COEFF],
        }
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn set_method(&mut self, method: Method) {
        self.method = method;
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn set_order(&mut self, order: usize) {
        self.order = order;
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    pub fn coefficients(&self) -> &[f64; MAX_COEFF] {
        &self.coeff
    }

    pub fn set_coefficients(&mut self, coeff: &[f64; MAX_COEFF]) {
        self.coeff = *coeff;
    }

    /// Equivalent conductance for a pure capacitance without state update.
    pub fn conductance(&self, cap: f64) -> f64 {
        cap * self.coeff[0]
    }

    /// Integrates the state pair starting at `qstate`.
    ///
    /// The device stores its charge (or flux) in state `qstate` before the
    /// call; the companion current lands in state `qstate + 1`. Returns
    /// `(g_eq, i_eq)` such that `i = g_eq * v + i_eq` at the new time
    /// point. In init mode the states are flooded with the seed value so
    /// higher-order formulas start from a consistent past.
    pub fn integrate(&self, states: &mut StateRing, qstate: usize, cap: f64) -> (f64, f64) {
        let cstate = qstate + 1;
        if self.mode == Mode::Init {
            let q = states.get(qstate);
            states.fill(qstate, q);
        }
        let (geq, ceq) = match self.method {
            Method::Euler => self.integrate_euler(states, qstate, cap),
            Method::Trapezoidal => self.integrate_bilinear(states, qstate, cap),
            Method::Gear => self.integrate_gear(states, qstate, cap),
            Method::AdamsMoulton | Method::AdamsBashforth => {
                self.integrate_moulton(states, qstate, cap)
            }
        };
        if self.mode == Mode::Init {
            let c = states.get(cstate);
            states.fill(cstate, c);
        }
        (geq, ceq)
    }

    /// Implicit Euler companion.
    fn integrate_euler(&self, states: &mut StateRing, qstate: usize, cap: f64) -> (f64, f64) {
        let cstate = qstate + 1;
        let geq = cap * self.coeff[0];
        let ceq = states.get_past(qstate, 1) * self.coeff[1];
        let cur = states.get(qstate) * self.coeff[0] + ceq;
        states.set(cstate, cur);
        (geq, ceq)
    }

    /// Trapezoidal companion.
    fn integrate_bilinear(&self, states: &mut StateRing, qstate: usize, cap: f64) -> (f64, f64) {
        let cstate = qstate + 1;
        let geq = cap * self.coeff[0];
        let ceq = states.get_past(qstate, 1) * self.coeff[1] - states.get_past(cstate, 1);
        let cur = states.get(qstate) * self.coeff[0] + ceq;
        states.set(cstate, cur);
        (geq, ceq)
    }

    /// Gear (BDF) companion over the past charge states.
    fn integrate_gear(&self, states: &mut StateRing, qstate: usize, cap: f64) -> (f64, f64) {
        let cstate = qstate + 1;
        let geq = cap * self.coeff[0];
        let mut ceq = 0.0;
        for i in 1..=self.order {
            ceq += states.get_past(qstate, i) * self.coeff[i];
        }
        let cur = states.get(qstate) * self.coeff[0] + ceq;
        states.set(cstate, cur);
        (geq, ceq)
    }

    /// Adams-Moulton companion over past charge and current states.
    fn integrate_moulton(&self, states: &mut StateRing, qstate: usize, cap: f64) -> (f64, f64) {
        let cstate = qstate + 1;
        let geq = cap * self.coeff[0];
        let mut ceq = states.get_past(qstate, 1) * self.coeff[1];
        for i in 2..=self.order {
            ceq += states.get_past(cstate, i - 1) * self.coeff[i];
        }
        let cur = states.get(qstate) * self.coeff[0] + ceq;
        states.set(cstate, cur);
        (geq, ceq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn integrator_with(method: Method, order: usize, coeff: &[f64]) -> Integrator {
        let mut integ = Integrator::new(method, order);
        integ.set_mode(Mode::Running);
        let mut c = [0.0; MAX_COEFF];
        c[..coeff.len()].copy_from_slice(coeff);
        integ.set_coefficients(&c);
        integ
    }

    #[test]
    fn euler_capacitor_companion() {
        // C = 1 F, dt = 0.5 s: geq = C/dt = 2, ieq = -q_prev/dt
        let dt = 0.5;
        let integ = integrator_with(Method::Euler, 1, &[1.0 / dt, -1.0 / dt]);
        let mut states = StateRing::new(2);
        states.fill(0, 1.0); // q = C * v = 1
        states.next();
        states.set(0, 1.5); // new charge
        let (geq, ieq) = integ.integrate(&mut states, 0, 1.0);
        assert!((geq - 2.0).abs() < 1e-12);
        assert!((ieq + 2.0).abs() < 1e-12);
        // companion current i = q_new/dt + ieq = 3 - 2 = 1 = C dv/dt
        assert!((states.get(1) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn trapezoidal_step_is_reversible() {
        // Run one trapezoidal step forward, then one with negated delta;
        // charge and current state return to the starting point.
        let dt = 1e-3;
        let cap = 1e-6;
        let forward = integrator_with(Method::Trapezoidal, 2, &[2.0 / dt, -2.0 / dt]);
        let backward = integrator_with(Method::Trapezoidal, 2, &[-2.0 / dt, 2.0 / dt]);

        let q0 = cap * 1.0;
        let i0 = 2.5e-4;
        let mut states = StateRing::new(2);
        states.fill(0, q0);
        states.fill(1, i0);

        // forward step to v1
        states.next();
        states.set(0, cap * 1.7);
        forward.integrate(&mut states, 0, cap);
        let i1 = states.get(1);

        // backward step to v0
        states.next();
        states.set(0, q0);
        backward.integrate(&mut states, 0, cap);

        assert!((states.get(0) - q0).abs() < 1e-18);
        assert!(
            (states.get(1) - i0).abs() < 1e-12 * i0.abs().max(1.0),
            "i = {}, i0 = {}, i1 = {}",
            states.get(1),
            i0,
            i1
        );
    }

    #[test]
    fn gear_reduces_to_euler_at_order_one() {
        let dt = 0.25;
        let euler = integrator_with(Method::Euler, 1, &[1.0 / dt, -1.0 / dt]);
        let gear = integrator_with(Method::Gear, 1, &[1.0 / dt, -1.0 / dt]);

        let mut se = StateRing::new(2);
        let mut sg = StateRing::new(2);
        for s in [&mut se, &mut sg] {
            s.fill(0, 2.0);
            s.next();
            s.set(0, 3.0);
        }
        let (ge, ie) = euler.integrate(&mut se, 0, 1.0);
        let (gg, ig) = gear.integrate(&mut sg, 0, 1.0);
        assert!((ge - gg).abs() < 1e-15);
        assert!((ie - ig).abs() < 1e-15);
    }
}

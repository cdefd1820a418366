//! Corrector and predictor coefficient derivation.
//!
//! Apart from the fixed-coefficient Euler and trapezoidal rules, every
//! method assembles a small `(order+1) x (order+1)` system over the ratios
//! of the past time steps and solves it with the dense LU driver, so the
//! coefficients stay exact under variable step sizes.

use nalgebra::{DMatrix, DVector};
use voltra_core::integrator::{Method, MAX_COEFF};

use crate::eqn::{LuFactors, LuVariant};

/// Per-order corrector error constants (Milne estimate numerators).
const EULER_CORR_ERROR: [f64; 1] = [-1.0 / 2.0];
const TRAPEZOIDAL_CORR_ERROR: [f64; 2] = [-1.0 / 2.0, -1.0 / 12.0];
const GEAR_CORR_ERROR: [f64; 6] = [
    -1.0 / 2.0,
    -2.0 / 9.0,
    -3.0 / 22.0,
    -12.0 / 125.0,
    -10.0 / 137.0,
    -20.0 / 343.0,
];
const MOULTON_CORR_ERROR: [f64; 6] = [
    -1.0 / 2.0,
    -1.0 / 12.0,
    -1.0 / 24.0,
    -19.0 / 720.0,
    -3.0 / 160.0,
    -863.0 / 60480.0,
];
const BASHFORTH_CORR_ERROR: [f64; 6] = [
    -1.0 / 2.0,
    -5.0 / 12.0,
    -3.0 / 8.0,
    -251.0 / 720.0,
    -95.0 / 288.0,
    -19087.0 / 60480.0,
];

/// Per-order predictor error constants.
const EULER_PRED_ERROR: [f64; 1] = [1.0 / 2.0];
const TRAPEZOIDAL_PRED_ERROR: [f64; 2] = [1.0 / 2.0, 5.0 / 12.0];
const GEAR_PRED_ERROR: [f64; 6] = [1.0; 6];
const MOULTON_PRED_ERROR: [f64; 6] = [
    1.0 / 2.0,
    1.0 / 12.0,
    1.0 / 24.0,
    19.0 / 720.0,
    3.0 / 160.0,
    863.0 / 60480.0,
];
const BASHFORTH_PRED_ERROR: [f64; 6] = [
    1.0 / 2.0,
    5.0 / 12.0,
    3.0 / 8.0,
    251.0 / 720.0,
    95.0 / 288.0,
    19087.0 / 60480.0,
];

/// Clamps the configured method and order to what the method supports.
/// Trapezoidal is fixed at order 2 and Euler at order 1.
pub fn corrector_for(method: Method, max_order: usize) -> (Method, usize) {
    match method {
        Method::Gear | Method::AdamsMoulton | Method::AdamsBashforth => {
            (method, max_order.clamp(1, 6))
        }
        Method::Trapezoidal => (Method::Trapezoidal, 2),
        Method::Euler => (Method::Euler, 1),
    }
}

/// The effective corrector method at a given order; low orders of the
/// trapezoidal family degrade to backward Euler.
pub fn corrector_type(method: Method, order: usize) -> Method {
    match method {
        Method::Trapezoidal if order <= 1 => Method::Euler,
        other => other,
    }
}

/// The predictor paired with a corrector method.
pub fn predictor_for(corrector: Method) -> Method {
    match corrector {
        Method::Gear => Method::Gear,
        Method::AdamsMoulton | Method::AdamsBashforth | Method::Trapezoidal => {
            Method::AdamsBashforth
        }
        Method::Euler => Method::Euler,
    }
}

/// Corrector error constant for the Milne LTE estimate.
pub fn corrector_error(method: Method, order: usize) -> f64 {
    let i = order.clamp(1, 6) - 1;
    match method {
        Method::Euler => EULER_CORR_ERROR[i.min(0)],
        Method::Trapezoidal => TRAPEZOIDAL_CORR_ERROR[i.min(1)],
        Method::Gear => GEAR_CORR_ERROR[i],
        Method::AdamsMoulton => MOULTON_CORR_ERROR[i],
        Method::AdamsBashforth => BASHFORTH_CORR_ERROR[i],
    }
}

/// Predictor error constant for the Milne LTE estimate.
pub fn predictor_error(method: Method, order: usize) -> f64 {
    let i = order.clamp(1, 6) - 1;
    match method {
        Method::Euler => EULER_PRED_ERROR[i.min(0)],
        Method::Trapezoidal => TRAPEZOIDAL_PRED_ERROR[i.min(1)],
        Method::Gear => GEAR_PRED_ERROR[i],
        Method::AdamsMoulton => MOULTON_PRED_ERROR[i],
        Method::AdamsBashforth => BASHFORTH_PRED_ERROR[i],
    }
}

fn solve_small(a: DMatrix<f64>, b: DVector<f64>) -> DVector<f64> {
    let n = b.len();
    LuFactors::factorize(LuVariant::Crout, &a)
        .and_then(|lu| lu.substitute(&b))
        .unwrap_or_else(|_| DVector::zeros(n))
}

/// Computes the corrector coefficients for the current step.
///
/// `deltas[0]` is the step being taken, `deltas[1..]` the most recent past
/// steps. Returns `{beta0, alpha1, ..}` padded with zeros.
pub fn corrector_coefficients(
    method: Method,
    order: usize,
    deltas: &[f64; MAX_COEFF],
) -> [f64; MAX_COEFF] {
    let mut coeff = [0.0; MAX_COEFF];
    match method {
        Method::Euler => {
            coeff[0] = 1.0 / deltas[0];
            coeff[1] = -1.0 / deltas[0];
        }
        Method::Trapezoidal => {
            coeff[0] = 2.0 / deltas[0];
            coeff[1] = -2.0 / deltas[0];
        }
        Method::Gear => {
            let size = order + 1;
            let mut a = DMatrix::zeros(size, size);
            let mut b = DVector::zeros(size);
            b[1] = -1.0 / deltas[0];
            for c in 0..size {
                a[(0, c)] = 1.0;
            }
            let mut f = 0.0;
            for c in 0..order {
                f += deltas[c];
                let mut acc = 1.0;
                for r in 0..order {
                    acc *= f / deltas[0];
                    a[(r + 1, c + 1)] = acc;
                }
            }
            let x = solve_small(a, b);
            coeff[..size].copy_from_slice(x.as_slice());
        }
        Method::AdamsMoulton | Method::AdamsBashforth => {
            let size = order + 1;
            let mut a = DMatrix::zeros(size, size);
            let b = DVector::from_element(size, 1.0);
            for i in 1..size {
                a[(i, 1)] = i as f64;
                a[(1, i)] = 1.0;
            }
            a[(0, 0)] = 1.0;
            for c in 1..=order.saturating_sub(2) {
                let mut entry = -(c as f64);
                for r in 2..=order {
                    a[(r, c + 2)] = r as f64 * entry;
                    entry *= -(c as f64);
                }
            }
            let x = solve_small(a, b);
            // x = {a0, b-1, b0, ..}: normalize by the implicit weight
            let k = x[1];
            coeff[0] = 1.0 / deltas[0] / k;
            coeff[1] = -x[0] / deltas[0] / k;
            for i in 2..=order {
                coeff[i] = -x[i] / k;
            }
        }
    }
    coeff
}

/// Computes the predictor coefficients for the current step.
pub fn predictor_coefficients(
    method: Method,
    order: usize,
    deltas: &[f64; MAX_COEFF],
) -> [f64; MAX_COEFF] {
    let mut coeff = [0.0; MAX_COEFF];
    match method {
        Method::Euler | Method::Trapezoidal => {
            // forward Euler
            coeff[0] = 1.0;
            coeff[1] = deltas[0];
        }
        Method::Gear => {
            // explicit Gear over order+1 past solutions
            let size = order + 1;
            let mut a = DMatrix::zeros(size, size);
            let mut b = DVector::zeros(size);
            b[0] = 1.0;
            for c in 0..size {
                a[(0, c)] = 1.0;
            }
            let mut f = 0.0;
            for c in 0..size {
                f += deltas[c];
                let mut acc = 1.0;
                for r in 0..order {
                    acc *= f / deltas[0];
                    a[(r + 1, c)] = acc;
                }
            }
            let x = solve_small(a, b);
            coeff[..size].copy_from_slice(x.as_slice());
        }
        Method::AdamsMoulton | Method::AdamsBashforth => {
            let size = order + 1;
            let mut a = DMatrix::zeros(size, size);
            let b = DVector::from_element(size, 1.0);
            for i in 1..size {
                a[(1, i)] = 1.0;
            }
            a[(0, 0)] = 1.0;
            for c in 1..=order.saturating_sub(1) {
                let mut entry = -(c as f64);
                for r in 2..=order {
                    a[(r, c + 1)] = r as f64 * entry;
                    entry *= -(c as f64);
                }
            }
            let x = solve_small(a, b);
            coeff[0] = x[0];
            for i in 1..=order {
                coeff[i] = x[i] * deltas[0];
            }
            // variable-step closed form at order 2
            if order == 2 {
                let f = -deltas[0] / (2.0 * deltas[1]);
                coeff[0] = 1.0;
                coeff[1] = (1.0 - f) * deltas[0];
                coeff[2] = f * deltas[0];
            }
        }
    }
    coeff
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform_deltas(dt: f64) -> [f64; MAX_COEFF] {
        [dt; MAX_COEFF]
    }

    #[test]
    fn trapezoidal_closed_form() {
        let dt = 1e-3;
        let c = corrector_coefficients(Method::Trapezoidal, 2, &uniform_deltas(dt));
        assert!((c[0] - 2.0 / dt).abs() < 1e-12 / dt);
        assert!((c[1] + 2.0 / dt).abs() < 1e-12 / dt);
    }

    #[test]
    fn gear2_uniform_matches_bdf2() {
        // BDF-2 with uniform dt: (3/(2dt), -2/dt, 1/(2dt))
        let dt = 1e-4;
        let c = corrector_coefficients(Method::Gear, 2, &uniform_deltas(dt));
        assert!((c[0] - 1.5 / dt).abs() < 1e-12 / dt, "beta0 = {}", c[0]);
        assert!((c[1] + 2.0 / dt).abs() < 1e-12 / dt, "alpha1 = {}", c[1]);
        assert!((c[2] - 0.5 / dt).abs() < 1e-12 / dt, "alpha2 = {}", c[2]);
    }

    #[test]
    fn gear1_is_backward_euler() {
        let dt = 2e-6;
        let gear = corrector_coefficients(Method::Gear, 1, &uniform_deltas(dt));
        let euler = corrector_coefficients(Method::Euler, 1, &uniform_deltas(dt));
        assert!((gear[0] - euler[0]).abs() < 1e-9 / dt);
        assert!((gear[1] - euler[1]).abs() < 1e-9 / dt);
    }

    #[test]
    fn moulton2_is_trapezoidal() {
        // Adams-Moulton order 2 coincides with the trapezoidal rule
        let dt = 5e-5;
        let m = corrector_coefficients(Method::AdamsMoulton, 2, &uniform_deltas(dt));
        assert!((m[0] - 2.0 / dt).abs() < 1e-9 / dt, "beta0 = {}", m[0]);
        assert!((m[1] + 2.0 / dt).abs() < 1e-9 / dt, "alpha1 = {}", m[1]);
    }

    #[test]
    fn forward_euler_predictor() {
        let dt = 1e-3;
        let p = predictor_coefficients(Method::Euler, 1, &uniform_deltas(dt));
        assert_eq!(p[0], 1.0);
        assert_eq!(p[1], dt);
    }

    #[test]
    fn bashforth2_uniform_closed_form() {
        // AB-2 with uniform steps: x1 = x0 + dt (3/2 f0 - 1/2 f-1)
        let dt = 1e-3;
        let p = predictor_coefficients(Method::AdamsBashforth, 2, &uniform_deltas(dt));
        assert_eq!(p[0], 1.0);
        assert!((p[1] - 1.5 * dt).abs() < 1e-15);
        assert!((p[2] + 0.5 * dt).abs() < 1e-15);
    }

    #[test]
    fn explicit_gear2_extrapolates_linear_functions() {
        // any consistent predictor must reproduce a linear solution exactly
        let dt = 1e-3;
        let p = predictor_coefficients(Method::Gear, 2, &uniform_deltas(dt));
        // past samples of y(t) = t at t = -dt, -2dt, -3dt
        let past = [-dt, -2.0 * dt, -3.0 * dt];
        let predicted: f64 = (0..3).map(|i| p[i] * past[i]).sum();
        assert!(predicted.abs() < 1e-12, "predicted = {predicted}");
    }

    #[test]
    fn error_constants_match_tables() {
        assert_eq!(corrector_error(Method::Gear, 2), -2.0 / 9.0);
        assert_eq!(corrector_error(Method::AdamsMoulton, 4), -19.0 / 720.0);
        assert_eq!(corrector_error(Method::Trapezoidal, 2), -1.0 / 12.0);
        assert_eq!(predictor_error(Method::AdamsBashforth, 2), 5.0 / 12.0);
        assert_eq!(predictor_error(Method::Gear, 5), 1.0);
    }

    #[test]
    fn pairing_and_clamping() {
        assert_eq!(corrector_for(Method::Trapezoidal, 6), (Method::Trapezoidal, 2));
        assert_eq!(corrector_for(Method::Gear, 9), (Method::Gear, 6));
        assert_eq!(predictor_for(Method::Trapezoidal), Method::AdamsBashforth);
        assert_eq!(predictor_for(Method::Gear), Method::Gear);
        assert_eq!(corrector_type(Method::Trapezoidal, 1), Method::Euler);
    }
}

//! Voltage-controlled voltage source, optionally with a time delay.

use num_complex::Complex64;
use voltra_core::device::{CalcCtx, Device, DeviceData, Port};
use voltra_core::integrator::Integrator;

// port order: controlling pair outside, controlled branch inside
const C_POS: usize = 0;
const OUT_NEG: usize = 1;
const OUT_POS: usize = 2;
const C_NEG: usize = 3;

/// VCVS: `v(out+) - v(out-) = g * (v(c+) - v(c-))`, delayed by `t_delay`
/// in transient analysis when nonzero.
pub struct Vcvs {
    data: DeviceData,
    g: f64,
    t_delay: f64,
}

impl Vcvs {
    pub fn new(
        name: &str,
        c_pos: &str,
        out_neg: &str,
        out_pos: &str,
        c_neg: &str,
        g: f64,
    ) -> Self {
        let data = DeviceData::new(
            name,
            vec![
                Port::external(c_pos),
                Port::external(out_neg),
                Port::external(out_pos),
                Port::external(c_neg),
            ],
            1,
        );
        Self {
            data,
            g,
            t_delay: 0.0,
        }
    }

    pub fn with_delay(mut self, t_delay: f64) -> Self {
        self.t_delay = t_delay;
        self
    }

    fn stamp(&mut self) {
        // branch equation: v(out+) - v(out-) - g v(c+) + g v(c-) = 0
        let g = Complex64::new(self.g, 0.0);
        let one = Complex64::ONE;
        let stamps = &mut self.data.stamps;
        stamps.clear_y();
        stamps.c[(0, C_POS)] = -g;
        stamps.c[(0, OUT_NEG)] = -one;
        stamps.c[(0, OUT_POS)] = one;
        stamps.c[(0, C_NEG)] = g;
        stamps.b[(C_POS, 0)] = Complex64::ZERO;
        stamps.b[(OUT_NEG, 0)] = -one;
        stamps.b[(OUT_POS, 0)] = one;
        stamps.b[(C_NEG, 0)] = Complex64::ZERO;
        stamps.d[(0, 0)] = Complex64::ZERO;
        stamps.e[0] = Complex64::ZERO;
    }
}

impl Device for Vcvs {
    fn data(&self) -> &DeviceData {
        &self.data
    }

    fn data_mut(&mut self) -> &mut DeviceData {
        &mut self.data
    }

    fn init_dc(&mut self) {
        self.stamp();
    }

    fn init_ac(&mut self) {
        self.stamp();
    }

    fn calc_ac(&mut self, freq: f64) {
        // the delay becomes a phase rotation of the gain
        let g = Complex64::from_polar(
            self.g,
            -2.0 * std::f64::consts::PI * freq * self.t_delay,
        );
        self.data.stamps.c[(0, C_POS)] = -g;
        self.data.stamps.c[(0, C_NEG)] = g;
    }

    fn init_tr(&mut self) {
        self.stamp();
        if self.t_delay > 0.0 {
            self.data.init_history(self.t_delay);
            // the controlling voltage moves to the right-hand side
            self.data.stamps.c[(0, C_POS)] = Complex64::ZERO;
            self.data.stamps.c[(0, C_NEG)] = Complex64::ZERO;
        }
    }

    fn calc_tr(&mut self, t: f64, _integ: &Integrator, _ctx: &CalcCtx) {
        if self.t_delay > 0.0 {
            let past = t - self.t_delay;
            let v = self.data.v_at(C_POS, past) - self.data.v_at(C_NEG, past);
            self.data.stamps.e[0] = Complex64::new(self.g * v, 0.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branch_equation_enforces_the_gain() {
        let mut v = Vcvs::new("E1", "cin", "on", "op", "gnd", 2.0);
        v.init_dc();
        let s = &v.data().stamps;
        // row: v(out+) - v(out-) - g v(c+) + g v(c-) = 0
        assert_eq!(s.c[(0, C_POS)].re, -2.0);
        assert_eq!(s.c[(0, OUT_NEG)].re, -1.0);
        assert_eq!(s.c[(0, OUT_POS)].re, 1.0);
        assert_eq!(s.c[(0, C_NEG)].re, 2.0);
        assert_eq!(s.e[0], Complex64::ZERO);
    }

    #[test]
    fn delayed_gain_rotates_in_ac() {
        let mut v = Vcvs::new("E1", "cin", "on", "op", "gnd", 1.0).with_delay(0.25e-6);
        v.init_ac();
        v.calc_ac(1e6); // quarter-period delay rotates the gain by -90 degrees
        let g = -v.data().stamps.c[(0, C_POS)];
        assert!(g.re.abs() < 1e-12);
        assert!((g.im + 1.0).abs() < 1e-12);
        assert_eq!(v.data().stamps.c[(0, C_NEG)], -v.data().stamps.c[(0, C_POS)]);
    }

    #[test]
    fn delayed_transient_reads_the_history() {
        let mut v = Vcvs::new("E1", "cin", "on", "op", "gnd", 3.0).with_delay(1.0);
        v.init_tr();
        {
            let data = v.data_mut();
            let history = data.history.as_mut().unwrap();
            history.push_time(0.0);
            data.append_history(C_POS, 0.5);
            data.append_history(OUT_NEG, 0.0);
            data.append_history(OUT_POS, 0.0);
            data.append_history(C_NEG, 0.0);
        }
        let integ = Integrator::new(voltra_core::integrator::Method::Trapezoidal, 2);
        v.calc_tr(1.0, &integ, &CalcCtx::default());
        // E = g * (v(c+) - v(c-)) at t - delay = 0
        assert!((v.data().stamps.e[0].re - 1.5).abs() < 1e-12);
    }
}

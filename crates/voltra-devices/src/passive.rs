//! Passive elements: resistor, capacitor, inductor.

use num_complex::Complex64;
use voltra_core::constants::{kelvin, DEFAULT_TEMP, T0};
use voltra_core::device::{CalcCtx, Device, DeviceData, Port};
use voltra_core::integrator::{Integrator, Mode};

const QSTATE: usize = 0; // charge state of the capacitor
const FSTATE: usize = 0; // flux state of the inductor

/// Linear resistor with thermal noise.
pub struct Resistor {
    data: DeviceData,
    r: f64,
    temp: Option<f64>,
}

impl Resistor {
    pub fn new(name: &str, node1: &str, node2: &str, r: f64) -> Self {
        Self {
            data: DeviceData::new(name, vec![Port::external(node1), Port::external(node2)], 0),
            r,
            temp: None,
        }
    }

    /// Overrides the device temperature (°C) used for thermal noise.
    pub fn with_temp(mut self, temp: f64) -> Self {
        self.temp = Some(temp);
        self
    }

    fn stamp(&mut self) {
        let g = Complex64::new(1.0 / self.r, 0.0);
        self.data.stamps.clear_y();
        self.data.stamps.stamp_admittance(0, 1, g);
    }
}

impl Device for Resistor {
    fn data(&self) -> &DeviceData {
        &self.data
    }

    fn data_mut(&mut self) -> &mut DeviceData {
        &mut self.data
    }

    fn init_dc(&mut self) {
        self.stamp();
    }

    fn init_tr(&mut self) {
        self.stamp();
    }

    fn init_ac(&mut self) {
        self.stamp();
    }

    fn calc_noise_ac(&mut self, _freq: f64) {
        // thermal noise PSD 4kT/R, normalized to kB * T0
        let temp = kelvin(self.temp.unwrap_or(DEFAULT_TEMP));
        let n = 4.0 * temp / T0 / self.r;
        self.data.stamps.clear_n();
        self.data.stamps.stamp_noise(0, 1, n);
    }
}

/// Linear capacitor; open at DC, companion model in transient.
pub struct Capacitor {
    data: DeviceData,
    c: f64,
    /// Optional initial voltage applied at the first transient step.
    v0: Option<f64>,
}

impl Capacitor {
    pub fn new(name: &str, node1: &str, node2: &str, c: f64) -> Self {
        let mut data =
            DeviceData::new(name, vec![Port::external(node1), Port::external(node2)], 0);
        data.isource = true;
        Self { data, c, v0: None }
    }

    /// Sets the initial condition used when the transient starts without a
    /// consistent DC solution.
    pub fn with_initial(mut self, v0: f64) -> Self {
        self.v0 = Some(v0);
        self
    }
}

impl Device for Capacitor {
    fn data(&self) -> &DeviceData {
        &self.data
    }

    fn data_mut(&mut self) -> &mut DeviceData {
        &mut self.data
    }

    fn init_dc(&mut self) {
        self.data.stamps.clear_y();
        self.data.stamps.clear_i();
    }

    fn init_ac(&mut self) {
        self.data.stamps.clear_y();
    }

    fn calc_ac(&mut self, freq: f64) {
        let y = Complex64::new(0.0, 2.0 * std::f64::consts::PI * freq * self.c);
        self.data.stamps.clear_y();
        self.data.stamps.stamp_admittance(0, 1, y);
    }

    fn init_tr(&mut self) {
        self.init_dc();
        self.data.set_states(2);
    }

    fn calc_tr(&mut self, _t: f64, integ: &Integrator, _ctx: &CalcCtx) {
        let mut v = self.data.v_real(0) - self.data.v_real(1);
        if integ.mode() == Mode::Init {
            if let Some(v0) = self.v0 {
                v = v0;
            }
        }
        self.data.stamps.clear_y();
        self.data.stamps.clear_i();
        let q = self.c * v;
        self.data
            .transient_capacitance(integ, QSTATE, 0, 1, self.c, v, q);
    }
}

/// Linear inductor; a short at DC through its branch equation, companion
/// model on the branch in transient.
pub struct Inductor {
    data: DeviceData,
    l: f64,
    /// Optional initial current applied at the first transient step.
    i0: Option<f64>,
}

impl Inductor {
    pub fn new(name: &str, node1: &str, node2: &str, l: f64) -> Self {
        let data =
            DeviceData::new(name, vec![Port::external(node1), Port::external(node2)], 1);
        Self { data, l, i0: None }
    }

    /// Sets the initial current used when the transient starts without a
    /// consistent DC solution.
    pub fn with_initial(mut self, i0: f64) -> Self {
        self.i0 = Some(i0);
        self
    }

    fn stamp_short(&mut self) {
        self.data.set_vsources(1);
        let stamps = &mut self.data.stamps;
        stamps.clear_y();
        stamps.clear_e();
        stamps.d[(0, 0)] = Complex64::ZERO;
        stamps.voltage_source(0, 0, 1, Complex64::ZERO);
    }
}

impl Device for Inductor {
    fn data(&self) -> &DeviceData {
        &self.data
    }

    fn data_mut(&mut self) -> &mut DeviceData {
        &mut self.data
    }

    fn init_dc(&mut self) {
        self.stamp_short();
    }

    fn init_ac(&mut self) {
        if self.l != 0.0 {
            // plain admittance entries, no extra branch needed
            self.data.set_vsources(0);
            self.data.stamps.clear_y();
        } else {
            // a zero inductance stays a short
            self.stamp_short();
        }
    }

    fn calc_ac(&mut self, freq: f64) {
        if self.l != 0.0 {
            let y = Complex64::new(0.0, -1.0 / (2.0 * std::f64::consts::PI * freq * self.l));
            self.data.stamps.clear_y();
            self.data.stamps.stamp_admittance(0, 1, y);
        }
    }

    fn init_tr(&mut self) {
        self.stamp_short();
        self.data.set_states(2);
    }

    fn calc_tr(&mut self, _t: f64, integ: &Integrator, _ctx: &CalcCtx) {
        let mut i = self.data.j_real(0);
        if integ.mode() == Mode::Init {
            if let Some(i0) = self.i0 {
                i = i0;
            }
        }
        // integrate the flux on the branch: r_eq in D, v_eq in E
        self.data.states.set(FSTATE, i * self.l);
        let (req, veq) = integ.integrate(&mut self.data.states, FSTATE, self.l);
        self.data.stamps.d[(0, 0)] = Complex64::new(-req, 0.0);
        self.data.stamps.e[0] = Complex64::new(veq, 0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resistor_admittance_pattern() {
        let mut r = Resistor::new("R1", "a", "b", 50.0);
        r.init_dc();
        let y = &r.data().stamps.y;
        assert!((y[(0, 0)].re - 0.02).abs() < 1e-15);
        assert!((y[(0, 1)].re + 0.02).abs() < 1e-15);
    }

    #[test]
    fn resistor_thermal_noise_at_reference_temperature() {
        // at T = T0 the normalized PSD is exactly 4 / R
        let mut r = Resistor::new("R1", "a", "gnd", 50.0).with_temp(16.85);
        r.calc_noise_ac(1e6);
        let n = r.data().stamps.n[(0, 0)].re;
        assert!((n - 4.0 / 50.0).abs() < 1e-12, "n = {n}");
    }

    #[test]
    fn capacitor_is_open_at_dc() {
        let mut c = Capacitor::new("C1", "a", "b", 1e-6);
        c.init_dc();
        assert_eq!(c.data().stamps.y[(0, 0)], Complex64::ZERO);
        assert_eq!(c.data().stamps.i[0], Complex64::ZERO);
    }

    #[test]
    fn capacitor_ac_admittance_scales_with_frequency() {
        let mut c = Capacitor::new("C1", "a", "b", 1e-9);
        c.calc_ac(1e6);
        let y1 = c.data().stamps.y[(0, 0)].im;
        c.calc_ac(2e6);
        let y2 = c.data().stamps.y[(0, 0)].im;
        assert!((y2 / y1 - 2.0).abs() < 1e-12);
    }

    #[test]
    fn inductor_is_a_short_at_dc() {
        let mut l = Inductor::new("L1", "a", "b", 1e-6);
        l.init_dc();
        let stamps = &l.data().stamps;
        assert_eq!(stamps.b[(0, 0)].re, 1.0);
        assert_eq!(stamps.b[(1, 0)].re, -1.0);
        assert_eq!(stamps.e[0], Complex64::ZERO);
        assert_eq!(stamps.d[(0, 0)], Complex64::ZERO);
    }

    #[test]
    fn inductor_drops_its_branch_for_ac() {
        let mut l = Inductor::new("L1", "a", "b", 1e-6);
        l.init_ac();
        assert_eq!(l.data().vsource_count(), 0);
        l.calc_ac(1e6);
        let y = l.data().stamps.y[(0, 0)].im;
        assert!((y + 1.0 / (2.0 * std::f64::consts::PI * 1e6 * 1e-6)).abs() < 1e-9);
    }
}

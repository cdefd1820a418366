//! Independent voltage and current sources.
//!
//! Every source scales its value by the context's `src_factor` so the
//! source-stepping continuation can ramp the whole excitation from zero
//! to full strength.

use num_complex::Complex64;
use voltra_core::device::{CalcCtx, Device, DeviceData, Port};
use voltra_core::integrator::Integrator;

fn two_port(name: &str, node1: &str, node2: &str, vsources: usize) -> DeviceData {
    DeviceData::new(name, vec![Port::external(node1), Port::external(node2)], vsources)
}

/// DC voltage source.
pub struct Vdc {
    data: DeviceData,
    u: f64,
}

impl Vdc {
    pub fn new(name: &str, pos: &str, neg: &str, u: f64) -> Self {
        let mut data = two_port(name, pos, neg, 1);
        data.vsource = true;
        Self { data, u }
    }

    fn stamp(&mut self, value: f64) {
        self.data
            .stamps
            .voltage_source(0, 0, 1, Complex64::new(value, 0.0));
    }
}

impl Device for Vdc {
    fn data(&self) -> &DeviceData {
        &self.data
    }

    fn data_mut(&mut self) -> &mut DeviceData {
        &mut self.data
    }

    fn init_dc(&mut self) {
        self.stamp(self.u);
    }

    fn calc_dc(&mut self, ctx: &CalcCtx) {
        self.data.stamps.e[0] = Complex64::new(self.u * ctx.src_factor, 0.0);
    }

    fn init_tr(&mut self) {
        self.stamp(self.u);
    }

    fn calc_tr(&mut self, _t: f64, _integ: &Integrator, ctx: &CalcCtx) {
        self.data.stamps.e[0] = Complex64::new(self.u * ctx.src_factor, 0.0);
    }

    fn init_ac(&mut self) {
        // no small-signal component: an AC short
        self.stamp(0.0);
    }
}

/// DC current source; the current flows from `pos` through the source to
/// `neg`, i.e. it is injected into `neg`.
pub struct Idc {
    data: DeviceData,
    i: f64,
}

impl Idc {
    pub fn new(name: &str, pos: &str, neg: &str, i: f64) -> Self {
        let mut data = two_port(name, pos, neg, 0);
        data.isource = true;
        Self { data, i }
    }

    fn stamp(&mut self, value: f64) {
        self.data.stamps.i[0] = Complex64::new(-value, 0.0);
        self.data.stamps.i[1] = Complex64::new(value, 0.0);
    }
}

impl Device for Idc {
    fn data(&self) -> &DeviceData {
        &self.data
    }

    fn data_mut(&mut self) -> &mut DeviceData {
        &mut self.data
    }

    fn init_dc(&mut self) {
        self.data.stamps.clear_y();
        self.stamp(self.i);
    }

    fn calc_dc(&mut self, ctx: &CalcCtx) {
        self.stamp(self.i * ctx.src_factor);
    }

    fn init_tr(&mut self) {
        self.init_dc();
    }

    fn calc_tr(&mut self, _t: f64, _integ: &Integrator, ctx: &CalcCtx) {
        self.stamp(self.i * ctx.src_factor);
    }

    fn init_ac(&mut self) {
        // no small-signal component
        self.stamp(0.0);
    }
}

/// AC voltage source: amplitude/phase phasor in AC analysis, a damped
/// sine wave in transient, a short at DC.
pub struct Vac {
    data: DeviceData,
    u: f64,
    /// Phase in degrees.
    phase: f64,
    /// Frequency (Hz) of the transient waveform.
    freq: f64,
    /// Damping coefficient of the transient waveform.
    theta: f64,
}

impl Vac {
    pub fn new(name: &str, pos: &str, neg: &str, u: f64, freq: f64) -> Self {
        let mut data = two_port(name, pos, neg, 1);
        data.vsource = true;
        Self {
            data,
            u,
            phase: 0.0,
            freq,
            theta: 0.0,
        }
    }

    pub fn with_phase(mut self, phase: f64) -> Self {
        self.phase = phase;
        self
    }

    pub fn with_theta(mut self, theta: f64) -> Self {
        self.theta = theta;
        self
    }
}

impl Device for Vac {
    fn data(&self) -> &DeviceData {
        &self.data
    }

    fn data_mut(&mut self) -> &mut DeviceData {
        &mut self.data
    }

    fn init_dc(&mut self) {
        self.data.stamps.voltage_source(0, 0, 1, Complex64::ZERO);
    }

    fn init_ac(&mut self) {
        self.init_dc();
        let value = Complex64::from_polar(self.u, self.phase.to_radians());
        self.data.stamps.e[0] = value;
    }

    fn init_tr(&mut self) {
        self.init_dc();
    }

    fn calc_tr(&mut self, t: f64, _integ: &Integrator, ctx: &CalcCtx) {
        let omega = 2.0 * std::f64::consts::PI * self.freq;
        let shift = self.phase / self.freq / 360.0;
        let u = ctx.src_factor
            * self.u
            * (-(t + shift) * self.theta * self.freq).exp()
            * (omega * t + self.phase.to_radians()).sin();
        self.data.stamps.e[0] = Complex64::new(u, 0.0);
    }
}

/// AC current source, the current-source dual of [`Vac`].
pub struct Iac {
    data: DeviceData,
    i: f64,
    phase: f64,
    freq: f64,
}

impl Iac {
    pub fn new(name: &str, pos: &str, neg: &str, i: f64, freq: f64) -> Self {
        let mut data = two_port(name, pos, neg, 0);
        data.isource = true;
        Self {
            data,
            i,
            phase: 0.0,
            freq,
        }
    }

    pub fn with_phase(mut self, phase: f64) -> Self {
        self.phase = phase;
        self
    }
}

impl Device for Iac {
    fn data(&self) -> &DeviceData {
        &self.data
    }

    fn data_mut(&mut self) -> &mut DeviceData {
        &mut self.data
    }

    fn init_dc(&mut self) {
        self.data.stamps.i[0] = Complex64::ZERO;
        self.data.stamps.i[1] = Complex64::ZERO;
    }

    fn init_ac(&mut self) {
        let value = Complex64::from_polar(self.i, self.phase.to_radians());
        self.data.stamps.i[0] = -value;
        self.data.stamps.i[1] = value;
    }

    fn init_tr(&mut self) {
        self.init_dc();
    }

    fn calc_tr(&mut self, t: f64, _integ: &Integrator, ctx: &CalcCtx) {
        let omega = 2.0 * std::f64::consts::PI * self.freq;
        let i = ctx.src_factor * self.i * (omega * t + self.phase.to_radians()).sin();
        self.data.stamps.i[0] = Complex64::new(-i, 0.0);
        self.data.stamps.i[1] = Complex64::new(i, 0.0);
    }
}

/// Pulsed voltage source with linear rise and fall edges.
pub struct Vpulse {
    data: DeviceData,
    /// Level before `t1` and after the falling edge.
    u1: f64,
    /// Pulse level.
    u2: f64,
    /// Pulse start time.
    t1: f64,
    /// Start of the falling edge.
    t2: f64,
    /// Rise time.
    tr: f64,
    /// Fall time.
    tf: f64,
}

impl Vpulse {
    pub fn new(name: &str, pos: &str, neg: &str, u1: f64, u2: f64, t1: f64, t2: f64) -> Self {
        let mut data = two_port(name, pos, neg, 1);
        data.vsource = true;
        Self {
            data,
            u1,
            u2,
            t1,
            t2,
            tr: 1e-9,
            tf: 1e-9,
        }
    }

    pub fn with_edges(mut self, tr: f64, tf: f64) -> Self {
        self.tr = tr;
        self.tf = tf;
        self
    }

    fn value(&self, t: f64) -> f64 {
        if t < self.t1 {
            self.u1
        } else if t < self.t1 + self.tr {
            self.u1 + (self.u2 - self.u1) * (t - self.t1) / self.tr
        } else if t < self.t2 {
            self.u2
        } else if t < self.t2 + self.tf {
            self.u2 + (self.u1 - self.u2) * (t - self.t2) / self.tf
        } else {
            self.u1
        }
    }
}

impl Device for Vpulse {
    fn data(&self) -> &DeviceData {
        &self.data
    }

    fn data_mut(&mut self) -> &mut DeviceData {
        &mut self.data
    }

    fn init_dc(&mut self) {
        self.data
            .stamps
            .voltage_source(0, 0, 1, Complex64::new(self.u1, 0.0));
    }

    fn calc_dc(&mut self, ctx: &CalcCtx) {
        self.data.stamps.e[0] = Complex64::new(self.u1 * ctx.src_factor, 0.0);
    }

    fn init_ac(&mut self) {
        self.data.stamps.voltage_source(0, 0, 1, Complex64::ZERO);
    }

    fn init_tr(&mut self) {
        self.init_dc();
    }

    fn calc_tr(&mut self, t: f64, _integ: &Integrator, ctx: &CalcCtx) {
        self.data.stamps.e[0] = Complex64::new(self.value(t) * ctx.src_factor, 0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vdc_scales_with_source_factor() {
        let mut v = Vdc::new("V1", "in", "gnd", 5.0);
        v.init_dc();
        let ctx = CalcCtx {
            src_factor: 0.25,
            ..CalcCtx::default()
        };
        v.calc_dc(&ctx);
        assert!((v.data().stamps.e[0].re - 1.25).abs() < 1e-15);
    }

    #[test]
    fn idc_injects_into_the_negative_node() {
        let mut i = Idc::new("I1", "a", "b", 1e-3);
        i.init_dc();
        let ctx = CalcCtx::default();
        i.calc_dc(&ctx);
        assert!((i.data().stamps.i[0].re + 1e-3).abs() < 1e-18);
        assert!((i.data().stamps.i[1].re - 1e-3).abs() < 1e-18);
    }

    #[test]
    fn vac_phasor_in_ac() {
        let mut v = Vac::new("V1", "in", "gnd", 2.0, 1e6).with_phase(90.0);
        v.init_ac();
        let e = v.data().stamps.e[0];
        assert!(e.re.abs() < 1e-12);
        assert!((e.im - 2.0).abs() < 1e-12);
    }

    #[test]
    fn vac_sine_in_transient() {
        let mut v = Vac::new("V1", "in", "gnd", 1.0, 1e3);
        v.init_tr();
        let ctx = CalcCtx::default();
        let integ = Integrator::new(voltra_core::integrator::Method::Trapezoidal, 2);
        // quarter period: sin peaks
        v.calc_tr(0.25e-3, &integ, &ctx);
        assert!((v.data().stamps.e[0].re - 1.0).abs() < 1e-9);
    }

    #[test]
    fn vpulse_levels_and_edges() {
        let v = Vpulse::new("V1", "in", "gnd", 0.0, 1.0, 1e-6, 1e-3).with_edges(1e-9, 1e-9);
        assert_eq!(v.value(0.0), 0.0);
        assert!((v.value(1e-6 + 0.5e-9) - 0.5).abs() < 1e-12);
        assert_eq!(v.value(1e-4), 1.0);
        assert_eq!(v.value(2e-3), 0.0);
    }
}

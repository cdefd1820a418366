//! pn-junction diode with Newton step limiting.

use num_complex::Complex64;
use voltra_core::constants::{kelvin, thermal_voltage, Q_E, K_B, T0};
use voltra_core::device::{CalcCtx, Device, DeviceData, Port};
use voltra_core::integrator::Integrator;

use crate::junction::{
    pn_capacitance, pn_charge, pn_conductance, pn_critical_voltage, pn_current, pn_voltage,
};

const QSTATE: usize = 0; // junction charge state

/// Diode model parameters.
#[derive(Debug, Clone)]
pub struct DiodeParams {
    /// Saturation current (A).
    pub is: f64,
    /// Emission coefficient.
    pub n: f64,
    /// Series resistance (ohm); nonzero values insert an internal node.
    pub rs: f64,
    /// Zero-bias junction capacitance (F).
    pub cj0: f64,
    /// Built-in junction potential (V).
    pub vj: f64,
    /// Grading coefficient.
    pub m: f64,
    /// Transit time (s).
    pub tt: f64,
    /// Forward-bias depletion coefficient.
    pub fc: f64,
    /// Flicker noise coefficient.
    pub kf: f64,
    /// Flicker noise exponent.
    pub af: f64,
    /// Flicker noise frequency exponent.
    pub ffe: f64,
    /// Device temperature (°C); the analysis temperature when unset.
    pub temp: Option<f64>,
}

impl Default for DiodeParams {
    fn default() -> Self {
        Self {
            is: 1e-15,
            n: 1.0,
            rs: 0.0,
            cj0: 0.0,
            vj: 0.7,
            m: 0.5,
            tt: 0.0,
            fc: 0.5,
            kf: 0.0,
            af: 1.0,
            ffe: 1.0,
            temp: None,
        }
    }
}

/// The diode device.
///
/// With a series resistance the junction moves behind a device-owned
/// internal node: `anode -- rs -- internal -- junction -- cathode`.
pub struct Diode {
    data: DeviceData,
    params: DiodeParams,
    /// Port index of the junction's anode side (the internal node when a
    /// series resistance is present).
    anode: usize,
    cathode: usize,
    u_prev: f64,
    gd: f64,
    id: f64,
}

impl Diode {
    pub fn new(name: &str, anode: &str, cathode: &str, params: DiodeParams) -> Self {
        let ports = if params.rs > 0.0 {
            vec![
                Port::external(anode),
                Port::internal(voltra_core::internal_node_name(name, "anode")),
                Port::external(cathode),
            ]
        } else {
            vec![Port::external(anode), Port::external(cathode)]
        };
        let junction = if params.rs > 0.0 { (1, 2) } else { (0, 1) };
        let mut data = DeviceData::new(name, ports, 0);
        data.nonlinear = true;
        Self {
            data,
            params,
            anode: junction.0,
            cathode: junction.1,
            u_prev: 0.0,
            gd: 0.0,
            id: 0.0,
        }
    }

    fn junction_voltage(&self) -> f64 {
        self.data.v_real(self.anode) - self.data.v_real(self.cathode)
    }

    /// Shared DC/transient evaluation: limits the junction voltage, then
    /// stamps the linearized conductance and equivalent current.
    fn calculate(&mut self, ctx: &CalcCtx) {
        let t = kelvin(self.params.temp.unwrap_or(ctx.temp));
        let ute = self.params.n * thermal_voltage(t);
        let is = self.params.is;

        let mut ud = self.junction_voltage();
        let ucrit = pn_critical_voltage(is, ute);
        ud = pn_voltage(ud, self.u_prev, ute, ucrit);
        self.u_prev = ud;

        // tiny conductance keeps the reverse region well-conditioned
        let gtiny = if ud < -10.0 * ute { is } else { 0.0 };

        self.gd = pn_conductance(ud, is, ute) + gtiny;
        self.id = pn_current(ud, is, ute) + gtiny * ud;
        let ieq = self.id - ud * self.gd;

        let (anode, cathode) = (self.anode, self.cathode);
        let stamps = &mut self.data.stamps;
        stamps.clear_y();
        stamps.clear_i();
        stamps.i[cathode] = Complex64::new(ieq, 0.0);
        stamps.i[anode] = Complex64::new(-ieq, 0.0);
        stamps.stamp_admittance(anode, cathode, Complex64::new(self.gd, 0.0));
        if self.params.rs > 0.0 {
            stamps.stamp_admittance(0, 1, Complex64::new(1.0 / self.params.rs, 0.0));
        }
    }

    fn junction_capacitance(&self, ud: f64) -> f64 {
        let p = &self.params;
        let depletion = if p.cj0 > 0.0 {
            pn_capacitance(ud, p.cj0, p.vj, p.m, p.fc)
        } else {
            0.0
        };
        depletion + p.tt * self.gd
    }
}

impl Device for Diode {
    fn data(&self) -> &DeviceData {
        &self.data
    }

    fn data_mut(&mut self) -> &mut DeviceData {
        &mut self.data
    }

    fn init_dc(&mut self) {
        // forward-bias starting point for the first Newton iteration
        self.data.set_v(0, Complex64::new(0.9, 0.0));
        self.data.set_v(self.anode, Complex64::new(0.9, 0.0));
        self.data.set_v(self.cathode, Complex64::ZERO);
        self.u_prev = 0.9;
    }

    fn calc_dc(&mut self, ctx: &CalcCtx) {
        self.calculate(ctx);
    }

    fn restart_dc(&mut self) {
        self.init_dc();
    }

    fn init_tr(&mut self) {
        self.init_dc();
        self.data.set_states(2);
    }

    fn calc_tr(&mut self, _t: f64, integ: &Integrator, ctx: &CalcCtx) {
        self.calculate(ctx);

        let p = self.params.clone();
        if p.cj0 > 0.0 || p.tt > 0.0 {
            let ud = self.u_prev;
            let cd = self.junction_capacitance(ud);
            let qd = if p.cj0 > 0.0 {
                pn_charge(ud, p.cj0, p.vj, p.m, p.fc)
            } else {
                0.0
            } + p.tt * self.id;
            self.data
                .transient_capacitance(integ, QSTATE, self.anode, self.cathode, cd, ud, qd);
        }
    }

    fn init_ac(&mut self) {
        self.data.stamps.clear_y();
    }

    fn calc_ac(&mut self, freq: f64) {
        let gd = self.data.operating_point("gd");
        let cd = self.data.operating_point("Cd");
        let y = Complex64::new(gd, 2.0 * std::f64::consts::PI * freq * cd);
        self.data.stamps.clear_y();
        self.data.stamps.stamp_admittance(self.anode, self.cathode, y);
        if self.params.rs > 0.0 {
            let g = Complex64::new(1.0 / self.params.rs, 0.0);
            self.data.stamps.stamp_admittance(0, 1, g);
        }
    }

    fn calc_noise_ac(&mut self, freq: f64) {
        let id = self.data.operating_point("Id");
        let p = &self.params;
        // shot noise plus flicker noise, normalized to kB * T0
        let shot = 2.0 * id * (Q_E / K_B) / T0;
        let flicker = if p.kf > 0.0 {
            p.kf * id.abs().powf(p.af) / freq.powf(p.ffe) / K_B / T0
        } else {
            0.0
        };
        self.data.stamps.clear_n();
        let (anode, cathode) = (self.anode, self.cathode);
        self.data.stamps.stamp_noise(anode, cathode, shot + flicker);
    }

    fn calc_operating_points(&mut self) {
        let ud = self.junction_voltage();
        let cd = self.junction_capacitance(ud);
        self.data.set_operating_point("gd", self.gd);
        self.data.set_operating_point("Id", self.id);
        self.data.set_operating_point("Vd", ud);
        self.data.set_operating_point("Cd", cd);
    }

    fn save_operating_points(&mut self) {
        let ud = self.junction_voltage();
        self.data.set_operating_point("Vd", ud);
    }
}

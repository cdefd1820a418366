//! The device stamp contract.
//!
//! Devices are black boxes to the solvers: each analysis phase asks every
//! device to refresh its [`Stamps`] record, the assembler sums those into
//! the MNA system, and the solved port voltages and branch currents are
//! written back through [`DeviceData`]. Devices never see the node table.

use indexmap::IndexMap;
use num_complex::Complex64;

use crate::constants::DEFAULT_TEMP;
use crate::history::DeviceHistory;
use crate::integrator::Integrator;
use crate::stamp::Stamps;
use crate::states::StateRing;

/// A port binding: the node name a device terminal connects to.
#[derive(Debug, Clone)]
pub struct Port {
    pub node: String,
    /// Internal nodes are created by devices and hidden from result output.
    pub internal: bool,
}

impl Port {
    pub fn external(node: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            internal: false,
        }
    }

    pub fn internal(node: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            internal: true,
        }
    }
}

/// Context handed to the DC and transient calculation hooks.
#[derive(Debug, Clone, Copy)]
pub struct CalcCtx {
    /// Scale factor for independent sources; 1 except during source stepping.
    pub src_factor: f64,
    /// Ambient temperature in degrees Celsius for devices without their own.
    pub temp: f64,
}

impl Default for CalcCtx {
    fn default() -> Self {
        Self {
            src_factor: 1.0,
            temp: DEFAULT_TEMP,
        }
    }
}

/// State shared by every device implementation.
#[derive(Debug, Clone)]
pub struct DeviceData {
    name: String,
    ports: Vec<Port>,
    vsources: usize,
    /// First global voltage-source row owned by this device; assigned by
    /// the node/source mapping before each analysis.
    pub vsource_base: usize,
    pub nonlinear: bool,
    pub vsource: bool,
    pub isource: bool,
    pub internal_vsource: bool,
    pub probe: bool,
    pub has_history: bool,
    pub stamps: Stamps,
    pub states: StateRing,
    pub history: Option<DeviceHistory>,
    ops: IndexMap<String, f64>,
}

impl DeviceData {
    pub fn new(name: impl Into<String>, ports: Vec<Port>, vsources: usize) -> Self {
        let stamps = Stamps::new(ports.len(), vsources);
        Self {
            name: name.into(),
            ports,
            vsources,
            vsource_base: 0,
            nonlinear: false,
            vsource: false,
            isource: false,
            internal_vsource: false,
            probe: false,
            has_history: false,
            stamps,
            states: StateRing::new(0),
            history: None,
            ops: IndexMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ports(&self) -> &[Port] {
        &self.ports
    }

    pub fn port_count(&self) -> usize {
        self.ports.len()
    }

    pub fn vsource_count(&self) -> usize {
        self.vsources
    }

    /// Changes the number of voltage-source rows this device contributes.
    /// Devices whose MNA shape differs between analyses call this from
    /// their `init_*` hooks, before rows are assigned.
    pub fn set_vsources(&mut self, vsources: usize) {
        if self.vsources != vsources {
            self.vsources = vsources;
            self.stamps.resize_vsources(vsources);
        }
    }

    /// Allocates the state ring for `n` save-state variables.
    pub fn set_states(&mut self, n: usize) {
        if self.states.len() != n {
            self.states = StateRing::new(n);
        }
    }

    /// Solved voltage at a port (written back by the solver).
    pub fn get_v(&self, port: usize) -> Complex64 {
        self.stamps.v[port]
    }

    /// Real part of the solved port voltage.
    pub fn v_real(&self, port: usize) -> f64 {
        self.stamps.v[port].re
    }

    pub fn set_v(&mut self, port: usize, value: Complex64) {
        self.stamps.v[port] = value;
    }

    /// Solved branch current of a local voltage-source row.
    pub fn get_j(&self, vs: usize) -> Complex64 {
        self.stamps.j[vs]
    }

    pub fn j_real(&self, vs: usize) -> f64 {
        self.stamps.j[vs].re
    }

    pub fn set_j(&mut self, vs: usize, value: Complex64) {
        self.stamps.j[vs] = value;
    }

    /// Starts recording history with one track per port and branch row.
    pub fn init_history(&mut self, age: f64) {
        let tracks = self.port_count() + self.vsource_count();
        self.history = Some(DeviceHistory::new(tracks, age));
        self.has_history = true;
    }

    /// Appends a value to a history track (ports first, then branch rows).
    pub fn append_history(&mut self, track: usize, value: f64) {
        if let Some(history) = &mut self.history {
            history.append(track, value);
        }
    }

    /// Interpolated past port voltage.
    pub fn v_at(&self, port: usize, t: f64) -> f64 {
        self.history
            .as_ref()
            .map_or(0.0, |history| history.value_at(port, t))
    }

    /// Interpolated past branch current.
    pub fn j_at(&self, vs: usize, t: f64) -> f64 {
        let port_count = self.port_count();
        self.history
            .as_ref()
            .map_or(0.0, |history| history.value_at(port_count + vs, t))
    }

    pub fn set_operating_point(&mut self, name: &str, value: f64) {
        self.ops.insert(name.to_string(), value);
    }

    pub fn operating_point(&self, name: &str) -> f64 {
        self.ops.get(name).copied().unwrap_or(0.0)
    }

    pub fn operating_points(&self) -> impl Iterator<Item = (&str, f64)> {
        self.ops.iter().map(|(k, &v)| (k.as_str(), v))
    }

    /// Stamps the companion model of a two-node capacitance: sets the
    /// charge state, integrates it and adds the equivalent conductance and
    /// current-source entries. The `charge - cap * voltage` correction
    /// keeps nonlinear charges (where `cap = dq/dv`) consistent; it
    /// vanishes for linear capacitors.
    pub fn transient_capacitance(
        &mut self,
        integ: &Integrator,
        qstate: usize,
        pos: usize,
        neg: usize,
        cap: f64,
        voltage: f64,
        charge: f64,
    ) {
        self.states.set(qstate, charge);
        let (geq, ceq) = integ.integrate(&mut self.states, qstate, cap);
        let ieq = ceq + (charge - cap * voltage) * integ.coefficients()[0];
        let g = Complex64::new(geq, 0.0);
        let i = Complex64::new(ieq, 0.0);
        self.stamps.stamp_admittance(pos, neg, g);
        self.stamps.add_i(pos, -i);
        self.stamps.add_i(neg, i);
    }
}

/// Behavior contract each device implements for the solver core.
///
/// Default implementations make every hook optional; a device only
/// overrides the phases it participates in.
pub trait Device {
    fn data(&self) -> &DeviceData;
    fn data_mut(&mut self) -> &mut DeviceData;

    /// Prepare for DC analysis (allocate rows, seed starting voltages).
    fn init_dc(&mut self) {}
    /// Refresh stamps for the current DC iterate.
    fn calc_dc(&mut self, _ctx: &CalcCtx) {}
    /// Reset internal iteration state after a solver restart.
    fn restart_dc(&mut self) {}

    /// Prepare for transient analysis.
    fn init_tr(&mut self) {}
    /// Refresh stamps at simulation time `t`.
    fn calc_tr(&mut self, _t: f64, _integ: &Integrator, _ctx: &CalcCtx) {}

    /// Prepare for AC analysis.
    fn init_ac(&mut self) {}
    /// Refresh small-signal stamps at frequency `freq` (Hz).
    fn calc_ac(&mut self, _freq: f64) {}
    /// Prepare the noise correlation stamps.
    fn init_noise_ac(&mut self) {}
    /// Refresh noise correlation stamps at frequency `freq` (Hz).
    fn calc_noise_ac(&mut self, _freq: f64) {}

    /// Derive operating points from the converged solution.
    fn calc_operating_points(&mut self) {}
    /// Store solution-derived operating points (probes).
    fn save_operating_points(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_back_roundtrip() {
        let mut data = DeviceData::new(
            "R1",
            vec![Port::external("in"), Port::external("out")],
            0,
        );
        data.set_v(1, Complex64::new(2.5, -0.5));
        assert_eq!(data.get_v(1), Complex64::new(2.5, -0.5));
        assert_eq!(data.v_real(1), 2.5);
    }

    #[test]
    fn history_tracks_ports_then_branches() {
        let mut data = DeviceData::new(
            "X1",
            vec![Port::external("a"), Port::external("b")],
            1,
        );
        data.init_history(1.0);
        let history = data.history.as_mut().unwrap();
        history.push_time(0.0);
        data.append_history(0, 1.0);
        data.append_history(1, 2.0);
        data.append_history(2, 3.0);
        assert_eq!(data.v_at(1, 0.0), 2.0);
        assert_eq!(data.j_at(0, 0.0), 3.0);
    }

    #[test]
    fn vsource_resize_reshapes_stamps() {
        let mut data = DeviceData::new("L1", vec![Port::external("a"), Port::external("b")], 1);
        assert_eq!(data.stamps.e.len(), 1);
        data.set_vsources(0);
        assert_eq!(data.vsource_count(), 0);
        assert_eq!(data.stamps.e.len(), 0);
    }
}

//! Variable-step multistep transient analysis.
//!
//! The controller wraps the nonlinear nodal solver per time step: it
//! predicts a start value from past solutions, runs the Newton-Raphson
//! corrector, adapts the step from the local truncation error and the
//! integration order from the step history, and lands exactly on the
//! requested sample times.

pub mod coeff;

use nalgebra::DVector;
use voltra_core::circuit::Circuit;
use voltra_core::constants::DEFAULT_TEMP;
use voltra_core::dataset::Dataset;
use voltra_core::device::CalcCtx;
use voltra_core::error::{Error, Result};
use voltra_core::integrator::{Integrator, Method, Mode, MAX_COEFF};
use voltra_core::report::ReportKind;
use voltra_core::states::{StateRing, STATE_NUM};
use voltra_core::sweep::Sweep;

use crate::dc::DcStage;
use crate::eqn::Algorithm;
use crate::nasolver::{ConvHelper, NodalSolver, SaveOpts, Stage};

/// Transient analysis parameters with the documented defaults.
#[derive(Debug, Clone)]
pub struct TranParams {
    /// Time sweep start (s).
    pub start: f64,
    /// Time sweep stop (s).
    pub stop: f64,
    /// Number of output samples (>= 2).
    pub points: usize,
    /// Sample the output raster logarithmically (requires `start > 0`).
    pub log_sweep: bool,
    /// Corrector integration method.
    pub method: Method,
    /// Maximum integration order, 1 to 6.
    pub order: usize,
    pub initial_step: f64,
    pub min_step: f64,
    /// Maximum step; 0 derives it from the sweep spacing.
    pub max_step: f64,
    pub max_iter: usize,
    pub abstol: f64,
    pub vntol: f64,
    pub reltol: f64,
    pub lte_abstol: f64,
    pub lte_reltol: f64,
    /// LTE safety factor, 1 to 16.
    pub lte_factor: f64,
    pub solver: Algorithm,
    /// Relaxed time-step raster: skip exact breakpoint snapping.
    pub relax_tsr: bool,
    /// Run an initial DC analysis to seed the integration.
    pub initial_dc: bool,
    pub temp: f64,
}

impl Default for TranParams {
    fn default() -> Self {
        Self {
            start: 0.0,
            stop: 1e-3,
            points: 10,
            log_sweep: false,
            method: Method::Trapezoidal,
            order: 2,
            initial_step: 1e-9,
            min_step: 1e-16,
            max_step: 0.0,
            max_iter: 150,
            abstol: 1e-12,
            vntol: 1e-6,
            reltol: 1e-3,
            lte_abstol: 1e-6,
            lte_reltol: 1e-3,
            lte_factor: 1.0,
            solver: Algorithm::CroutLu,
            relax_tsr: false,
            initial_dc: true,
            temp: DEFAULT_TEMP,
        }
    }
}

/// Ring of the 8 most recent solution vectors; slot 0 is the current
/// time step, slot 1 the most recently accepted one.
struct SolutionRing {
    slots: Vec<DVector<f64>>,
    current: usize,
}

impl SolutionRing {
    fn new(size: usize) -> Self {
        Self {
            slots: (0..STATE_NUM).map(|_| DVector::zeros(size)).collect(),
            current: 0,
        }
    }

    fn get(&self, n: usize) -> &DVector<f64> {
        &self.slots[(self.current + n) & (STATE_NUM - 1)]
    }

    fn set_current(&mut self, x: &DVector<f64>) {
        self.slots[self.current].copy_from(x);
    }

    fn next(&mut self) {
        self.current = (self.current + STATE_NUM - 1) & (STATE_NUM - 1);
    }

    fn fill(&mut self, x: &DVector<f64>) {
        for slot in &mut self.slots {
            slot.copy_from(x);
        }
    }
}

/// Calculation stage running every device's `calc_tr` at one time point.
struct TrStage {
    time: f64,
    integ: Integrator,
}

impl Stage for TrStage {
    fn calculate(&mut self, circuit: &mut Circuit, ctx: &CalcCtx) {
        for device in circuit.devices_mut() {
            device.calc_tr(self.time, &self.integ, ctx);
        }
    }
}

/// The transient analysis controller.
pub struct TransientSolver {
    pub params: TranParams,

    integ: Integrator,
    corr_method: Method,
    pred_method: Method,
    corr_order: usize,
    pred_order: usize,
    corr_max_order: usize,
    corr_coeff: [f64; MAX_COEFF],
    pred_coeff: [f64; MAX_COEFF],

    delta_ring: StateRing,
    deltas: [f64; MAX_COEFF],
    solution: SolutionRing,

    delta: f64,
    delta_min: f64,
    delta_max: f64,
    delta_old: f64,
    /// Remembered pre-snap step for restoration after a breakpoint hit.
    step_delta: f64,
    current: f64,
    rejected: usize,
    converged: usize,

    pub stat_steps: usize,
    pub stat_rejected: usize,
    pub stat_iterations: usize,
    pub stat_convergence: usize,
}

impl TransientSolver {
    pub fn new(params: TranParams) -> Self {
        Self {
            params,
            integ: Integrator::new(Method::Trapezoidal, 2),
            corr_method: Method::Trapezoidal,
            pred_method: Method::AdamsBashforth,
            corr_order: 1,
            pred_order: 1,
            corr_max_order: 2,
            corr_coeff: [0.0; MAX_COEFF],
            pred_coeff: [0.0; MAX_COEFF],
            delta_ring: StateRing::new(1),
            deltas: [0.0; MAX_COEFF],
            solution: SolutionRing::new(0),
            delta: 0.0,
            delta_min: 0.0,
            delta_max: 0.0,
            delta_old: 0.0,
            step_delta: -1.0,
            current: 0.0,
            rejected: 0,
            converged: 0,
            stat_steps: 0,
            stat_rejected: 0,
            stat_iterations: 0,
            stat_convergence: 0,
        }
    }

    /// Runs the transient sweep and saves `Vt`/`It` results keyed by the
    /// `time` dependency.
    pub fn solve(&mut self, circuit: &mut Circuit, dataset: &mut Dataset) -> Result<()> {
        self.stat_steps = 0;
        self.stat_rejected = 0;
        self.stat_iterations = 0;
        self.stat_convergence = 0;

        // initial DC analysis seeds the integration
        let dc_seed = if self.params.initial_dc {
            Some(self.dc_analysis(circuit)?)
        } else {
            None
        };

        // initialize the transient solver proper
        for device in circuit.devices_mut() {
            device.init_tr();
        }
        let mut na = NodalSolver::new("transient", circuit, self.params.solver)?;
        na.max_iter = self.params.max_iter;
        na.reltol = self.params.reltol;
        na.abstol = self.params.abstol;
        na.vntol = self.params.vntol;
        na.temp = self.params.temp;
        self.init_tr();

        let sweep = if self.params.log_sweep {
            Sweep::logarithmic("time", self.params.start, self.params.stop, self.params.points)
        } else {
            Sweep::linear("time", self.params.start, self.params.stop, self.params.points)
        };

        // recall the DC solution into the new node table
        if let Some(mut dc) = dc_seed {
            na.adopt_stored_solution(&mut dc);
            na.recall_solution(circuit);
        }
        na.apply_nodeset(circuit, false);
        self.solution = SolutionRing::new(na.node_count() + na.vsource_count());
        self.solution.fill(na.solution());

        self.integ.set_mode(Mode::Init);

        let mut running = 0usize;
        let mut conv_error = 0i32;
        let mut save_current = 0.0;
        self.current = 0.0;
        self.step_delta = -1.0;
        self.rejected = 0;
        self.converged = 0;
        self.delta /= 10.0;
        self.delta_ring.fill(0, self.delta);
        self.adjust_order(true);

        for i in 0..sweep.len() {
            let time = sweep.get(i);

            // step until the requested sample time is reached
            loop {
                log::trace!("transient: t = {:.3e}, h = {:.3e}", self.current, self.delta);

                self.update_coefficients();
                self.predictor(&mut na, circuit);

                if self.rejected > 0 {
                    na.restart_nonlinear(circuit);
                    self.rejected = 0;
                }

                // corrector: Newton-Raphson at the new time point
                let mut stage = TrStage {
                    time: self.current,
                    integ: self.integ.clone(),
                };
                if let Err(err) = na.solve_nonlinear(circuit, &mut stage) {
                    let retryable = na
                        .estack
                        .top()
                        .is_some_and(|r| r.kind == ReportKind::NoConvergence);
                    if !retryable {
                        na.estack.print();
                        return Err(err);
                    }
                    na.estack.pop();

                    // back off: halve the step, reduce the order at the
                    // minimum step, and engage damped Newton-Raphson
                    if self.current > 0.0 {
                        self.current -= self.delta;
                    }
                    self.delta /= 2.0;
                    if self.delta <= self.delta_min {
                        self.delta = self.delta_min;
                        self.adjust_order(true);
                    }
                    if self.current > 0.0 {
                        self.current += self.delta;
                    }
                    self.stat_rejected += 1;
                    self.stat_convergence += 1;
                    self.rejected += 1;
                    self.converged = 0;
                    na.conv_helper = ConvHelper::SteepestDescent;
                    conv_error = 2;
                }

                // a rejected step restarts the loop with the reduced step
                if self.rejected > 0 {
                    continue;
                }

                if !na.matrix_is_finite() {
                    log::error!(
                        "transient: Jacobian matrix is non-finite at t = {:.3e}, aborting",
                        self.current
                    );
                    return Err(Error::NonFinite);
                }

                self.stat_iterations += na.iterations;
                conv_error -= 1;
                if conv_error < 0 {
                    na.conv_helper = ConvHelper::None;
                }

                // advance in time or reject on truncation error
                if running > 1 {
                    self.adjust_delta(&mut na, circuit, time);
                    self.adjust_order(false);
                } else {
                    self.fill_device_states(circuit);
                    self.next_states(&mut na, circuit);
                    self.rejected = 0;
                }

                save_current = self.current;
                self.current += self.delta;
                running += 1;
                self.converged += 1;

                self.integ.set_mode(Mode::Running);

                if running > 1 {
                    self.update_history(circuit, &na, save_current);
                } else {
                    self.init_history(circuit, &na, save_current);
                }

                if save_current >= time {
                    break;
                }
            }

            // save results for the requested sample time
            dataset.add_dependency_point("time", time);
            na.save_results(circuit, "Vt", "It", SaveOpts::default(), dataset, Some("time"));
        }

        if self.stat_steps > 0 {
            log::debug!(
                "transient: average time-step {:.3e}, {} rejections",
                save_current / self.stat_steps as f64,
                self.stat_rejected
            );
            log::debug!(
                "transient: average NR-iterations {:.1}, {} non-convergences",
                self.stat_iterations as f64 / self.stat_steps as f64,
                self.stat_convergence
            );
        }
        Ok(())
    }

    /// The initial DC analysis; retries once with line search before
    /// giving up. Returns the solver holding the stored solution.
    fn dc_analysis(&mut self, circuit: &mut Circuit) -> Result<NodalSolver<f64>> {
        for device in circuit.devices_mut() {
            device.init_dc();
        }
        let mut na = NodalSolver::new("initial DC", circuit, self.params.solver)?;
        na.max_iter = self.params.max_iter;
        na.reltol = self.params.reltol;
        na.abstol = self.params.abstol;
        na.vntol = self.params.vntol;
        na.temp = self.params.temp;

        let mut stage = DcStage;
        na.apply_nodeset(circuit, true);
        let mut result = na.solve_nonlinear(circuit, &mut stage);

        if result.is_err() {
            let retryable = na
                .estack
                .top()
                .is_some_and(|r| r.kind == ReportKind::NoConvergence);
            if retryable {
                // one more attempt with line search before giving up
                na.estack.pop();
                na.conv_helper = ConvHelper::LineSearch;
                na.apply_nodeset(circuit, true);
                result = na.solve_nonlinear(circuit, &mut stage);
            }
        }
        if let Err(err) = result {
            na.estack.print();
            log::error!("transient: initial DC analysis failed");
            return Err(err);
        }

        na.store_solution(circuit);
        Ok(na)
    }

    /// Fetches methods, orders and step limits from the parameters.
    fn init_tr(&mut self) {
        let (corr, max_order) = coeff::corrector_for(self.params.method, self.params.order);
        self.corr_method = corr;
        self.corr_max_order = max_order;
        self.corr_order = max_order;
        self.pred_order = max_order;

        let start = self.params.start;
        let stop = self.params.stop;
        let points = self.params.points.max(2) as f64;

        self.delta = self.params.initial_step;
        self.delta_min = self.params.min_step;
        self.delta_max = self.params.max_step;
        if self.delta_max == 0.0 {
            self.delta_max = ((stop - start) / (points - 1.0)).min(stop / 200.0);
        }
        if self.delta_min == 0.0 {
            self.delta_min = f64::EPSILON * 10.0 * self.delta_max;
        }
        if self.delta == 0.0 {
            self.delta = (stop / 200.0).min(self.delta_max) / 10.0;
        }
        self.delta = self.delta.clamp(self.delta_min, self.delta_max);

        self.delta_ring = StateRing::new(1);
        self.delta_ring.fill(0, self.delta);
        self.delta_ring.save(0, &mut self.deltas);

        let eff = coeff::corrector_type(self.corr_method, self.corr_order);
        self.pred_method = coeff::predictor_for(eff);
        self.corr_coeff = coeff::corrector_coefficients(eff, self.corr_order, &self.deltas);
        self.pred_coeff = coeff::predictor_coefficients(self.pred_method, self.pred_order, &self.deltas);
        self.integ = Integrator::new(eff, self.corr_order);
        self.integ.set_coefficients(&self.corr_coeff);
        self.integ.set_mode(Mode::Init);
    }

    /// Records the new step in the delta ring and rederives corrector and
    /// predictor coefficients.
    fn update_coefficients(&mut self) {
        self.delta_ring.set(0, self.delta);
        self.delta_ring.save(0, &mut self.deltas);
        let eff = coeff::corrector_type(self.corr_method, self.corr_order);
        self.corr_coeff = coeff::corrector_coefficients(eff, self.corr_order, &self.deltas);
        self.pred_coeff = coeff::predictor_coefficients(self.pred_method, self.pred_order, &self.deltas);
        self.integ.set_method(eff);
        self.integ.set_order(self.corr_order);
        self.integ.set_coefficients(&self.corr_coeff);
    }

    /// Predicts a start value for the corrector from past solutions and
    /// writes it back to the devices.
    fn predictor(&mut self, na: &mut NodalSolver<f64>, circuit: &mut Circuit) {
        match self.pred_method {
            Method::Gear => self.predict_gear(na),
            Method::AdamsBashforth => self.predict_bashforth(na),
            Method::Euler => self.predict_euler(na),
            _ => {
                // falling back to the previous solution is a predictor too
                let prev = self.solution.get(1).clone();
                na.solution_mut().copy_from(&prev);
            }
        }
        na.save_solution(circuit);
        self.solution.set_current(na.solution());
    }

    /// Explicit Adams-Bashforth over the divided differences of the past
    /// solutions.
    fn predict_bashforth(&mut self, na: &mut NodalSolver<f64>) {
        let size = self.solution.get(0).len();
        for r in 0..size {
            let mut xn = self.pred_coeff[0] * self.solution.get(1)[r];
            for o in 1..=self.pred_order {
                let hn = self.delta_ring.get_past(0, o);
                let dd = (self.solution.get(o)[r] - self.solution.get(o + 1)[r]) / hn;
                xn += self.pred_coeff[o] * dd;
            }
            na.solution_mut()[r] = xn;
        }
    }

    /// Forward Euler, i.e. Adams-Bashforth at order 1.
    fn predict_euler(&mut self, na: &mut NodalSolver<f64>) {
        let size = self.solution.get(0).len();
        for r in 0..size {
            let mut xn = self.pred_coeff[0] * self.solution.get(1)[r];
            let hn = self.delta_ring.get_past(0, 1);
            let dd = (self.solution.get(1)[r] - self.solution.get(2)[r]) / hn;
            xn += self.pred_coeff[1] * dd;
            na.solution_mut()[r] = xn;
        }
    }

    /// Explicit Gear: a weighted combination of past solutions.
    fn predict_gear(&mut self, na: &mut NodalSolver<f64>) {
        let size = self.solution.get(0).len();
        for r in 0..size {
            let mut xn = 0.0;
            for o in 0..=self.pred_order {
                xn += self.pred_coeff[o] * self.solution.get(o + 1)[r];
            }
            na.solution_mut()[r] = xn;
        }
    }

    /// Advances all state rings one time step and records the accepted
    /// solution; afterwards slot 1 of the delta and solution rings holds
    /// the step just taken.
    fn next_states(&mut self, na: &NodalSolver<f64>, circuit: &mut Circuit) {
        for device in circuit.devices_mut() {
            device.data_mut().states.next();
        }
        self.solution.set_current(na.solution());
        self.solution.next();
        self.delta_ring.next();
        self.stat_steps += 1;
    }

    /// Floods every device state ring with its current value; used once
    /// after the initial solution so higher orders start consistently.
    fn fill_device_states(&mut self, circuit: &mut Circuit) {
        for device in circuit.devices_mut() {
            let states = &mut device.data_mut().states;
            for s in 0..states.len() {
                let value = states.get(s);
                states.fill(s, value);
            }
        }
    }

    /// Adapts the step from the LTE estimate and decides acceptance; on
    /// rejection time is backed up and the rings stay untouched.
    fn adjust_delta(&mut self, na: &mut NodalSolver<f64>, circuit: &mut Circuit, t: f64) {
        self.delta_old = self.delta;
        self.delta = self.check_delta(na, circuit);
        self.delta = self.delta.clamp(self.delta_min, self.delta_max);

        // breakpoint handling: land exactly on the requested raster
        let mut good = false;
        if !self.params.relax_tsr && (self.stat_convergence == 0 || self.converged > 64) {
            if self.step_delta > 0.0 {
                // restore the pre-snap step
                self.delta = self.step_delta;
                self.step_delta = -1.0;
            } else if (t - (self.current + self.delta) < self.delta_min)
                && (self.current + self.delta) < t
            {
                // avoid landing a sliver before the breakpoint
                self.delta /= 2.0;
            } else if self.delta > (t - self.current) && t > self.current {
                // snap onto the breakpoint, remember the old step
                self.step_delta = self.delta_old;
                self.delta = t - self.current;
                good = true;
            } else {
                self.step_delta = -1.0;
            }
            self.delta = self.delta.clamp(self.delta_min, self.delta_max);
        }

        if self.delta > 0.9 * self.delta_old || good {
            // accept the step
            self.next_states(na, circuit);
            self.rejected = 0;
        } else if self.delta_old > self.delta {
            // reject: back up in time, keep the rings
            self.rejected += 1;
            self.stat_rejected += 1;
            if self.current > 0.0 {
                self.current -= self.delta_old;
            }
        } else {
            self.next_states(na, circuit);
            self.rejected = 0;
        }
    }

    /// New step size from the Milne local truncation error estimate.
    fn check_delta(&mut self, na: &NodalSolver<f64>, circuit: &Circuit) -> f64 {
        let lte_reltol = self.params.lte_reltol;
        let lte_abstol = self.params.lte_abstol;
        let lte_factor = self.params.lte_factor;
        let n_nodes = na.node_count();
        let size = n_nodes + na.vsource_count();

        let eff = coeff::corrector_type(self.corr_method, self.corr_order);
        let cec = coeff::corrector_error(eff, self.corr_order);
        let pec = coeff::predictor_error(self.pred_method, self.pred_order);

        let mut n = f64::MAX;
        for r in 0..size {
            // skip branch currents of real voltage sources
            if r >= n_nodes {
                if let Some(di) = na.find_voltage_source(circuit, r - n_nodes) {
                    if circuit.device(di).data().vsource {
                        continue;
                    }
                }
            }

            let dif = na.solution()[r] - self.solution.get(0)[r];
            if dif.is_finite() && dif != 0.0 {
                let rel = na.solution()[r].abs().max(self.solution.get(0)[r].abs());
                let tol = lte_reltol * rel + lte_abstol;
                let lte = lte_factor * (cec / (pec - cec)) * dif;
                let q = self.delta * (tol / lte).abs().powf(1.0 / (self.corr_order + 1) as f64);
                n = n.min(q);
            }
        }

        self.delta = if n > 1.9 * self.delta {
            2.0 * self.delta
        } else {
            self.delta
        }
        .min(n);
        self.delta
    }

    /// Grows the integration order after accepted steps, resets it to one
    /// on demand.
    fn adjust_order(&mut self, reduce: bool) {
        if (self.corr_order < self.corr_max_order && self.rejected == 0) || reduce {
            if reduce {
                self.corr_order = 1;
            } else {
                self.corr_order += 1;
            }
            self.pred_order = self.corr_order;
            let eff = coeff::corrector_type(self.corr_method, self.corr_order);
            self.pred_method = coeff::predictor_for(eff);
            self.integ.set_method(eff);
            self.integ.set_order(self.corr_order);
        }
    }

    /// Starts the waveform history of every device that requested one.
    fn init_history(&mut self, circuit: &mut Circuit, na: &NodalSolver<f64>, t: f64) {
        for di in 0..circuit.len() {
            if circuit.device(di).data().has_history {
                self.save_history(circuit, na, di, t);
            }
        }
    }

    /// Appends the accepted solution to the device histories.
    fn update_history(&mut self, circuit: &mut Circuit, na: &NodalSolver<f64>, t: f64) {
        for di in 0..circuit.len() {
            let data = circuit.device(di).data();
            if !data.has_history {
                continue;
            }
            let stale = data
                .history
                .as_ref()
                .and_then(|h| h.last_time())
                .is_some_and(|last| t <= last);
            if !stale {
                self.save_history(circuit, na, di, t);
                if let Some(history) = &mut circuit.device_mut(di).data_mut().history {
                    history.drop_old();
                }
            }
        }
    }

    /// Records port voltages and branch currents of one device.
    fn save_history(&mut self, circuit: &mut Circuit, na: &NodalSolver<f64>, di: usize, t: f64) {
        let n_nodes = na.node_count();
        let ports = circuit.device(di).data().port_count();
        let vsources = circuit.device(di).data().vsource_count();
        let base = circuit.device(di).data().vsource_base;

        let mut values = Vec::with_capacity(ports + vsources);
        for port in 0..ports {
            let value = na
                .find_assigned_node(di, port)
                .map_or(0.0, |r| na.solution()[r]);
            values.push(value);
        }
        for vs in 0..vsources {
            values.push(na.solution()[n_nodes + base + vs]);
        }

        let data = circuit.device_mut(di).data_mut();
        if let Some(history) = &mut data.history {
            history.push_time(t);
        }
        for (track, value) in values.into_iter().enumerate() {
            data.append_history(track, value);
        }
    }
}

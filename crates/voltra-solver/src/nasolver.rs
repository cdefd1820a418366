//! Nodal analysis solver.
//!
//! Owns the MNA system for one analysis run: assembles `A x = z` from the
//! device stamps, drives the linear or Newton-Raphson solve, applies the
//! convergence helpers and writes solved port voltages and branch currents
//! back into the devices.

use std::collections::HashMap;

use nalgebra::{DMatrix, DVector};
use num_complex::Complex64;
use voltra_core::circuit::Circuit;
use voltra_core::dataset::Dataset;
use voltra_core::device::CalcCtx;
use voltra_core::error::{Error, Result};
use voltra_core::nodelist::{self, NodeList};
use voltra_core::report::{ErrorStack, Report, ReportKind};

use crate::eqn::{Algorithm, EquationSystem, MnaScalar};

/// Convergence helper for the nonlinear solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConvHelper {
    #[default]
    None,
    Attenuation,
    LineSearch,
    SteepestDescent,
    GMinStepping,
    SourceStepping,
}

impl ConvHelper {
    /// Parses the `convHelper` property value.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "none" => Some(Self::None),
            "Attenuation" => Some(Self::Attenuation),
            "LineSearch" => Some(Self::LineSearch),
            "SteepestDescent" => Some(Self::SteepestDescent),
            "gMinStepping" => Some(Self::GMinStepping),
            "SourceStepping" => Some(Self::SourceStepping),
            _ => None,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Attenuation => "RHS attenuation",
            Self::LineSearch => "line search",
            Self::SteepestDescent => "steepest descent",
            Self::GMinStepping => "gMin stepping",
            Self::SourceStepping => "source stepping",
        }
    }
}

/// Per-analysis calculation hook: refreshes every device's stamps for the
/// current iterate. DC, transient and AC analyses provide different stages
/// over the same solver loop.
pub trait Stage {
    fn calculate(&mut self, circuit: &mut Circuit, ctx: &CalcCtx);
}

/// Which extra result classes `save_results` includes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SaveOpts {
    /// Save operating points of nonlinear devices and probe currents.
    pub ops: bool,
    /// Include internal nodes and helper voltage sources.
    pub all: bool,
}

/// The MNA nodal solver, generic over the number field.
pub struct NodalSolver<T: MnaScalar> {
    desc: String,
    nodes: NodeList,
    n: usize,
    m: usize,
    a: DMatrix<T>,
    cy: Option<DMatrix<T>>,
    z: DVector<T>,
    x: DVector<T>,
    x_prev: Option<DVector<T>>,
    z_prev: Option<DVector<T>>,
    eqns: EquationSystem<T>,
    pub update_matrix: bool,
    pub fixpoint: bool,
    pub conv_helper: ConvHelper,
    gmin: f64,
    src_factor: f64,
    pub temp: f64,
    pub reltol: f64,
    pub abstol: f64,
    pub vntol: f64,
    pub max_iter: usize,
    pub iterations: usize,
    pub estack: ErrorStack,
    node_solution: HashMap<String, T>,
    branch_solution: HashMap<(String, usize), T>,
}

impl<T: MnaScalar> NodalSolver<T> {
    /// Builds the node table, assigns voltage-source rows and allocates
    /// the MNA system. Devices must have run their `init_*` hooks first so
    /// their row counts are final.
    pub fn new(desc: &str, circuit: &mut Circuit, algo: Algorithm) -> Result<Self> {
        let nodes = NodeList::build(circuit)?;
        let m = nodelist::assign_voltage_sources(circuit);
        let n = nodes.count();
        log::debug!("{desc}: {n} nodes, {m} voltage sources");
        Ok(Self {
            desc: desc.to_string(),
            nodes,
            n,
            m,
            a: DMatrix::zeros(n + m, n + m),
            cy: None,
            z: DVector::zeros(n + m),
            x: DVector::zeros(n + m),
            x_prev: None,
            z_prev: None,
            eqns: EquationSystem::new(algo),
            update_matrix: true,
            fixpoint: false,
            conv_helper: ConvHelper::None,
            gmin: 0.0,
            src_factor: 1.0,
            temp: voltra_core::constants::DEFAULT_TEMP,
            reltol: 1e-3,
            abstol: 1e-12,
            vntol: 1e-6,
            max_iter: 150,
            iterations: 0,
            estack: ErrorStack::new(),
            node_solution: HashMap::new(),
            branch_solution: HashMap::new(),
        })
    }

    pub fn node_count(&self) -> usize {
        self.n
    }

    pub fn vsource_count(&self) -> usize {
        self.m
    }

    pub fn nodes(&self) -> &NodeList {
        &self.nodes
    }

    pub fn matrix(&self) -> &DMatrix<T> {
        &self.a
    }

    pub fn rhs(&self) -> &DVector<T> {
        &self.z
    }

    pub fn solution(&self) -> &DVector<T> {
        &self.x
    }

    pub fn solution_mut(&mut self) -> &mut DVector<T> {
        &mut self.x
    }

    pub fn set_algo(&mut self, algo: Algorithm) {
        self.eqns.set_algo(algo);
    }

    pub fn src_factor(&self) -> f64 {
        self.src_factor
    }

    fn ctx(&self) -> CalcCtx {
        CalcCtx {
            src_factor: self.src_factor,
            temp: self.temp,
        }
    }

    /// True when every entry of the system matrix is finite.
    pub fn matrix_is_finite(&self) -> bool {
        self.a.iter().all(|v| v.finite())
    }

    /// Runs the calculation, assembles the system, solves it once and
    /// writes the solution back into the devices.
    pub fn solve_once(&mut self, circuit: &mut Circuit, stage: &mut dyn Stage) -> Result<()> {
        stage.calculate(circuit, &self.ctx());
        self.create_matrix(circuit);
        self.run_mna(circuit, stage)?;
        self.save_solution(circuit);
        Ok(())
    }

    /// The linear netlist solver: one full assembly and solve.
    pub fn solve_linear(&mut self, circuit: &mut Circuit, stage: &mut dyn Stage) -> Result<()> {
        self.update_matrix = true;
        self.solve_once(circuit, stage)
    }

    /// The nonlinear iterative solver. Runs until the convergence criteria
    /// hold or the iteration budget is exhausted; gMin and source stepping
    /// replace the plain loop entirely.
    pub fn solve_nonlinear(&mut self, circuit: &mut Circuit, stage: &mut dyn Stage) -> Result<()> {
        if self.conv_helper == ConvHelper::GMinStepping {
            self.iterations = 0;
            return self.solve_nonlinear_continuation_gmin(circuit, stage);
        }
        if self.conv_helper == ConvHelper::SourceStepping {
            self.iterations = 0;
            return self.solve_nonlinear_continuation_source(circuit, stage);
        }

        let limit = self.max_iter * if self.conv_helper == ConvHelper::None { 1 } else { 2 };
        self.update_matrix = true;

        let mut iter = 0;
        let mut convergence = false;
        while !convergence && iter < limit {
            self.solve_once(circuit, stage)?;
            convergence = iter > 0 && self.check_convergence();
            self.save_previous_iteration();
            iter += 1;
            // fixpoint iterations reuse the factorization until converged,
            // then force one full-matrix pass
            if self.fixpoint {
                if convergence && !self.update_matrix {
                    self.update_matrix = true;
                    convergence = false;
                } else {
                    self.update_matrix = false;
                }
            }
        }
        self.iterations = iter;

        if !convergence {
            let report = Report::new(
                ReportKind::NoConvergence,
                format!("no convergence in {} analysis after {iter} iterations", self.desc),
            );
            self.estack.push(report);
            return Err(Error::NoConvergence(iter));
        }
        Ok(())
    }

    /// gMin stepping: outer continuation over a shunt conductance added to
    /// the whole diagonal, removed step by step.
    fn solve_nonlinear_continuation_gmin(
        &mut self,
        circuit: &mut Circuit,
        stage: &mut dyn Stage,
    ) -> Result<()> {
        let max_iter = self.max_iter / 4 + 1;

        self.update_matrix = true;
        self.fixpoint = false;

        self.gmin = 0.01;
        let mut g_prev = self.gmin;
        let mut g_step = self.gmin / 100.0;
        self.gmin -= g_step;

        loop {
            let mut iter = 0;
            let mut convergence = false;
            let mut error = false;
            while !convergence && iter < max_iter {
                if self.solve_once(circuit, stage).is_err() {
                    error = true;
                    break;
                }
                convergence = iter > 0 && self.check_convergence();
                self.save_previous_iteration();
                iter += 1;
            }
            self.iterations += iter;

            if iter >= max_iter || error {
                // not converged at this gMin, shrink the step
                g_step /= 2.0;
                if g_step < f64::EPSILON {
                    let report = Report::new(
                        ReportKind::NoConvergence,
                        format!(
                            "no convergence in {} analysis after {} gMinStepping iterations",
                            self.desc, self.iterations
                        ),
                    );
                    self.estack.push(report);
                    return Err(Error::NoConvergence(self.iterations));
                }
                self.gmin = (g_prev - g_step).max(0.0);
            } else {
                // converged, grow the step
                g_prev = self.gmin;
                self.gmin = (self.gmin - g_step).max(0.0);
                g_step *= 2.0;
            }
            if g_prev <= 0.0 {
                break;
            }
        }
        Ok(())
    }

    /// Source stepping: outer continuation over a factor scaling all
    /// independent sources from almost zero up to one.
    fn solve_nonlinear_continuation_source(
        &mut self,
        circuit: &mut Circuit,
        stage: &mut dyn Stage,
    ) -> Result<()> {
        let max_iter = self.max_iter / 4 + 1;

        self.update_matrix = true;
        self.fixpoint = false;

        let mut s_prev = 0.0;
        let mut s_step = 0.01;
        self.src_factor = s_step;

        loop {
            let mut iter = 0;
            let mut convergence = false;
            let mut error = false;
            while !convergence && iter < max_iter {
                if self.solve_once(circuit, stage).is_err() {
                    error = true;
                    break;
                }
                convergence = iter > 0 && self.check_convergence();
                self.save_previous_iteration();
                iter += 1;
            }
            self.iterations += iter;

            if iter >= max_iter || error {
                // failed at this source factor: fall back to the previous
                // solution and shrink the step
                s_step *= if error { 0.1 } else { 0.5 };
                self.restore_previous_iteration();
                self.save_solution(circuit);
                if s_step < f64::EPSILON {
                    let report = Report::new(
                        ReportKind::NoConvergence,
                        format!(
                            "no convergence in {} analysis after {} sourceStepping iterations",
                            self.desc, self.iterations
                        ),
                    );
                    self.estack.push(report);
                    self.src_factor = 1.0;
                    return Err(Error::NoConvergence(self.iterations));
                }
                self.src_factor = (s_prev + s_step).min(1.0);
            } else if iter < max_iter / 4 {
                // fast convergence: advance and grow the step
                s_prev = self.src_factor;
                self.src_factor = (self.src_factor + s_step).min(1.0);
                s_step *= 1.5;
            } else {
                // slow convergence: advance without growing
                self.src_factor = (self.src_factor + s_step).min(1.0);
            }
            if s_prev >= 1.0 {
                break;
            }
        }
        self.src_factor = 1.0;
        Ok(())
    }

    /// Assembles the MNA matrix `A = [G B; C D]` (when `update_matrix` is
    /// set) and the right-hand side `z = [i; e]`.
    pub fn create_matrix(&mut self, circuit: &Circuit) {
        if self.update_matrix {
            self.create_g(circuit);
            self.create_b(circuit);
            self.create_c(circuit);
            self.create_d(circuit);
        }
        if self.conv_helper == ConvHelper::GMinStepping {
            let gmin = T::from_real(self.gmin);
            for i in 0..self.n + self.m {
                self.a[(i, i)] += gmin;
            }
        }
        self.create_z(circuit);
    }

    /// G block: for each node pair, the summed admittance of every device
    /// attached to both nodes.
    fn create_g(&mut self, circuit: &Circuit) {
        for c in 0..self.n {
            for r in 0..self.n {
                let mut g = Complex64::ZERO;
                for &(dc, pc) in &self.nodes.node(c).connections {
                    for &(dr, pr) in &self.nodes.node(r).connections {
                        if dc == dr {
                            g += circuit.device(dc).data().stamps.y[(pr, pc)];
                        }
                    }
                }
                self.a[(r, c)] = T::from_stamp(g);
            }
        }
    }

    /// B block: couples voltage-source rows into the nodal equations.
    fn create_b(&mut self, circuit: &Circuit) {
        for c in 0..self.m {
            let Some(di) = self.find_voltage_source(circuit, c) else {
                continue;
            };
            let data = circuit.device(di).data();
            let local = c - data.vsource_base;
            for r in 0..self.n {
                let mut val = Complex64::ZERO;
                for &(dr, port) in &self.nodes.node(r).connections {
                    if dr == di {
                        val += data.stamps.b[(port, local)];
                    }
                }
                self.a[(r, c + self.n)] = T::from_stamp(val);
            }
        }
    }

    /// C block: the branch equations' nodal coefficients.
    fn create_c(&mut self, circuit: &Circuit) {
        for r in 0..self.m {
            let Some(di) = self.find_voltage_source(circuit, r) else {
                continue;
            };
            let data = circuit.device(di).data();
            let local = r - data.vsource_base;
            for c in 0..self.n {
                let mut val = Complex64::ZERO;
                for &(dc, port) in &self.nodes.node(c).connections {
                    if dc == di {
                        val += data.stamps.c[(local, port)];
                    }
                }
                self.a[(r + self.n, c)] = T::from_stamp(val);
            }
        }
    }

    /// D block: nonzero only for dependent sources and companion models.
    fn create_d(&mut self, circuit: &Circuit) {
        for r in 0..self.m {
            let dr = self.find_voltage_source(circuit, r);
            for c in 0..self.m {
                let dc = self.find_voltage_source(circuit, c);
                let mut val = Complex64::ZERO;
                if let (Some(ri), Some(ci)) = (dr, dc) {
                    if ri == ci {
                        let data = circuit.device(ri).data();
                        let base = data.vsource_base;
                        val = data.stamps.d[(r - base, c - base)];
                    }
                }
                self.a[(r + self.n, c + self.n)] = T::from_stamp(val);
            }
        }
    }

    /// Right-hand side: current injections over the nodes, source values
    /// over the voltage-source rows.
    pub fn create_z(&mut self, circuit: &Circuit) {
        self.create_i(circuit);
        self.create_e(circuit);
    }

    fn create_i(&mut self, circuit: &Circuit) {
        for r in 0..self.n {
            let mut val = Complex64::ZERO;
            for &(di, port) in &self.nodes.node(r).connections {
                let data = circuit.device(di).data();
                if data.isource || data.nonlinear {
                    val += data.stamps.i[port];
                }
            }
            self.z[r] = T::from_stamp(val);
        }
    }

    fn create_e(&mut self, circuit: &Circuit) {
        for r in 0..self.m {
            let Some(di) = self.find_voltage_source(circuit, r) else {
                continue;
            };
            let data = circuit.device(di).data();
            let val = data.stamps.e[r - data.vsource_base];
            self.z[r + self.n] = T::from_stamp(val);
        }
    }

    /// Builds the (N+M) x (N+M) noise current correlation matrix from the
    /// device noise stamps.
    pub fn create_noise_matrix(&mut self, circuit: &Circuit) {
        let size = self.n + self.m;
        let mut cy: DMatrix<T> = DMatrix::zeros(size, size);

        // node-node block
        for c in 0..self.n {
            for r in 0..self.n {
                let mut val = Complex64::ZERO;
                for &(dc, pc) in &self.nodes.node(c).connections {
                    for &(dr, pr) in &self.nodes.node(r).connections {
                        if dc == dr {
                            val += circuit.device(dc).data().stamps.n[(pr, pc)];
                        }
                    }
                }
                cy[(r, c)] = T::from_stamp(val);
            }
        }

        // voltage source rows and columns
        for r in 0..self.m {
            let Some(ri) = self.find_voltage_source(circuit, r) else {
                continue;
            };
            let rdata = circuit.device(ri).data();
            let rsize = rdata.port_count();
            let rlocal = rsize + r - rdata.vsource_base;

            for c in 0..self.m {
                let Some(ci) = self.find_voltage_source(circuit, c) else {
                    continue;
                };
                if ri == ci {
                    let clocal = rsize + c - rdata.vsource_base;
                    cy[(r + self.n, c + self.n)] =
                        T::from_stamp(rdata.stamps.n[(rlocal, clocal)]);
                }
            }

            for c in 0..self.n {
                let mut val = Complex64::ZERO;
                for &(dc, port) in &self.nodes.node(c).connections {
                    if dc == ri {
                        val += rdata.stamps.n[(rlocal, port)];
                    }
                }
                cy[(r + self.n, c)] = T::from_stamp(val);
                let mut val = Complex64::ZERO;
                for &(dc, port) in &self.nodes.node(c).connections {
                    if dc == ri {
                        val += rdata.stamps.n[(port, rlocal)];
                    }
                }
                cy[(c, r + self.n)] = T::from_stamp(val);
            }
        }

        self.cy = Some(cy);
    }

    pub fn noise_matrix(&self) -> Option<&DMatrix<T>> {
        self.cy.as_ref()
    }

    pub fn equation_system(&mut self) -> &mut EquationSystem<T> {
        &mut self.eqns
    }

    /// Solves the assembled system and applies the damped-Newton helpers.
    fn run_mna(&mut self, circuit: &mut Circuit, stage: &mut dyn Stage) -> Result<()> {
        let result = if self.update_matrix {
            self.eqns.solve(&self.a, &self.z)
        } else {
            self.eqns.substitute(&self.z)
        };
        match result {
            Ok(x) => self.x = x,
            Err(err) => {
                log::debug!("{}: equation system failed: {err}", self.desc);
                self.estack.push(Report::from(&err));
                return Err(err);
            }
        }

        if self.x_prev.is_some() {
            match self.conv_helper {
                ConvHelper::Attenuation => self.apply_attenuation(),
                ConvHelper::LineSearch => self.line_search(circuit, stage),
                ConvHelper::SteepestDescent => self.steepest_descent(circuit, stage),
                _ => {}
            }
        }
        Ok(())
    }

    /// Damped Newton-Raphson: `x = x_prev + alpha (x - x_prev)` with the
    /// damping factor derived from the largest solution change.
    fn apply_attenuation(&mut self) {
        let Some(x_prev) = &self.x_prev else { return };
        let dx = &self.x - x_prev;
        let n_max = dx.iter().fold(0.0_f64, |acc, v| acc.max(v.mag()));
        let mut alpha = 1.0;
        if n_max > 0.0 {
            alpha = (1.0 / n_max).min(0.9).max(0.1);
        }
        self.x = x_prev + dx * T::from_real(alpha);
    }

    /// One-dimensional search over the damping factor minimizing the norm
    /// of the right-hand side. Each probe re-runs the device calculation
    /// at the trial point.
    fn line_search(&mut self, circuit: &mut Circuit, stage: &mut dyn Stage) {
        let Some(x_prev) = self.x_prev.clone() else { return };
        let dx = &self.x - &x_prev;

        let mut alpha = 0.5_f64;
        let mut aprev = 1.0_f64;
        let mut astep = 0.5_f64;
        let mut dir = -1.0_f64;
        let mut n_min = f64::MAX;

        loop {
            self.x = &x_prev + &dx * T::from_real(alpha);
            self.save_solution(circuit);
            stage.calculate(circuit, &self.ctx());
            self.create_z(circuit);

            let norm = vector_norm(&self.z);

            astep /= 2.0;
            let adiff = (alpha - aprev).abs();
            if adiff > 0.005 {
                aprev = alpha;
                if norm < n_min {
                    n_min = norm;
                    if alpha == 1.0 {
                        dir = -dir;
                    }
                    alpha += astep * dir;
                } else {
                    dir = -dir;
                    alpha += 1.5 * astep * dir;
                }
            } else {
                break;
            }
        }

        self.x = &x_prev + &dx * T::from_real(alpha);
    }

    /// Geometric backtracking along the Newton direction until the descent
    /// condition on the right-hand side norm holds.
    fn steepest_descent(&mut self, circuit: &mut Circuit, stage: &mut dyn Stage) {
        let (Some(x_prev), Some(z_prev)) = (self.x_prev.clone(), self.z_prev.clone()) else {
            return;
        };
        let dx = &self.x - &x_prev;
        let norm_prev = vector_norm(&z_prev);
        let mut alpha = 1.0_f64;

        loop {
            self.x = &x_prev + &dx * T::from_real(alpha);
            self.save_solution(circuit);
            stage.calculate(circuit, &self.ctx());
            self.create_z(circuit);

            let dz = &self.z - &z_prev;
            let slope: T = dz.iter().fold(T::zero(), |acc, v| acc + *v * *v);
            let slope = -slope.into_stamp().re;
            if vector_norm(&self.z) < norm_prev + alpha * slope {
                break;
            }
            alpha *= 0.7;
            if alpha <= 0.001 {
                break;
            }
        }

        self.x = &x_prev + &dx * T::from_real(alpha);
    }

    /// Convergence test on both sides of the MNA system.
    ///
    /// Nodal rows compare voltages against `vntol`, voltage-source rows
    /// compare currents against `abstol`; the right-hand side is only
    /// tested when no helper is active.
    pub fn check_convergence(&self) -> bool {
        let (Some(x_prev), Some(z_prev)) = (&self.x_prev, &self.z_prev) else {
            return false;
        };

        for r in 0..self.n {
            let v_abs = (self.x[r] - x_prev[r]).mag();
            let v_rel = self.x[r].mag();
            if v_abs >= self.vntol + self.reltol * v_rel {
                return false;
            }
            if self.conv_helper == ConvHelper::None {
                let i_abs = (self.z[r] - z_prev[r]).mag();
                let i_rel = self.z[r].mag();
                if i_abs >= self.abstol + self.reltol * i_rel {
                    return false;
                }
            }
        }

        for r in self.n..self.n + self.m {
            let i_abs = (self.x[r] - x_prev[r]).mag();
            let i_rel = self.x[r].mag();
            if i_abs >= self.abstol + self.reltol * i_rel {
                return false;
            }
            if self.conv_helper == ConvHelper::None {
                let v_abs = (self.z[r] - z_prev[r]).mag();
                let v_rel = self.z[r].mag();
                if v_abs >= self.vntol + self.reltol * v_rel {
                    return false;
                }
            }
        }

        true
    }

    /// Saves the current solution and right-hand side as the previous
    /// iterate.
    pub fn save_previous_iteration(&mut self) {
        match &mut self.x_prev {
            Some(prev) => prev.copy_from(&self.x),
            None => self.x_prev = Some(self.x.clone()),
        }
        match &mut self.z_prev {
            Some(prev) => prev.copy_from(&self.z),
            None => self.z_prev = Some(self.z.clone()),
        }
    }

    /// Restores the previous (successful) iterate.
    pub fn restore_previous_iteration(&mut self) {
        if let Some(prev) = &self.x_prev {
            self.x.copy_from(prev);
        }
        if let Some(prev) = &self.z_prev {
            self.z.copy_from(prev);
        }
    }

    /// Forgets the iteration history; the next solve starts fresh.
    pub fn clear_iteration_history(&mut self) {
        self.x_prev = None;
        self.z_prev = None;
    }

    /// Applies user nodesets to the solution vector, writes the result
    /// back to the devices and restarts the nonlinear iteration.
    pub fn apply_nodeset(&mut self, circuit: &mut Circuit, nokeep: bool) {
        if nokeep {
            self.x.fill(T::zero());
        }

        let nodesets: Vec<(String, f64)> = circuit
            .nodesets()
            .iter()
            .map(|ns| (ns.node.clone(), ns.value))
            .collect();
        for (name, value) in nodesets {
            match self.nodes.index_of(&name) {
                Some(idx) if idx > 0 => self.x[idx - 1] = T::from_real(value),
                Some(_) => {}
                None => {
                    log::warn!("{}: no such node `{name}', cannot initialize node", self.desc);
                }
            }
        }

        if let Some(prev) = &mut self.x_prev {
            prev.copy_from(&self.x);
        }
        self.save_solution(circuit);
        self.restart_nonlinear(circuit);
    }

    /// Runs `restart_dc` on every nonlinear device.
    pub fn restart_nonlinear(&mut self, circuit: &mut Circuit) {
        for device in circuit.devices_mut() {
            if device.data().nonlinear {
                device.restart_dc();
            }
        }
    }

    /// Writes node voltages and branch currents back into the devices.
    pub fn save_solution(&self, circuit: &mut Circuit) {
        // node voltages, reference node included
        for r in 0..self.n {
            let value = self.x[r].into_stamp();
            for &(di, port) in &self.nodes.node(r).connections {
                circuit.device_mut(di).data_mut().set_v(port, value);
            }
        }
        for &(di, port) in &self.nodes.ground().connections {
            circuit.device_mut(di).data_mut().set_v(port, Complex64::ZERO);
        }
        // branch currents of voltage sources
        for r in 0..self.m {
            if let Some(di) = self.find_voltage_source(circuit, r) {
                let base = circuit.device(di).data().vsource_base;
                let value = self.x[r + self.n].into_stamp();
                circuit.device_mut(di).data_mut().set_j(r - base, value);
            }
        }
    }

    /// MNA row of the node a device port is attached to; `None` for the
    /// reference node.
    pub fn find_assigned_node(&self, device: usize, port: usize) -> Option<usize> {
        (0..self.n).find(|&r| {
            self.nodes
                .node(r)
                .connections
                .iter()
                .any(|&(di, pi)| di == device && pi == port)
        })
    }

    /// Device owning the global voltage-source row `r`.
    pub fn find_voltage_source(&self, circuit: &Circuit, r: usize) -> Option<usize> {
        (0..circuit.len()).find(|&di| {
            let data = circuit.device(di).data();
            data.vsource_count() > 0
                && r >= data.vsource_base
                && r < data.vsource_base + data.vsource_count()
        })
    }

    /// Stores the solution keyed by node and device names so a later
    /// analysis over a different node table can recall it.
    pub fn store_solution(&mut self, circuit: &Circuit) {
        self.node_solution.clear();
        self.branch_solution.clear();
        for r in 0..self.n {
            self.node_solution
                .insert(self.nodes.node(r).name.clone(), self.x[r]);
        }
        for r in 0..self.m {
            if let Some(di) = self.find_voltage_source(circuit, r) {
                let data = circuit.device(di).data();
                let local = r - data.vsource_base;
                self.branch_solution
                    .insert((data.name().to_string(), local), self.x[r + self.n]);
            }
        }
    }

    /// Recalls a stored solution into the current node table.
    pub fn recall_solution(&mut self, circuit: &Circuit) {
        for r in 0..self.n {
            if let Some(&value) = self.node_solution.get(&self.nodes.node(r).name) {
                self.x[r] = value;
            }
        }
        for r in 0..self.m {
            if let Some(di) = self.find_voltage_source(circuit, r) {
                let data = circuit.device(di).data();
                let local = r - data.vsource_base;
                if let Some(&value) = self.branch_solution.get(&(data.name().to_string(), local)) {
                    self.x[r + self.n] = value;
                }
            }
        }
    }

    /// Moves a stored solution from another solver instance (the initial
    /// DC run seeds the transient solver this way).
    pub fn adopt_stored_solution(&mut self, other: &mut NodalSolver<T>) {
        self.node_solution = std::mem::take(&mut other.node_solution);
        self.branch_solution = std::mem::take(&mut other.branch_solution);
    }

    /// Saves node voltages, branch currents, probe values and operating
    /// points into the dataset under the given variable suffixes.
    pub fn save_results(
        &self,
        circuit: &mut Circuit,
        volts: &str,
        amps: &str,
        opts: SaveOpts,
        dataset: &mut Dataset,
        dependency: Option<&str>,
    ) {
        // node voltage variables
        for r in 0..self.n {
            if let Some(name) = self.voltage_name(r, volts, opts) {
                dataset.save_variable(&name, self.x[r].into_stamp(), dependency);
            }
        }

        // branch current variables
        for r in 0..self.m {
            if let Some(name) = self.current_name(circuit, r, amps, opts) {
                dataset.save_variable(&name, self.x[r + self.n].into_stamp(), dependency);
            }
        }

        // probe values
        for di in 0..circuit.len() {
            if !circuit.device(di).data().probe {
                continue;
            }
            if volts != "vn" {
                circuit.device_mut(di).save_operating_points();
            }
            let data = circuit.device(di).data();
            let name = format!("{}.{volts}", data.name());
            let value = Complex64::new(
                data.operating_point("Vr"),
                data.operating_point("Vi"),
            );
            dataset.save_variable(&name, value, dependency);
        }

        // operating points of nonlinear devices
        if opts.ops {
            for di in 0..circuit.len() {
                if !circuit.device(di).data().nonlinear {
                    continue;
                }
                circuit.device_mut(di).calc_operating_points();
                let data = circuit.device(di).data();
                let dev_name = data.name().to_string();
                let points: Vec<(String, f64)> = data
                    .operating_points()
                    .map(|(k, v)| (k.to_string(), v))
                    .collect();
                for (op, value) in points {
                    dataset.save_variable(
                        &format!("{dev_name}.{op}"),
                        Complex64::new(value, 0.0),
                        dependency,
                    );
                }
            }
        }
    }

    fn voltage_name(&self, r: usize, volts: &str, opts: SaveOpts) -> Option<String> {
        if self.nodes.is_internal(r) && !opts.all {
            return None;
        }
        Some(format!("{}.{volts}", self.nodes.node(r).name))
    }

    fn current_name(
        &self,
        circuit: &Circuit,
        r: usize,
        amps: &str,
        opts: SaveOpts,
    ) -> Option<String> {
        let di = self.find_voltage_source(circuit, r)?;
        let data = circuit.device(di).data();
        // helper voltage sources stay internal
        if data.internal_vsource {
            return None;
        }
        // only real voltage sources and explicitly requested currents
        if !data.vsource && !opts.ops {
            return None;
        }
        let name = data.name();
        if data.vsource_count() > 1 {
            Some(format!("{name}.{amps}{}", r - data.vsource_base + 1))
        } else {
            Some(format!("{name}.{amps}"))
        }
    }
}

/// Euclidean norm over the capability trait, avoiding extra bounds.
pub(crate) fn vector_norm<T: MnaScalar>(v: &DVector<T>) -> f64 {
    v.iter().map(|x| x.mag() * x.mag()).sum::<f64>().sqrt()
}

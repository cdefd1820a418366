//! DC operating-point analysis.

use voltra_core::circuit::Circuit;
use voltra_core::constants::DEFAULT_TEMP;
use voltra_core::dataset::Dataset;
use voltra_core::device::CalcCtx;
use voltra_core::error::{Error, Result};
use voltra_core::report::ReportKind;

use crate::eqn::Algorithm;
use crate::nasolver::{ConvHelper, NodalSolver, SaveOpts, Stage};

/// DC analysis parameters with the documented defaults.
#[derive(Debug, Clone)]
pub struct DcParams {
    pub max_iter: usize,
    pub abstol: f64,
    pub vntol: f64,
    pub reltol: f64,
    pub save_ops: bool,
    pub save_all: bool,
    pub conv_helper: ConvHelper,
    pub solver: Algorithm,
    /// Ambient temperature in degrees Celsius.
    pub temp: f64,
}

impl Default for DcParams {
    fn default() -> Self {
        Self {
            max_iter: 150,
            abstol: 1e-12,
            vntol: 1e-6,
            reltol: 1e-3,
            save_ops: false,
            save_all: false,
            conv_helper: ConvHelper::None,
            solver: Algorithm::CroutLu,
            temp: DEFAULT_TEMP,
        }
    }
}

/// Calculation stage running every device's `calc_dc`.
pub struct DcStage;

impl Stage for DcStage {
    fn calculate(&mut self, circuit: &mut Circuit, ctx: &CalcCtx) {
        for device in circuit.devices_mut() {
            device.calc_dc(ctx);
        }
    }
}

/// Fallback order of the convergence helpers; the user's preferred helper
/// is skipped at its position and never retried.
pub fn fallback_chain(preferred: ConvHelper) -> Vec<ConvHelper> {
    const HELPERS: [ConvHelper; 5] = [
        ConvHelper::SourceStepping,
        ConvHelper::GMinStepping,
        ConvHelper::SteepestDescent,
        ConvHelper::LineSearch,
        ConvHelper::Attenuation,
    ];
    HELPERS
        .into_iter()
        .filter(|&h| h != preferred)
        .collect()
}

/// The DC analysis.
#[derive(Debug, Clone, Default)]
pub struct DcAnalysis {
    pub params: DcParams,
}

impl DcAnalysis {
    pub fn new(params: DcParams) -> Self {
        Self { params }
    }

    /// Solves the operating point and saves `V`/`I` result variables.
    pub fn solve(&self, circuit: &mut Circuit, dataset: &mut Dataset) -> Result<()> {
        let mut solver = self.solver(circuit)?;
        self.run(circuit, &mut solver, dataset)
    }

    /// Builds a configured nodal solver for this circuit. Exposed so the
    /// transient analysis and tests can drive the same setup.
    pub fn solver(&self, circuit: &mut Circuit) -> Result<NodalSolver<f64>> {
        for device in circuit.devices_mut() {
            device.init_dc();
        }
        let mut solver = NodalSolver::new("DC", circuit, self.params.solver)?;
        solver.max_iter = self.params.max_iter;
        solver.reltol = self.params.reltol;
        solver.abstol = self.params.abstol;
        solver.vntol = self.params.vntol;
        solver.temp = self.params.temp;
        solver.conv_helper = self.params.conv_helper;
        Ok(solver)
    }

    fn run(
        &self,
        circuit: &mut Circuit,
        solver: &mut NodalSolver<f64>,
        dataset: &mut Dataset,
    ) -> Result<()> {
        let mut stage = DcStage;

        let result = if !circuit.is_nonlinear() {
            solver.conv_helper = ConvHelper::None;
            solver.solve_linear(circuit, &mut stage)
        } else {
            self.solve_with_fallbacks(circuit, solver, &mut stage)
        };

        if let Err(err) = result {
            solver.estack.print();
            return Err(err);
        }

        // save operating points of the nonlinear devices
        for device in circuit.devices_mut() {
            if device.data().nonlinear {
                device.save_operating_points();
            }
        }
        solver.save_results(
            circuit,
            "V",
            "I",
            SaveOpts {
                ops: self.params.save_ops,
                all: self.params.save_all,
            },
            dataset,
            None,
        );
        Ok(())
    }

    /// Nonlinear solve with the automatic helper fallback chain.
    fn solve_with_fallbacks(
        &self,
        circuit: &mut Circuit,
        solver: &mut NodalSolver<f64>,
        stage: &mut DcStage,
    ) -> Result<()> {
        let chain = fallback_chain(self.params.conv_helper);
        let mut next_fallback = chain.into_iter();

        loop {
            solver.apply_nodeset(circuit, true);
            match solver.solve_nonlinear(circuit, stage) {
                Ok(()) => {
                    log::debug!(
                        "DC: convergence reached after {} iterations",
                        solver.iterations
                    );
                    return Ok(());
                }
                Err(err) => {
                    let retryable = solver
                        .estack
                        .top()
                        .is_some_and(|r| r.kind == ReportKind::NoConvergence);
                    if !retryable {
                        return Err(err);
                    }
                    solver.estack.pop();
                    match next_fallback.next() {
                        Some(helper) => {
                            log::warn!(
                                "DC analysis failed, using fallback ({})",
                                helper.description()
                            );
                            solver.conv_helper = helper;
                            solver.restart_nonlinear(circuit);
                        }
                        None => return Err(Error::NoConvergence(solver.iterations)),
                    }
                }
            }
        }
    }
}

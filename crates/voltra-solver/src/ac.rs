//! AC small-signal and AC-noise analysis.
//!
//! The frequency sweep reuses the MNA assembler and LU machinery over the
//! complex field; no Newton-Raphson iteration is involved. Noise voltages
//! come from the adjoint transimpedance system: the transposed Jacobian is
//! factored once per frequency and substituted for every node and branch
//! row.

use nalgebra::DVector;
use num_complex::Complex64;
use voltra_core::circuit::Circuit;
use voltra_core::constants::{K_B, T0};
use voltra_core::dataset::Dataset;
use voltra_core::device::CalcCtx;
use voltra_core::error::{Error, Result};
use voltra_core::sweep::{Sweep, SweepSpec};

use crate::eqn::{Algorithm, EquationSystem};
use crate::nasolver::{NodalSolver, SaveOpts, Stage};

/// AC analysis parameters.
#[derive(Debug, Clone)]
pub struct AcParams {
    /// Frequency sweep (Hz).
    pub sweep: SweepSpec,
    /// Compute noise voltages per sweep point.
    pub noise: bool,
}

impl Default for AcParams {
    fn default() -> Self {
        Self {
            sweep: SweepSpec::Logarithmic {
                start: 1e9,
                stop: 10e9,
                points: 10,
            },
            noise: false,
        }
    }
}

/// Calculation stage running every device's small-signal hooks.
struct AcStage {
    freq: f64,
    noise: bool,
}

impl Stage for AcStage {
    fn calculate(&mut self, circuit: &mut Circuit, _ctx: &CalcCtx) {
        for device in circuit.devices_mut() {
            device.calc_ac(self.freq);
            if self.noise {
                device.calc_noise_ac(self.freq);
            }
        }
    }
}

/// The AC analysis.
#[derive(Debug, Clone, Default)]
pub struct AcAnalysis {
    pub params: AcParams,
}

impl AcAnalysis {
    pub fn new(params: AcParams) -> Self {
        Self { params }
    }

    /// Sweeps the frequency axis, saving `v`/`i` (and `vn`/`in` when noise
    /// is enabled) keyed by `acfrequency`. Failed sweep points are left
    /// out of the dataset; the first failure is returned at the end.
    pub fn solve(&self, circuit: &mut Circuit, dataset: &mut Dataset) -> Result<()> {
        let noise = self.params.noise;

        // operating points of nonlinear devices feed the linearization
        for device in circuit.devices_mut() {
            if device.data().nonlinear {
                device.calc_operating_points();
            }
            device.init_ac();
            if noise {
                device.init_noise_ac();
            }
        }

        let mut na: NodalSolver<Complex64> =
            NodalSolver::new("AC", circuit, Algorithm::CroutLu)?;
        let size = na.node_count() + na.vsource_count();
        let mut xn: DVector<f64> = DVector::zeros(size);
        let sweep = Sweep::from_spec("acfrequency", &self.params.sweep);

        let mut first_failure: Option<Error> = None;
        for i in 0..sweep.len() {
            let freq = sweep.get(i);
            let mut stage = AcStage { freq, noise };

            let mut point = na.solve_linear(circuit, &mut stage);
            if point.is_ok() && noise {
                point = self.solve_noise(&mut na, circuit, &mut xn);
            }
            if let Err(err) = point {
                log::warn!("AC analysis failed at f = {freq:.6e}: {err}");
                na.estack.print();
                first_failure.get_or_insert(err);
                continue;
            }

            dataset.add_dependency_point("acfrequency", freq);
            na.save_results(
                circuit,
                "v",
                "i",
                SaveOpts::default(),
                dataset,
                Some("acfrequency"),
            );
            if noise {
                self.save_noise_results(&mut na, circuit, &xn, dataset);
            }
        }

        match first_failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Computes the noise voltage at every node and branch row into `xn`.
    ///
    /// Factors the transposed MNA matrix once; each row's transimpedance
    /// vector is one substitution with the negated unit vector, and the
    /// noise voltage is the quadratic form with the correlation matrix.
    fn solve_noise(
        &self,
        na: &mut NodalSolver<Complex64>,
        circuit: &mut Circuit,
        xn: &mut DVector<f64>,
    ) -> Result<()> {
        let size = xn.len();
        let x_save = na.solution().clone();

        na.create_noise_matrix(circuit);

        // rebuild the MNA matrix and factor its transpose once
        na.update_matrix = true;
        na.create_matrix(circuit);
        let adjoint = na.matrix().transpose();
        let mut eqns: EquationSystem<Complex64> = EquationSystem::new(Algorithm::CroutLu);
        eqns.factorize(&adjoint)?;

        let cy = na
            .noise_matrix()
            .expect("noise matrix was just created")
            .clone();

        for i in 0..size {
            let mut z: DVector<Complex64> = DVector::zeros(size);
            z[i] = -Complex64::ONE;
            let zn = eqns.substitute(&z)?;

            let mut acc = Complex64::ZERO;
            for r in 0..size {
                for c in 0..size {
                    acc += zn[r] * cy[(r, c)] * zn[c].conj();
                }
            }
            xn[i] = acc.re.max(0.0).sqrt();
        }

        na.solution_mut().copy_from(&x_save);
        Ok(())
    }

    /// Renormalizes the noise voltages by `sqrt(kB T0)`, feeds probe
    /// operating points and saves the `vn`/`in` variables.
    fn save_noise_results(
        &self,
        na: &mut NodalSolver<Complex64>,
        circuit: &mut Circuit,
        xn: &DVector<f64>,
        dataset: &mut Dataset,
    ) {
        let scale = (K_B * T0).sqrt();
        for r in 0..xn.len() {
            na.solution_mut()[r] = Complex64::new((xn[r] * scale).abs(), 0.0);
        }

        // probes report the differential RMS noise voltage
        for di in 0..circuit.len() {
            if !circuit.device(di).data().probe {
                continue;
            }
            let value_at = |node: &str| -> f64 {
                match na.nodes().index_of(node) {
                    Some(idx) if idx > 0 => xn[idx - 1],
                    _ => 0.0,
                }
            };
            let ports = circuit.device(di).data().ports();
            let vp = value_at(&ports[0].node);
            let vn = value_at(&ports[1].node);
            let data = circuit.device_mut(di).data_mut();
            data.set_operating_point("Vr", ((vp - vn) * scale).abs());
            data.set_operating_point("Vi", 0.0);
        }

        na.save_results(
            circuit,
            "vn",
            "in",
            SaveOpts::default(),
            dataset,
            Some("acfrequency"),
        );
    }
}

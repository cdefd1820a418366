//! Voltage probe: a passive observer whose operating point carries the
//! measured quantity.

use voltra_core::device::{Device, DeviceData, Port};

/// Differential voltage probe. Contributes nothing to the MNA system; the
/// solvers populate its `Vr`/`Vi` operating points.
pub struct VProbe {
    data: DeviceData,
}

impl VProbe {
    pub fn new(name: &str, pos: &str, neg: &str) -> Self {
        let mut data = DeviceData::new(name, vec![Port::external(pos), Port::external(neg)], 0);
        data.probe = true;
        Self { data }
    }
}

impl Device for VProbe {
    fn data(&self) -> &DeviceData {
        &self.data
    }

    fn data_mut(&mut self) -> &mut DeviceData {
        &mut self.data
    }

    fn save_operating_points(&mut self) {
        let v = self.data.get_v(0) - self.data.get_v(1);
        self.data.set_operating_point("Vr", v.re);
        self.data.set_operating_point("Vi", v.im);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_complex::Complex64;

    #[test]
    fn probe_reports_the_differential_voltage() {
        let mut p = VProbe::new("Pr1", "a", "b");
        p.data_mut().set_v(0, Complex64::new(1.5, 0.25));
        p.data_mut().set_v(1, Complex64::new(0.5, 0.0));
        p.save_operating_points();
        assert_eq!(p.data().operating_point("Vr"), 1.0);
        assert_eq!(p.data().operating_point("Vi"), 0.25);
    }
}

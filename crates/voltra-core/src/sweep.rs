//! Sweep value generation for analyses.

/// Declarative sweep description from the analysis configuration.
#[derive(Debug, Clone)]
pub enum SweepSpec {
    /// Evenly spaced points over `[start, stop]`.
    Linear { start: f64, stop: f64, points: usize },
    /// Points evenly spaced in log space over `[start, stop]`.
    Logarithmic { start: f64, stop: f64, points: usize },
    /// Explicit list of values, produced in the given order.
    List { values: Vec<f64> },
    /// A single constant value.
    Constant { value: f64 },
}

/// Materialized sweep: a named, ordered list of values.
#[derive(Debug, Clone)]
pub struct Sweep {
    name: String,
    values: Vec<f64>,
}

impl Sweep {
    pub fn linear(name: impl Into<String>, start: f64, stop: f64, points: usize) -> Self {
        let points = points.max(2);
        let step = (stop - start) / (points - 1) as f64;
        let values = (0..points).map(|i| start + step * i as f64).collect();
        Self {
            name: name.into(),
            values,
        }
    }

    pub fn logarithmic(name: impl Into<String>, start: f64, stop: f64, points: usize) -> Self {
        let points = points.max(2);
        let ratio = (stop / start).powf(1.0 / (points - 1) as f64);
        let mut value = start;
        let values = (0..points)
            .map(|_| {
                let v = value;
                value *= ratio;
                v
            })
            .collect();
        Self {
            name: name.into(),
            values,
        }
    }

    pub fn list(name: impl Into<String>, values: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    pub fn constant(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            values: vec![value],
        }
    }

    /// Materializes a [`SweepSpec`] under the given dependency name.
    pub fn from_spec(name: impl Into<String>, spec: &SweepSpec) -> Self {
        match spec {
            SweepSpec::Linear {
                start,
                stop,
                points,
            } => Self::linear(name, *start, *stop, *points),
            SweepSpec::Logarithmic {
                start,
                stop,
                points,
            } => Self::logarithmic(name, *start, *stop, *points),
            SweepSpec::List { values } => Self::list(name, values.clone()),
            SweepSpec::Constant { value } => Self::constant(name, *value),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, i: usize) -> f64 {
        self.values[i]
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_endpoints() {
        let sweep = Sweep::linear("time", 0.0, 1.0, 5);
        assert_eq!(sweep.len(), 5);
        assert_eq!(sweep.get(0), 0.0);
        assert_eq!(sweep.get(4), 1.0);
        assert!((sweep.get(1) - 0.25).abs() < 1e-15);
    }

    #[test]
    fn logarithmic_ascending_in_log_space() {
        let sweep = Sweep::logarithmic("acfrequency", 1.0, 100.0, 3);
        assert!((sweep.get(0) - 1.0).abs() < 1e-12);
        assert!((sweep.get(1) - 10.0).abs() < 1e-9);
        assert!((sweep.get(2) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn list_preserves_order() {
        let sweep = Sweep::list("x", vec![3.0, 1.0, 2.0]);
        assert_eq!(sweep.values(), &[3.0, 1.0, 2.0]);
    }
}

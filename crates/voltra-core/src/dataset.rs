//! In-memory result dataset: labelled vectors with sweep dependencies.

use num_complex::Complex64;

/// A labelled result vector. Swept variables declare the dependency vector
/// they are indexed by (e.g. `time`, `acfrequency`).
#[derive(Debug, Clone)]
pub struct DataVector {
    pub name: String,
    pub dependency: Option<String>,
    pub values: Vec<Complex64>,
}

impl DataVector {
    pub fn new(name: impl Into<String>, dependency: Option<String>) -> Self {
        Self {
            name: name.into(),
            dependency,
            values: Vec::new(),
        }
    }

    pub fn push(&mut self, value: Complex64) {
        self.values.push(value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Real part of the value at `i`; result vectors of real analyses
    /// carry a zero imaginary part.
    pub fn re(&self, i: usize) -> f64 {
        self.values[i].re
    }

    /// Magnitude of the value at `i`.
    pub fn mag(&self, i: usize) -> f64 {
        self.values[i].norm()
    }
}

/// Collection of result vectors produced by one or more analyses.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    variables: Vec<DataVector>,
    dependencies: Vec<DataVector>,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a point to a dependency vector, creating it on first use.
    pub fn add_dependency_point(&mut self, name: &str, value: f64) {
        let dep = match self.dependencies.iter_mut().find(|d| d.name == name) {
            Some(dep) => dep,
            None => {
                self.dependencies.push(DataVector::new(name, None));
                self.dependencies.last_mut().expect("just pushed")
            }
        };
        dep.push(Complex64::new(value, 0.0));
    }

    /// Appends a point to a variable, creating it on first use.
    pub fn save_variable(&mut self, name: &str, value: Complex64, dependency: Option<&str>) {
        let var = match self.variables.iter_mut().find(|v| v.name == name) {
            Some(var) => var,
            None => {
                self.variables
                    .push(DataVector::new(name, dependency.map(str::to_string)));
                self.variables.last_mut().expect("just pushed")
            }
        };
        var.push(value);
    }

    pub fn variable(&self, name: &str) -> Option<&DataVector> {
        self.variables.iter().find(|v| v.name == name)
    }

    pub fn dependency(&self, name: &str) -> Option<&DataVector> {
        self.dependencies.iter().find(|d| d.name == name)
    }

    pub fn variables(&self) -> &[DataVector] {
        &self.variables
    }

    pub fn dependencies(&self) -> &[DataVector] {
        &self.dependencies
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variables_accumulate_per_sweep_point() {
        let mut ds = Dataset::new();
        ds.add_dependency_point("time", 0.0);
        ds.save_variable("out.Vt", Complex64::new(0.0, 0.0), Some("time"));
        ds.add_dependency_point("time", 1e-6);
        ds.save_variable("out.Vt", Complex64::new(0.5, 0.0), Some("time"));

        let v = ds.variable("out.Vt").unwrap();
        assert_eq!(v.len(), 2);
        assert_eq!(v.dependency.as_deref(), Some("time"));
        assert_eq!(ds.dependency("time").unwrap().len(), 2);
    }
}

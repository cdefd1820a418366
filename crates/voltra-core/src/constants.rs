//! Physical constants used by device models and the noise solver.

/// Boltzmann constant (J/K).
pub const K_B: f64 = 1.380650524e-23;

/// Elementary charge (C).
pub const Q_E: f64 = 1.6021765314e-19;

/// Standard noise reference temperature (K).
pub const T0: f64 = 290.0;

/// Absolute zero in degrees Celsius.
pub const ZERO_CELSIUS: f64 = -273.15;

/// Default device temperature (°C); corresponds to 300 K.
pub const DEFAULT_TEMP: f64 = 26.85;

/// Converts a temperature in degrees Celsius to Kelvin.
#[inline]
pub fn kelvin(celsius: f64) -> f64 {
    celsius - ZERO_CELSIUS
}

/// Thermal voltage kT/q at the given temperature in Kelvin.
#[inline]
pub fn thermal_voltage(t: f64) -> f64 {
    K_B * t / Q_E
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kelvin_conversion() {
        assert!((kelvin(26.85) - 300.0).abs() < 1e-12);
        assert!((kelvin(0.0) - 273.15).abs() < 1e-12);
    }

    #[test]
    fn thermal_voltage_at_room_temperature() {
        // kT/q at 300 K is about 25.85 mV
        let vt = thermal_voltage(300.0);
        assert!((vt - 0.02585).abs() < 1e-4, "vt = {vt}");
    }
}

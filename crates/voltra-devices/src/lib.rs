//! Device models for Voltra.
//!
//! This crate provides the device library the solver core is exercised
//! with:
//! - Passive elements: R, C, L
//! - Independent sources: DC, AC (damped sine) and pulse
//! - Controlled source: VCVS with optional time delay
//! - Nonlinear device: pn-junction diode with voltage limiting
//! - Voltage probe

pub mod controlled;
pub mod diode;
pub mod junction;
pub mod passive;
pub mod probe;
pub mod sources;

pub use controlled::Vcvs;
pub use diode::Diode;
pub use passive::{Capacitor, Inductor, Resistor};
pub use probe::VProbe;
pub use sources::{Iac, Idc, Vac, Vdc, Vpulse};

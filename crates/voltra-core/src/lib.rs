//! Core circuit representation for Voltra.
//!
//! This crate provides the pieces every analysis builds on:
//! - The circuit graph: devices, ports, nodesets
//! - The device stamp contract ([`Device`], [`Stamps`])
//! - Node and voltage-source row assignment ([`NodeList`])
//! - Save-state rings and device history for transient analysis
//! - Companion-model integration ([`Integrator`])
//! - Sweeps, result datasets and the error-report stack

pub mod circuit;
pub mod constants;
pub mod dataset;
pub mod device;
pub mod error;
pub mod history;
pub mod integrator;
pub mod nodelist;
pub mod report;
pub mod states;
pub mod stamp;
pub mod sweep;

pub use circuit::{internal_node_name, Circuit, Nodeset};
pub use dataset::{DataVector, Dataset};
pub use device::{CalcCtx, Device, DeviceData, Port};
pub use error::{Error, Result};
pub use history::DeviceHistory;
pub use integrator::{Integrator, Method, Mode};
pub use nodelist::{NodeEntry, NodeList};
pub use report::{ErrorStack, Report, ReportKind};
pub use states::StateRing;
pub use stamp::Stamps;
pub use sweep::{Sweep, SweepSpec};

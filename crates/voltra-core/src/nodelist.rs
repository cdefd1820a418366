//! Node table and voltage-source row assignment.
//!
//! Built once per analysis run from the device list. Node names are
//! collected in insertion order; `gnd` is the reference node with index 0
//! and every other node gets a unique index in `1..=N`. Voltage-source
//! rows are handed out as contiguous blocks in device order.

use indexmap::IndexMap;

use crate::circuit::Circuit;
use crate::error::{Error, Result};

/// Reserved name of the reference node.
pub const GROUND: &str = "gnd";

/// One unique node with its attached device ports.
#[derive(Debug, Clone)]
pub struct NodeEntry {
    pub name: String,
    pub index: usize,
    pub internal: bool,
    /// `(device index, port index)` pairs attached to this node.
    pub connections: Vec<(usize, usize)>,
}

/// The node table for one analysis run.
#[derive(Debug, Clone)]
pub struct NodeList {
    /// Entries ordered by index; entry 0 is the reference node.
    entries: Vec<NodeEntry>,
}

impl NodeList {
    /// Builds the node table from the circuit's device ports.
    ///
    /// Fails when no device references the `gnd` node; the surrounding
    /// netlist layer is responsible for inserting a synthetic ground
    /// before the core is called.
    pub fn build(circuit: &Circuit) -> Result<Self> {
        let mut by_name: IndexMap<String, NodeEntry> = IndexMap::new();

        for (di, device) in circuit.devices().enumerate() {
            for (pi, port) in device.data().ports().iter().enumerate() {
                let entry = by_name
                    .entry(port.node.clone())
                    .or_insert_with(|| NodeEntry {
                        name: port.node.clone(),
                        index: 0,
                        internal: false,
                        connections: Vec::new(),
                    });
                entry.internal |= port.internal;
                entry.connections.push((di, pi));
            }
        }

        if !by_name.contains_key(GROUND) {
            return Err(Error::GroundMissing);
        }

        // enumerate: ground first, then the others in insertion order
        let mut entries = Vec::with_capacity(by_name.len());
        let ground = by_name.shift_remove(GROUND).expect("checked above");
        entries.push(NodeEntry { index: 0, ..ground });
        for (i, (_, entry)) in by_name.into_iter().enumerate() {
            entries.push(NodeEntry {
                index: i + 1,
                ..entry
            });
        }

        Ok(Self { entries })
    }

    /// Number of non-reference nodes N.
    pub fn count(&self) -> usize {
        self.entries.len() - 1
    }

    /// Entry for MNA row `r` in `0..N` (excludes ground).
    pub fn node(&self, r: usize) -> &NodeEntry {
        &self.entries[r + 1]
    }

    /// The reference node entry.
    pub fn ground(&self) -> &NodeEntry {
        &self.entries[0]
    }

    /// Node index for a name; 0 is ground, `None` if unknown.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.entries.iter().find(|e| e.name == name).map(|e| e.index)
    }

    /// True if MNA row `r` belongs to an internal node.
    pub fn is_internal(&self, r: usize) -> bool {
        self.entries[r + 1].internal
    }
}

/// Assigns each device with voltage-source rows a contiguous block of
/// global row indices and returns the total count M.
pub fn assign_voltage_sources(circuit: &mut Circuit) -> usize {
    let mut next = 0;
    for device in circuit.devices_mut() {
        let data = device.data_mut();
        if data.vsource_count() > 0 {
            data.vsource_base = next;
            next += data.vsource_count();
        }
    }
    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{Device, DeviceData, Port};

    struct Stub {
        data: DeviceData,
    }

    impl Device for Stub {
        fn data(&self) -> &DeviceData {
            &self.data
        }
        fn data_mut(&mut self) -> &mut DeviceData {
            &mut self.data
        }
    }

    fn stub(name: &str, nodes: &[&str], vsources: usize) -> Stub {
        Stub {
            data: DeviceData::new(
                name,
                nodes.iter().map(|n| Port::external(*n)).collect(),
                vsources,
            ),
        }
    }

    #[test]
    fn ground_gets_index_zero() {
        let circuit = Circuit::new()
            .with(stub("R1", &["in", "out"], 0))
            .with(stub("R2", &["out", "gnd"], 0));
        let nodes = NodeList::build(&circuit).unwrap();
        assert_eq!(nodes.count(), 2);
        assert_eq!(nodes.index_of("gnd"), Some(0));
        assert_eq!(nodes.index_of("in"), Some(1));
        assert_eq!(nodes.index_of("out"), Some(2));
    }

    #[test]
    fn missing_ground_is_an_error() {
        let circuit = Circuit::new().with(stub("R1", &["a", "b"], 0));
        assert!(matches!(
            NodeList::build(&circuit),
            Err(Error::GroundMissing)
        ));
    }

    #[test]
    fn connections_record_device_and_port() {
        let circuit = Circuit::new()
            .with(stub("R1", &["out", "gnd"], 0))
            .with(stub("C1", &["out", "gnd"], 0));
        let nodes = NodeList::build(&circuit).unwrap();
        let out = nodes.node(nodes.index_of("out").unwrap() - 1);
        assert_eq!(out.connections, vec![(0, 0), (1, 0)]);
    }

    #[test]
    fn vsource_blocks_are_contiguous() {
        let mut circuit = Circuit::new()
            .with(stub("V1", &["in", "gnd"], 1))
            .with(stub("R1", &["in", "out"], 0))
            .with(stub("X1", &["out", "gnd"], 2));
        let total = assign_voltage_sources(&mut circuit);
        assert_eq!(total, 3);
        assert_eq!(circuit.device(0).data().vsource_base, 0);
        assert_eq!(circuit.device(2).data().vsource_base, 1);
    }
}

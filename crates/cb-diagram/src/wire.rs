//! Wire records.
//!
//! A wire only remembers which two ports it joins, for the editor and for
//! persistence. The dataflow link itself is held by the ports.

use cb_core::{PortId, WireId};

/// Directed connection from an output port to an input port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Wire {
    pub id: WireId,
    pub from: PortId,
    pub to: PortId,
}

impl Wire {
    pub fn new(id: WireId, from: PortId, to: PortId) -> Self {
        Self { id, from, to }
    }

    /// Whether the wire ends on `port` at either side.
    pub fn touches(&self, port: PortId) -> bool {
        self.from == port || self.to == port
    }
}

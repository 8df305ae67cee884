//! Ports and the port arena.
//!
//! A port is a directional endpoint on a block. Connections between ports
//! are stored as plain [`PortId`] handles on both sides, so removing a port
//! from the [`PortTable`] never leaves an owning cycle behind. Handles that
//! no longer resolve are pruned lazily during [`PortTable::broadcast`].

use std::collections::HashMap;

use cb_core::{BlockId, PortId};
use nalgebra::DVector;
use tracing::trace;

use crate::error::{DiagramError, DiagramResult};

/// Value carried on a port: a numeric vector whose length is decided at run time.
pub type Signal = DVector<f64>;

/// Direction of a port. Fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortDirection {
    Input,
    Output,
}

impl PortDirection {
    /// Integer code used by the document format.
    pub fn code(self) -> u8 {
        match self {
            PortDirection::Input => 0,
            PortDirection::Output => 1,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(PortDirection::Input),
            1 => Some(PortDirection::Output),
            _ => None,
        }
    }
}

/// A named, directional endpoint owned by a block.
#[derive(Debug, Clone)]
pub struct Port {
    id: PortId,
    name: String,
    direction: PortDirection,
    parent: BlockId,
    value: Signal,
    ready: bool,
    optional: bool,
    /// Single upstream link (inputs only).
    upstream: Option<PortId>,
    /// Downstream links (outputs only). Duplicates are kept.
    downstream: Vec<PortId>,
}

impl Port {
    /// Create an unconnected port. Output ports are never optional.
    pub fn new(
        id: PortId,
        name: impl Into<String>,
        direction: PortDirection,
        parent: BlockId,
        optional: bool,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            direction,
            parent,
            value: Signal::zeros(0),
            ready: false,
            optional: optional && direction == PortDirection::Input,
            upstream: None,
            downstream: Vec::new(),
        }
    }

    pub fn id(&self) -> PortId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn direction(&self) -> PortDirection {
        self.direction
    }

    pub fn parent(&self) -> BlockId {
        self.parent
    }

    pub fn is_optional(&self) -> bool {
        self.optional
    }

    pub fn upstream(&self) -> Option<PortId> {
        self.upstream
    }

    pub fn downstream(&self) -> &[PortId] {
        &self.downstream
    }

    /// Record a link to `other`.
    ///
    /// An input accepts a single upstream link; a second one is refused
    /// without touching the existing link. Outputs append.
    pub fn add_connection(&mut self, other: PortId) -> DiagramResult<()> {
        match self.direction {
            PortDirection::Input => {
                if let Some(existing) = self.upstream {
                    return Err(DiagramError::InvalidConnection {
                        what: format!(
                            "input port {} is already connected to port {}",
                            self.id, existing
                        ),
                    });
                }
                self.upstream = Some(other);
            }
            PortDirection::Output => self.downstream.push(other),
        }
        Ok(())
    }

    /// Drop the link to `other`. Returns whether a link was removed.
    ///
    /// An input that loses its upstream also drops the value it buffered,
    /// so it falls back to the empty default of an unconnected port.
    pub fn remove_connection(&mut self, other: PortId) -> bool {
        match self.direction {
            PortDirection::Input => {
                if self.upstream == Some(other) {
                    self.upstream = None;
                    self.reset_value();
                    true
                } else {
                    false
                }
            }
            PortDirection::Output => match self.downstream.iter().position(|p| *p == other) {
                Some(pos) => {
                    self.downstream.remove(pos);
                    true
                }
                None => false,
            },
        }
    }

    /// True iff this is an input with an upstream link.
    pub fn connected_input(&self) -> bool {
        self.direction == PortDirection::Input && self.upstream.is_some()
    }

    pub fn is_connected(&self) -> bool {
        self.upstream.is_some() || !self.downstream.is_empty()
    }

    /// Freshness flag: set by [`Port::receive`], cleared by [`Port::get_value`].
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Whether this port lets its block run: fresh, or optional and unconnected.
    pub fn is_satisfied(&self) -> bool {
        self.ready || (self.optional && self.upstream.is_none())
    }

    /// Consume the buffered value. The port goes stale until the next receive.
    pub fn get_value(&mut self) -> Signal {
        self.ready = false;
        self.value.clone()
    }

    /// Read the buffered value without consuming it.
    pub fn peek_value(&self) -> &Signal {
        &self.value
    }

    /// Store a value for the next broadcast. Outputs only.
    pub fn set_value(&mut self, value: Signal) -> DiagramResult<()> {
        if self.direction != PortDirection::Output {
            return Err(DiagramError::InvalidArg {
                what: format!("cannot set the value of input port {}", self.id),
            });
        }
        self.value = value;
        Ok(())
    }

    /// Accept a value pushed by `caller`.
    ///
    /// Only the recorded upstream port may feed an input; anything else is
    /// ignored and `false` is returned.
    pub fn receive(&mut self, value: &Signal, caller: PortId) -> bool {
        if self.direction != PortDirection::Input || self.upstream != Some(caller) {
            return false;
        }
        self.value.clone_from(value);
        self.ready = true;
        true
    }

    /// Drop the buffered value and freshness.
    pub(crate) fn reset_value(&mut self) {
        self.value = Signal::zeros(0);
        self.ready = false;
    }
}

impl PartialEq for Port {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.name == other.name
            && self.direction == other.direction
            && self.upstream == other.upstream
            && self.downstream == other.downstream
    }
}

/// Arena of every live port in a diagram, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct PortTable {
    ports: HashMap<PortId, Port>,
}

impl PortTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, port: Port) {
        self.ports.insert(port.id(), port);
    }

    pub fn remove(&mut self, id: PortId) -> Option<Port> {
        self.ports.remove(&id)
    }

    pub fn get(&self, id: PortId) -> Option<&Port> {
        self.ports.get(&id)
    }

    pub fn get_mut(&mut self, id: PortId) -> Option<&mut Port> {
        self.ports.get_mut(&id)
    }

    pub fn contains(&self, id: PortId) -> bool {
        self.ports.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Port> {
        self.ports.values()
    }

    pub fn clear(&mut self) {
        self.ports.clear();
    }

    /// Push an output's buffered value to every downstream input.
    ///
    /// Downstream handles that no longer resolve are pruned. Returns the
    /// number of inputs that accepted the value.
    pub fn broadcast(&mut self, from: PortId) -> usize {
        let (value, targets) = match self.ports.get(&from) {
            Some(port) if port.direction == PortDirection::Output => {
                (port.value.clone(), port.downstream.clone())
            }
            _ => return 0,
        };

        let mut delivered = 0;
        let mut dead = Vec::new();
        for target in targets {
            match self.ports.get_mut(&target) {
                Some(port) => {
                    if port.receive(&value, from) {
                        delivered += 1;
                    }
                }
                None => dead.push(target),
            }
        }

        if !dead.is_empty() {
            trace!(port = %from, pruned = dead.len(), "pruning dead downstream links");
            if let Some(port) = self.ports.get_mut(&from) {
                port.downstream.retain(|id| !dead.contains(id));
            }
        }
        delivered
    }

    /// Link `output` to `input` on both sides.
    ///
    /// Nothing is mutated unless both ports exist, the directions are right
    /// and the input is still free.
    pub(crate) fn link(&mut self, output: PortId, input: PortId) -> DiagramResult<()> {
        let out_ok = matches!(self.get(output), Some(p) if p.direction == PortDirection::Output);
        let in_port = self.get(input).ok_or_else(|| DiagramError::NotFound {
            what: format!("port {input}"),
        })?;
        if !out_ok || in_port.direction != PortDirection::Input {
            return Err(DiagramError::InvalidConnection {
                what: format!("port {output} -> port {input} is not an output -> input pair"),
            });
        }
        if let Some(existing) = in_port.upstream {
            return Err(DiagramError::InvalidConnection {
                what: format!("input port {input} is already connected to port {existing}"),
            });
        }

        if let Some(port) = self.get_mut(input) {
            port.add_connection(output)?;
        }
        if let Some(port) = self.get_mut(output) {
            port.add_connection(input)?;
        }
        Ok(())
    }

    /// Remove the link between two ports, whichever side each is on.
    pub(crate) fn unlink(&mut self, a: PortId, b: PortId) {
        if let Some(port) = self.get_mut(a) {
            port.remove_connection(b);
        }
        if let Some(port) = self.get_mut(b) {
            port.remove_connection(a);
        }
    }

    /// Sever every link of `id`, clearing the reverse references too.
    pub(crate) fn detach(&mut self, id: PortId) {
        let peers: Vec<PortId> = match self.get(id) {
            Some(port) => port.upstream.iter().chain(port.downstream.iter()).copied().collect(),
            None => return,
        };
        for peer in peers {
            if let Some(port) = self.get_mut(peer) {
                while port.remove_connection(id) {}
            }
        }
        if let Some(port) = self.get_mut(id) {
            if port.upstream.take().is_some() {
                port.reset_value();
            }
            port.downstream.clear();
        }
    }

    /// Mark every port stale and empty.
    pub(crate) fn reset_values(&mut self) {
        for port in self.ports.values_mut() {
            port.reset_value();
        }
    }
}

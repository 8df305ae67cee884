//! Diagram: owner of every block, port and wire.
//!
//! The diagram is responsible for:
//! - Handing out identifiers from its [`IdAllocator`]
//! - Creating and removing blocks and their ports
//! - Validating and recording wires
//! - Driving the simulation (see `sim.rs`) and persistence (see `persist.rs`)

use std::collections::BTreeSet;

use cb_core::{BlockId, IdAllocator, IdPolicy, PortId, WireId, ensure_finite};
use tracing::{debug, warn};

use crate::block::{Block, BlockKind, Position, StateSpaceParams};
use crate::error::{DiagramError, DiagramResult};
use crate::port::{Port, PortDirection, PortTable, Signal};
use crate::registry::BlockRegistry;
use crate::sim::{PassReport, SimClock, SimOptions, SimState};
use crate::wire::Wire;

/// Construction-time configuration of a diagram.
#[derive(Debug, Clone, Default)]
pub struct DiagramConfig {
    pub sim: SimOptions,
    pub ids: IdPolicy,
}

/// A block diagram document.
#[derive(Debug, Clone)]
pub struct Diagram {
    pub(crate) blocks: Vec<Block>,
    pub(crate) ports: PortTable,
    pub(crate) wires: Vec<Wire>,
    pub(crate) ids: IdAllocator,
    pub(crate) registry: BlockRegistry,
    pub(crate) options: SimOptions,
    pub(crate) clock: SimClock,
    pub(crate) state: SimState,
    pub(crate) last_pass: PassReport,
    pub(crate) reported_stalls: BTreeSet<BlockId>,
}

impl Diagram {
    /// Create an empty diagram with default configuration.
    pub fn new() -> Self {
        Self::with_config(DiagramConfig::default())
    }

    pub fn with_config(config: DiagramConfig) -> Self {
        Self {
            blocks: Vec::new(),
            ports: PortTable::new(),
            wires: Vec::new(),
            ids: IdAllocator::with_policy(config.ids),
            registry: BlockRegistry::default(),
            clock: SimClock::new(config.sim.dt),
            options: config.sim,
            state: SimState::Stopped,
            last_pass: PassReport::default(),
            reported_stalls: BTreeSet::new(),
        }
    }

    pub fn registry(&self) -> &BlockRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut BlockRegistry {
        &mut self.registry
    }

    pub fn id_allocator(&self) -> &IdAllocator {
        &self.ids
    }

    pub fn set_id_policy(&mut self, policy: IdPolicy) {
        self.ids.set_policy(policy);
    }

    /// Structural edits are refused while the simulation runs.
    pub(crate) fn ensure_editable(&self) -> DiagramResult<()> {
        if self.state == SimState::Running {
            return Err(DiagramError::InvalidState {
                what: "structural edits are not allowed while the simulation is running",
            });
        }
        Ok(())
    }

    // ---- queries -------------------------------------------------------

    /// All blocks in registration order.
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Blocks that carry integrated state, in registration order.
    pub fn dynamical_blocks(&self) -> impl Iterator<Item = &Block> {
        self.blocks.iter().filter(|b| b.is_dynamical_system())
    }

    pub fn block(&self, id: BlockId) -> Option<&Block> {
        self.blocks.iter().find(|b| b.id() == id)
    }

    pub fn block_by_name(&self, name: &str) -> Option<&Block> {
        self.blocks.iter().find(|b| b.name() == name)
    }

    pub(crate) fn block_index(&self, id: BlockId) -> DiagramResult<usize> {
        self.blocks
            .iter()
            .position(|b| b.id() == id)
            .ok_or_else(|| DiagramError::NotFound {
                what: format!("block {id}"),
            })
    }

    pub fn port(&self, id: PortId) -> Option<&Port> {
        self.ports.get(id)
    }

    pub fn ports(&self) -> &PortTable {
        &self.ports
    }

    pub fn wires(&self) -> &[Wire] {
        &self.wires
    }

    pub fn wire(&self, id: WireId) -> Option<&Wire> {
        self.wires.iter().find(|w| w.id == id)
    }

    /// Latest value captured by a display block.
    pub fn display_value(&self, id: BlockId) -> Option<&Signal> {
        match self.block(id)?.kind() {
            BlockKind::Display { value } => Some(value),
            _ => None,
        }
    }

    /// Current value buffered on the given output of a block.
    pub fn output_value(&self, id: BlockId, index: usize) -> DiagramResult<&Signal> {
        let block = self.block(id).ok_or_else(|| DiagramError::NotFound {
            what: format!("block {id}"),
        })?;
        let port = block.output_port_id(index)?;
        self.ports
            .get(port)
            .map(Port::peek_value)
            .ok_or_else(|| DiagramError::NotFound {
                what: format!("port {port}"),
            })
    }

    // ---- blocks --------------------------------------------------------

    /// Place a block of a registered type, with a fresh identifier.
    pub fn add_block(&mut self, tag: &str) -> DiagramResult<BlockId> {
        self.ensure_editable()?;
        let kind = self.registry.create(tag)?;
        let name = kind.default_name();
        self.insert_block(kind, name)
    }

    /// Place a block of the given kind, with a fresh identifier.
    pub fn add_block_kind(&mut self, kind: BlockKind) -> DiagramResult<BlockId> {
        self.ensure_editable()?;
        let name = kind.default_name();
        self.insert_block(kind, name)
    }

    fn insert_block(&mut self, kind: BlockKind, name: &str) -> DiagramResult<BlockId> {
        let layout = kind.layout();
        self.ids
            .ensure_available(1 + layout.inputs.len() + layout.outputs.len())?;
        let id = self.ids.allocate()?;

        let inputs = layout
            .inputs
            .into_iter()
            .map(|(port_name, optional)| {
                self.new_port(id, port_name, PortDirection::Input, optional)
            })
            .collect::<DiagramResult<Vec<PortId>>>()?;
        let outputs = layout
            .outputs
            .into_iter()
            .map(|port_name| self.new_port(id, port_name, PortDirection::Output, false))
            .collect::<DiagramResult<Vec<PortId>>>()?;

        let block = Block::new(id, name, kind, inputs, outputs);
        debug!(
            block = %id,
            kind = block.kind().tag(),
            inputs = block.num_input_ports(),
            outputs = block.num_output_ports(),
            "block created"
        );
        self.blocks.push(block);
        Ok(id)
    }

    pub(crate) fn new_port(
        &mut self,
        parent: BlockId,
        name: String,
        direction: PortDirection,
        optional: bool,
    ) -> DiagramResult<PortId> {
        let id = self.ids.allocate()?;
        self.ports
            .insert(Port::new(id, name, direction, parent, optional));
        Ok(id)
    }

    /// Remove a block, severing every connection of its ports first.
    pub fn remove_block(&mut self, id: BlockId) -> DiagramResult<()> {
        self.ensure_editable()?;
        let index = self.block_index(id)?;
        let port_ids: Vec<PortId> = self.blocks[index].port_ids().collect();
        for port in port_ids {
            self.drop_port(port);
        }
        let block = self.blocks.remove(index);
        self.ids.release(id);
        self.reported_stalls.remove(&id);
        debug!(block = %id, name = block.name(), "block removed");
        Ok(())
    }

    /// Disconnect a port everywhere, forget its wires and free its id.
    fn drop_port(&mut self, port: PortId) {
        let (gone, kept): (Vec<Wire>, Vec<Wire>) =
            self.wires.drain(..).partition(|w| w.touches(port));
        self.wires = kept;
        for wire in gone {
            self.ids.release(wire.id);
        }
        self.ports.detach(port);
        self.ports.remove(port);
        self.ids.release(port);
    }

    pub fn set_block_name(&mut self, id: BlockId, name: impl Into<String>) -> DiagramResult<()> {
        let index = self.block_index(id)?;
        self.blocks[index].set_name(name);
        Ok(())
    }

    pub fn set_block_position(&mut self, id: BlockId, position: Position) -> DiagramResult<()> {
        let index = self.block_index(id)?;
        self.blocks[index].set_position(position);
        Ok(())
    }

    fn kind_mut(&mut self, id: BlockId) -> DiagramResult<&mut BlockKind> {
        self.ensure_editable()?;
        let index = self.block_index(id)?;
        Ok(self.blocks[index].kind_mut())
    }

    pub fn set_constant_value(&mut self, id: BlockId, value: f64) -> DiagramResult<()> {
        let value = ensure_finite(value, "constant value")?;
        match self.kind_mut(id)? {
            BlockKind::Constant { value: v } => {
                *v = value;
                Ok(())
            }
            other => Err(wrong_kind(id, "ConstantBlock", other)),
        }
    }

    pub fn set_gain(&mut self, id: BlockId, gain: f64) -> DiagramResult<()> {
        let gain = ensure_finite(gain, "gain")?;
        match self.kind_mut(id)? {
            BlockKind::Gain { gain: g, .. } => {
                *g = gain;
                Ok(())
            }
            other => Err(wrong_kind(id, "GainBlock", other)),
        }
    }

    pub fn set_gain_initial(&mut self, id: BlockId, initial: Signal) -> DiagramResult<()> {
        match self.kind_mut(id)? {
            BlockKind::Gain { initial: i, .. } => {
                *i = initial;
                Ok(())
            }
            other => Err(wrong_kind(id, "GainBlock", other)),
        }
    }

    pub fn set_state_space_params(
        &mut self,
        id: BlockId,
        params: StateSpaceParams,
    ) -> DiagramResult<()> {
        match self.kind_mut(id)? {
            BlockKind::StateSpace(p) => {
                *p = params;
                Ok(())
            }
            other => Err(wrong_kind(id, "StateSpaceBlock", other)),
        }
    }

    /// Resize a mux block's input list.
    ///
    /// New inputs are optional, unconnected and get fresh identifiers.
    /// Shrinking removes the highest-indexed inputs and disconnects them.
    pub fn set_mux_inputs(&mut self, id: BlockId, count: usize) -> DiagramResult<()> {
        self.ensure_editable()?;
        if count == 0 {
            return Err(DiagramError::InvalidArg {
                what: "a mux needs at least one input".to_string(),
            });
        }
        let index = self.block_index(id)?;
        if !matches!(self.blocks[index].kind(), BlockKind::Mux) {
            return Err(wrong_kind(id, "MuxBlock", self.blocks[index].kind()));
        }

        let current = self.blocks[index].num_input_ports();
        if count > current {
            self.ids.ensure_available(count - current)?;
            for n in current..count {
                let port = self.new_port(id, format!("in{}", n + 1), PortDirection::Input, true)?;
                self.blocks[index].inputs_mut().push(port);
            }
        } else {
            let removed = self.blocks[index].inputs_mut().split_off(count);
            for port in removed {
                self.drop_port(port);
            }
        }
        debug!(block = %id, from = current, to = count, "mux resized");
        Ok(())
    }

    // ---- wires ---------------------------------------------------------

    /// Connect two ports given in either order.
    ///
    /// The output side becomes `from`. Same-direction pairs and inputs that
    /// already have an upstream link are refused without touching anything.
    pub fn add_wire(&mut self, a: PortId, b: PortId) -> DiagramResult<WireId> {
        self.ensure_editable()?;
        let dir_a = self.port_direction(a)?;
        let dir_b = self.port_direction(b)?;
        if dir_a == dir_b {
            return Err(DiagramError::InvalidConnection {
                what: format!("ports {a} and {b} are both {dir_a:?} ports"),
            });
        }
        let (from, to) = if dir_a == PortDirection::Output {
            (a, b)
        } else {
            (b, a)
        };

        self.ids.ensure_available(1)?;
        if let Err(err) = self.ports.link(from, to) {
            warn!(from = %from, to = %to, error = %err, "connection refused");
            return Err(err);
        }
        let id = self.ids.allocate()?;
        self.wires.push(Wire::new(id, from, to));
        debug!(wire = %id, from = %from, to = %to, "wire added");
        Ok(id)
    }

    /// Remove a wire and sever the port link it records.
    pub fn remove_wire(&mut self, id: WireId) -> DiagramResult<()> {
        self.ensure_editable()?;
        let pos = self
            .wires
            .iter()
            .position(|w| w.id == id)
            .ok_or_else(|| DiagramError::NotFound {
                what: format!("wire {id}"),
            })?;
        let wire = self.wires.remove(pos);
        self.ports.unlink(wire.from, wire.to);
        self.ids.release(id);
        debug!(wire = %id, "wire removed");
        Ok(())
    }

    fn port_direction(&self, id: PortId) -> DiagramResult<PortDirection> {
        self.ports
            .get(id)
            .map(Port::direction)
            .ok_or_else(|| DiagramError::NotFound {
                what: format!("port {id}"),
            })
    }

    /// Reset to an empty document. Configuration is kept.
    pub fn clear(&mut self) {
        self.blocks.clear();
        self.ports.clear();
        self.wires.clear();
        self.ids.reset();
        self.state = SimState::Stopped;
        self.clock.reset(self.options.dt);
        self.last_pass = PassReport::default();
        self.reported_stalls.clear();
        debug!("diagram cleared");
    }
}

impl Default for Diagram {
    fn default() -> Self {
        Self::new()
    }
}

fn wrong_kind(id: BlockId, expected: &str, found: &BlockKind) -> DiagramError {
    DiagramError::InvalidArg {
        what: format!("block {id} is a {}, expected a {expected}", found.tag()),
    }
}

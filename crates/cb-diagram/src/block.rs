//! Block model and the per-variant lifecycle hooks.
//!
//! Blocks are the computational nodes of the diagram:
//! - **Sources**: Constant
//! - **Processors**: Gain, Sum, Mux, StateSpace
//! - **Sinks**: Display
//!
//! A block owns the ids of its ports; the ports themselves live in the
//! diagram's [`PortTable`]. Every hook that touches port values therefore
//! takes the table explicitly.

use cb_core::{BlockId, PortId};
use nalgebra::DMatrix;
use tracing::debug;

use crate::error::{DiagramError, DiagramResult};
use crate::port::{PortTable, Signal};
use crate::state_space::StateSpace;
use crate::vector;
use crate::workspace::VariableResolver;

/// Screen position, stored for the editor and persisted untouched.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Names of the matrices a state-space block pulls from the workspace.
#[derive(Debug, Clone, PartialEq)]
pub struct StateSpaceParams {
    pub a: String,
    pub b: String,
    pub c: String,
    pub d: String,
    /// Optional initial state variable; zero state when absent.
    pub x0: Option<String>,
    /// Model resolved at simulation start.
    pub(crate) model: Option<StateSpace>,
}

impl StateSpaceParams {
    pub fn new(
        a: impl Into<String>,
        b: impl Into<String>,
        c: impl Into<String>,
        d: impl Into<String>,
    ) -> Self {
        Self {
            a: a.into(),
            b: b.into(),
            c: c.into(),
            d: d.into(),
            x0: None,
            model: None,
        }
    }

    pub fn with_initial_state(mut self, x0: impl Into<String>) -> Self {
        self.x0 = Some(x0.into());
        self
    }

    /// Model resolved by the last successful initialization.
    pub fn model(&self) -> Option<&StateSpace> {
        self.model.as_ref()
    }
}

impl Default for StateSpaceParams {
    fn default() -> Self {
        Self::new("A", "B", "C", "D")
    }
}

/// Block type and configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockKind {
    /// Plain block: ports only, compute just re-broadcasts its outputs.
    Generic,
    /// Constant scalar source.
    Constant { value: f64 },
    /// Scalar gain with an initial output emitted at simulation start.
    Gain { gain: f64, initial: Signal },
    /// Elementwise sum of two inputs.
    Sum,
    /// Concatenation of all inputs in port order.
    Mux,
    /// Sink that keeps the latest input for presentation.
    Display { value: Signal },
    /// Linear dynamical system.
    StateSpace(StateSpaceParams),
}

/// Port names and flags a block kind starts out with.
#[derive(Debug, Clone, PartialEq)]
pub struct PortLayout {
    /// (name, optional)
    pub inputs: Vec<(String, bool)>,
    pub outputs: Vec<String>,
}

impl BlockKind {
    pub fn constant(value: f64) -> Self {
        Self::Constant { value }
    }

    pub fn gain(gain: f64) -> Self {
        Self::Gain {
            gain,
            initial: Signal::zeros(1),
        }
    }

    pub fn display() -> Self {
        Self::Display {
            value: Signal::zeros(0),
        }
    }

    /// Type tag used by the document format and the registry.
    pub fn tag(&self) -> &'static str {
        match self {
            BlockKind::Generic => "Block",
            BlockKind::Constant { .. } => "ConstantBlock",
            BlockKind::Gain { .. } => "GainBlock",
            BlockKind::Sum => "SumBlock",
            BlockKind::Mux => "MuxBlock",
            BlockKind::Display { .. } => "DisplayBlock",
            BlockKind::StateSpace(_) => "StateSpaceBlock",
        }
    }

    /// Name given to a freshly placed block.
    pub fn default_name(&self) -> &'static str {
        match self {
            BlockKind::Generic => "Block",
            BlockKind::Constant { .. } => "Constant",
            BlockKind::Gain { .. } => "Gain",
            BlockKind::Sum => "Sum",
            BlockKind::Mux => "Mux",
            BlockKind::Display { .. } => "Display",
            BlockKind::StateSpace(_) => "State Space",
        }
    }

    /// Dynamical blocks carry integrated state.
    pub fn is_dynamical_system(&self) -> bool {
        matches!(self, BlockKind::StateSpace(_))
    }

    pub fn layout(&self) -> PortLayout {
        let inputs = |names: &[(&str, bool)]| -> Vec<(String, bool)> {
            names.iter().map(|(n, o)| (n.to_string(), *o)).collect()
        };
        let (ins, outs): (Vec<(String, bool)>, &[&str]) = match self {
            BlockKind::Generic => (vec![], &[]),
            BlockKind::Constant { .. } => (vec![], &["out"]),
            BlockKind::Gain { .. } => (inputs(&[("in", true)]), &["out"]),
            BlockKind::Sum => (inputs(&[("in1", true), ("in2", true)]), &["sum"]),
            BlockKind::Mux => (inputs(&[("in1", true), ("in2", true)]), &["mux"]),
            BlockKind::Display { .. } => (inputs(&[("in", false)]), &[]),
            BlockKind::StateSpace(_) => (inputs(&[("u", true)]), &["y"]),
        };
        PortLayout {
            inputs: ins,
            outputs: outs.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// A computational node with ordered input and output ports.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    id: BlockId,
    name: String,
    kind: BlockKind,
    inputs: Vec<PortId>,
    outputs: Vec<PortId>,
    x: Signal,
    dx: Signal,
    position: Position,
}

impl Block {
    pub(crate) fn new(
        id: BlockId,
        name: impl Into<String>,
        kind: BlockKind,
        inputs: Vec<PortId>,
        outputs: Vec<PortId>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
            inputs,
            outputs,
            x: Signal::zeros(0),
            dx: Signal::zeros(0),
            position: Position::default(),
        }
    }

    pub fn id(&self) -> BlockId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn kind(&self) -> &BlockKind {
        &self.kind
    }

    pub(crate) fn kind_mut(&mut self) -> &mut BlockKind {
        &mut self.kind
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub(crate) fn set_position(&mut self, position: Position) {
        self.position = position;
    }

    pub fn is_dynamical_system(&self) -> bool {
        self.kind.is_dynamical_system()
    }

    pub fn inputs(&self) -> &[PortId] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[PortId] {
        &self.outputs
    }

    pub(crate) fn inputs_mut(&mut self) -> &mut Vec<PortId> {
        &mut self.inputs
    }

    pub fn num_input_ports(&self) -> usize {
        self.inputs.len()
    }

    pub fn num_output_ports(&self) -> usize {
        self.outputs.len()
    }

    pub fn input_port_id(&self, index: usize) -> DiagramResult<PortId> {
        self.inputs
            .get(index)
            .copied()
            .ok_or(DiagramError::PortIndex {
                block: self.id,
                index,
                len: self.inputs.len(),
            })
    }

    pub fn output_port_id(&self, index: usize) -> DiagramResult<PortId> {
        self.outputs
            .get(index)
            .copied()
            .ok_or(DiagramError::PortIndex {
                block: self.id,
                index,
                len: self.outputs.len(),
            })
    }

    /// Ports in canonical order: inputs, then outputs.
    pub fn port_ids(&self) -> impl Iterator<Item = PortId> + '_ {
        self.inputs.iter().chain(self.outputs.iter()).copied()
    }

    /// Integrated state (dynamical blocks only).
    pub fn state(&self) -> &Signal {
        &self.x
    }

    pub fn num_states(&self) -> usize {
        self.x.len()
    }

    pub(crate) fn set_state(&mut self, x: Signal) {
        self.x = x;
    }

    /// Derivative from the last compute. `None` for non-dynamical blocks.
    pub fn get_dx(&self) -> Option<&Signal> {
        if self.is_dynamical_system() {
            Some(&self.dx)
        } else {
            None
        }
    }

    /// All inputs fresh, or optional and unconnected. True with no inputs.
    pub fn is_ready(&self, ports: &PortTable) -> bool {
        self.inputs
            .iter()
            .all(|id| ports.get(*id).is_some_and(|p| p.is_satisfied()))
    }

    /// Push every output's buffered value downstream.
    pub fn broadcast(&self, ports: &mut PortTable) {
        for id in &self.outputs {
            ports.broadcast(*id);
        }
    }

    fn input(&self, index: usize, ports: &mut PortTable) -> DiagramResult<Signal> {
        let id = self.input_port_id(index)?;
        ports
            .get_mut(id)
            .map(|p| p.get_value())
            .ok_or_else(|| DiagramError::NotFound {
                what: format!("input port {id} of block '{}'", self.name),
            })
    }

    fn set_output(&self, index: usize, value: Signal, ports: &mut PortTable) -> DiagramResult<()> {
        let id = self.output_port_id(index)?;
        match ports.get_mut(id) {
            Some(port) => port.set_value(value),
            None => Err(DiagramError::NotFound {
                what: format!("output port {id} of block '{}'", self.name),
            }),
        }
    }

    /// Seed the block before the first tick.
    ///
    /// Gains emit their initial condition; state-space blocks resolve their
    /// matrices, seed `x` and emit the matching output so feedback loops can
    /// start. Every unresolved matrix is reported in a single error.
    pub fn apply_initial(
        &mut self,
        ports: &mut PortTable,
        vars: &dyn VariableResolver,
    ) -> DiagramResult<()> {
        match &mut self.kind {
            BlockKind::Gain { initial, .. } => {
                let initial = initial.clone();
                self.set_output(0, initial, ports)?;
                self.broadcast(ports);
            }
            BlockKind::Display { value } => *value = Signal::zeros(0),
            BlockKind::StateSpace(params) => {
                let (model, x0) = resolve_model(&self.name, params, vars)?;
                let u0 = Signal::zeros(model.num_inputs());
                let y0 = model.output(&x0, &u0)?;
                debug!(
                    block = %self.name,
                    states = model.num_states(),
                    inputs = model.num_inputs(),
                    outputs = model.num_outputs(),
                    "state-space model resolved"
                );
                params.model = Some(model);
                self.dx = Signal::zeros(x0.len());
                self.x = x0;
                self.set_output(0, y0, ports)?;
                self.broadcast(ports);
            }
            BlockKind::Generic | BlockKind::Constant { .. } | BlockKind::Sum | BlockKind::Mux => {}
        }
        Ok(())
    }

    /// Turn current inputs into outputs, then broadcast.
    pub fn compute(&mut self, _t: f64, ports: &mut PortTable) -> DiagramResult<()> {
        match &self.kind {
            BlockKind::Generic => {}
            BlockKind::Constant { value } => {
                let value = *value;
                self.set_output(0, Signal::from_element(1, value), ports)?;
            }
            BlockKind::Gain { gain, .. } => {
                let gain = *gain;
                let u = self.input(0, ports)?;
                self.set_output(0, u * gain, ports)?;
            }
            BlockKind::Sum => {
                let a = self.input(0, ports)?;
                let b = self.input(1, ports)?;
                self.set_output(0, vector::padded_sum(&a, &b), ports)?;
            }
            BlockKind::Mux => {
                let parts = (0..self.inputs.len())
                    .map(|i| self.input(i, ports))
                    .collect::<DiagramResult<Vec<Signal>>>()?;
                self.set_output(0, vector::stack(&parts), ports)?;
            }
            BlockKind::Display { .. } => {
                let latest = self.input(0, ports)?;
                if let BlockKind::Display { value } = &mut self.kind {
                    *value = latest;
                }
            }
            BlockKind::StateSpace(params) => {
                let model = params
                    .model
                    .clone()
                    .ok_or_else(|| DiagramError::Initialization {
                        block: self.name.clone(),
                        what: "state-space model used before initialization".to_string(),
                    })?;
                let mut u = self.input(0, ports)?;
                if u.is_empty() {
                    u = Signal::zeros(model.num_inputs());
                }
                self.dx = model.derivative(&self.x, &u)?;
                let y = model.output(&self.x, &u)?;
                self.set_output(0, y, ports)?;
            }
        }
        self.broadcast(ports);
        Ok(())
    }
}

fn resolve_model(
    block: &str,
    params: &StateSpaceParams,
    vars: &dyn VariableResolver,
) -> DiagramResult<(StateSpace, Signal)> {
    let mut missing = Vec::new();
    let mut lookup = |name: &str| -> DMatrix<f64> {
        vars.resolve(name).unwrap_or_else(|| {
            missing.push(name.to_string());
            DMatrix::zeros(0, 0)
        })
    };
    let a = lookup(&params.a);
    let b = lookup(&params.b);
    let c = lookup(&params.c);
    let d = lookup(&params.d);
    let x0 = params.x0.as_deref().map(&mut lookup);

    if !missing.is_empty() {
        return Err(DiagramError::Initialization {
            block: block.to_string(),
            what: format!("unresolved variables: {}", missing.join(", ")),
        });
    }

    let n = a.nrows();
    let x0 = match x0 {
        None => Signal::zeros(n),
        Some(m) if m.ncols() == 1 => m.column(0).into_owned(),
        Some(m) if m.nrows() == 1 => m.row(0).transpose(),
        Some(m) => {
            return Err(DiagramError::Initialization {
                block: block.to_string(),
                what: format!("initial state is {}x{}, expected a vector", m.nrows(), m.ncols()),
            });
        }
    };
    Ok((StateSpace::new(a, b, c, d), x0))
}

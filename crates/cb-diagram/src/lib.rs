//! Block diagram construction, scheduling and persistence for controlblocks.
//!
//! A [`Diagram`] owns blocks, the ports they expose and the wires between
//! them. Each simulation tick runs a readiness-driven pass: a block computes
//! once all of its connected inputs hold a fresh value, and its outputs are
//! broadcast downstream as soon as it finishes.
//!
//! # Architecture
//!
//! - Ports live in a [`PortTable`] arena and refer to each other by id
//! - Reading an input consumes it; the port stays stale until the next write
//! - Block behavior is a closed [`BlockKind`] enum, created by tag through a
//!   [`BlockRegistry`]
//! - Dynamical blocks expose their state through [`Diagram::dynamics`], which
//!   any [`Integrator`] can step
//! - Documents are TOML; loading merges into the live diagram with shifted ids

pub mod block;
pub mod diagram;
pub mod error;
pub mod integrator;
pub mod params;
pub mod persist;
pub mod port;
pub mod registry;
pub mod sim;
pub mod state_space;
pub mod vector;
pub mod wire;
pub mod workspace;

pub use block::{Block, BlockKind, PortLayout, Position, StateSpaceParams};
pub use diagram::{Diagram, DiagramConfig};
pub use error::{DiagramError, DiagramResult};
pub use integrator::{DynamicSystem, ForwardEuler, Integrator, RK4};
pub use persist::{BlockDoc, DiagramDoc, LoadReport, PersistError, PersistResult, PortConns, PortDoc};
pub use port::{Port, PortDirection, PortTable, Signal};
pub use registry::{BlockFactory, BlockRegistry, ParamDecoder};
pub use sim::{IntegratorType, PassReport, SimClock, SimOptions, SimState};
pub use state_space::{StateSpace, StateSpaceError};
pub use wire::Wire;
pub use workspace::{NoVariables, VariableResolver, Workspace};

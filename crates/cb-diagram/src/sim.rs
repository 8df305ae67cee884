//! Simulation state machine and the per-tick scheduler.

use cb_core::{BlockId, ensure_finite, ensure_positive, time_reached};
use tracing::{debug, info, warn};

use crate::block::Block;
use crate::diagram::Diagram;
use crate::error::{DiagramError, DiagramResult};
use crate::integrator::{DynamicSystem, ForwardEuler, Integrator, RK4};
use crate::port::Signal;
use crate::workspace::VariableResolver;

/// Simulation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SimState {
    #[default]
    Stopped,
    Paused,
    Running,
}

/// Integrator selection for dynamical blocks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum IntegratorType {
    /// 4th-order Runge-Kutta (default, 4 graph passes per tick).
    #[default]
    RK4,
    /// Forward Euler (1st-order, 1 graph pass per tick).
    ForwardEuler,
}

/// Options for simulation runs.
#[derive(Clone, Debug, PartialEq)]
pub struct SimOptions {
    /// Fixed time step (seconds)
    pub dt: f64,
    /// Stop time (seconds)
    pub t_end: f64,
    /// Integrator for dynamical blocks
    pub integrator: IntegratorType,
}

impl Default for SimOptions {
    fn default() -> Self {
        Self {
            dt: 0.1,
            t_end: 10.0,
            integrator: IntegratorType::default(),
        }
    }
}

impl SimOptions {
    pub fn validate(&self) -> DiagramResult<()> {
        ensure_positive(self.dt, "dt")?;
        if ensure_finite(self.t_end, "t_end")? < 0.0 {
            return Err(DiagramError::InvalidArg {
                what: "t_end must be non-negative".to_string(),
            });
        }
        Ok(())
    }
}

/// Simulation clock. Time is derived from the step count so it does not drift.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SimClock {
    steps: u64,
    dt: f64,
}

impl SimClock {
    pub fn new(dt: f64) -> Self {
        Self { steps: 0, dt }
    }

    pub fn reset(&mut self, dt: f64) {
        self.steps = 0;
        self.dt = dt;
    }

    pub fn advance(&mut self) {
        self.steps += 1;
    }

    pub fn time(&self) -> f64 {
        self.steps as f64 * self.dt
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Whether the clock has reached `t_end`.
    pub fn reached(&self, t_end: f64) -> bool {
        time_reached(self.time(), t_end)
    }
}

/// Outcome of one scheduling pass.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PassReport {
    /// Blocks that ran, in execution order.
    pub executed: Vec<BlockId>,
    /// Blocks that never became ready during the pass.
    pub stalled: Vec<BlockId>,
}

impl PassReport {
    pub fn is_complete(&self) -> bool {
        self.stalled.is_empty()
    }
}

impl Diagram {
    pub fn sim_state(&self) -> SimState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == SimState::Running
    }

    /// Current simulation time.
    pub fn time(&self) -> f64 {
        self.clock.time()
    }

    pub fn options(&self) -> &SimOptions {
        &self.options
    }

    /// Replace the simulation options. Not allowed while running.
    pub fn set_options(&mut self, options: SimOptions) -> DiagramResult<()> {
        self.ensure_editable()?;
        options.validate()?;
        self.options = options;
        Ok(())
    }

    /// Report of the most recent scheduling pass.
    pub fn last_pass(&self) -> &PassReport {
        &self.last_pass
    }

    /// Start or resume the simulation.
    ///
    /// From STOPPED this initializes every block (matrices are looked up in
    /// `vars`); a failed initialization leaves the diagram stopped. From
    /// PAUSED it resumes without reinitializing.
    pub fn start(&mut self, vars: &dyn VariableResolver) -> DiagramResult<()> {
        match self.state {
            SimState::Running => Ok(()),
            SimState::Paused => {
                self.state = SimState::Running;
                info!(t = self.time(), "simulation resumed");
                Ok(())
            }
            SimState::Stopped => {
                self.init_sim(vars)?;
                self.state = SimState::Running;
                info!(
                    dt = self.options.dt,
                    t_end = self.options.t_end,
                    blocks = self.blocks.len(),
                    "simulation started"
                );
                Ok(())
            }
        }
    }

    pub fn pause(&mut self) {
        if self.state == SimState::Running {
            self.state = SimState::Paused;
            info!(t = self.time(), "simulation paused");
        }
    }

    /// Halt ticking. The next start reinitializes.
    pub fn stop(&mut self) {
        if self.state != SimState::Stopped {
            self.state = SimState::Stopped;
            info!(t = self.time(), "simulation stopped");
        }
    }

    /// Reset the clock and port buffers, then seed every block.
    fn init_sim(&mut self, vars: &dyn VariableResolver) -> DiagramResult<()> {
        self.options.validate()?;
        self.clock.reset(self.options.dt);
        self.ports.reset_values();
        self.last_pass = PassReport::default();
        self.reported_stalls.clear();

        let mut failures = Vec::new();
        for block in &mut self.blocks {
            if let Err(err) = block.apply_initial(&mut self.ports, vars) {
                warn!(block = block.name(), error = %err, "initialization failed");
                failures.push(err);
            }
        }
        match failures.len() {
            0 => Ok(()),
            1 => Err(failures.remove(0)),
            n => Err(DiagramError::Initialization {
                block: format!("{n} blocks"),
                what: failures
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; "),
            }),
        }
    }

    /// One readiness-driven scheduling pass at time `t`.
    ///
    /// Ready blocks run and are dropped from the pending list; the scan
    /// continues from the same position so blocks made ready further down
    /// run in the same sweep. Sweeps repeat until one makes no progress.
    /// Each block runs at most once.
    pub fn compute(&mut self, t: f64) -> DiagramResult<PassReport> {
        let mut pending: Vec<usize> = (0..self.blocks.len()).collect();
        let mut executed = Vec::with_capacity(pending.len());

        loop {
            let mut progressed = false;
            let mut i = 0;
            while i < pending.len() {
                let idx = pending[i];
                if !self.blocks[idx].is_ready(&self.ports) {
                    i += 1;
                    continue;
                }
                let block = &mut self.blocks[idx];
                if let Err(err) = block.compute(t, &mut self.ports) {
                    warn!(block = block.name(), t, error = %err, "block compute failed");
                    return Err(err);
                }
                executed.push(block.id());
                pending.remove(i);
                progressed = true;
            }
            if !progressed || pending.is_empty() {
                break;
            }
        }

        let stalled: Vec<BlockId> = pending.iter().map(|&i| self.blocks[i].id()).collect();
        for &id in &stalled {
            let first = self.reported_stalls.insert(id);
            let name = self.block(id).map(Block::name).unwrap_or_default();
            if first {
                warn!(block = name, t, "block never became ready");
            } else {
                debug!(block = name, t, "block not ready this pass");
            }
        }

        let report = PassReport { executed, stalled };
        self.last_pass = report.clone();
        Ok(report)
    }

    /// Concatenated state of all dynamical blocks, in registration order.
    pub fn state_vector(&self) -> Signal {
        let parts: Vec<Signal> = self.dynamical_blocks().map(|b| b.state().clone()).collect();
        crate::vector::stack(&parts)
    }

    fn scatter_state(&mut self, x: &Signal) -> DiagramResult<()> {
        let expected: usize = self.dynamical_blocks().map(|b| b.num_states()).sum();
        if x.len() != expected {
            return Err(DiagramError::InvalidArg {
                what: format!("state vector has {} entries, expected {expected}", x.len()),
            });
        }
        let mut offset = 0;
        for block in self.blocks.iter_mut().filter(|b| b.is_dynamical_system()) {
            let n = block.num_states();
            block.set_state(x.rows(offset, n).into_owned());
            offset += n;
        }
        Ok(())
    }

    /// Derivative of the concatenated dynamical state at `(x, t)`.
    ///
    /// Loads `x` into the dynamical blocks, runs one scheduling pass and
    /// collects every dynamical block's derivative. This is the function an
    /// ODE integrator consumes.
    ///
    /// Input freshness carries over between calls: a block inside a feedback
    /// loop reads the value its upstream produced in the previous call, not
    /// one computed from this `x`.
    pub fn dynamics(&mut self, x: &Signal, t: f64) -> DiagramResult<Signal> {
        self.scatter_state(x)?;
        self.compute(t)?;
        let parts: Vec<Signal> = self
            .dynamical_blocks()
            .map(|b| match b.get_dx() {
                Some(dx) if dx.len() == b.num_states() => dx.clone(),
                _ => Signal::zeros(b.num_states()),
            })
            .collect();
        Ok(crate::vector::stack(&parts))
    }

    fn has_dynamical_blocks(&self) -> bool {
        self.blocks.iter().any(|b| b.is_dynamical_system())
    }

    /// Advance the simulation by one tick.
    ///
    /// Returns `None` when not running. A block failure stops the
    /// simulation and is returned.
    pub fn step(&mut self) -> DiagramResult<Option<PassReport>> {
        if self.state != SimState::Running {
            return Ok(None);
        }
        let t = self.clock.time();
        let dt = self.clock.dt();

        let outcome = if self.has_dynamical_blocks() {
            let x = self.state_vector();
            let next = match self.options.integrator {
                IntegratorType::RK4 => RK4.step(self, t, &x, dt),
                IntegratorType::ForwardEuler => ForwardEuler.step(self, t, &x, dt),
            };
            next.and_then(|x| self.scatter_state(&x))
        } else {
            self.compute(t).map(|_| ())
        };

        if let Err(err) = outcome {
            self.state = SimState::Stopped;
            warn!(t, error = %err, "simulation halted");
            return Err(err);
        }

        self.clock.advance();
        if self.clock.reached(self.options.t_end) {
            self.state = SimState::Stopped;
            info!(t = self.time(), steps = self.clock.steps(), "simulation finished");
        }
        Ok(Some(self.last_pass.clone()))
    }

    /// Start (or resume) and tick until the simulation stops.
    ///
    /// Returns the number of ticks taken.
    pub fn run(&mut self, vars: &dyn VariableResolver) -> DiagramResult<u64> {
        self.start(vars)?;
        let mut ticks = 0;
        while self.step()?.is_some() {
            ticks += 1;
        }
        Ok(ticks)
    }
}

impl DynamicSystem for Diagram {
    fn rhs(&mut self, t: f64, x: &Signal) -> DiagramResult<Signal> {
        self.dynamics(x, t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::NoVariables;

    #[test]
    fn sim_options_defaults() {
        let opts = SimOptions::default();
        assert_eq!(opts.dt, 0.1);
        assert_eq!(opts.t_end, 10.0);
        assert_eq!(opts.integrator, IntegratorType::RK4);
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn sim_options_invalid() {
        let opts = SimOptions {
            dt: 0.0,
            ..SimOptions::default()
        };
        assert!(opts.validate().is_err());
        let opts = SimOptions {
            t_end: f64::NAN,
            ..SimOptions::default()
        };
        assert!(opts.validate().is_err());
    }

    #[test]
    fn clock_does_not_drift() {
        let mut clock = SimClock::new(0.1);
        for _ in 0..100 {
            clock.advance();
        }
        assert!(clock.reached(10.0));
    }

    #[test]
    fn state_machine_transitions() {
        let mut d = Diagram::new();
        assert_eq!(d.sim_state(), SimState::Stopped);
        d.start(&NoVariables).unwrap();
        assert_eq!(d.sim_state(), SimState::Running);
        d.pause();
        assert_eq!(d.sim_state(), SimState::Paused);
        d.start(&NoVariables).unwrap();
        assert_eq!(d.sim_state(), SimState::Running);
        d.stop();
        assert_eq!(d.sim_state(), SimState::Stopped);
    }

    #[test]
    fn step_is_noop_unless_running() {
        let mut d = Diagram::new();
        assert_eq!(d.step().unwrap(), None);
        d.start(&NoVariables).unwrap();
        d.pause();
        assert_eq!(d.step().unwrap(), None);
        assert_eq!(d.time(), 0.0);
    }

    #[test]
    fn run_stops_at_end_time() {
        let mut d = Diagram::new();
        d.set_options(SimOptions {
            dt: 0.25,
            t_end: 1.0,
            integrator: IntegratorType::ForwardEuler,
        })
        .unwrap();
        d.add_block("ConstantBlock").unwrap();
        assert_eq!(d.run(&NoVariables).unwrap(), 4);
        assert_eq!(d.sim_state(), SimState::Stopped);
        assert_eq!(d.time(), 1.0);
    }
}

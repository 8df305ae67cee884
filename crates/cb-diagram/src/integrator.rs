//! Fixed-step time integrators.

use crate::error::DiagramResult;
use crate::port::Signal;

/// A system whose continuous state can be advanced by an [`Integrator`].
pub trait DynamicSystem {
    /// Compute the state derivative `dx = f(t, x)`.
    fn rhs(&mut self, t: f64, x: &Signal) -> DiagramResult<Signal>;
}

/// Trait for time integrators.
pub trait Integrator {
    /// Advance state by one time step.
    fn step<M: DynamicSystem>(&self, model: &mut M, t: f64, x: &Signal, dt: f64)
    -> DiagramResult<Signal>;
}

/// Fourth-order Runge-Kutta: four derivative evaluations per step.
#[derive(Clone, Debug)]
pub struct RK4;

impl Integrator for RK4 {
    fn step<M: DynamicSystem>(
        &self,
        model: &mut M,
        t: f64,
        x: &Signal,
        dt: f64,
    ) -> DiagramResult<Signal> {
        let k1 = model.rhs(t, x)?;
        let k2 = model.rhs(t + 0.5 * dt, &(x + &k1 * (0.5 * dt)))?;
        let k3 = model.rhs(t + 0.5 * dt, &(x + &k2 * (0.5 * dt)))?;
        let k4 = model.rhs(t + dt, &(x + &k3 * dt))?;

        // x_new = x + (dt/6) * (k1 + 2*k2 + 2*k3 + k4)
        Ok(x + (k1 + k2 * 2.0 + k3 * 2.0 + k4) * (dt / 6.0))
    }
}

/// Forward Euler (explicit, 1st order).
/// One derivative evaluation per step.
#[derive(Clone, Debug)]
pub struct ForwardEuler;

impl Integrator for ForwardEuler {
    fn step<M: DynamicSystem>(
        &self,
        model: &mut M,
        t: f64,
        x: &Signal,
        dt: f64,
    ) -> DiagramResult<Signal> {
        let xdot = model.rhs(t, x)?;
        Ok(x + xdot * dt)
    }
}

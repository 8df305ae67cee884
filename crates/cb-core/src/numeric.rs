//! Float helpers for the simulation clock and parameter checks.

use crate::error::{CoreError, CoreResult};

/// Floating point type used for signals, parameters and time.
pub type Real = f64;

/// Absolute and relative bound for comparing two floats.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Tolerance {
    pub abs: Real,
    pub rel: Real,
}

impl Tolerance {
    /// Bound used when comparing accumulated simulation times.
    pub const TIME: Tolerance = Tolerance {
        abs: 1e-12,
        rel: 1e-9,
    };

    pub fn new(abs: Real, rel: Real) -> Self {
        Self { abs, rel }
    }

    /// `a` and `b` agree within either bound.
    pub fn matches(&self, a: Real, b: Real) -> bool {
        let diff = (a - b).abs();
        diff <= self.abs || diff <= self.rel * a.abs().max(b.abs())
    }
}

impl Default for Tolerance {
    fn default() -> Self {
        Self::TIME
    }
}

/// Whether time `t` has reached `t_end`, allowing for rounding in `t`.
pub fn time_reached(t: Real, t_end: Real) -> bool {
    t >= t_end || Tolerance::TIME.matches(t, t_end)
}

pub fn ensure_finite(value: Real, what: &'static str) -> CoreResult<Real> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(CoreError::NonFinite { what, value })
    }
}

/// Finite and strictly positive.
pub fn ensure_positive(value: Real, what: &'static str) -> CoreResult<Real> {
    if ensure_finite(value, what)? > 0.0 {
        Ok(value)
    } else {
        Err(CoreError::NotPositive { what, value })
    }
}

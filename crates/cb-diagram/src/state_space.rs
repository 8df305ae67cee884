//! Linear state-space model: `dx = A x + B u`, `y = C x + D u`.

use nalgebra::DMatrix;
use thiserror::Error;

use crate::port::Signal;

/// Errors raised while evaluating a state-space model.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StateSpaceError {
    /// Matrix shapes do not fit the state or input vector.
    #[error("State-space dimensions do not commute: {what}")]
    Dimension { what: String },
}

/// Coefficient matrices of a linear time-invariant system.
///
/// The matrices are fixed once the model is built; the dimension checks
/// happen on every evaluation because the input length is only known then.
#[derive(Debug, Clone, PartialEq)]
pub struct StateSpace {
    a: DMatrix<f64>,
    b: DMatrix<f64>,
    c: DMatrix<f64>,
    d: DMatrix<f64>,
}

impl StateSpace {
    pub fn new(a: DMatrix<f64>, b: DMatrix<f64>, c: DMatrix<f64>, d: DMatrix<f64>) -> Self {
        Self { a, b, c, d }
    }

    pub fn a(&self) -> &DMatrix<f64> {
        &self.a
    }

    pub fn b(&self) -> &DMatrix<f64> {
        &self.b
    }

    pub fn c(&self) -> &DMatrix<f64> {
        &self.c
    }

    pub fn d(&self) -> &DMatrix<f64> {
        &self.d
    }

    pub fn num_states(&self) -> usize {
        self.a.nrows()
    }

    pub fn num_inputs(&self) -> usize {
        self.b.ncols()
    }

    pub fn num_outputs(&self) -> usize {
        self.c.nrows()
    }

    /// State derivative `A x + B u`.
    pub fn derivative(&self, x: &Signal, u: &Signal) -> Result<Signal, StateSpaceError> {
        let n = x.len();
        if self.a.nrows() != n || self.a.ncols() != n {
            return Err(dimension("A", &self.a, format!("x has {n} states")));
        }
        if self.b.nrows() != n || self.b.ncols() != u.len() {
            return Err(dimension(
                "B",
                &self.b,
                format!("x has {n} states and u has {} inputs", u.len()),
            ));
        }
        Ok(&self.a * x + &self.b * u)
    }

    /// Output `C x + D u`.
    pub fn output(&self, x: &Signal, u: &Signal) -> Result<Signal, StateSpaceError> {
        if self.c.ncols() != x.len() {
            return Err(dimension("C", &self.c, format!("x has {} states", x.len())));
        }
        if self.d.ncols() != u.len() {
            return Err(dimension("D", &self.d, format!("u has {} inputs", u.len())));
        }
        if self.c.nrows() != self.d.nrows() {
            return Err(StateSpaceError::Dimension {
                what: format!(
                    "C has {} rows but D has {} rows",
                    self.c.nrows(),
                    self.d.nrows()
                ),
            });
        }
        Ok(&self.c * x + &self.d * u)
    }
}

fn dimension(name: &str, m: &DMatrix<f64>, context: String) -> StateSpaceError {
    StateSpaceError::Dimension {
        what: format!("{name} is {}x{} but {context}", m.nrows(), m.ncols()),
    }
}

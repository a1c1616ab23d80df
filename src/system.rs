//! Discrete-time linear systems `x⁺ = A x + B u + E w`.

use nalgebra::DMatrix;

use crate::error::{CisError, Result};

/// A discrete-time linear system with an optional additive disturbance channel.
///
/// # Invariants
///
/// - `A` is square (`n × n`) with `n >= 1`
/// - `B` is `n × m` with `m >= 1`
/// - `E`, when present, is `n × d` with `d >= 1`
#[derive(Debug, Clone, PartialEq)]
pub struct LinearSystem {
    a: DMatrix<f64>,
    b: DMatrix<f64>,
    e: Option<DMatrix<f64>>,
}

impl LinearSystem {
    /// Creates an undisturbed system `x⁺ = A x + B u`.
    pub fn new(a: DMatrix<f64>, b: DMatrix<f64>) -> Result<Self> {
        if !a.is_square() {
            return Err(CisError::NonSquare {
                what: "state matrix",
                rows: a.nrows(),
                cols: a.ncols(),
            });
        }
        if a.nrows() == 0 {
            return Err(CisError::mismatch("state dimension", 1, 0));
        }
        if b.nrows() != a.nrows() {
            return Err(CisError::mismatch("input matrix rows", a.nrows(), b.nrows()));
        }
        if b.ncols() == 0 {
            return Err(CisError::mismatch("number of inputs", 1, 0));
        }
        Ok(Self { a, b, e: None })
    }

    /// Creates a system with disturbance matrix `E`.
    ///
    /// An `E` with zero columns describes a system without disturbance.
    pub fn with_disturbance(a: DMatrix<f64>, b: DMatrix<f64>, e: DMatrix<f64>) -> Result<Self> {
        let mut system = Self::new(a, b)?;
        if e.nrows() != system.state_dim() {
            return Err(CisError::mismatch(
                "disturbance matrix rows",
                system.state_dim(),
                e.nrows(),
            ));
        }
        if e.ncols() > 0 {
            system.e = Some(e);
        }
        Ok(system)
    }

    pub fn a(&self) -> &DMatrix<f64> {
        &self.a
    }
    pub fn b(&self) -> &DMatrix<f64> {
        &self.b
    }
    pub fn disturbance(&self) -> Option<&DMatrix<f64>> {
        self.e.as_ref()
    }

    /// State dimension `n`.
    pub fn state_dim(&self) -> usize {
        self.a.nrows()
    }
    /// Number of input channels `m`.
    pub fn num_inputs(&self) -> usize {
        self.b.ncols()
    }
    /// Disturbance dimension `d` (0 if the system has no disturbance channel).
    pub fn disturbance_dim(&self) -> usize {
        self.e.as_ref().map_or(0, |e| e.ncols())
    }
}

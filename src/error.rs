//! Error type shared by all fallible operations of the crate.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CisError {
    #[error("{what} must be square, got {rows}x{cols}")]
    NonSquare {
        what: &'static str,
        rows: usize,
        cols: usize,
    },

    #[error("dimension mismatch in {what}: expected {expected}, found {found}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("pair (A, B) is not controllable: controllability rank {rank} < state dimension {dim}")]
    NotControllable { rank: usize, dim: usize },

    #[error("input channel {input} is linearly dependent on the preceding channels")]
    DependentInput { input: usize },

    #[error("{what} is singular")]
    Singular { what: &'static str },

    #[error("horizon length must be positive (level = {level}, transient = {transient})")]
    EmptyHorizon { level: usize, transient: usize },

    #[error("disturbance region must be set before computing a robust invariant set")]
    MissingDisturbanceRegion,

    #[error("polyhedron is unbounded")]
    Unbounded,

    #[error("polyhedron is empty")]
    Empty,

    #[error("invalid H-representation at line {line}: {message}")]
    Parse { line: usize, message: String },
}

impl CisError {
    pub(crate) fn mismatch(what: &'static str, expected: usize, found: usize) -> Self {
        CisError::DimensionMismatch {
            what,
            expected,
            found,
        }
    }
}

pub type Result<T, E = CisError> = std::result::Result<T, E>;

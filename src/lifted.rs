//! Lifted (augmented) autonomous system.
//!
//! A finite buffer of `length = level + transient` pre-planned moves is attached to every
//! input channel. The augmented vector `ξ = [z; w]` stacks the canonical state `z` with
//! the buffers `w = [w_1; ...; w_m]` and evolves autonomously:
//!
//! ```text
//! ξ⁺ = [ A_c   B_c K ] ξ
//!      [  0      P   ]
//! ```
//!
//! `K` selects the head of every buffer (the move applied now), `P` shifts every buffer
//! one slot towards its head, filling the tail with zero.

use log::{debug, trace};
use nalgebra::DMatrix;

use crate::error::{CisError, Result};
use crate::utils::{blkdiag, place_block};

/// Horizon parameters `(L, T)` of the lifted system.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct Horizon {
    pub level: usize,
    pub transient: usize,
}

impl Horizon {
    pub fn new(level: usize, transient: usize) -> Self {
        Self { level, transient }
    }

    /// Buffer length per input channel, `L + T`.
    pub fn length(&self) -> usize {
        self.level + self.transient
    }
}

/// Single-input selector row `[1 0 ... 0]` of size `1 × length`.
pub fn selector_row(length: usize) -> DMatrix<f64> {
    let mut row = DMatrix::zeros(1, length);
    if length > 0 {
        row[(0, 0)] = 1.0;
    }
    row
}

/// Single-input shift register of size `length × length`: slot `i + 1` moves to slot `i`,
/// the last slot becomes zero.
pub fn shift_matrix(length: usize) -> DMatrix<f64> {
    let mut shift = DMatrix::zeros(length, length);
    for i in 1..length {
        shift[(i - 1, i)] = 1.0;
    }
    shift
}

/// The augmented transition matrix for a given [`Horizon`].
#[derive(Debug, Clone, PartialEq)]
pub struct LiftedSystem {
    horizon: Horizon,
    state_dim: usize,
    num_inputs: usize,
    matrix: DMatrix<f64>,
}

impl LiftedSystem {
    /// Builds the lifted transition matrix from the canonical pair `(a, b)`.
    ///
    /// Block layout (offsets in rows/columns):
    ///
    /// - `[0, 0]`: `A_c` (`n × n`)
    /// - `[0, n]`: `B_c K` (`n × m·length`)
    /// - `[n, n]`: `P` (`m·length × m·length`)
    pub fn new(a: &DMatrix<f64>, b: &DMatrix<f64>, horizon: Horizon) -> Result<Self> {
        let length = horizon.length();
        if length == 0 {
            return Err(CisError::EmptyHorizon {
                level: horizon.level,
                transient: horizon.transient,
            });
        }
        if !a.is_square() {
            return Err(CisError::NonSquare {
                what: "canonical state matrix",
                rows: a.nrows(),
                cols: a.ncols(),
            });
        }
        if b.nrows() != a.nrows() {
            return Err(CisError::mismatch("canonical input matrix rows", a.nrows(), b.nrows()));
        }

        let n = a.nrows();
        let m = b.ncols();
        debug!(
            "LiftedSystem::new(n = {}, m = {}, level = {}, transient = {})",
            n, m, horizon.level, horizon.transient
        );

        let k = blkdiag(&selector_row(length), m);
        let p = blkdiag(&shift_matrix(length), m);

        let dim = n + m * length;
        let mut matrix = DMatrix::zeros(dim, dim);
        place_block(&mut matrix, 0, 0, a);
        place_block(&mut matrix, 0, n, &(b * &k));
        place_block(&mut matrix, n, n, &p);

        trace!("A_lifted = {}", matrix);

        Ok(Self {
            horizon,
            state_dim: n,
            num_inputs: m,
            matrix,
        })
    }

    pub fn horizon(&self) -> Horizon {
        self.horizon
    }

    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.matrix
    }

    /// Dimension of the augmented vector, `n + m·length`.
    pub fn dim(&self) -> usize {
        self.matrix.nrows()
    }

    /// Canonical state dimension `n`.
    pub fn state_dim(&self) -> usize {
        self.state_dim
    }

    /// Total buffer dimension `m·length`.
    pub fn buffer_dim(&self) -> usize {
        self.num_inputs * self.horizon.length()
    }

    /// Successive powers `A_lifted¹, A_lifted², ...`.
    pub fn powers(&self) -> Powers<'_> {
        Powers {
            base: &self.matrix,
            current: self.matrix.clone(),
        }
    }
}

/// Iterator over the powers of a square matrix, starting from the first power.
///
/// The next power is computed into a fresh buffer before the current one is handed out,
/// so the product never reads from the matrix it writes.
pub struct Powers<'a> {
    base: &'a DMatrix<f64>,
    current: DMatrix<f64>,
}

impl Iterator for Powers<'_> {
    type Item = DMatrix<f64>;

    fn next(&mut self) -> Option<Self::Item> {
        let next = &self.current * self.base;
        Some(std::mem::replace(&mut self.current, next))
    }
}

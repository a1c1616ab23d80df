//! Controllability canonical forms.
//!
//! The invariant-set construction works in coordinates where the controllability
//! structure of `(A, B)` is explicit. [`CanonicalForm`] is the capability the generator
//! needs from such a coordinate system; [`BrunovskyForm`] provides it by bringing a
//! controllable pair into Brunovsky normal form: `m` decoupled integrator chains of
//! lengths `μ_1, ..., μ_m` (the controllability indices).
//!
//! ```text
//! x = T z                  (state transform)
//! u = F x + G v            (feedback, new input v)
//!
//! z⁺ = A_c z + B_c v       A_c = T⁻¹ (A + B F) T,  B_c = T⁻¹ B G
//! ```
//!
//! `A_c` is block diagonal with shift blocks (ones on the superdiagonal), hence nilpotent
//! of index `μ_max`, and `B_c` has a single unit entry per input at the tail of its chain.

use log::{debug, trace};
use nalgebra::{DMatrix, DVector, RowDVector};

use crate::error::{CisError, Result};
use crate::polyhedron::HPolyhedron;
use crate::utils::flush_zeros;

/// Coordinate system exposing the controllability structure of a linear system.
pub trait CanonicalForm {
    /// State dimension `n`.
    fn state_dim(&self) -> usize;

    /// Controllability index of every input channel.
    fn controllability_indices(&self) -> &[usize];

    /// Largest controllability index, `μ_max`.
    fn max_controllability_index(&self) -> usize {
        self.controllability_indices().iter().copied().max().unwrap_or(0)
    }

    /// The pair `(A_c, B_c)` in canonical coordinates.
    fn canonical_system(&self) -> (&DMatrix<f64>, &DMatrix<f64>);

    /// `T` such that `original = T · canonical`.
    fn transform(&self) -> &DMatrix<f64>;

    /// `T⁻¹`, mapping original coordinates to canonical ones.
    fn inverse_transform(&self) -> &DMatrix<f64>;

    /// Re-expresses a state-space polyhedron `{ x : G x <= g }` in canonical coordinates,
    /// `{ z : G T z <= g }`.
    fn canonical_constraints(&self, polyhedron: &HPolyhedron) -> Result<HPolyhedron> {
        polyhedron.linear_preimage(self.transform())
    }

    /// Disturbance matrix in canonical coordinates, `T⁻¹ E`.
    fn canonical_disturbance(&self, e: &DMatrix<f64>) -> Result<DMatrix<f64>> {
        if e.nrows() != self.state_dim() {
            return Err(CisError::mismatch(
                "disturbance matrix rows",
                self.state_dim(),
                e.nrows(),
            ));
        }
        Ok(self.inverse_transform() * e)
    }
}

/// Brunovsky normal form of a controllable pair `(A, B)`.
#[derive(Debug, Clone)]
pub struct BrunovskyForm {
    indices: Vec<usize>,
    a_canonical: DMatrix<f64>,
    b_canonical: DMatrix<f64>,
    transform: DMatrix<f64>,
    inverse_transform: DMatrix<f64>,
    feedback: DMatrix<f64>,
    input_gain: DMatrix<f64>,
}

impl BrunovskyForm {
    /// Computes the Brunovsky form of `(a, b)`.
    ///
    /// The controllability scan decides rank relative to each column's norm
    /// ([`RANK_TOLERANCE`]), so it does not depend on the scaling of `A` and `B`.
    /// `tolerance` is the magnitude below which entries of the canonical matrices are
    /// flushed to zero.
    ///
    /// # Errors
    ///
    /// - [`CisError::NonSquare`] / [`CisError::DimensionMismatch`] on malformed matrices
    /// - [`CisError::NotControllable`] if `(A, B)` is not controllable
    /// - [`CisError::DependentInput`] if some column of `B` adds no new direction
    pub fn new(a: &DMatrix<f64>, b: &DMatrix<f64>, tolerance: f64) -> Result<Self> {
        if !a.is_square() {
            return Err(CisError::NonSquare {
                what: "state matrix",
                rows: a.nrows(),
                cols: a.ncols(),
            });
        }
        if b.nrows() != a.nrows() {
            return Err(CisError::mismatch("input matrix rows", a.nrows(), b.nrows()));
        }

        let n = a.nrows();
        let m = b.ncols();
        debug!("BrunovskyForm::new(n = {}, m = {})", n, m);

        let indices = controllability_indices(a, b)?;
        debug!("controllability indices = {:?}", indices);

        // Controllability matrix in chain order: [b_1 .. A^{μ_1-1} b_1, ..., b_m .. A^{μ_m-1} b_m].
        let mut chain_columns = Vec::with_capacity(n);
        for (i, &mu) in indices.iter().enumerate() {
            let mut column = b.column(i).into_owned();
            for _ in 0..mu {
                chain_columns.push(column.clone());
                column = a * column;
            }
        }
        let c_bar = DMatrix::from_columns(&chain_columns);
        let c_bar_inv = c_bar
            .try_inverse()
            .ok_or(CisError::Singular { what: "controllability matrix" })?;

        // q_i is the row of C̄⁻¹ at the tail of chain i; the new state stacks q_i A^k.
        let mut s_rows: Vec<RowDVector<f64>> = Vec::with_capacity(n);
        let mut r_rows: Vec<RowDVector<f64>> = Vec::with_capacity(m);
        let mut gamma_rows: Vec<RowDVector<f64>> = Vec::with_capacity(m);
        let mut sigma = 0;
        for &mu in &indices {
            sigma += mu;
            let mut q = c_bar_inv.row(sigma - 1).into_owned();
            for k in 0..mu {
                if k + 1 == mu {
                    gamma_rows.push(&q * b);
                }
                s_rows.push(q.clone());
                q = q * a;
            }
            r_rows.push(q);
        }
        let s = DMatrix::from_rows(&s_rows);
        let r = DMatrix::from_rows(&r_rows);
        let gamma = DMatrix::from_rows(&gamma_rows);

        let transform = s
            .clone()
            .try_inverse()
            .ok_or(CisError::Singular { what: "state transform" })?;
        let input_gain = gamma
            .try_inverse()
            .ok_or(CisError::Singular { what: "input coupling matrix" })?;
        let feedback = -(&input_gain * r);

        let mut a_canonical = &s * (a + b * &feedback) * &transform;
        let mut b_canonical = &s * b * &input_gain;
        flush_zeros(&mut a_canonical, tolerance);
        flush_zeros(&mut b_canonical, tolerance);

        trace!("A_c = {}", a_canonical);
        trace!("B_c = {}", b_canonical);
        trace!("T = {}", transform);

        Ok(Self {
            indices,
            a_canonical,
            b_canonical,
            transform,
            inverse_transform: s,
            feedback,
            input_gain,
        })
    }

    /// Feedback gain `F` of the normalizing input transformation `u = F x + G v`.
    pub fn feedback(&self) -> &DMatrix<f64> {
        &self.feedback
    }

    /// Input gain `G` of the normalizing input transformation `u = F x + G v`.
    pub fn input_gain(&self) -> &DMatrix<f64> {
        &self.input_gain
    }
}

impl CanonicalForm for BrunovskyForm {
    fn state_dim(&self) -> usize {
        self.a_canonical.nrows()
    }
    fn controllability_indices(&self) -> &[usize] {
        &self.indices
    }
    fn canonical_system(&self) -> (&DMatrix<f64>, &DMatrix<f64>) {
        (&self.a_canonical, &self.b_canonical)
    }
    fn transform(&self) -> &DMatrix<f64> {
        &self.transform
    }
    fn inverse_transform(&self) -> &DMatrix<f64> {
        &self.inverse_transform
    }
}

/// Relative threshold below which a Krylov column adds no new direction.
///
/// The column is normalized and projected out of the span of the kept columns; it is
/// kept if the residual norm exceeds this value. For an integrator chain discretized
/// with step `dt`, the residual of `A^k b` is of order `dt^k`.
pub const RANK_TOLERANCE: f64 = 1e-12;

/// Controllability indices by the column scan `b_1..b_m, A b_1..A b_m, A² b_1, ...`.
///
/// A column is kept when it raises the rank of the kept set. Once `A^k b_i` is dependent,
/// every higher power of that chain is too, so the chain is closed.
fn controllability_indices(a: &DMatrix<f64>, b: &DMatrix<f64>) -> Result<Vec<usize>> {
    let n = a.nrows();
    let m = b.ncols();

    let mut indices = vec![0; m];
    let mut open = vec![true; m];
    let mut current: Vec<_> = (0..m).map(|i| b.column(i).into_owned()).collect();
    let mut basis: Vec<DVector<f64>> = Vec::with_capacity(n);

    for _ in 0..n {
        for i in 0..m {
            if !open[i] || basis.len() == n {
                continue;
            }
            let norm = current[i].norm();
            let residual = if norm > 0.0 {
                orthogonal_residual(&basis, &(&current[i] / norm))
            } else {
                DVector::zeros(n)
            };
            let r = residual.norm();
            trace!("column {} of chain {}: residual {:e}", indices[i], i, r);
            if r > RANK_TOLERANCE {
                basis.push(residual / r);
                indices[i] += 1;
            } else {
                open[i] = false;
            }
        }
        if basis.len() == n || !open.iter().any(|&o| o) {
            break;
        }
        for column in current.iter_mut() {
            *column = a * &*column;
        }
    }

    if basis.len() < n {
        return Err(CisError::NotControllable {
            rank: basis.len(),
            dim: n,
        });
    }
    if let Some(input) = indices.iter().position(|&mu| mu == 0) {
        return Err(CisError::DependentInput { input });
    }
    Ok(indices)
}

/// Component of `column` orthogonal to the orthonormal `basis`.
///
/// Modified Gram-Schmidt, run twice to restore orthogonality lost to cancellation.
fn orthogonal_residual(basis: &[DVector<f64>], column: &DVector<f64>) -> DVector<f64> {
    let mut residual = column.clone();
    for _ in 0..2 {
        for q in basis {
            let projection = q.dot(&residual);
            residual.axpy(-projection, q, 1.0);
        }
    }
    residual
}

//! Convex polyhedra in half-space and vertex representation.
//!
//! [`HPolyhedron`] stores `{ x : A x <= b }` and is the currency of the whole crate:
//! safe regions, disturbance regions, input constraints and the resulting invariant set
//! are all H-polyhedra. [`VPolytope`] is the convex hull of finitely many points; it is
//! what an affine image of a bounded H-polyhedron becomes, since mapping vertices is exact
//! while mapping half-spaces through a non-invertible map is not.
//!
//! Both representations implement [`SupportFunction`], which is all the Pontryagin
//! difference needs:
//!
//! ```text
//! P ⊖ Q = { x : a_i·x <= b_i - h_Q(a_i) }     h_Q(a) = max { a·q : q ∈ Q }
//! ```
//!
//! The difference keeps the row structure of `P`; no redundant rows are removed.
//!
//! # Examples
//!
//! ```
//! use cis_rs::polyhedron::HPolyhedron;
//! use nalgebra::{DMatrix, DVector};
//!
//! let safe = HPolyhedron::symmetric_box(&[5.0, 5.0]).unwrap();
//! let noise = HPolyhedron::symmetric_box(&[0.5]).unwrap();
//!
//! // Disturbance enters the second state only.
//! let image = noise.affine_image(&DMatrix::from_row_slice(2, 1, &[0.0, 1.0])).unwrap();
//! let tight = safe.pontryagin_difference(&image).unwrap();
//!
//! assert_eq!(tight.num_constraints(), safe.num_constraints());
//! assert!(tight.contains(&DVector::from_vec(vec![0.0, 4.5])));
//! assert!(!tight.contains(&DVector::from_vec(vec![0.0, 4.6])));
//! ```

use std::fmt;

use itertools::Itertools;
use log::debug;
use nalgebra::{DMatrix, DVector};

use crate::error::{CisError, Result};

/// Numerical tolerance for containment, vertex deduplication and singularity tests.
pub const TOLERANCE: f64 = 1e-9;

/// Capability of a convex set to report its support function.
pub trait SupportFunction {
    /// Ambient dimension.
    fn dim(&self) -> usize;

    /// `h(direction) = max { direction·x : x in the set }`.
    fn support(&self, direction: &DVector<f64>) -> Result<f64>;

    /// Support function evaluated at every row of `directions`.
    fn support_rows(&self, directions: &DMatrix<f64>) -> Result<DVector<f64>> {
        if directions.ncols() != self.dim() {
            return Err(CisError::mismatch(
                "support direction",
                self.dim(),
                directions.ncols(),
            ));
        }
        let values = directions
            .row_iter()
            .map(|row| self.support(&row.transpose()))
            .collect::<Result<Vec<_>>>()?;
        Ok(DVector::from_vec(values))
    }
}

/// A convex polyhedron `{ x : A x <= b }`.
#[derive(Debug, Clone, PartialEq)]
pub struct HPolyhedron {
    a: DMatrix<f64>,
    b: DVector<f64>,
}

impl HPolyhedron {
    /// Creates a polyhedron from the coefficient matrix `a` and the bound vector `b`.
    pub fn new(a: DMatrix<f64>, b: DVector<f64>) -> Result<Self> {
        if a.nrows() != b.len() {
            return Err(CisError::mismatch("bound vector length", a.nrows(), b.len()));
        }
        Ok(Self { a, b })
    }

    /// Axis-aligned box `lower <= x <= upper`.
    ///
    /// Rows come in pairs per coordinate: `x_i <= upper_i`, then `-x_i <= -lower_i`.
    pub fn from_box(lower: &[f64], upper: &[f64]) -> Result<Self> {
        if lower.len() != upper.len() {
            return Err(CisError::mismatch("box bounds", lower.len(), upper.len()));
        }
        let n = lower.len();
        let mut a = DMatrix::zeros(2 * n, n);
        let mut b = DVector::zeros(2 * n);
        for i in 0..n {
            a[(2 * i, i)] = 1.0;
            b[2 * i] = upper[i];
            a[(2 * i + 1, i)] = -1.0;
            b[2 * i + 1] = -lower[i];
        }
        Self::new(a, b)
    }

    /// Symmetric box `|x_i| <= bounds_i`.
    pub fn symmetric_box(bounds: &[f64]) -> Result<Self> {
        let lower: Vec<f64> = bounds.iter().map(|&v| -v).collect();
        Self::from_box(&lower, bounds)
    }

    /// Coefficient matrix `A`.
    pub fn a(&self) -> &DMatrix<f64> {
        &self.a
    }
    /// Bound vector `b`.
    pub fn b(&self) -> &DVector<f64> {
        &self.b
    }

    /// Ambient dimension (number of columns of `A`).
    pub fn dim(&self) -> usize {
        self.a.ncols()
    }

    /// Number of half-space constraints (rows of `A`).
    pub fn num_constraints(&self) -> usize {
        self.a.nrows()
    }

    /// Componentwise slack `b - A x`; all entries are non-negative iff `x` is inside.
    pub fn slack(&self, x: &DVector<f64>) -> DVector<f64> {
        &self.b - &self.a * x
    }

    /// Checks whether `x` satisfies every constraint up to [`TOLERANCE`].
    ///
    /// # Panics
    ///
    /// Panics if `x.len() != self.dim()`.
    pub fn contains(&self, x: &DVector<f64>) -> bool {
        assert_eq!(x.len(), self.dim(), "point dimension mismatch");
        self.slack(x).iter().all(|&s| s >= -TOLERANCE)
    }

    /// Preimage under a linear map: `{ z : M z ∈ P } = { z : A M z <= b }`.
    pub fn linear_preimage(&self, map: &DMatrix<f64>) -> Result<HPolyhedron> {
        if map.nrows() != self.dim() {
            return Err(CisError::mismatch("preimage map rows", self.dim(), map.nrows()));
        }
        Self::new(&self.a * map, self.b.clone())
    }

    /// Checks whether the polyhedron is bounded.
    ///
    /// The polyhedron is bounded iff its recession cone `{ y : A y <= 0 }` is `{0}`:
    /// `A` has full column rank (no lineality space) and no extreme ray exists. Extreme
    /// rays of a pointed cone lie on `dim - 1` linearly independent tight rows, so
    /// every such row subset is tried. An infeasible all-zero row makes the set empty,
    /// hence bounded.
    pub fn is_bounded(&self) -> bool {
        match self.unit_rows() {
            Some((a, _)) => recession_cone_is_trivial(&a),
            None => true,
        }
    }

    /// Enumerates the vertices of a bounded, non-empty polyhedron.
    ///
    /// Every subset of `dim` rows with a non-singular coefficient block is solved as a
    /// system of equalities and the solution kept if it satisfies all other rows.
    /// Exhaustive, hence meant for the low-dimensional sets this crate works with
    /// (disturbance and input regions).
    ///
    /// Rows are scaled to unit norm first, so the singularity test compares angles
    /// between rows. Feasibility is checked relative to the largest row offset and
    /// near-coincident solutions are merged relative to the spread of all candidates;
    /// the result does not depend on how the rows or the set itself are scaled.
    pub fn vertices(&self) -> Result<Vec<DVector<f64>>> {
        let d = self.dim();
        if d == 0 {
            return Err(CisError::Empty);
        }
        let (a, b) = self.unit_rows().ok_or(CisError::Empty)?;
        if !recession_cone_is_trivial(&a) {
            return Err(CisError::Unbounded);
        }

        let feasibility = TOLERANCE * b.amax();
        let mut candidates: Vec<DVector<f64>> = Vec::new();
        for rows in (0..a.nrows()).combinations(d) {
            let sub_a = a.select_rows(rows.iter());
            let sub_b = b.select_rows(rows.iter());
            let lu = sub_a.lu();
            if lu.determinant().abs() < TOLERANCE {
                continue;
            }
            let Some(x) = lu.solve(&sub_b) else {
                continue;
            };
            if (&b - &a * &x).iter().all(|&s| s >= -feasibility) {
                candidates.push(x);
            }
        }
        if candidates.is_empty() {
            return Err(CisError::Empty);
        }

        let spread = candidates
            .iter()
            .tuple_combinations()
            .map(|(p, q)| (p - q).amax())
            .fold(0.0, f64::max);
        let merge = TOLERANCE.sqrt() * spread;

        let mut vertices: Vec<DVector<f64>> = Vec::new();
        for x in candidates {
            if !vertices.iter().any(|v| (v - &x).amax() <= merge) {
                vertices.push(x);
            }
        }

        debug!(
            "vertices(dim = {}, rows = {}) -> {} vertices",
            d,
            self.num_constraints(),
            vertices.len()
        );
        Ok(vertices)
    }

    /// Rows scaled to unit norm, with all-zero rows dropped.
    ///
    /// Returns `None` if an all-zero row is infeasible (`0 <= b_i < 0`).
    fn unit_rows(&self) -> Option<(DMatrix<f64>, DVector<f64>)> {
        let mut rows = Vec::with_capacity(self.num_constraints());
        let mut bounds = Vec::with_capacity(self.num_constraints());
        for (row, &bound) in self.a.row_iter().zip(self.b.iter()) {
            let norm = row.norm();
            if norm == 0.0 {
                if bound < 0.0 {
                    return None;
                }
                continue;
            }
            rows.push(row / norm);
            bounds.push(bound / norm);
        }
        let a = if rows.is_empty() {
            DMatrix::zeros(0, self.dim())
        } else {
            DMatrix::from_rows(&rows)
        };
        Some((a, DVector::from_vec(bounds)))
    }

    /// Image under the linear map `M`: `{ M x : x ∈ P }`, in vertex representation.
    pub fn affine_image(&self, map: &DMatrix<f64>) -> Result<VPolytope> {
        if map.ncols() != self.dim() {
            return Err(CisError::mismatch("affine map columns", self.dim(), map.ncols()));
        }
        let vertices = self.vertices()?.into_iter().map(|v| map * v).collect();
        VPolytope::new(map.nrows(), vertices)
    }

    /// Pontryagin difference `P ⊖ Q = { x : x + q ∈ P for all q ∈ Q }`.
    ///
    /// Keeps the rows of `P` and tightens every bound by the support of `Q` in the row
    /// direction.
    pub fn pontryagin_difference<S: SupportFunction + ?Sized>(&self, other: &S) -> Result<HPolyhedron> {
        if other.dim() != self.dim() {
            return Err(CisError::mismatch(
                "Pontryagin difference operand",
                self.dim(),
                other.dim(),
            ));
        }
        let support = other.support_rows(&self.a)?;
        Self::new(self.a.clone(), &self.b - support)
    }
}

impl SupportFunction for HPolyhedron {
    fn dim(&self) -> usize {
        self.a.ncols()
    }

    fn support(&self, direction: &DVector<f64>) -> Result<f64> {
        VPolytope::new(self.dim(), self.vertices()?)?.support(direction)
    }

    fn support_rows(&self, directions: &DMatrix<f64>) -> Result<DVector<f64>> {
        // Enumerate once, not per direction.
        VPolytope::new(self.dim(), self.vertices()?)?.support_rows(directions)
    }
}

impl fmt::Display for HPolyhedron {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "HPolyhedron(dim = {}, constraints = {})",
            self.dim(),
            self.num_constraints()
        )?;
        for (row, bound) in self.a.row_iter().zip(self.b.iter()) {
            let mut first = true;
            for (j, &c) in row.iter().enumerate() {
                if c == 0.0 {
                    continue;
                }
                if first {
                    write!(f, "  {:+.4} x{}", c, j + 1)?;
                    first = false;
                } else {
                    write!(f, " {:+.4} x{}", c, j + 1)?;
                }
            }
            if first {
                write!(f, "  0")?;
            }
            writeln!(f, " <= {:.4}", bound)?;
        }
        Ok(())
    }
}

/// Convex hull of a finite set of points.
#[derive(Debug, Clone, PartialEq)]
pub struct VPolytope {
    dim: usize,
    vertices: Vec<DVector<f64>>,
}

impl VPolytope {
    /// Creates the convex hull of `vertices`, all of which must live in `R^dim`.
    pub fn new(dim: usize, vertices: Vec<DVector<f64>>) -> Result<Self> {
        if vertices.is_empty() {
            return Err(CisError::Empty);
        }
        if let Some(v) = vertices.iter().find(|v| v.len() != dim) {
            return Err(CisError::mismatch("vertex dimension", dim, v.len()));
        }
        Ok(Self { dim, vertices })
    }

    pub fn vertices(&self) -> &[DVector<f64>] {
        &self.vertices
    }
}

impl SupportFunction for VPolytope {
    fn dim(&self) -> usize {
        self.dim
    }

    fn support(&self, direction: &DVector<f64>) -> Result<f64> {
        if direction.len() != self.dim {
            return Err(CisError::mismatch("support direction", self.dim, direction.len()));
        }
        Ok(self
            .vertices
            .iter()
            .map(|v| v.dot(direction))
            .fold(f64::NEG_INFINITY, f64::max))
    }
}

/// Whether `{ y : a y <= 0 }` is `{0}`; `a` must have unit rows.
fn recession_cone_is_trivial(a: &DMatrix<f64>) -> bool {
    let d = a.ncols();
    if d == 0 {
        return true;
    }
    if a.nrows() < d || a.rank(TOLERANCE) < d {
        return false;
    }
    let is_ray = |y: &DVector<f64>| (a * y).iter().all(|&v| v <= TOLERANCE);

    if d == 1 {
        let y = DVector::from_element(1, 1.0);
        return !is_ray(&y) && !is_ray(&-y);
    }

    for rows in (0..a.nrows()).combinations(d - 1) {
        let sub = a.select_rows(rows.iter());
        let Some(y) = null_direction(&sub) else {
            continue;
        };
        if is_ray(&y) || is_ray(&-y) {
            return false;
        }
    }
    true
}

/// Unit direction spanning the null space of a `(d-1) × d` matrix, if it has rank `d - 1`.
///
/// Computed as the generalized cross product: component `j` is the signed minor obtained
/// by deleting column `j`.
fn null_direction(m: &DMatrix<f64>) -> Option<DVector<f64>> {
    let d = m.ncols();
    debug_assert_eq!(m.nrows() + 1, d);
    let y = DVector::from_iterator(
        d,
        (0..d).map(|j| {
            let minor = m.clone().remove_column(j).determinant();
            if j % 2 == 0 {
                minor
            } else {
                -minor
            }
        }),
    );
    let norm = y.norm();
    if norm < TOLERANCE {
        None
    } else {
        Some(y / norm)
    }
}

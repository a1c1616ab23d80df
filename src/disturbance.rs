//! Safe regions tightened against accumulated disturbance.
//!
//! For a disturbed system `z⁺ = A_c z + B_c v + E_c w`, `w ∈ W`, entry `i` of the
//! sequence is
//!
//! ```text
//! S_i = S ⊖ (A_c^i E_c) W
//! ```
//!
//! the states that stay in `S` whatever disturbance entered `i` steps earlier.
//! Without disturbance the sequence is the single entry `S`, reused at every step.

use log::debug;
use nalgebra::DMatrix;

use crate::error::{CisError, Result};
use crate::polyhedron::HPolyhedron;

/// Ordered sequence of shrunk safe regions, indexed by propagation step.
///
/// Never empty. Indexing past the end clamps to the last entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ShrunkSafeSets {
    sets: Vec<HPolyhedron>,
}

impl ShrunkSafeSets {
    /// Single-entry sequence for a system without disturbance.
    pub fn undisturbed(safe_region: HPolyhedron) -> Self {
        Self {
            sets: vec![safe_region],
        }
    }

    /// Tightens `safe_region` for `steps` propagation steps.
    ///
    /// All arguments are in canonical coordinates: `a` is the canonical state matrix,
    /// `e` the canonical disturbance matrix and `disturbance_region` lives in the
    /// disturbance space. `steps` is clamped to at least one entry.
    pub fn tightened(
        safe_region: &HPolyhedron,
        a: &DMatrix<f64>,
        e: &DMatrix<f64>,
        disturbance_region: &HPolyhedron,
        steps: usize,
    ) -> Result<Self> {
        let n = safe_region.dim();
        if a.shape() != (n, n) {
            return Err(CisError::mismatch("canonical state matrix", n, a.nrows()));
        }
        if e.nrows() != n {
            return Err(CisError::mismatch("disturbance matrix rows", n, e.nrows()));
        }
        if disturbance_region.dim() != e.ncols() {
            return Err(CisError::mismatch(
                "disturbance region",
                e.ncols(),
                disturbance_region.dim(),
            ));
        }

        let steps = steps.max(1);
        debug!("ShrunkSafeSets::tightened(n = {}, steps = {})", n, steps);

        let mut propagation = DMatrix::identity(n, n);
        let mut sets = Vec::with_capacity(steps);
        for _ in 0..steps {
            let image = disturbance_region.affine_image(&(&propagation * e))?;
            sets.push(safe_region.pontryagin_difference(&image)?);
            propagation = &propagation * a;
        }
        Ok(Self { sets })
    }

    /// Number of distinct entries.
    pub fn len(&self) -> usize {
        self.sets.len()
    }

    /// Always `false`; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    /// Index actually used for propagation step `t`: `min(t, len - 1)`.
    pub fn clamp_index(&self, t: usize) -> usize {
        t.min(self.sets.len() - 1)
    }

    /// Safe region for propagation step `t`, reusing the last entry past the end.
    pub fn get(&self, t: usize) -> &HPolyhedron {
        &self.sets[self.clamp_index(t)]
    }

    pub fn iter(&self) -> impl Iterator<Item = &HPolyhedron> {
        self.sets.iter()
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use nalgebra::DVector;

    fn shift2() -> DMatrix<f64> {
        DMatrix::from_row_slice(2, 2, &[0.0, 1.0, 0.0, 0.0])
    }

    #[test]
    fn test_undisturbed() {
        let safe = HPolyhedron::symmetric_box(&[5.0, 5.0]).unwrap();
        let seq = ShrunkSafeSets::undisturbed(safe.clone());
        assert_eq!(seq.len(), 1);
        assert!(!seq.is_empty());
        assert_eq!(seq.get(0), &safe);
        assert_eq!(seq.get(7), &safe);
    }

    #[test]
    fn test_clamp_index() {
        let safe = HPolyhedron::symmetric_box(&[5.0, 5.0]).unwrap();
        let w = HPolyhedron::symmetric_box(&[0.1]).unwrap();
        let e = DMatrix::from_row_slice(2, 1, &[0.0, 1.0]);
        let seq = ShrunkSafeSets::tightened(&safe, &shift2(), &e, &w, 2).unwrap();
        assert_eq!(seq.len(), 2);
        assert_eq!(seq.clamp_index(0), 0);
        assert_eq!(seq.clamp_index(1), 1);
        assert_eq!(seq.clamp_index(2), 1);
        assert_eq!(seq.clamp_index(100), 1);
        assert_eq!(seq.get(100), seq.get(1));
    }

    #[test]
    fn test_tightening() {
        let safe = HPolyhedron::symmetric_box(&[5.0, 5.0]).unwrap();
        let w = HPolyhedron::symmetric_box(&[0.1]).unwrap();
        let e = DMatrix::from_row_slice(2, 1, &[0.0, 1.0]);
        let seq = ShrunkSafeSets::tightened(&safe, &shift2(), &e, &w, 2).unwrap();

        // Step 0: disturbance hits x2 directly.
        let s0 = seq.get(0);
        assert_eq!(s0.a(), safe.a());
        assert!((s0.b() - DVector::from_vec(vec![5.0, 5.0, 4.9, 4.9])).amax() < 1e-12);

        // Step 1: it has propagated into x1, and A_c E_c no longer touches x2.
        let s1 = seq.get(1);
        assert!((s1.b() - DVector::from_vec(vec![4.9, 4.9, 5.0, 5.0])).amax() < 1e-12);
    }

    #[test]
    fn test_zero_steps_keeps_one_entry() {
        let safe = HPolyhedron::symmetric_box(&[1.0]).unwrap();
        let w = HPolyhedron::symmetric_box(&[0.25]).unwrap();
        let a = DMatrix::from_element(1, 1, 0.5);
        let e = DMatrix::from_element(1, 1, 1.0);
        let seq = ShrunkSafeSets::tightened(&safe, &a, &e, &w, 0).unwrap();
        assert_eq!(seq.len(), 1);
        assert_eq!(seq.get(0).b(), &DVector::from_vec(vec![0.75, 0.75]));
    }

    #[test]
    fn test_rejects_mismatched_region() {
        let safe = HPolyhedron::symmetric_box(&[1.0, 1.0]).unwrap();
        let w = HPolyhedron::symmetric_box(&[0.1, 0.1]).unwrap();
        let e = DMatrix::from_row_slice(2, 1, &[0.0, 1.0]);
        assert!(ShrunkSafeSets::tightened(&safe, &shift2(), &e, &w, 2).is_err());
    }
}

//! Controlled invariant set generator.
//!
//! [`CisGenerator`] owns a linear system, its canonical form and two caches: the lifted
//! transition matrix for the last used [`Horizon`] and the last computed invariant set.
//!
//! # Algorithm
//!
//! With `G z <= g` the safe region in canonical coordinates (`r` rows), `S_t` the shrunk
//! safe regions and `Â` the lifted transition matrix, the invariant set is
//!
//! ```text
//! { ξ = [z; w] :  G z <= g,
//!                 [G_t 0] Â^(t+1) ξ <= g_t   for t = 0 .. μ_max + length - 2 }
//! ```
//!
//! i.e. `r · (μ_max + length)` half-spaces over `n + m · length` columns. The state columns
//! are finally mapped back to the original basis; buffer columns are left as they are.
//!
//! # Examples
//!
//! ```
//! use cis_rs::generator::CisGenerator;
//! use cis_rs::polyhedron::HPolyhedron;
//! use nalgebra::{DMatrix, DVector};
//!
//! let a = DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 0.0, 1.0]);
//! let b = DMatrix::from_row_slice(2, 1, &[0.0, 1.0]);
//! let mut generator = CisGenerator::new(a, b).unwrap();
//! assert!(generator.fetch_cis().is_none());
//!
//! let safe = HPolyhedron::symmetric_box(&[5.0, 5.0]).unwrap();
//! let cis = generator.compute_cis(&safe, 1, 0).unwrap();
//! assert_eq!(cis.dim(), 3);
//! assert_eq!(cis.num_constraints(), 12);
//! assert!(cis.contains(&DVector::zeros(3)));
//! ```

use std::borrow::Cow;

use log::{debug, trace};
use nalgebra::{DMatrix, DVector};

use crate::canonical::{BrunovskyForm, CanonicalForm};
use crate::disturbance::ShrunkSafeSets;
use crate::error::{CisError, Result};
use crate::lifted::{Horizon, LiftedSystem};
use crate::polyhedron::HPolyhedron;
use crate::system::LinearSystem;
use crate::utils::place_block;

/// Configuration of a [`CisGenerator`].
///
/// # Examples
///
/// ```
/// use cis_rs::generator::{CisConfig, CisGenerator};
/// use cis_rs::system::LinearSystem;
/// use nalgebra::DMatrix;
///
/// let system = LinearSystem::new(
///     DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 0.0, 1.0]),
///     DMatrix::from_row_slice(2, 1, &[0.0, 1.0]),
/// )
/// .unwrap();
/// let config = CisConfig { tolerance: 1e-10 };
/// let generator = CisGenerator::with_config(system, config).unwrap();
/// assert_eq!(generator.config().tolerance, 1e-10);
/// ```
#[derive(Debug, Clone)]
pub struct CisConfig {
    /// Magnitude below which canonical matrix entries are flushed to zero
    /// (default: `1e-9`).
    pub tolerance: f64,
}

impl Default for CisConfig {
    fn default() -> Self {
        Self { tolerance: 1e-9 }
    }
}

/// Generator of finite-horizon controlled (robust) invariant sets.
///
/// Not thread-safe by itself: the caches are mutated by [`compute_cis`][Self::compute_cis],
/// so concurrent callers need one generator each or an external lock.
#[derive(Debug, Clone)]
pub struct CisGenerator<C = BrunovskyForm> {
    system: LinearSystem,
    canonical: C,
    config: CisConfig,
    disturbance_region: Option<HPolyhedron>,
    input_constraint_region: Option<HPolyhedron>,
    lifted: Option<LiftedSystem>,
    lifted_builds: usize,
    cis: Option<HPolyhedron>,
}

impl CisGenerator<BrunovskyForm> {
    /// Generator for the undisturbed system `x⁺ = A x + B u`.
    pub fn new(a: DMatrix<f64>, b: DMatrix<f64>) -> Result<Self> {
        Self::with_config(LinearSystem::new(a, b)?, CisConfig::default())
    }

    /// Generator for the disturbed system `x⁺ = A x + B u + E w`.
    ///
    /// A disturbance region must be set with
    /// [`set_disturbance_region`][Self::set_disturbance_region] before computing.
    pub fn with_disturbance(a: DMatrix<f64>, b: DMatrix<f64>, e: DMatrix<f64>) -> Result<Self> {
        Self::with_config(
            LinearSystem::with_disturbance(a, b, e)?,
            CisConfig::default(),
        )
    }

    /// Generator for `system`, bringing it into Brunovsky form.
    pub fn with_config(system: LinearSystem, config: CisConfig) -> Result<Self> {
        let canonical = BrunovskyForm::new(system.a(), system.b(), config.tolerance)?;
        Self::from_parts(system, canonical, config)
    }
}

impl<C: CanonicalForm> CisGenerator<C> {
    /// Generator using a caller-provided canonical form of `system`.
    pub fn from_parts(system: LinearSystem, canonical: C, config: CisConfig) -> Result<Self> {
        if canonical.state_dim() != system.state_dim() {
            return Err(CisError::mismatch(
                "canonical form state dimension",
                system.state_dim(),
                canonical.state_dim(),
            ));
        }
        let (_, b_c) = canonical.canonical_system();
        if b_c.ncols() != system.num_inputs() {
            return Err(CisError::mismatch(
                "canonical input matrix columns",
                system.num_inputs(),
                b_c.ncols(),
            ));
        }
        if canonical.max_controllability_index() == 0 {
            return Err(CisError::NotControllable {
                rank: 0,
                dim: system.state_dim(),
            });
        }
        Ok(Self {
            system,
            canonical,
            config,
            disturbance_region: None,
            input_constraint_region: None,
            lifted: None,
            lifted_builds: 0,
            cis: None,
        })
    }

    pub fn system(&self) -> &LinearSystem {
        &self.system
    }
    pub fn canonical_form(&self) -> &C {
        &self.canonical
    }
    pub fn config(&self) -> &CisConfig {
        &self.config
    }

    /// Sets the region `W` the disturbance `w` ranges over.
    pub fn set_disturbance_region(&mut self, region: HPolyhedron) -> Result<()> {
        let d = self.system.disturbance_dim();
        if region.dim() != d {
            return Err(CisError::mismatch("disturbance region", d, region.dim()));
        }
        self.disturbance_region = Some(region);
        Ok(())
    }

    pub fn disturbance_region(&self) -> Option<&HPolyhedron> {
        self.disturbance_region.as_ref()
    }

    /// Stores the input constraint region `{ u : H u <= h }`.
    ///
    /// The region is kept for callers; the invariant-set assembly does not read it.
    pub fn set_input_constraint_region(&mut self, region: HPolyhedron) -> Result<()> {
        let m = self.system.num_inputs();
        if region.dim() != m {
            return Err(CisError::mismatch("input constraint region", m, region.dim()));
        }
        self.input_constraint_region = Some(region);
        Ok(())
    }

    pub fn input_constraint_region(&self) -> Option<&HPolyhedron> {
        self.input_constraint_region.as_ref()
    }

    /// The cached lifted system, if any.
    pub fn lifted_system(&self) -> Option<&LiftedSystem> {
        self.lifted.as_ref()
    }

    /// Number of times the lifted system has been (re)built.
    pub fn lifted_builds(&self) -> usize {
        self.lifted_builds
    }

    /// The last computed invariant set, or `None` before the first successful computation.
    pub fn fetch_cis(&self) -> Option<&HPolyhedron> {
        self.cis.as_ref()
    }

    /// Shrunk safe regions (in canonical coordinates) for a safe region given in the
    /// original basis.
    pub fn shrunk_safe_set_sequence(&self, safe_region: &HPolyhedron) -> Result<ShrunkSafeSets> {
        self.check_safe_region(safe_region)?;
        let canonical_safe = self.canonical.canonical_constraints(safe_region)?;
        self.shrink(&canonical_safe)
    }

    /// Computes the controlled invariant set for `safe_region` with horizon `(level, transient)`.
    ///
    /// The lifted system is rebuilt only if the horizon differs from the cached one. Both
    /// caches are updated together, and only on success.
    pub fn compute_cis(
        &mut self,
        safe_region: &HPolyhedron,
        level: usize,
        transient: usize,
    ) -> Result<&HPolyhedron> {
        let horizon = Horizon::new(level, transient);
        debug!(
            "compute_cis(level = {}, transient = {}, safe rows = {})",
            level,
            transient,
            safe_region.num_constraints()
        );
        self.check_safe_region(safe_region)?;
        if horizon.length() == 0 {
            return Err(CisError::EmptyHorizon { level, transient });
        }

        let lifted = self.lifted_for(horizon)?;
        let cis = self.assemble(&lifted, safe_region)?;
        let rebuilt = match lifted {
            Cow::Owned(lifted) => Some(lifted),
            Cow::Borrowed(_) => None,
        };

        if let Some(lifted) = rebuilt {
            self.lifted = Some(lifted);
            self.lifted_builds += 1;
        }
        Ok(&*self.cis.insert(cis))
    }

    fn check_safe_region(&self, safe_region: &HPolyhedron) -> Result<()> {
        let n = self.system.state_dim();
        if safe_region.dim() != n {
            return Err(CisError::mismatch("safe region", n, safe_region.dim()));
        }
        Ok(())
    }

    /// The cached lifted system if it matches `horizon`, a freshly built one otherwise.
    fn lifted_for(&self, horizon: Horizon) -> Result<Cow<'_, LiftedSystem>> {
        match &self.lifted {
            Some(lifted) if lifted.horizon() == horizon => Ok(Cow::Borrowed(lifted)),
            _ => {
                debug!("rebuilding lifted system for {:?}", horizon);
                let (a, b) = self.canonical.canonical_system();
                Ok(Cow::Owned(LiftedSystem::new(a, b, horizon)?))
            }
        }
    }

    fn shrink(&self, canonical_safe: &HPolyhedron) -> Result<ShrunkSafeSets> {
        match self.system.disturbance() {
            None => Ok(ShrunkSafeSets::undisturbed(canonical_safe.clone())),
            Some(e) => {
                let region = self
                    .disturbance_region
                    .as_ref()
                    .ok_or(CisError::MissingDisturbanceRegion)?;
                let (a, _) = self.canonical.canonical_system();
                let e = self.canonical.canonical_disturbance(e)?;
                ShrunkSafeSets::tightened(
                    canonical_safe,
                    a,
                    &e,
                    region,
                    self.canonical.max_controllability_index(),
                )
            }
        }
    }

    fn assemble(&self, lifted: &LiftedSystem, safe_region: &HPolyhedron) -> Result<HPolyhedron> {
        let n = self.system.state_dim();
        let mu_max = self.canonical.max_controllability_index();
        let length = lifted.horizon().length();

        let dyn_constraints = self.canonical.canonical_constraints(safe_region)?;
        let r = dyn_constraints.num_constraints();
        let rows = r * (mu_max + length);
        let cols = lifted.dim();

        let mut a = DMatrix::zeros(rows, cols);
        let mut b = DVector::zeros(rows);

        // Time 0: the canonical state itself must be safe.
        place_block(&mut a, 0, 0, dyn_constraints.a());
        b.rows_mut(0, r).copy_from(dyn_constraints.b());

        let sequence = self.shrink(&dyn_constraints)?;
        debug!(
            "assemble(r = {}, mu_max = {}, length = {}, shrunk sets = {}) -> {}x{}",
            r,
            mu_max,
            length,
            sequence.len(),
            rows,
            cols
        );

        // Step t constrains the state reached after t + 1 transitions.
        let steps = mu_max + length - 1;
        for (t, power) in lifted.powers().take(steps).enumerate() {
            let shrunk = sequence.get(t);
            if shrunk.num_constraints() != r {
                return Err(CisError::mismatch(
                    "shrunk safe region rows",
                    r,
                    shrunk.num_constraints(),
                ));
            }
            let mut pullback = DMatrix::zeros(r, cols);
            place_block(&mut pullback, 0, 0, shrunk.a());

            let offset = r * (t + 1);
            place_block(&mut a, offset, 0, &(pullback * power));
            b.rows_mut(offset, r).copy_from(shrunk.b());
        }

        // Canonical state columns back to the original basis: H z = H T⁻¹ x.
        let state_columns = a.columns(0, n) * self.canonical.inverse_transform();
        a.columns_mut(0, n).copy_from(&state_columns);

        trace!("CIS A = {}", a);
        trace!("CIS b = {}", b);

        HPolyhedron::new(a, b)
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::utils::matrix_power;

    fn double_integrator() -> (DMatrix<f64>, DMatrix<f64>) {
        (
            DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 0.0, 1.0]),
            DMatrix::from_row_slice(2, 1, &[0.0, 1.0]),
        )
    }

    fn safe_box() -> HPolyhedron {
        HPolyhedron::symmetric_box(&[5.0, 5.0]).unwrap()
    }

    #[test]
    fn test_fetch_before_compute() {
        let (a, b) = double_integrator();
        let generator = CisGenerator::new(a, b).unwrap();
        assert!(generator.fetch_cis().is_none());
        assert!(generator.lifted_system().is_none());
        assert_eq!(generator.lifted_builds(), 0);
    }

    #[test]
    fn test_dimensions() {
        let (a, b) = double_integrator();
        let mut generator = CisGenerator::new(a, b).unwrap();
        let mu_max = generator.canonical_form().max_controllability_index();
        assert_eq!(mu_max, 2);

        for (level, transient) in [(1, 0), (2, 1), (0, 3)] {
            let cis = generator.compute_cis(&safe_box(), level, transient).unwrap();
            let length = level + transient;
            assert_eq!(cis.dim(), 2 + length);
            assert_eq!(cis.num_constraints(), 4 * (mu_max + length));
        }
    }

    #[test]
    fn test_fetch_after_compute() {
        let (a, b) = double_integrator();
        let mut generator = CisGenerator::new(a, b).unwrap();
        let cis = generator.compute_cis(&safe_box(), 2, 1).unwrap().clone();
        assert_eq!(generator.fetch_cis(), Some(&cis));
    }

    #[test]
    fn test_idempotent() {
        let (a, b) = double_integrator();
        let mut generator = CisGenerator::new(a, b).unwrap();
        let first = generator.compute_cis(&safe_box(), 2, 1).unwrap().clone();
        let second = generator.compute_cis(&safe_box(), 2, 1).unwrap().clone();
        assert_eq!(first, second);
        assert_eq!(generator.lifted_builds(), 1);
    }

    #[test]
    fn test_new_safe_region_reuses_lifted_system() {
        let (a, b) = double_integrator();
        let mut generator = CisGenerator::new(a, b).unwrap();
        let first = generator.compute_cis(&safe_box(), 1, 1).unwrap().clone();
        let lifted = generator.lifted_system().unwrap().clone();

        let smaller = HPolyhedron::symmetric_box(&[2.0, 3.0]).unwrap();
        let second = generator.compute_cis(&smaller, 1, 1).unwrap().clone();

        assert_eq!(generator.lifted_builds(), 1);
        assert_eq!(generator.lifted_system(), Some(&lifted));
        assert_eq!(first.a(), second.a());
        assert_ne!(first.b(), second.b());
    }

    #[test]
    fn test_horizon_change_rebuilds() {
        let (a, b) = double_integrator();
        let mut generator = CisGenerator::new(a, b).unwrap();
        assert_eq!(generator.compute_cis(&safe_box(), 1, 0).unwrap().dim(), 3);
        assert_eq!(generator.lifted_builds(), 1);

        assert_eq!(generator.compute_cis(&safe_box(), 2, 2).unwrap().dim(), 6);
        assert_eq!(generator.lifted_builds(), 2);
        assert_eq!(
            generator.lifted_system().unwrap().horizon(),
            Horizon::new(2, 2)
        );

        // Same length, different split: still a new horizon.
        generator.compute_cis(&safe_box(), 3, 1).unwrap();
        assert_eq!(generator.lifted_builds(), 3);
    }

    #[test]
    fn test_failure_keeps_caches() {
        let (a, b) = double_integrator();
        let mut generator = CisGenerator::new(a, b).unwrap();
        let cis = generator.compute_cis(&safe_box(), 1, 1).unwrap().clone();

        let wrong = HPolyhedron::symmetric_box(&[1.0, 1.0, 1.0]).unwrap();
        assert_eq!(
            generator.compute_cis(&wrong, 2, 2).unwrap_err(),
            CisError::mismatch("safe region", 2, 3)
        );
        assert_eq!(
            generator.compute_cis(&safe_box(), 0, 0).unwrap_err(),
            CisError::EmptyHorizon {
                level: 0,
                transient: 0
            }
        );

        assert_eq!(generator.fetch_cis(), Some(&cis));
        assert_eq!(
            generator.lifted_system().unwrap().horizon(),
            Horizon::new(1, 1)
        );
        assert_eq!(generator.lifted_builds(), 1);
    }

    #[test]
    fn test_time_zero_block_is_safe_region() {
        // State columns of the first block are G T T⁻¹ = G.
        let (a, b) = double_integrator();
        let mut generator = CisGenerator::new(a, b).unwrap();
        let safe = safe_box();
        let cis = generator.compute_cis(&safe, 1, 1).unwrap();

        let head = cis.a().view((0, 0), (4, 2)).into_owned();
        assert!((head - safe.a()).amax() < 1e-9);
        assert_eq!(cis.a().view((0, 2), (4, 2)).amax(), 0.0);
        assert_eq!(cis.b().rows(0, 4).into_owned(), safe.b().clone());
    }

    #[test]
    fn test_basis_round_trip() {
        let (a, b) = double_integrator();
        let mut generator = CisGenerator::new(a, b).unwrap();
        let cis = generator.compute_cis(&safe_box(), 2, 1).unwrap().clone();
        let bf = generator.canonical_form();

        // Undo the basis change and compare with the canonical pullback of step 0.
        let canonical_state = cis.a().columns(0, 2) * bf.transform();
        let lifted = generator.lifted_system().unwrap();
        let g = bf.canonical_constraints(&safe_box()).unwrap();
        let mut pullback = DMatrix::zeros(4, lifted.dim());
        place_block(&mut pullback, 0, 0, g.a());
        let expected = pullback * lifted.matrix();

        let block = canonical_state.rows(4, 4).into_owned();
        assert!((block - expected.columns(0, 2)).amax() < 1e-9);
    }

    #[test]
    fn test_rows_pull_back_trajectories() {
        // Row block t + 1 evaluated at (x, w) equals G_c applied to the canonical state after
        // t + 1 lifted transitions from (T⁻¹ x, w).
        let a = DMatrix::from_row_slice(2, 2, &[0.9, 0.4, -0.1, 1.1]);
        let b = DMatrix::from_row_slice(2, 1, &[0.2, 1.0]);
        let mut generator = CisGenerator::new(a, b).unwrap();
        let safe = HPolyhedron::from_box(&[-1.0, -2.0], &[3.0, 2.0]).unwrap();
        let cis = generator.compute_cis(&safe, 1, 2).unwrap().clone();

        let bf = generator.canonical_form();
        let lifted = generator.lifted_system().unwrap();
        let g = bf.canonical_constraints(&safe).unwrap();

        let x = DVector::from_vec(vec![0.3, -0.7]);
        let w = DVector::from_vec(vec![0.5, -0.25, 1.0]);
        let mut xi = DVector::zeros(5);
        xi.rows_mut(0, 2).copy_from(&(bf.inverse_transform() * &x));
        xi.rows_mut(2, 3).copy_from(&w);

        let mut point = DVector::zeros(5);
        point.rows_mut(0, 2).copy_from(&x);
        point.rows_mut(2, 3).copy_from(&w);
        let values = cis.a() * &point;

        let steps = bf.max_controllability_index() + 3 - 1;
        for t in 0..steps {
            let propagated = matrix_power(lifted.matrix(), t + 1) * &xi;
            let expected = g.a() * propagated.rows(0, 2);
            let actual = values.rows(4 * (t + 1), 4);
            assert!((actual - expected).amax() < 1e-9, "step {}", t);
        }
    }

    #[test]
    fn test_contains_origin() {
        let (a, b) = double_integrator();
        let mut generator = CisGenerator::new(a, b).unwrap();
        let cis = generator.compute_cis(&safe_box(), 2, 2).unwrap();
        assert!(cis.contains(&DVector::zeros(cis.dim())));
    }

    #[test]
    fn test_missing_disturbance_region() {
        let (a, b) = double_integrator();
        let e = DMatrix::from_row_slice(2, 1, &[0.0, 1.0]);
        let mut generator = CisGenerator::with_disturbance(a, b, e).unwrap();
        assert_eq!(
            generator.compute_cis(&safe_box(), 1, 0).unwrap_err(),
            CisError::MissingDisturbanceRegion
        );
        assert!(generator.fetch_cis().is_none());
        assert!(generator.lifted_system().is_none());
    }

    #[test]
    fn test_robust_cis_is_tighter() {
        let (a, b) = double_integrator();
        let e = DMatrix::from_row_slice(2, 1, &[0.0, 1.0]);

        let mut nominal = CisGenerator::new(a.clone(), b.clone()).unwrap();
        let nominal = nominal.compute_cis(&safe_box(), 1, 1).unwrap().clone();

        let mut robust = CisGenerator::with_disturbance(a, b, e).unwrap();
        robust
            .set_disturbance_region(HPolyhedron::symmetric_box(&[0.1]).unwrap())
            .unwrap();
        let robust = robust.compute_cis(&safe_box(), 1, 1).unwrap().clone();

        assert_eq!(robust.num_constraints(), nominal.num_constraints());
        assert!((robust.a() - nominal.a()).amax() < 1e-9);
        // Time-0 block untouched, later blocks tightened.
        assert_eq!(robust.b().rows(0, 4), nominal.b().rows(0, 4));
        assert!(robust.b().iter().zip(nominal.b().iter()).all(|(r, n)| r <= n));
        assert!(robust.b().iter().zip(nominal.b().iter()).any(|(r, n)| r < n));
    }

    #[test]
    fn test_steps_past_sequence_reuse_last_shrunk_set() {
        let (a, b) = double_integrator();
        let e = DMatrix::from_row_slice(2, 1, &[0.0, 1.0]);
        let mut generator = CisGenerator::with_disturbance(a, b, e).unwrap();
        generator
            .set_disturbance_region(HPolyhedron::symmetric_box(&[0.1]).unwrap())
            .unwrap();

        let sequence = generator.shrunk_safe_set_sequence(&safe_box()).unwrap();
        assert_eq!(sequence.len(), 2);
        assert_ne!(sequence.get(0).b(), sequence.get(1).b());

        // μ_max + length - 1 = 4 propagation steps, only 2 shrunk sets.
        let cis = generator.compute_cis(&safe_box(), 2, 1).unwrap();
        assert_eq!(cis.num_constraints(), 4 * 5);
        for t in 0..4 {
            let block = cis.b().rows(4 * (t + 1), 4).into_owned();
            assert_eq!(&block, sequence.get(t).b(), "step {}", t);
        }
        for t in sequence.len()..4 {
            assert_eq!(sequence.clamp_index(t), sequence.len() - 1);
            let block = cis.b().rows(4 * (t + 1), 4).into_owned();
            assert_eq!(&block, sequence.get(sequence.len() - 1).b(), "step {}", t);
        }
    }

    #[test]
    fn test_region_dimension_checks() {
        let (a, b) = double_integrator();
        let e = DMatrix::from_row_slice(2, 1, &[0.0, 1.0]);
        let mut generator = CisGenerator::with_disturbance(a, b, e).unwrap();

        assert!(generator
            .set_disturbance_region(HPolyhedron::symmetric_box(&[0.1, 0.1]).unwrap())
            .is_err());
        assert!(generator.disturbance_region().is_none());

        let inputs = HPolyhedron::symmetric_box(&[1.0]).unwrap();
        generator.set_input_constraint_region(inputs.clone()).unwrap();
        assert_eq!(generator.input_constraint_region(), Some(&inputs));
        assert!(generator
            .set_input_constraint_region(HPolyhedron::symmetric_box(&[1.0, 1.0]).unwrap())
            .is_err());
    }

    #[test]
    fn test_uncontrollable_system() {
        let a = DMatrix::identity(2, 2);
        let b = DMatrix::from_row_slice(2, 1, &[1.0, 0.0]);
        assert_eq!(
            CisGenerator::new(a, b).unwrap_err(),
            CisError::NotControllable { rank: 1, dim: 2 }
        );
    }
}

//! # cis-rs: Controlled Invariant Sets in Rust
//!
//! **`cis-rs`** computes finite-horizon **controlled invariant sets** (CIS) for discrete-time
//! linear systems `x⁺ = A x + B u (+ E w)` with a polyhedral safe region and, optionally, a
//! bounded additive disturbance.
//!
//! ## What is a controlled invariant set?
//!
//! A set of states from which some control policy keeps the trajectory inside the safe
//! region forever. The set computed here lives in an augmented space: the state `x`
//! together with a buffer of `L + T` pre-planned moves per input. Any point `(x, w)` of the
//! set certifies that applying the buffered moves keeps the system safe.
//!
//! ## How it works
//!
//! 1. The pair `(A, B)` is brought into **Brunovsky form** (decoupled integrator chains)
//!    by a state transform and an input feedback ([`canonical`]).
//! 2. The canonical system and the move buffers form a single **lifted** autonomous
//!    system ([`lifted`]).
//! 3. With disturbance, the safe region is **tightened** step by step by Pontryagin
//!    differences ([`disturbance`], [`polyhedron`]).
//! 4. The safe-region constraints are pulled back through the powers of the lifted
//!    transition matrix and stacked into one polyhedron, expressed in the original state
//!    basis ([`generator`]).
//!
//! ## Basic Usage
//!
//! ```rust
//! use cis_rs::generator::CisGenerator;
//! use cis_rs::polyhedron::HPolyhedron;
//! use nalgebra::{DMatrix, DVector};
//!
//! // Double integrator.
//! let a = DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 0.0, 1.0]);
//! let b = DMatrix::from_row_slice(2, 1, &[0.0, 1.0]);
//! let e = DMatrix::from_row_slice(2, 1, &[0.0, 1.0]);
//!
//! let mut generator = CisGenerator::with_disturbance(a, b, e).unwrap();
//! generator
//!     .set_disturbance_region(HPolyhedron::symmetric_box(&[0.1]).unwrap())
//!     .unwrap();
//!
//! let safe = HPolyhedron::symmetric_box(&[5.0, 5.0]).unwrap();
//! let cis = generator.compute_cis(&safe, 2, 1).unwrap();
//!
//! // Columns: 2 states + 1 input * (2 + 1) buffered moves.
//! assert_eq!(cis.dim(), 5);
//! assert!(cis.contains(&DVector::zeros(5)));
//! ```
//!
//! ## Core Components
//!
//! - **[`generator`]**: The [`CisGenerator`][crate::generator::CisGenerator] orchestrator and its caches.
//! - **[`polyhedron`]**: H- and V-representations, Pontryagin difference, affine images.
//! - **[`ine`]**: Reading and writing polyhedra in the cdd `.ine` format.

pub mod canonical;
pub mod disturbance;
pub mod error;
pub mod generator;
pub mod ine;
pub mod lifted;
pub mod polyhedron;
pub mod system;
pub mod utils;

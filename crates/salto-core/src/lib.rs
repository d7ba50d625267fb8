//! # SALTO Core
//!
//! Oracles and benchmark models for the SALTO trajectory optimizer.
//!
//! The solver crate (`salto-solver`) treats the dynamical system, the cost,
//! and any user constraints as external collaborators. This crate defines
//! those collaborator interfaces and ships a small stable of analytic models
//! used by the validation suite:
//!
//! - [`dynamics`]: continuous/discrete dynamics traits, discretization, and
//!   the double integrator, cartpole, and pendulum models
//! - [`cost`]: quadratic stage/terminal cost with second-order expansions
//! - [`constraint`]: the user-supplied stage constraint interface
//!
//! All Jacobians are analytic; no automatic differentiation is involved
//! anywhere in the workspace.

pub mod constraint;
pub mod cost;
pub mod dynamics;

pub use constraint::StageConstraint;
pub use cost::{CostError, QuadraticCost, StageExpansion};
pub use dynamics::{ContinuousDynamics, DiscreteDynamics, Discretizer, Integration};

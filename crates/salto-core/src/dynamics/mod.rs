//! Dynamics oracle interfaces and benchmark models
//!
//! The solver consumes dynamics exclusively through [`DiscreteDynamics`]:
//! a discrete stage map `x' = f(x, u, dt)` together with its analytic
//! Jacobians. Continuous-time models implement [`ContinuousDynamics`] and
//! are turned into a discrete oracle by [`Discretizer`], which propagates
//! the chain rule through the chosen integration scheme.
//!
//! Which discretization to use is the oracle's business, not the solver's:
//! the backward and forward passes only ever see `(fdx, fdu)`.

mod cartpole;
mod discretize;
mod double_integrator;
mod pendulum;

pub use cartpole::Cartpole;
pub use discretize::{Discretizer, Integration};
pub use double_integrator::DoubleIntegrator;
pub use pendulum::Pendulum;

use nalgebra::{DMatrix, DVector};

/// A continuous-time dynamical system `ẋ = f(x, u)` with analytic Jacobians.
pub trait ContinuousDynamics {
    /// State dimension `n`.
    fn state_dim(&self) -> usize;

    /// Control dimension `m`.
    fn control_dim(&self) -> usize;

    /// Evaluate `ẋ = f(x, u)`.
    fn dynamics(&self, x: &DVector<f64>, u: &DVector<f64>) -> DVector<f64>;

    /// Evaluate `(∂f/∂x, ∂f/∂u)` at `(x, u)`.
    fn jacobians(&self, x: &DVector<f64>, u: &DVector<f64>) -> (DMatrix<f64>, DMatrix<f64>);
}

/// A discrete-time stage map `x' = f(x, u, dt)` with analytic Jacobians.
///
/// This is the interface the solver consumes. The `dt` partial is required
/// by the minimum-time formulation, where the step duration is itself a
/// decision variable.
pub trait DiscreteDynamics {
    /// State dimension `n`.
    fn state_dim(&self) -> usize;

    /// Control dimension `m` (nominal, before any solver-side augmentation).
    fn control_dim(&self) -> usize;

    /// Evaluate the stage map `x' = f(x, u, dt)`.
    fn step(&self, x: &DVector<f64>, u: &DVector<f64>, dt: f64) -> DVector<f64>;

    /// Evaluate `(∂x'/∂x, ∂x'/∂u)` at `(x, u, dt)`.
    fn jacobians(&self, x: &DVector<f64>, u: &DVector<f64>, dt: f64)
        -> (DMatrix<f64>, DMatrix<f64>);

    /// Evaluate `∂x'/∂dt` at `(x, u, dt)`.
    fn dt_jacobian(&self, x: &DVector<f64>, u: &DVector<f64>, dt: f64) -> DVector<f64>;
}

//! # SALTO Solver
//!
//! Constrained trajectory optimization: iterative LQR wrapped in an
//! augmented Lagrangian outer loop.
//!
//! Given a discrete-time dynamical system, a quadratic cost, an initial
//! state, and optional path constraints (control/state bounds, a custom
//! stage constraint, a terminal goal), the solver computes a locally
//! optimal state-and-control trajectory over a finite horizon:
//!
//! ```text
//! minimize    Σₖ ℓ(x_k, u_k) + ℓ_f(x_N)
//! subject to  x_{k+1} = f(x_k, u_k)
//!             c_I(x_k, u_k) ≤ 0,  c_E(x_k, u_k) = 0
//! ```
//!
//! # Architecture
//!
//! - [`problem`]: problem definition and the solve-mode descriptor
//! - [`trajectory`]: the per-knot buffer store every component mutates
//! - [`constraints`]: constraint stacking and the augmented Lagrangian cost
//! - [`backward`]: Riccati recursion with PD regularization (plus a
//!   square-root variant)
//! - [`forward`]: backtracking line search over the rollout step size
//! - [`outer`]: multiplier and penalty updates
//! - [`regularization`]: the two-parameter ρ schedule
//! - [`infeasible`]: slack augmentation for arbitrary initial state
//!   trajectories
//! - [`solver`]: the driver composing the nested loops
//!
//! # Example
//!
//! ```
//! use nalgebra::{DMatrix, DVector};
//! use salto_core::dynamics::DoubleIntegrator;
//! use salto_core::QuadraticCost;
//! use salto_solver::{Problem, Solver, SolverOptions};
//!
//! let cost = QuadraticCost::new(
//!     DMatrix::identity(2, 2),
//!     DMatrix::identity(1, 1),
//!     DMatrix::identity(2, 2) * 100.0,
//!     DVector::zeros(2),
//! );
//! let problem = Problem::new(
//!     Box::new(DoubleIntegrator),
//!     cost,
//!     DVector::from_vec(vec![1.0, 0.0]),
//!     51,
//!     0.1,
//! );
//!
//! let mut solver = Solver::new(problem, SolverOptions::default()).unwrap();
//! let solution = solver.solve().unwrap();
//! assert!(solution.states.last().unwrap().norm() < 1e-2);
//! ```

pub mod backward;
pub mod constraints;
pub mod error;
pub mod forward;
pub mod infeasible;
pub mod options;
pub mod outer;
pub mod problem;
pub mod regularization;
pub mod solver;
pub mod trajectory;

pub use error::ConfigError;
pub use options::{
    BackwardPassRegularization, DualUpdate, PenaltyUpdate, SolverOptions,
};
pub use problem::{Problem, SolveMode};
pub use solver::{Solution, SolveStats, SolveStatus, Solver};
pub use trajectory::TrajectoryStore;

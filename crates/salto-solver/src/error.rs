//! Solver errors
//!
//! Configuration problems are the only hard failures: they are reported
//! before the solve loop starts. Everything numerical (indefinite Hessians,
//! line-search failures, diverging rollouts) is recovered internally or
//! surfaced through the solution status and statistics.

use salto_core::cost::CostError;
use thiserror::Error;

/// Invalid problem or option configuration, reported before solving.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("horizon must have at least 2 knot points, got {0}")]
    HorizonTooShort(usize),
    #[error("time step must be positive, got {0}")]
    InvalidTimeStep(f64),
    #[error("{what} has dimension {got}, expected {expected}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("option {name} = {value} outside valid range {range}")]
    InvalidOption {
        name: &'static str,
        value: f64,
        range: &'static str,
    },
    #[error("infeasible start requires an initial state trajectory")]
    MissingStateTrajectory,
    #[error("cost oracle: {0}")]
    Cost(#[from] CostError),
}

/// Backward-pass signal: the regularization schedule hit its ceiling.
///
/// The current step is abandoned; the outer loop updates multipliers and
/// continues.
#[derive(Debug, Clone, Copy)]
pub struct RegularizationOverflow;

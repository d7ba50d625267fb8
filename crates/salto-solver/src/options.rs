//! Solver options
//!
//! Every tunable of the solver lives here. The struct is serde-friendly so
//! option sets can be stored alongside experiment configurations.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Backward-pass regularization scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackwardPassRegularization {
    /// `Quu + ρ·I` (shift the control Hessian directly).
    Control,
    /// `Quu + ρ·fduᵀfdu`, `Qux + ρ·fduᵀfdx` (shift through the dynamics).
    State,
}

/// Penalty-update scheme for the outer loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PenaltyUpdate {
    /// Uniform geometric growth `μ ← min(μ_max, γ·μ)`.
    Default,
    /// Per-constraint growth: rows that shrank enough since the last outer
    /// iteration use the slow factor, the rest the fast factor.
    Individual,
}

/// Lagrange-multiplier update order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DualUpdate {
    /// First-order update `λ ← λ + μ ⊙ c` with clamping/projection.
    First,
    /// Second-order update solving a reduced KKT system on the active set.
    Second,
}

/// All solver tunables with their defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverOptions {
    /// ΔJ threshold for inner convergence once constraints are satisfied
    pub cost_tolerance: f64,
    /// ΔJ threshold for intermediate outer iterations
    pub cost_tolerance_intermediate: f64,
    /// Gradient threshold for inner convergence (final stage)
    pub gradient_tolerance: f64,
    /// Gradient threshold for intermediate outer iterations
    pub gradient_tolerance_intermediate: f64,
    /// Maximum constraint violation for outer convergence
    pub constraint_tolerance: f64,

    /// Inner (iLQR) iteration cap per outer iteration
    pub iterations: usize,
    /// Outer (augmented Lagrangian) iteration cap
    pub iterations_outerloop: usize,
    /// Line-search backtracking cap per forward pass
    pub iterations_linesearch: usize,

    /// Initial penalty μ₀
    pub penalty_initial: f64,
    /// Penalty ceiling μ_max
    pub penalty_max: f64,
    /// Fast penalty growth factor γ
    pub penalty_scaling: f64,
    /// Slow penalty growth factor γ_no (individual scheme)
    pub penalty_scaling_no: f64,
    /// Sufficient-decrease ratio τ for the individual scheme
    pub constraint_decrease_ratio: f64,

    /// Multiplier lower clamp λ_min
    pub dual_min: f64,
    /// Multiplier upper clamp λ_max
    pub dual_max: f64,

    /// Initial regularization ρ₀
    pub bp_reg_initial: f64,
    /// Regularization rate factor φ
    pub bp_reg_increase_factor: f64,
    /// Regularization floor ρ_min
    pub bp_reg_min: f64,
    /// Regularization ceiling ρ_max
    pub bp_reg_max: f64,
    /// Regularization scheme
    pub bp_reg_type: BackwardPassRegularization,

    /// Penalty-update scheme
    pub outer_loop_update: PenaltyUpdate,
    /// Multiplier-update order
    pub dual_update: DualUpdate,

    /// Carry the cost-to-go as a Cholesky factor in the backward pass
    pub square_root: bool,
    /// Minimum-time formulation (√dt control augmentation)
    pub minimum_time: bool,
    /// Infeasible-start formulation (slack control augmentation)
    pub infeasible: bool,
    /// After an infeasible solve, re-solve the original problem from the
    /// projected trajectory
    pub resolve_feasible: bool,
    /// The original problem carries no constraints; cast back to an
    /// unconstrained solve for the projection phase
    pub unconstrained_original_problem: bool,

    /// Line-search acceptance band lower edge
    pub z_min: f64,
    /// Line-search acceptance band upper edge
    pub z_max: f64,
    /// Smallest admissible step size
    pub alpha_min: f64,
    /// Rollout divergence guard on ‖x‖∞
    pub max_state_value: f64,
    /// Consecutive rejected steps before the inner loop yields to the
    /// outer loop
    pub max_consecutive_failures: usize,

    /// Initial penalty on the infeasible-slack equality rows
    pub penalty_initial_infeasible: f64,
    /// Quadratic weight on the slack controls
    pub infeasible_penalty: f64,
    /// Quadratic weight on the √dt control (total-time objective)
    pub minimum_time_penalty: f64,
    /// Step-duration bounds for the minimum-time formulation
    pub dt_min: f64,
    pub dt_max: f64,

    /// Per-iteration progress at debug level
    pub verbose: bool,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            cost_tolerance: 1e-4,
            cost_tolerance_intermediate: 1e-3,
            gradient_tolerance: 1e-5,
            gradient_tolerance_intermediate: 1e-5,
            constraint_tolerance: 1e-3,
            iterations: 250,
            iterations_outerloop: 50,
            iterations_linesearch: 20,
            penalty_initial: 1.0,
            penalty_max: 1e8,
            penalty_scaling: 10.0,
            penalty_scaling_no: 1.0,
            constraint_decrease_ratio: 0.25,
            dual_min: -1e8,
            dual_max: 1e8,
            bp_reg_initial: 0.0,
            bp_reg_increase_factor: 1.6,
            bp_reg_min: 1e-8,
            bp_reg_max: 1e8,
            bp_reg_type: BackwardPassRegularization::Control,
            outer_loop_update: PenaltyUpdate::Default,
            dual_update: DualUpdate::First,
            square_root: false,
            minimum_time: false,
            infeasible: false,
            resolve_feasible: true,
            unconstrained_original_problem: false,
            z_min: 1e-8,
            z_max: 10.0,
            alpha_min: 1e-8,
            max_state_value: 1e8,
            max_consecutive_failures: 5,
            penalty_initial_infeasible: 1e3,
            infeasible_penalty: 1.0,
            minimum_time_penalty: 1.0,
            dt_min: 1e-3,
            dt_max: 0.2,
            verbose: false,
        }
    }
}

impl SolverOptions {
    /// Check option consistency. Called once before the solve loop.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = |name, value: f64| {
            if value > 0.0 {
                Ok(())
            } else {
                Err(ConfigError::InvalidOption {
                    name,
                    value,
                    range: "(0, inf)",
                })
            }
        };

        positive("cost_tolerance", self.cost_tolerance)?;
        positive("cost_tolerance_intermediate", self.cost_tolerance_intermediate)?;
        positive("gradient_tolerance", self.gradient_tolerance)?;
        positive(
            "gradient_tolerance_intermediate",
            self.gradient_tolerance_intermediate,
        )?;
        positive("constraint_tolerance", self.constraint_tolerance)?;
        positive("penalty_initial", self.penalty_initial)?;
        positive("penalty_initial_infeasible", self.penalty_initial_infeasible)?;
        positive("alpha_min", self.alpha_min)?;
        positive("max_state_value", self.max_state_value)?;
        positive("dt_min", self.dt_min)?;

        if self.penalty_scaling <= 1.0 {
            return Err(ConfigError::InvalidOption {
                name: "penalty_scaling",
                value: self.penalty_scaling,
                range: "(1, inf)",
            });
        }
        if self.penalty_scaling_no < 1.0 {
            return Err(ConfigError::InvalidOption {
                name: "penalty_scaling_no",
                value: self.penalty_scaling_no,
                range: "[1, inf)",
            });
        }
        if !(0.0..1.0).contains(&self.constraint_decrease_ratio) {
            return Err(ConfigError::InvalidOption {
                name: "constraint_decrease_ratio",
                value: self.constraint_decrease_ratio,
                range: "[0, 1)",
            });
        }
        if self.penalty_initial > self.penalty_max {
            return Err(ConfigError::InvalidOption {
                name: "penalty_max",
                value: self.penalty_max,
                range: "[penalty_initial, inf)",
            });
        }
        if self.bp_reg_increase_factor <= 1.0 {
            return Err(ConfigError::InvalidOption {
                name: "bp_reg_increase_factor",
                value: self.bp_reg_increase_factor,
                range: "(1, inf)",
            });
        }
        if self.bp_reg_min >= self.bp_reg_max {
            return Err(ConfigError::InvalidOption {
                name: "bp_reg_min",
                value: self.bp_reg_min,
                range: "(0, bp_reg_max)",
            });
        }
        if self.z_min >= self.z_max {
            return Err(ConfigError::InvalidOption {
                name: "z_min",
                value: self.z_min,
                range: "(0, z_max)",
            });
        }
        if self.dual_min >= self.dual_max {
            return Err(ConfigError::InvalidOption {
                name: "dual_min",
                value: self.dual_min,
                range: "(-inf, dual_max)",
            });
        }
        if self.dt_min >= self.dt_max {
            return Err(ConfigError::InvalidOption {
                name: "dt_max",
                value: self.dt_max,
                range: "(dt_min, inf)",
            });
        }
        if self.iterations == 0 || self.iterations_outerloop == 0 || self.iterations_linesearch == 0
        {
            return Err(ConfigError::InvalidOption {
                name: "iterations",
                value: 0.0,
                range: "[1, inf)",
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(SolverOptions::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_penalty_scaling() {
        let options = SolverOptions {
            penalty_scaling: 0.5,
            ..SolverOptions::default()
        };
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_rejects_inverted_acceptance_band() {
        let options = SolverOptions {
            z_min: 20.0,
            ..SolverOptions::default()
        };
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_iteration_caps() {
        let options = SolverOptions {
            iterations: 0,
            ..SolverOptions::default()
        };
        assert!(options.validate().is_err());
    }
}

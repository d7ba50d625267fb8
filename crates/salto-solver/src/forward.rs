//! Forward pass
//!
//! Backtracking line search over the step size α. The candidate trajectory
//! is rolled out with the affine policy from the last backward pass,
//!
//! ```text
//! Ū[k] = U[k] + K[k]·(X̄[k] − X[k]) + α·d[k]
//! ```
//!
//! and accepted when the ratio of actual to expected cost reduction
//!
//! ```text
//! z = (J_prev − J_new) / (−ΔJ_expected(α)),   ΔJ_expected(α) = α·Δv₁ + α²·Δv₂
//! ```
//!
//! falls inside the acceptance band. Predicted non-descent, a diverging
//! rollout, or exhaustion of the backtracking iterations all reject the step
//! and bump the regularization; only an acceptance touches X and U.

use tracing::debug;

use crate::constraints::ConstraintEvaluator;
use crate::options::SolverOptions;
use crate::problem::{Problem, SolveMode};
use crate::regularization::Regularization;
use crate::trajectory::TrajectoryStore;

/// Step-size halving factor.
const BACKTRACK_FACTOR: f64 = 0.5;

/// Result of one forward pass.
#[derive(Debug, Clone, Copy)]
pub struct LineSearchOutcome {
    pub accepted: bool,
    /// Accepted cost, or the previous cost on rejection
    pub cost: f64,
    pub alpha: f64,
    /// Actual/expected reduction ratio of the last trial
    pub z: f64,
}

/// Roll out the affine policy at step size α into the candidate buffers.
/// Returns `false` when the rollout leaves the trust region (non-finite
/// state or ‖x‖∞ beyond the divergence guard).
fn rollout(
    problem: &Problem,
    mode: &SolveMode,
    options: &SolverOptions,
    eval: &ConstraintEvaluator,
    store: &mut TrajectoryStore,
    alpha: f64,
) -> bool {
    store.states_cand[0].copy_from(&store.states[0]);

    for k in 0..store.num_stages() {
        let dx = &store.states_cand[k] - &store.states[k];
        let mut u_new =
            &store.controls[k] + &store.gain[k] * dx + &store.feedforward[k] * alpha;

        // Clamp to the control box after applying the policy; K and d are
        // left untouched (bounds are enforced at the AL level).
        for (comp, bound) in &eval.layout.u_upper {
            u_new[*comp] = u_new[*comp].min(*bound);
        }
        for (comp, bound) in &eval.layout.u_lower {
            u_new[*comp] = u_new[*comp].max(*bound);
        }

        let next = problem.step_stage(mode, &store.states_cand[k], &u_new);
        if !next.iter().all(|v| v.is_finite()) || next.amax() > options.max_state_value {
            return false;
        }

        store.controls_cand[k].copy_from(&u_new);
        store.states_cand[k + 1].copy_from(&next);
    }
    true
}

/// Line search around the current trajectory. On acceptance the candidates
/// (including their constraint values) are promoted and the regularization
/// relaxes; on rejection the trajectory is untouched and the
/// regularization grows.
#[allow(clippy::too_many_arguments)]
pub fn forward_pass(
    problem: &Problem,
    mode: &SolveMode,
    options: &SolverOptions,
    eval: &mut ConstraintEvaluator,
    store: &mut TrajectoryStore,
    reg: &mut Regularization,
    j_prev: f64,
    dv: (f64, f64),
) -> LineSearchOutcome {
    let mut alpha = 1.0;
    let mut z = 0.0;

    for _ in 0..options.iterations_linesearch {
        if alpha < options.alpha_min {
            break;
        }

        let expected = -(alpha * dv.0 + alpha * alpha * dv.1);
        if expected <= 0.0 {
            // The quadratic model predicts no descent at this step size;
            // retrying smaller steps cannot help.
            debug!(alpha, expected, "line search aborted: no descent predicted");
            break;
        }

        if !rollout(problem, mode, options, eval, store, alpha) {
            alpha *= BACKTRACK_FACTOR;
            continue;
        }

        let j_new = eval.total_cost(
            problem,
            mode,
            options,
            &store.states_cand,
            &store.controls_cand,
            &mut store.c_cand,
            &mut store.cn_cand,
            &store.lambda,
            &store.lambda_n,
            &store.penalty,
            &store.penalty_n,
        );
        if !j_new.is_finite() {
            alpha *= BACKTRACK_FACTOR;
            continue;
        }

        z = (j_prev - j_new) / expected;
        if z >= options.z_min && z <= options.z_max {
            store.promote();
            reg.decrease();
            return LineSearchOutcome {
                accepted: true,
                cost: j_new,
                alpha,
                z,
            };
        }
        alpha *= BACKTRACK_FACTOR;
    }

    // Overflow here is picked up by the next backward pass.
    let _ = reg.increase();
    LineSearchOutcome {
        accepted: false,
        cost: j_prev,
        alpha,
        z,
    }
}

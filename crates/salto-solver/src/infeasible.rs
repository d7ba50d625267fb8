//! Infeasible-start reformulation
//!
//! An arbitrary state trajectory X0 becomes dynamically reachable by
//! augmenting every stage control with a slack input:
//!
//! ```text
//! f̃(x, [u; s]) = f(x, u) + s,     s[k] = X0[k+1] − f(X0[k], U0[k])
//! ```
//!
//! so the augmented rollout reproduces X0 exactly. The slacks are forced to
//! zero through equality constraint rows with a large initial penalty;
//! once the constrained solve converges the slacks are stripped and the
//! result is projected back onto the feasible manifold by a feedback
//! rollout that tracks the solution with the final time-varying LQR gains.

use nalgebra::DVector;
use tracing::debug;

use crate::problem::{Problem, SolveMode};
use crate::trajectory::TrajectoryStore;

/// Slack controls that make the augmented dynamics reproduce `x_guess`.
pub fn infeasible_controls(
    problem: &Problem,
    mode: &SolveMode,
    x_guess: &[DVector<f64>],
    u_guess: &[DVector<f64>],
) -> Vec<DVector<f64>> {
    let ns = x_guess.len() - 1;
    let mut slacks = Vec::with_capacity(ns);
    for k in 0..ns {
        let u_nom = u_guess[k].rows(0, mode.m).into_owned();
        let dt = mode.stage_dt(&u_guess[k], problem.dt);
        let predicted = problem.dynamics.step(&x_guess[k], &u_nom, dt);
        slacks.push(&x_guess[k + 1] - predicted);
    }
    slacks
}

/// Drop the slack tail of every control, keeping the nominal inputs (and
/// the √dt control in minimum-time mode).
pub fn strip_slacks(mode: &SolveMode, store: &TrajectoryStore) -> Vec<DVector<f64>> {
    store
        .controls
        .iter()
        .map(|u| u.rows(0, mode.m_bar).into_owned())
        .collect()
}

/// Project a slack-stripped solution onto the feasible manifold: roll the
/// unaugmented dynamics forward from x0 while tracking the solved
/// trajectory with the feedback gains from the final backward pass.
pub fn projection_rollout(
    problem: &Problem,
    feasible_mode: &SolveMode,
    store: &TrajectoryStore,
    stripped_controls: &[DVector<f64>],
) -> (Vec<DVector<f64>>, Vec<DVector<f64>>) {
    let ns = store.num_stages();
    let mut states = Vec::with_capacity(ns + 1);
    let mut controls = Vec::with_capacity(ns);

    states.push(problem.x0.clone());
    for k in 0..ns {
        let dx = &states[k] - &store.states[k];
        // Track with the nominal-control rows of the augmented gain.
        let gain = store.gain[k].rows(0, feasible_mode.m_bar);
        let u = &stripped_controls[k] + gain * dx;
        let next = problem.step_stage(feasible_mode, &states[k], &u);
        controls.push(u);
        states.push(next);
    }

    let terminal_gap = (states.last().unwrap() - store.states.last().unwrap()).norm();
    debug!(terminal_gap, "projected infeasible solution onto the dynamics");
    (states, controls)
}

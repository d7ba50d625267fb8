//! Infeasible-start validation
//!
//! Scenario: the LQR sanity problem seeded with a straight-line state
//! interpolation the dynamics cannot follow. The slack-augmented solve must
//! drive the slacks to zero, and the feasibility projection must hand back
//! a trajectory whose cost matches the augmented solution.

use nalgebra::{DMatrix, DVector};
use salto_core::dynamics::DoubleIntegrator;
use salto_core::QuadraticCost;
use salto_solver::{Problem, SolveStatus, Solver, SolverOptions};

const N: usize = 51;

fn lqr_problem() -> Problem {
    let cost = QuadraticCost::new(
        DMatrix::identity(2, 2),
        DMatrix::identity(1, 1),
        DMatrix::identity(2, 2) * 100.0,
        DVector::zeros(2),
    );
    Problem::new(
        Box::new(DoubleIntegrator),
        cost,
        DVector::from_vec(vec![1.0, 0.0]),
        N,
        0.1,
    )
}

/// Straight-line interpolation from x0 to the goal, ignoring the dynamics.
fn straight_line_guess() -> Vec<DVector<f64>> {
    (0..N)
        .map(|k| {
            let tau = k as f64 / (N - 1) as f64;
            DVector::from_vec(vec![1.0 - tau, 0.0])
        })
        .collect()
}

fn infeasible_options() -> SolverOptions {
    SolverOptions {
        infeasible: true,
        resolve_feasible: true,
        unconstrained_original_problem: true,
        constraint_tolerance: 1e-6,
        ..SolverOptions::default()
    }
}

#[test]
fn test_infeasible_start_round_trip() {
    let mut solver = Solver::new(lqr_problem(), infeasible_options())
        .unwrap()
        .with_state_guess(straight_line_guess());
    let solution = solver.solve().unwrap();

    assert_eq!(solution.status, SolveStatus::Optimal);

    // First-phase statistics ride along under the infeasible slot; the
    // slack rows dominate its c_max, so convergence there bounds them.
    let phase1 = solution
        .stats
        .infeasible
        .as_ref()
        .expect("first-phase statistics missing");
    let slack_residual = *phase1.c_max.last().unwrap();
    assert!(
        slack_residual < 1e-6,
        "slacks not driven out: {slack_residual}"
    );

    // The feasibility re-solve barely moves the cost.
    let phase1_cost = *phase1.cost.last().unwrap();
    assert!(
        (solution.cost - phase1_cost).abs() < 1e-3,
        "projection changed the cost by {}",
        (solution.cost - phase1_cost).abs()
    );

    // And the final trajectory matches the direct solve's endpoint.
    assert!(solution.states.last().unwrap().norm() < 1e-3);
}

#[test]
fn test_projected_trajectory_is_dynamically_feasible() {
    let mut solver = Solver::new(lqr_problem(), infeasible_options())
        .unwrap()
        .with_state_guess(straight_line_guess());
    let solution = solver.solve().unwrap();

    // Re-simulate with the returned controls; the states must reproduce.
    let problem = lqr_problem();
    let mut x = problem.x0.clone();
    for (k, u) in solution.controls.iter().enumerate() {
        x = problem.dynamics.step(&x, u, problem.dt);
        assert!(
            (&x - &solution.states[k + 1]).norm() < 1e-9,
            "state {} drifts from the rollout",
            k + 1
        );
    }
}

#[test]
fn test_infeasible_matches_direct_solve() {
    let mut direct = Solver::new(lqr_problem(), SolverOptions::default()).unwrap();
    let direct_solution = direct.solve().unwrap();

    let mut seeded = Solver::new(lqr_problem(), infeasible_options())
        .unwrap()
        .with_state_guess(straight_line_guess());
    let seeded_solution = seeded.solve().unwrap();

    assert!(
        (direct_solution.cost - seeded_solution.cost).abs() < 1e-3,
        "infeasible-start optimum {} differs from direct optimum {}",
        seeded_solution.cost,
        direct_solution.cost
    );
}

#[test]
fn test_projection_without_resolve() {
    let options = SolverOptions {
        resolve_feasible: false,
        ..infeasible_options()
    };
    let mut solver = Solver::new(lqr_problem(), options)
        .unwrap()
        .with_state_guess(straight_line_guess());
    let solution = solver.solve().unwrap();

    // No second solve: the main statistics are empty and the first-phase
    // record is still attached.
    assert_eq!(solution.stats.iterations, 0);
    assert!(solution.stats.infeasible.is_some());

    // The projected trajectory still simulates under the raw dynamics.
    let problem = lqr_problem();
    let mut x = problem.x0.clone();
    for (k, u) in solution.controls.iter().enumerate() {
        x = problem.dynamics.step(&x, u, problem.dt);
        assert!((&x - &solution.states[k + 1]).norm() < 1e-9);
    }
}

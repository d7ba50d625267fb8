//! Minimum-time formulation validation
//!
//! Double integrator driven to the origin with the step durations free:
//! the √dt control augmentation must shorten the horizon well below the
//! nominal one while keeping the durations inside their box and the tie
//! rows nearly uniform. (The true bang-bang optimum for |u| ≤ 2 from
//! (1, 0) takes √2 seconds.)

use nalgebra::{DMatrix, DVector};
use salto_core::dynamics::DoubleIntegrator;
use salto_core::QuadraticCost;
use salto_solver::{Problem, SolveStatus, Solver, SolverOptions};

fn min_time_problem() -> Problem {
    let cost = QuadraticCost::new(
        DMatrix::identity(2, 2) * 1e-2,
        DMatrix::from_element(1, 1, 1e-2),
        DMatrix::identity(2, 2),
        DVector::zeros(2),
    );
    Problem::new(
        Box::new(DoubleIntegrator),
        cost,
        DVector::from_vec(vec![1.0, 0.0]),
        31,
        0.1,
    )
    .with_control_bounds(DVector::from_vec(vec![-2.0]), DVector::from_vec(vec![2.0]))
    .with_goal_constraint()
}

fn min_time_options() -> SolverOptions {
    SolverOptions {
        minimum_time: true,
        minimum_time_penalty: 0.1,
        dt_min: 1e-3,
        dt_max: 0.15,
        constraint_tolerance: 1e-4,
        iterations_outerloop: 30,
        ..SolverOptions::default()
    }
}

#[test]
fn test_minimum_time_shortens_the_horizon() {
    let mut solver = Solver::new(min_time_problem(), min_time_options()).unwrap();
    let solution = solver.solve().unwrap();

    assert_ne!(solution.status, SolveStatus::Diverged);

    let durations = solution
        .step_durations
        .as_ref()
        .expect("minimum-time solve must report step durations");
    assert_eq!(durations.len(), 30);

    // Durations stay inside their box (the rollout clamps h hard).
    for dt in durations {
        assert!(*dt >= 1e-3 - 1e-9 && *dt <= 0.15 + 1e-9, "dt = {dt}");
    }

    // Total time well below the nominal 3 s horizon, and the goal is
    // approached under the bounded control.
    let total: f64 = durations.iter().sum();
    assert!(total < 2.0, "horizon not shortened: {total}");
    assert!(solution.states.last().unwrap().norm() < 0.1);
    assert!(solution.c_max < 0.05, "constraints far from satisfied: {}", solution.c_max);
}

#[test]
fn test_minimum_time_controls_saturate() {
    let mut solver = Solver::new(min_time_problem(), min_time_options()).unwrap();
    let solution = solver.solve().unwrap();

    // Time-optimal double-integrator motion is bang-bang: the control
    // bound must be active somewhere.
    let u_max = solution
        .controls
        .iter()
        .map(|u| u[0].abs())
        .fold(0.0, f64::max);
    assert!(u_max > 1.9, "control never approached the bound: {u_max}");
}

//! Solver driver
//!
//! Composes the nested loops in a fixed order. One inner iteration is:
//! refresh Jacobians, backward pass (with its internal regularization
//! restarts), forward pass (with its internal α backtracking), commit the
//! candidates on acceptance, check convergence. One outer iteration is: run
//! the inner loop to convergence or its cap, update multipliers then
//! penalties, snapshot constraint values, re-evaluate the augmented cost.
//!
//! The driver owns the statistics and decides termination. No numerical
//! condition escapes as a hard error: configuration problems are rejected
//! up front, everything else lands in the solution status.

use std::time::Instant;

use nalgebra::DVector;
use tracing::{debug, info, warn};

use crate::backward::{backward_pass, backward_pass_sqrt};
use crate::constraints::ConstraintEvaluator;
use crate::error::ConfigError;
use crate::forward::forward_pass;
use crate::infeasible::{infeasible_controls, projection_rollout, strip_slacks};
use crate::options::{DualUpdate, PenaltyUpdate, SolverOptions};
use crate::outer::{update_duals, update_duals_second_order, update_penalties};
use crate::problem::{Problem, SolveMode};
use crate::regularization::Regularization;
use crate::trajectory::TrajectoryStore;

/// Solve statistics.
///
/// `cost` and `c_max` are ordered per-iteration sequences (the entry at
/// index 0 describes the initial trajectory). For an infeasible-start
/// solve, the first-phase statistics are carried in `infeasible`.
#[derive(Debug, Clone, Default)]
pub struct SolveStats {
    /// Total inner iterations
    pub iterations: usize,
    /// Outer (major) iterations
    pub major_iterations: usize,
    /// Solve-loop wall time [s]
    pub runtime: f64,
    /// Allocation/initialization wall time [s]
    pub setup_time: f64,
    /// Augmented cost after each iteration
    pub cost: Vec<f64>,
    /// Maximum constraint violation after each iteration
    pub c_max: Vec<f64>,
    /// First-phase statistics of an infeasible-start solve
    pub infeasible: Option<Box<SolveStats>>,
}

/// Why the solver stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveStatus {
    /// Converged to tolerance
    Optimal,
    /// Inner iteration cap reached
    MaxIterations,
    /// Outer iteration cap reached with unsatisfied constraints
    MaxOuterIterations,
    /// The rollout diverged even with zero controls
    Diverged,
}

/// A solved trajectory.
#[derive(Debug, Clone)]
pub struct Solution {
    pub states: Vec<DVector<f64>>,
    /// Nominal controls (solver-side augmentations stripped)
    pub controls: Vec<DVector<f64>>,
    /// Per-stage step durations in minimum-time mode
    pub step_durations: Option<Vec<f64>>,
    /// Final augmented cost
    pub cost: f64,
    /// Final maximum constraint violation
    pub c_max: f64,
    pub status: SolveStatus,
    pub stats: SolveStats,
}

struct RunResult {
    status: SolveStatus,
    stats: SolveStats,
    cost: f64,
    c_max: f64,
}

/// Constrained trajectory optimizer: iLQR inside an augmented Lagrangian
/// outer loop.
pub struct Solver {
    problem: Problem,
    options: SolverOptions,
    control_guess: Option<Vec<DVector<f64>>>,
    state_guess: Option<Vec<DVector<f64>>>,
    store: Option<TrajectoryStore>,
}

impl Solver {
    pub fn new(problem: Problem, options: SolverOptions) -> Result<Self, ConfigError> {
        options.validate()?;
        problem.validate()?;
        Ok(Self {
            problem,
            options,
            control_guess: None,
            state_guess: None,
            store: None,
        })
    }

    /// Warm-start controls (nominal dimension).
    pub fn with_control_guess(mut self, controls: Vec<DVector<f64>>) -> Self {
        self.control_guess = Some(controls);
        self
    }

    /// Initial state trajectory for the infeasible-start formulation.
    pub fn with_state_guess(mut self, states: Vec<DVector<f64>>) -> Self {
        self.state_guess = Some(states);
        self
    }

    pub fn problem(&self) -> &Problem {
        &self.problem
    }

    /// The internal trajectory store of the last solve.
    pub fn trajectory(&self) -> Option<&TrajectoryStore> {
        self.store.as_ref()
    }

    pub fn solve(&mut self) -> Result<Solution, ConfigError> {
        self.validate_guesses()?;
        if self.options.infeasible {
            self.solve_infeasible()
        } else {
            let mode = SolveMode::derive(&self.problem, &self.options);
            let u_init = self.build_initial_controls(&mode);
            let (store, result) = run(&self.problem, &self.options, mode, None, &u_init);
            let solution = build_solution(&mode, &store, result);
            self.store = Some(store);
            Ok(solution)
        }
    }

    fn validate_guesses(&self) -> Result<(), ConfigError> {
        let ns = self.problem.num_stages();
        if let Some(us) = &self.control_guess {
            if us.len() != ns {
                return Err(ConfigError::DimensionMismatch {
                    what: "control guess length",
                    expected: ns,
                    got: us.len(),
                });
            }
            for u in us {
                if u.len() != self.problem.m() {
                    return Err(ConfigError::DimensionMismatch {
                        what: "control guess",
                        expected: self.problem.m(),
                        got: u.len(),
                    });
                }
            }
        }
        if let Some(xs) = &self.state_guess {
            if xs.len() != self.problem.num_knots {
                return Err(ConfigError::DimensionMismatch {
                    what: "state guess length",
                    expected: self.problem.num_knots,
                    got: xs.len(),
                });
            }
            for x in xs {
                if x.len() != self.problem.n() {
                    return Err(ConfigError::DimensionMismatch {
                        what: "state guess",
                        expected: self.problem.n(),
                        got: x.len(),
                    });
                }
            }
        }
        if self.options.infeasible && self.state_guess.is_none() {
            return Err(ConfigError::MissingStateTrajectory);
        }
        Ok(())
    }

    /// Augmented initial controls: the guess (or zeros) in the nominal
    /// block, √dt in the h slot, zeros in the slack tail.
    fn build_initial_controls(&self, mode: &SolveMode) -> Vec<DVector<f64>> {
        let ns = self.problem.num_stages();
        let h0 = self
            .problem
            .dt
            .sqrt()
            .clamp(self.options.dt_min.sqrt(), self.options.dt_max.sqrt());

        (0..ns)
            .map(|k| {
                let mut u = DVector::zeros(mode.mm);
                if let Some(guess) = &self.control_guess {
                    u.rows_mut(0, mode.m).copy_from(&guess[k]);
                }
                if let Some(h_idx) = mode.h_index() {
                    u[h_idx] = h0;
                }
                u
            })
            .collect()
    }

    fn solve_infeasible(&mut self) -> Result<Solution, ConfigError> {
        let mode = SolveMode::derive(&self.problem, &self.options);
        let x_guess = self.state_guess.clone().expect("checked in validate_guesses");

        let mut u_init = self.build_initial_controls(&mode);
        let slacks = infeasible_controls(&self.problem, &mode, &x_guess, &u_init);
        for (u, s) in u_init.iter_mut().zip(slacks.iter()) {
            u.rows_mut(mode.m_bar, mode.n).copy_from(s);
        }

        let (store, first) = run(&self.problem, &self.options, mode, Some(&x_guess), &u_init);
        if first.status == SolveStatus::Diverged {
            let solution = build_solution(&mode, &store, first);
            self.store = Some(store);
            return Ok(solution);
        }

        // Strip the slacks and project back onto the dynamics with the
        // final time-varying LQR gains.
        let feasible_mode = SolveMode::feasible(&self.problem, &self.options);
        let stripped = strip_slacks(&mode, &store);
        let (x_proj, u_proj) = projection_rollout(&self.problem, &feasible_mode, &store, &stripped);

        if self.options.resolve_feasible {
            let (store2, mut second) =
                run(&self.problem, &self.options, feasible_mode, Some(&x_proj), &u_proj);
            second.stats.infeasible = Some(Box::new(first.stats));
            let solution = build_solution(&feasible_mode, &store2, second);
            self.store = Some(store2);
            return Ok(solution);
        }

        // No re-solve requested: report the projected trajectory.
        let mut eval = ConstraintEvaluator::new(&self.problem, &feasible_mode, &self.options);
        let mut store2 = TrajectoryStore::new(
            feasible_mode.n,
            feasible_mode.mm,
            eval.layout.p,
            eval.layout.p_terminal(feasible_mode.n),
            self.problem.num_knots,
        );
        for (dst, src) in store2.states.iter_mut().zip(x_proj.iter()) {
            dst.copy_from(src);
        }
        for (dst, src) in store2.controls.iter_mut().zip(u_proj.iter()) {
            dst.copy_from(src);
        }
        let cost = eval.total_cost(
            &self.problem,
            &feasible_mode,
            &self.options,
            &store2.states,
            &store2.controls,
            &mut store2.c,
            &mut store2.cn,
            &store2.lambda,
            &store2.lambda_n,
            &store2.penalty,
            &store2.penalty_n,
        );
        let c_max = eval.max_violation(&store2);
        let result = RunResult {
            status: first.status,
            stats: SolveStats {
                cost: vec![cost],
                c_max: vec![c_max],
                infeasible: Some(Box::new(first.stats)),
                ..SolveStats::default()
            },
            cost,
            c_max,
        };
        let solution = build_solution(&feasible_mode, &store2, result);
        self.store = Some(store2);
        Ok(solution)
    }
}

/// Refresh the dynamics and constraint Jacobians and the active set at the
/// current trajectory.
fn refresh_jacobians(
    problem: &Problem,
    mode: &SolveMode,
    eval: &mut ConstraintEvaluator,
    store: &mut TrajectoryStore,
) {
    for k in 0..store.num_stages() {
        let (fdx, fdu) = problem.stage_jacobians(mode, &store.states[k], &store.controls[k]);
        store.fdx[k] = fdx;
        store.fdu[k] = fdu;
    }
    if eval.layout.p > 0 {
        for k in 0..store.num_stages() {
            let (states, controls) = (&store.states, &store.controls);
            let (cx, cu) = (&mut store.cx, &mut store.cu);
            eval.stage_jacobians(problem, mode, &states[k], &controls[k], &mut cx[k], &mut cu[k]);
        }
    }
    if eval.layout.p > 0 || store.p_terminal > 0 {
        eval.update_active_set(store);
    }
}

/// Forward-simulate the current controls from x0 into the current states.
fn initial_rollout(
    problem: &Problem,
    mode: &SolveMode,
    options: &SolverOptions,
    store: &mut TrajectoryStore,
) -> bool {
    store.states[0].copy_from(&problem.x0);
    for k in 0..store.num_stages() {
        let next = problem.step_stage(mode, &store.states[k], &store.controls[k]);
        if !next.iter().all(|v| v.is_finite()) || next.amax() > options.max_state_value {
            return false;
        }
        store.states[k + 1] = next;
    }
    true
}

fn run(
    problem: &Problem,
    options: &SolverOptions,
    mode: SolveMode,
    x_init: Option<&[DVector<f64>]>,
    u_init: &[DVector<f64>],
) -> (TrajectoryStore, RunResult) {
    let setup_timer = Instant::now();

    let mut eval = ConstraintEvaluator::new(problem, &mode, options);
    let mut store = TrajectoryStore::new(
        mode.n,
        mode.mm,
        eval.layout.p,
        eval.layout.p_terminal(mode.n),
        problem.num_knots,
    );

    for (dst, src) in store.controls.iter_mut().zip(u_init.iter()) {
        dst.copy_from(src);
    }
    for k in 0..store.num_stages() {
        store.penalty[k].fill(options.penalty_initial);
        if let Some(start) = eval.layout.slack_start {
            for i in 0..mode.n {
                store.penalty[k][start + i] = options.penalty_initial_infeasible;
            }
        }
    }
    store.penalty_n.fill(options.penalty_initial);

    match x_init {
        Some(xs) => {
            for (dst, src) in store.states.iter_mut().zip(xs.iter()) {
                dst.copy_from(src);
            }
        }
        None => {
            if !initial_rollout(problem, &mode, options, &mut store) {
                warn!("initial rollout diverged; falling back to zero controls");
                for u in store.controls.iter_mut() {
                    u.fill(0.0);
                    if let Some(h_idx) = mode.h_index() {
                        u[h_idx] = problem.dt.sqrt();
                    }
                }
                if !initial_rollout(problem, &mode, options, &mut store) {
                    warn!("rollout with zero controls diverged; giving up");
                    let stats = SolveStats {
                        setup_time: setup_timer.elapsed().as_secs_f64(),
                        ..SolveStats::default()
                    };
                    let result = RunResult {
                        status: SolveStatus::Diverged,
                        stats,
                        cost: f64::INFINITY,
                        c_max: f64::INFINITY,
                    };
                    return (store, result);
                }
            }
        }
    }

    let mut reg = Regularization::new(options);
    let mut stats = SolveStats {
        setup_time: setup_timer.elapsed().as_secs_f64(),
        ..SolveStats::default()
    };

    let run_timer = Instant::now();
    let mut j = eval.total_cost(
        problem,
        &mode,
        options,
        &store.states,
        &store.controls,
        &mut store.c,
        &mut store.cn,
        &store.lambda,
        &store.lambda_n,
        &store.penalty,
        &store.penalty_n,
    );
    let mut c_max = if mode.constrained {
        eval.max_violation(&store)
    } else {
        0.0
    };
    stats.cost.push(j);
    stats.c_max.push(c_max);

    let mut status = if mode.constrained {
        SolveStatus::MaxOuterIterations
    } else {
        SolveStatus::MaxIterations
    };
    let outer_cap = if mode.constrained {
        options.iterations_outerloop
    } else {
        1
    };

    'outer: for outer in 0..outer_cap {
        let mut delta_j = f64::INFINITY;
        let mut grad = f64::INFINITY;
        let mut failures = 0usize;
        let mut inner_converged = false;

        for _ in 0..options.iterations {
            refresh_jacobians(problem, &mode, &mut eval, &mut store);

            let backward = if mode.square_root {
                backward_pass_sqrt(problem, &mode, options, &mut eval, &mut store, &mut reg)
            } else {
                backward_pass(problem, &mode, options, &mut eval, &mut store, &mut reg)
            };
            let bp = match backward {
                Ok(bp) => bp,
                Err(_) => {
                    // Regularization saturated: abandon the step and let the
                    // outer loop advance the multipliers.
                    break;
                }
            };

            let fp = forward_pass(
                problem, &mode, options, &mut eval, &mut store, &mut reg, j, bp.dv,
            );

            stats.iterations += 1;
            c_max = if mode.constrained {
                eval.max_violation(&store)
            } else {
                0.0
            };
            stats.cost.push(fp.cost);
            stats.c_max.push(c_max);
            grad = store.gradient();

            if options.verbose {
                debug!(
                    outer,
                    iteration = stats.iterations,
                    cost = fp.cost,
                    c_max,
                    alpha = fp.alpha,
                    rho = reg.rho(),
                    accepted = fp.accepted,
                    "inner iteration"
                );
            }

            let (cost_tol, grad_tol) = if mode.constrained && c_max > options.constraint_tolerance
            {
                (
                    options.cost_tolerance_intermediate,
                    options.gradient_tolerance_intermediate,
                )
            } else {
                (options.cost_tolerance, options.gradient_tolerance)
            };

            // The gradient criterion holds right after the backward pass
            // whether or not a step was taken; at the optimum the line
            // search has nothing left to accept.
            let mut converged = grad < grad_tol;
            if fp.accepted {
                delta_j = j - fp.cost;
                j = fp.cost;
                failures = 0;
                converged = converged || delta_j.abs() < cost_tol;
            } else {
                failures += 1;
                if failures >= options.max_consecutive_failures {
                    break;
                }
            }
            if converged {
                inner_converged = true;
                break;
            }
        }

        stats.major_iterations += 1;

        if !mode.constrained {
            status = if inner_converged {
                SolveStatus::Optimal
            } else {
                SolveStatus::MaxIterations
            };
            break 'outer;
        }

        c_max = eval.max_violation(&store);
        if c_max < options.constraint_tolerance
            && (delta_j.abs() < options.cost_tolerance || grad < options.gradient_tolerance)
        {
            status = SolveStatus::Optimal;
            break 'outer;
        }

        match mode.dual_update {
            DualUpdate::First => update_duals(&mut store, &eval, options),
            DualUpdate::Second => {
                update_duals_second_order(problem, &mode, options, &mut eval, &mut store)
            }
        }
        update_penalties(
            &mut store,
            &eval,
            options,
            matches!(mode.penalty_update, PenaltyUpdate::Individual),
        );
        store.snapshot_constraints();
        eval.update_active_set(&mut store);

        // Multipliers and penalties moved: the augmented cost must be
        // re-based before the next inner loop.
        j = eval.total_cost(
            problem,
            &mode,
            options,
            &store.states,
            &store.controls,
            &mut store.c,
            &mut store.cn,
            &store.lambda,
            &store.lambda_n,
            &store.penalty,
            &store.penalty_n,
        );
    }

    stats.runtime = run_timer.elapsed().as_secs_f64();
    if status != SolveStatus::Optimal {
        warn!(?status, c_max, "solver stopped before convergence");
    }
    info!(
        ?status,
        iterations = stats.iterations,
        major_iterations = stats.major_iterations,
        cost = j,
        c_max,
        "solve finished"
    );

    let result = RunResult {
        status,
        stats,
        cost: j,
        c_max,
    };
    (store, result)
}

fn build_solution(mode: &SolveMode, store: &TrajectoryStore, result: RunResult) -> Solution {
    let controls: Vec<DVector<f64>> = store
        .controls
        .iter()
        .map(|u| u.rows(0, mode.m).into_owned())
        .collect();
    let step_durations = mode.h_index().map(|h_idx| {
        store
            .controls
            .iter()
            .map(|u| u[h_idx] * u[h_idx])
            .collect()
    });

    Solution {
        states: store.states.clone(),
        controls,
        step_durations,
        cost: result.cost,
        c_max: result.c_max,
        status: result.status,
        stats: result.stats,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::DMatrix;
    use salto_core::dynamics::DoubleIntegrator;
    use salto_core::QuadraticCost;

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
            21,
            0.1,
        )
    }

    #[test]
    fn test_unconstrained_solve_converges() {
        let mut solver = Solver::new(lqr_problem(), SolverOptions::default()).unwrap();
        let solution = solver.solve().unwrap();

        assert_eq!(solution.status, SolveStatus::Optimal);
        assert!(solution.states.last().unwrap().norm() < 0.1);
        assert!(solution.stats.iterations > 0);
        assert_eq!(solution.stats.major_iterations, 1);
    }

    #[test]
    fn test_cost_sequence_non_increasing() {
        let mut solver = Solver::new(lqr_problem(), SolverOptions::default()).unwrap();
        let solution = solver.solve().unwrap();

        for pair in solution.stats.cost.windows(2) {
            assert!(pair[1] <= pair[0] + 1e-10);
        }
    }

    #[test]
    fn test_missing_state_guess_is_config_error() {
        let options = SolverOptions {
            infeasible: true,
            ..SolverOptions::default()
        };
        let mut solver = Solver::new(lqr_problem(), options).unwrap();
        assert!(matches!(
            solver.solve(),
            Err(ConfigError::MissingStateTrajectory)
        ));
    }

    #[test]
    fn test_bad_control_guess_rejected() {
        let solver = Solver::new(lqr_problem(), SolverOptions::default())
            .unwrap()
            .with_control_guess(vec![DVector::zeros(1); 3]);
        let mut solver = solver;
        assert!(solver.solve().is_err());
    }

    #[test]
    fn test_control_guess_round_trip() {
        let guess = vec![DVector::from_vec(vec![0.1]); 20];
        let mut solver = Solver::new(lqr_problem(), SolverOptions::default())
            .unwrap()
            .with_control_guess(guess);
        let solution = solver.solve().unwrap();
        assert_eq!(solution.controls.len(), 20);
        assert_eq!(solution.controls[0].len(), 1);
        assert!(solution.step_durations.is_none());
    }
}

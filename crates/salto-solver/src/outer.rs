//! Outer loop: multiplier and penalty updates
//!
//! After each inner convergence (or iteration cap) the augmented Lagrangian
//! machinery advances: multipliers take a first-order step
//! `λ ← clamp(λ + μ ⊙ c)` with inequality rows projected onto λ ≥ 0, and
//! penalties grow either uniformly or per constraint row depending on how
//! much that row's violation shrank since the previous outer iteration.
//!
//! A second-order multiplier variant solves the reduced KKT system
//! `B = G·H⁻¹·Gᵀ` on the active set (a single solve of `B·Δλ = c`); it is
//! optional and off by default.

use nalgebra::{DMatrix, DVector};

use crate::backward::cholesky_with_jitter;
use crate::constraints::ConstraintEvaluator;
use crate::options::SolverOptions;
use crate::problem::{Problem, SolveMode};
use crate::trajectory::TrajectoryStore;

/// First-order multiplier update with clamping and inequality projection.
pub fn update_duals(store: &mut TrajectoryStore, eval: &ConstraintEvaluator, options: &SolverOptions) {
    let p_ineq = eval.layout.p_ineq;

    for k in 0..store.num_stages() {
        for i in 0..store.p {
            let stepped = store.lambda[k][i] + store.penalty[k][i] * store.c[k][i];
            let mut lam = stepped.clamp(options.dual_min, options.dual_max);
            if i < p_ineq {
                lam = lam.max(0.0);
            }
            store.lambda[k][i] = lam;
        }
    }
    for i in 0..store.cn.len() {
        let stepped = store.lambda_n[i] + store.penalty_n[i] * store.cn[i];
        store.lambda_n[i] = stepped.clamp(options.dual_min, options.dual_max);
    }
}

/// Second-order multiplier update on the active set. Falls back to the
/// first-order step at any knot whose reduced system cannot be factorized.
pub fn update_duals_second_order(
    problem: &Problem,
    mode: &SolveMode,
    options: &SolverOptions,
    eval: &mut ConstraintEvaluator,
    store: &mut TrajectoryStore,
) {
    let p_ineq = eval.layout.p_ineq;
    let (n, mm) = (mode.n, mode.mm);

    for k in 0..store.num_stages() {
        let active_rows: Vec<usize> = (0..store.p)
            .filter(|&i| store.active[k][i] > 0.0)
            .collect();
        if active_rows.is_empty() {
            continue;
        }

        // AL Hessian of the stage in the stacked (x, u) variable.
        eval.al_stage_expansion(problem, mode, options, store, k);
        let exp = &eval.al_exp;
        let dim = n + mm;
        let mut hess = DMatrix::<f64>::zeros(dim, dim);
        hess.view_mut((0, 0), (n, n)).copy_from(&exp.lxx);
        hess.view_mut((n, n), (mm, mm)).copy_from(&exp.luu);
        hess.view_mut((n, 0), (mm, n)).copy_from(&exp.lux);
        hess.view_mut((0, n), (n, mm)).copy_from(&exp.lux.transpose());

        let na = active_rows.len();
        let mut jac = DMatrix::<f64>::zeros(na, dim);
        let mut residual = DVector::<f64>::zeros(na);
        for (row, &i) in active_rows.iter().enumerate() {
            jac.view_mut((row, 0), (1, n)).copy_from(&store.cx[k].row(i));
            jac.view_mut((row, n), (1, mm)).copy_from(&store.cu[k].row(i));
            residual[row] = store.c[k][i];
        }

        let step = cholesky_with_jitter(&hess)
            .map(|chol| chol.solve(&jac.transpose()))
            .map(|hinv_gt| &jac * hinv_gt)
            .and_then(|b| cholesky_with_jitter(&b).map(|chol| chol.solve(&residual)));

        match step {
            Some(step) => {
                for (row, &i) in active_rows.iter().enumerate() {
                    let mut lam = (store.lambda[k][i] + step[row])
                        .clamp(options.dual_min, options.dual_max);
                    if i < p_ineq {
                        lam = lam.max(0.0);
                    }
                    store.lambda[k][i] = lam;
                }
            }
            None => {
                for i in 0..store.p {
                    let stepped = store.lambda[k][i] + store.penalty[k][i] * store.c[k][i];
                    let mut lam = stepped.clamp(options.dual_min, options.dual_max);
                    if i < p_ineq {
                        lam = lam.max(0.0);
                    }
                    store.lambda[k][i] = lam;
                }
            }
        }
    }

    // Terminal: G is the identity, so B = H⁻¹ and the step is H·c.
    if !store.cn.is_empty() {
        let last = store.num_knots() - 1;
        let x = store.states[last].clone();
        let mut hess = DMatrix::<f64>::zeros(n, n);
        let mut grad = DVector::<f64>::zeros(n);
        problem.cost.terminal_expansion(&x, &mut hess, &mut grad);
        for i in 0..n {
            hess[(i, i)] += store.active_n[i];
        }
        let step = &hess * &store.cn;
        for i in 0..n {
            store.lambda_n[i] =
                (store.lambda_n[i] + step[i]).clamp(options.dual_min, options.dual_max);
        }
    }
}

/// Penalty growth. The uniform scheme multiplies everything by γ; the
/// individual scheme applies the slow factor γ_no to rows whose violation
/// shrank below τ times its previous value, the fast factor γ otherwise.
pub fn update_penalties(
    store: &mut TrajectoryStore,
    eval: &ConstraintEvaluator,
    options: &SolverOptions,
    individual: bool,
) {
    let cap = options.penalty_max;
    let fast = options.penalty_scaling;
    let slow = options.penalty_scaling_no;
    let ratio = options.constraint_decrease_ratio;

    if !individual {
        for k in 0..store.num_stages() {
            for i in 0..store.p {
                store.penalty[k][i] = (store.penalty[k][i] * fast).min(cap);
            }
        }
        for i in 0..store.cn.len() {
            store.penalty_n[i] = (store.penalty_n[i] * fast).min(cap);
        }
        return;
    }

    for k in 0..store.num_stages() {
        for i in 0..store.p {
            let viol = eval.layout.violation(i, store.c[k][i]);
            let viol_prev = eval.layout.violation(i, store.c_prev[k][i]);
            let factor = if viol <= ratio * viol_prev { slow } else { fast };
            store.penalty[k][i] = (store.penalty[k][i] * factor).min(cap);
        }
    }
    for i in 0..store.cn.len() {
        let factor = if store.cn[i].abs() <= ratio * store.cn_prev[i].abs() {
            slow
        } else {
            fast
        };
        store.penalty_n[i] = (store.penalty_n[i] * factor).min(cap);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::SolveMode;
    use nalgebra::{DMatrix, DVector};
    use salto_core::dynamics::DoubleIntegrator;
    use salto_core::QuadraticCost;

    fn constrained_setup() -> (Problem, SolveMode, SolverOptions, ConstraintEvaluator) {
        let cost = QuadraticCost::new(
            DMatrix::identity(2, 2),
            DMatrix::identity(1, 1),
            DMatrix::identity(2, 2),
            DVector::zeros(2),
        );
        let problem = Problem::new(
            Box::new(DoubleIntegrator),
            cost,
            DVector::from_vec(vec![1.0, 0.0]),
            4,
            0.1,
        )
        .with_control_bounds(DVector::from_vec(vec![-1.0]), DVector::from_vec(vec![1.0]))
        .with_goal_constraint();
        let options = SolverOptions::default();
        let mode = SolveMode::derive(&problem, &options);
        let eval = ConstraintEvaluator::new(&problem, &mode, &options);
        (problem, mode, options, eval)
    }

    fn store_for(eval: &ConstraintEvaluator, options: &SolverOptions) -> TrajectoryStore {
        let mut store = TrajectoryStore::new(2, 1, eval.layout.p, 2, 4);
        for k in 0..store.num_stages() {
            store.penalty[k].fill(options.penalty_initial);
        }
        store.penalty_n.fill(options.penalty_initial);
        store
    }

    #[test]
    fn test_dual_update_projects_inequalities() {
        let (_, _, options, eval) = constrained_setup();
        let mut store = store_for(&eval, &options);

        // Satisfied inequality with a small positive multiplier decays and
        // must stop at zero, never below.
        store.lambda[0][0] = 0.2;
        store.c[0][0] = -5.0;
        // Violated inequality accumulates.
        store.lambda[0][1] = 0.0;
        store.c[0][1] = 2.0;

        update_duals(&mut store, &eval, &options);

        assert_eq!(store.lambda[0][0], 0.0);
        assert!((store.lambda[0][1] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_dual_update_clamps_box() {
        let (_, _, _, eval) = constrained_setup();
        let options = SolverOptions {
            dual_max: 10.0,
            ..SolverOptions::default()
        };
        let mut store = store_for(&eval, &options);
        store.lambda[0][0] = 9.0;
        store.c[0][0] = 100.0;
        store.penalty[0][0] = 1.0;

        update_duals(&mut store, &eval, &options);
        assert_eq!(store.lambda[0][0], 10.0);
    }

    #[test]
    fn test_terminal_duals_signed() {
        let (_, _, options, eval) = constrained_setup();
        let mut store = store_for(&eval, &options);
        store.cn[0] = -0.4;

        update_duals(&mut store, &eval, &options);
        // Equality multipliers may be negative.
        assert!((store.lambda_n[0] + 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_uniform_penalty_growth_monotone_and_capped() {
        let (_, _, _, eval) = constrained_setup();
        let options = SolverOptions {
            penalty_max: 50.0,
            ..SolverOptions::default()
        };
        let mut store = store_for(&eval, &options);

        for _ in 0..5 {
            let before = store.penalty[0][0];
            update_penalties(&mut store, &eval, &options, false);
            assert!(store.penalty[0][0] >= before);
            assert!(store.penalty[0][0] <= 50.0);
        }
        assert_eq!(store.penalty[0][0], 50.0);
    }

    #[test]
    fn test_individual_penalty_spares_improving_rows() {
        let (_, _, options, eval) = constrained_setup();
        let mut store = store_for(&eval, &options);

        // Row 0 improved well below τ·previous; row 1 stagnated.
        store.c[0][0] = 0.01;
        store.c_prev[0][0] = 1.0;
        store.c[0][1] = 1.0;
        store.c_prev[0][1] = 1.0;

        update_penalties(&mut store, &eval, &options, true);

        assert_eq!(store.penalty[0][0], options.penalty_initial);
        assert_eq!(
            store.penalty[0][1],
            options.penalty_initial * options.penalty_scaling
        );
    }
}

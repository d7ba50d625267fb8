//! Constraint stacking and the augmented Lagrangian cost
//!
//! The stacked stage constraint vector has a fixed, stable row order:
//!
//! 1. user inequality rows
//! 2. control upper-bound rows
//! 3. control lower-bound rows
//! 4. state upper-bound rows
//! 5. state lower-bound rows
//! 6. user equality rows
//! 7. minimum-time equality row (ties successive √dt controls)
//! 8. infeasible-slack equality rows (force slacks to zero)
//!
//! Bound rows exist only for finite bound entries; [`ConstraintLayout`] maps
//! each row to the component it constrains. Bound rows over the augmented
//! control cover the nominal inputs and the √dt control but never the
//! slacks.
//!
//! The augmented Lagrangian replaces the raw stage cost for everything
//! downstream:
//!
//! ```text
//! ℓ_AL(x, u) = ℓ(x, u)·dt + λᵀc + ½ cᵀ Iμ c
//! ```
//!
//! where `Iμ` carries μ on equality rows and on *active* inequality rows
//! (`c > 0 ∨ λ > 0`), zero elsewhere. The oracle's stage cost is a rate,
//! integrated over the step duration (which in minimum-time mode is itself
//! a decision variable, h²). Expansions use the Gauss–Newton
//! approximation: second derivatives of `c` are dropped.

use nalgebra::{DMatrix, DVector};
use salto_core::StageExpansion;

use crate::options::SolverOptions;
use crate::problem::{Problem, SolveMode};
use crate::trajectory::TrajectoryStore;

/// Row bookkeeping for the stacked stage constraint, computed once per
/// solve.
#[derive(Debug, Clone, Default)]
pub struct ConstraintLayout {
    pub num_user_ineq: usize,
    pub num_user_eq: usize,
    /// (control component, bound) pairs, one row each
    pub u_upper: Vec<(usize, f64)>,
    pub u_lower: Vec<(usize, f64)>,
    /// (state component, bound) pairs
    pub x_upper: Vec<(usize, f64)>,
    pub x_lower: Vec<(usize, f64)>,
    pub min_time_row: Option<usize>,
    pub slack_start: Option<usize>,
    /// Terminal equality `x_N = x_goal` present
    pub terminal: bool,
    /// Total stage rows
    pub p: usize,
    /// Inequality rows (stacked first)
    pub p_ineq: usize,
}

impl ConstraintLayout {
    pub fn new(problem: &Problem, mode: &SolveMode, options: &SolverOptions) -> Self {
        if !mode.constrained {
            return Self::default();
        }

        let finite_rows = |v: &Option<DVector<f64>>| -> Vec<(usize, f64)> {
            v.as_ref()
                .map(|v| {
                    v.iter()
                        .enumerate()
                        .filter(|(_, b)| b.is_finite())
                        .map(|(i, b)| (i, *b))
                        .collect()
                })
                .unwrap_or_default()
        };

        let num_user_ineq = problem.constraint.as_ref().map_or(0, |c| c.num_inequality());
        let num_user_eq = problem.constraint.as_ref().map_or(0, |c| c.num_equality());

        let mut u_upper = finite_rows(&problem.u_max);
        let mut u_lower = finite_rows(&problem.u_min);
        if let Some(h_idx) = mode.h_index() {
            u_upper.push((h_idx, options.dt_max.sqrt()));
            u_lower.push((h_idx, options.dt_min.sqrt()));
        }
        let x_upper = finite_rows(&problem.x_max);
        let x_lower = finite_rows(&problem.x_min);

        let p_ineq =
            num_user_ineq + u_upper.len() + u_lower.len() + x_upper.len() + x_lower.len();
        let mut p = p_ineq + num_user_eq;

        let min_time_row = mode.minimum_time.then(|| {
            let row = p;
            p += 1;
            row
        });
        let slack_start = mode.infeasible.then(|| {
            let row = p;
            p += mode.n;
            row
        });

        Self {
            num_user_ineq,
            num_user_eq,
            u_upper,
            u_lower,
            x_upper,
            x_lower,
            min_time_row,
            slack_start,
            terminal: problem.goal_constraint,
            p,
            p_ineq,
        }
    }

    /// Terminal constraint row count.
    pub fn p_terminal(&self, n: usize) -> usize {
        if self.terminal {
            n
        } else {
            0
        }
    }

    fn u_upper_start(&self) -> usize {
        self.num_user_ineq
    }

    fn u_lower_start(&self) -> usize {
        self.u_upper_start() + self.u_upper.len()
    }

    fn x_upper_start(&self) -> usize {
        self.u_lower_start() + self.u_lower.len()
    }

    fn x_lower_start(&self) -> usize {
        self.x_upper_start() + self.x_upper.len()
    }

    fn user_eq_start(&self) -> usize {
        self.p_ineq
    }

    /// Violation measure for a row: positive part for inequalities,
    /// magnitude for equalities.
    pub fn violation(&self, row: usize, value: f64) -> f64 {
        if row < self.p_ineq {
            value.max(0.0)
        } else {
            value.abs()
        }
    }
}

/// Evaluates the stacked constraint, its Jacobians, and the augmented
/// Lagrangian cost/expansions. Scratch buffers are allocated once.
pub struct ConstraintEvaluator {
    pub layout: ConstraintLayout,
    u_nom: DVector<f64>,
    c_user: DVector<f64>,
    cx_user: DMatrix<f64>,
    cu_user: DMatrix<f64>,
    cost_exp: StageExpansion,
    /// Padded AL stage expansion, written by [`Self::al_stage_expansion`]
    pub al_exp: StageExpansion,
    lam_bar: DVector<f64>,
    scaled_cx: DMatrix<f64>,
    scaled_cu: DMatrix<f64>,
}

impl ConstraintEvaluator {
    pub fn new(problem: &Problem, mode: &SolveMode, options: &SolverOptions) -> Self {
        let layout = ConstraintLayout::new(problem, mode, options);
        let p_user = layout.num_user_ineq + layout.num_user_eq;
        let (n, m, mm, p) = (mode.n, mode.m, mode.mm, layout.p);
        Self {
            layout,
            u_nom: DVector::zeros(m),
            c_user: DVector::zeros(p_user),
            cx_user: DMatrix::zeros(p_user, n),
            cu_user: DMatrix::zeros(p_user, m),
            cost_exp: StageExpansion::zeros(n, m),
            al_exp: StageExpansion::zeros(n, mm),
            lam_bar: DVector::zeros(p),
            scaled_cx: DMatrix::zeros(p, n),
            scaled_cu: DMatrix::zeros(p, mm),
        }
    }

    fn nominal_control(&mut self, u: &DVector<f64>) {
        let m = self.u_nom.len();
        self.u_nom.copy_from(&u.rows(0, m));
    }

    /// Write the stacked stage constraint at `(x, u)` into `out`.
    ///
    /// `u_prev` is the previous stage's control, consulted only by the
    /// minimum-time tie row.
    pub fn evaluate_stage(
        &mut self,
        problem: &Problem,
        mode: &SolveMode,
        x: &DVector<f64>,
        u: &DVector<f64>,
        u_prev: Option<&DVector<f64>>,
        out: &mut DVector<f64>,
    ) {
        if let Some(constraint) = &problem.constraint {
            self.nominal_control(u);
            constraint.evaluate(x, &self.u_nom, &mut self.c_user);
            let layout = &self.layout;
            for i in 0..layout.num_user_ineq {
                out[i] = self.c_user[i];
            }
            for i in 0..layout.num_user_eq {
                out[layout.user_eq_start() + i] = self.c_user[layout.num_user_ineq + i];
            }
        }

        let layout = &self.layout;
        for (i, (comp, bound)) in layout.u_upper.iter().enumerate() {
            out[layout.u_upper_start() + i] = u[*comp] - bound;
        }
        for (i, (comp, bound)) in layout.u_lower.iter().enumerate() {
            out[layout.u_lower_start() + i] = bound - u[*comp];
        }
        for (i, (comp, bound)) in layout.x_upper.iter().enumerate() {
            out[layout.x_upper_start() + i] = x[*comp] - bound;
        }
        for (i, (comp, bound)) in layout.x_lower.iter().enumerate() {
            out[layout.x_lower_start() + i] = bound - x[*comp];
        }

        if let Some(row) = layout.min_time_row {
            let h_idx = mode.h_index().expect("minimum-time row without h control");
            out[row] = match u_prev {
                Some(prev) => u[h_idx] - prev[h_idx],
                None => 0.0,
            };
        }
        if let Some(start) = layout.slack_start {
            for (i, j) in mode.slack_range().expect("slack rows without slacks").enumerate() {
                out[start + i] = u[j];
            }
        }
    }

    /// Write the stage constraint Jacobians into `cx` (p×n) and `cu` (p×mm).
    pub fn stage_jacobians(
        &mut self,
        problem: &Problem,
        mode: &SolveMode,
        x: &DVector<f64>,
        u: &DVector<f64>,
        cx: &mut DMatrix<f64>,
        cu: &mut DMatrix<f64>,
    ) {
        cx.fill(0.0);
        cu.fill(0.0);

        if let Some(constraint) = &problem.constraint {
            self.nominal_control(u);
            constraint.jacobians(x, &self.u_nom, &mut self.cx_user, &mut self.cu_user);
            let layout = &self.layout;
            let m = mode.m;
            for i in 0..layout.num_user_ineq {
                cx.row_mut(i).copy_from(&self.cx_user.row(i));
                cu.view_mut((i, 0), (1, m)).copy_from(&self.cu_user.row(i));
            }
            for i in 0..layout.num_user_eq {
                let src = layout.num_user_ineq + i;
                let dst = layout.user_eq_start() + i;
                cx.row_mut(dst).copy_from(&self.cx_user.row(src));
                cu.view_mut((dst, 0), (1, m)).copy_from(&self.cu_user.row(src));
            }
        }

        let layout = &self.layout;
        for (i, (comp, _)) in layout.u_upper.iter().enumerate() {
            cu[(layout.u_upper_start() + i, *comp)] = 1.0;
        }
        for (i, (comp, _)) in layout.u_lower.iter().enumerate() {
            cu[(layout.u_lower_start() + i, *comp)] = -1.0;
        }
        for (i, (comp, _)) in layout.x_upper.iter().enumerate() {
            cx[(layout.x_upper_start() + i, *comp)] = 1.0;
        }
        for (i, (comp, _)) in layout.x_lower.iter().enumerate() {
            cx[(layout.x_lower_start() + i, *comp)] = -1.0;
        }
        if let Some(row) = layout.min_time_row {
            cu[(row, mode.h_index().expect("minimum-time row without h control"))] = 1.0;
        }
        if let Some(start) = layout.slack_start {
            for (i, j) in mode.slack_range().expect("slack rows without slacks").enumerate() {
                cu[(start + i, j)] = 1.0;
            }
        }
    }

    /// Terminal residual `X[N−1] − x_goal` (Jacobian is the identity).
    pub fn terminal_residual(&self, problem: &Problem, x: &DVector<f64>, out: &mut DVector<f64>) {
        out.copy_from(x);
        *out -= &problem.cost.x_goal;
    }

    /// Refresh the active-penalty diagonal Iμ from the current values and
    /// multipliers: an inequality row is active iff `c > 0 ∨ λ > 0`;
    /// equality rows are always active.
    pub fn update_active_set(&self, store: &mut TrajectoryStore) {
        let p_ineq = self.layout.p_ineq;
        for k in 0..store.num_stages() {
            for i in 0..self.layout.p {
                let active = i >= p_ineq || store.c[k][i] > 0.0 || store.lambda[k][i] > 0.0;
                store.active[k][i] = if active { store.penalty[k][i] } else { 0.0 };
            }
        }
        store.active_n.copy_from(&store.penalty_n);
    }

    /// AL cost contribution `λᵀc + ½cᵀIμc` with the active set derived on
    /// the fly from `(c, λ)`.
    pub fn al_term(&self, c: &DVector<f64>, lambda: &DVector<f64>, penalty: &DVector<f64>) -> f64 {
        let p_ineq = self.layout.p_ineq;
        let mut total = 0.0;
        for i in 0..c.len() {
            let active = i >= p_ineq || c[i] > 0.0 || lambda[i] > 0.0;
            let weight = if active { penalty[i] } else { 0.0 };
            total += lambda[i] * c[i] + 0.5 * weight * c[i] * c[i];
        }
        total
    }

    /// Raw stage cost: the oracle's cost rate integrated over the step
    /// duration, plus the augmentation tails (time penalty on the √dt
    /// control, quadratic regularization on the slacks).
    pub fn augmented_stage_cost(
        &mut self,
        problem: &Problem,
        mode: &SolveMode,
        options: &SolverOptions,
        x: &DVector<f64>,
        u: &DVector<f64>,
    ) -> f64 {
        self.nominal_control(u);
        let dt = mode.stage_dt(u, problem.dt);
        let mut rate = problem.cost.stage(x, &self.u_nom);
        if mode.minimum_time {
            // Total-time objective: w·Σ dt_k with dt_k = h².
            rate += options.minimum_time_penalty;
        }
        let mut cost = rate * dt;
        if let Some(slacks) = mode.slack_range() {
            for j in slacks {
                cost += 0.5 * options.infeasible_penalty * u[j] * u[j];
            }
        }
        cost
    }

    /// Total augmented Lagrangian cost of a trajectory. Stage constraint
    /// values are written into `cs` and the terminal residual into `cn` as
    /// a side effect, so an accepted candidate needs no re-evaluation.
    #[allow(clippy::too_many_arguments)]
    pub fn total_cost(
        &mut self,
        problem: &Problem,
        mode: &SolveMode,
        options: &SolverOptions,
        xs: &[DVector<f64>],
        us: &[DVector<f64>],
        cs: &mut [DVector<f64>],
        cn: &mut DVector<f64>,
        lambda: &[DVector<f64>],
        lambda_n: &DVector<f64>,
        penalty: &[DVector<f64>],
        penalty_n: &DVector<f64>,
    ) -> f64 {
        let ns = us.len();
        let mut total = 0.0;

        for k in 0..ns {
            total += self.augmented_stage_cost(problem, mode, options, &xs[k], &us[k]);
            if self.layout.p > 0 {
                let u_prev = if k > 0 { Some(&us[k - 1]) } else { None };
                self.evaluate_stage(problem, mode, &xs[k], &us[k], u_prev, &mut cs[k]);
                total += self.al_term(&cs[k], &lambda[k], &penalty[k]);
            }
        }

        total += problem.cost.terminal(&xs[ns]);
        if self.layout.terminal {
            self.terminal_residual(problem, &xs[ns], cn);
            // Terminal rows are equalities: all active.
            for i in 0..cn.len() {
                total += lambda_n[i] * cn[i] + 0.5 * penalty_n[i] * cn[i] * cn[i];
            }
        }
        total
    }

    /// Maximum constraint violation over the whole trajectory.
    pub fn max_violation(&self, store: &TrajectoryStore) -> f64 {
        let mut worst: f64 = 0.0;
        for c in &store.c {
            for i in 0..c.len() {
                worst = worst.max(self.layout.violation(i, c[i]));
            }
        }
        for i in 0..store.cn.len() {
            worst = worst.max(store.cn[i].abs());
        }
        worst
    }

    /// Build the augmented Lagrangian stage expansion at knot `k` into
    /// [`Self::al_exp`], padded to the augmented control width.
    pub fn al_stage_expansion(
        &mut self,
        problem: &Problem,
        mode: &SolveMode,
        options: &SolverOptions,
        store: &TrajectoryStore,
        k: usize,
    ) {
        let x = &store.states[k];
        let u = &store.controls[k];
        let (n, m, mm) = (mode.n, mode.m, mode.mm);

        self.nominal_control(u);
        problem.cost.stage_expansion(x, &self.u_nom, &mut self.cost_exp);
        let dt = mode.stage_dt(u, problem.dt);

        let exp = &mut self.al_exp;
        exp.lxx.copy_from(&self.cost_exp.lxx);
        exp.lxx *= dt;
        exp.lx.copy_from(&self.cost_exp.lx);
        exp.lx *= dt;
        exp.luu.fill(0.0);
        exp.lux.fill(0.0);
        exp.lu.fill(0.0);
        {
            let mut block = exp.luu.view_mut((0, 0), (m, m));
            block.copy_from(&self.cost_exp.luu);
            block *= dt;
        }
        {
            let mut block = exp.lux.view_mut((0, 0), (m, n));
            block.copy_from(&self.cost_exp.lux);
            block *= dt;
        }
        {
            let mut block = exp.lu.rows_mut(0, m);
            block.copy_from(&self.cost_exp.lu);
            block *= dt;
        }

        if let Some(h_idx) = mode.h_index() {
            // The stage contributes h²·(ℓ + w), so the h slot couples to
            // everything: ∂/∂h = 2h(ℓ + w), ∂²/∂h² = 2(ℓ + w), and the
            // mixed partials pick up the unscaled cost gradients.
            let rate = problem.cost.stage(x, &self.u_nom) + options.minimum_time_penalty;
            let h = u[h_idx];
            exp.lu[h_idx] = 2.0 * h * rate;
            exp.luu[(h_idx, h_idx)] = 2.0 * rate;
            for i in 0..m {
                let mixed = 2.0 * h * self.cost_exp.lu[i];
                exp.luu[(h_idx, i)] = mixed;
                exp.luu[(i, h_idx)] = mixed;
            }
            for j in 0..n {
                exp.lux[(h_idx, j)] = 2.0 * h * self.cost_exp.lx[j];
            }

            // The next stage's tie row h_{k+1} − h_k also depends on this
            // stage's h; fold its first-order AL contribution in so the
            // stage-wise model carries the exact gradient.
            if let Some(row) = self.layout.min_time_row {
                if k + 1 < store.num_stages() {
                    let lam_next =
                        store.lambda[k + 1][row] + store.active[k + 1][row] * store.c[k + 1][row];
                    exp.lu[h_idx] -= lam_next;
                    exp.luu[(h_idx, h_idx)] += store.active[k + 1][row];
                }
            }
        }
        if let Some(slacks) = mode.slack_range() {
            for j in slacks {
                exp.luu[(j, j)] += options.infeasible_penalty;
                exp.lu[j] += options.infeasible_penalty * u[j];
            }
        }

        if self.layout.p > 0 {
            let c = &store.c[k];
            let cx = &store.cx[k];
            let cu = &store.cu[k];
            let iu = &store.active[k];

            // λ̄ = λ + Iμ·c drives the gradient; Iμ scales the rows of the
            // Jacobians for the Gauss–Newton Hessian terms.
            for i in 0..self.layout.p {
                self.lam_bar[i] = store.lambda[k][i] + iu[i] * c[i];
                for j in 0..n {
                    self.scaled_cx[(i, j)] = iu[i] * cx[(i, j)];
                }
                for j in 0..mm {
                    self.scaled_cu[(i, j)] = iu[i] * cu[(i, j)];
                }
            }

            exp.lx += cx.tr_mul(&self.lam_bar);
            exp.lu += cu.tr_mul(&self.lam_bar);
            exp.lxx += cx.tr_mul(&self.scaled_cx);
            exp.luu += cu.tr_mul(&self.scaled_cu);
            exp.lux += cu.tr_mul(&self.scaled_cx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{DMatrix, DVector};
    use salto_core::dynamics::DoubleIntegrator;
    use salto_core::QuadraticCost;

    fn bounded_problem() -> Problem {
        let cost = QuadraticCost::new(
            DMatrix::identity(2, 2),
            DMatrix::identity(1, 1),
            DMatrix::identity(2, 2),
            DVector::zeros(2),
        );
        Problem::new(
            Box::new(DoubleIntegrator),
            cost,
            DVector::from_vec(vec![1.0, 0.0]),
            11,
            0.1,
        )
        .with_control_bounds(DVector::from_vec(vec![-2.0]), DVector::from_vec(vec![2.0]))
        .with_state_bounds(
            DVector::from_vec(vec![f64::NEG_INFINITY, -5.0]),
            DVector::from_vec(vec![f64::INFINITY, 5.0]),
        )
        .with_goal_constraint()
    }

    fn setup() -> (Problem, SolveMode, SolverOptions, ConstraintEvaluator) {
        let problem = bounded_problem();
        let options = SolverOptions::default();
        let mode = SolveMode::derive(&problem, &options);
        let eval = ConstraintEvaluator::new(&problem, &mode, &options);
        (problem, mode, options, eval)
    }

    #[test]
    fn test_layout_counts_finite_bounds_only() {
        let (_, _, _, eval) = setup();
        let layout = &eval.layout;

        // One control each way, one finite state bound each way.
        assert_eq!(layout.u_upper.len(), 1);
        assert_eq!(layout.u_lower.len(), 1);
        assert_eq!(layout.x_upper.len(), 1);
        assert_eq!(layout.x_lower.len(), 1);
        assert_eq!(layout.p_ineq, 4);
        assert_eq!(layout.p, 4);
        assert!(layout.terminal);
    }

    #[test]
    fn test_stacked_values_and_order() {
        let (problem, mode, _, mut eval) = setup();
        let x = DVector::from_vec(vec![0.0, 6.0]);
        let u = DVector::from_vec(vec![3.0]);
        let mut c = DVector::zeros(4);

        eval.evaluate_stage(&problem, &mode, &x, &u, None, &mut c);

        assert_eq!(c[0], 1.0); // u − u_max = 3 − 2
        assert_eq!(c[1], -5.0); // u_min − u = −2 − 3
        assert_eq!(c[2], 1.0); // v − v_max = 6 − 5
        assert_eq!(c[3], -11.0); // v_min − v = −5 − 6
    }

    #[test]
    fn test_jacobians_are_signed_identity_rows() {
        let (problem, mode, _, mut eval) = setup();
        let x = DVector::zeros(2);
        let u = DVector::zeros(1);
        let mut cx = DMatrix::zeros(4, 2);
        let mut cu = DMatrix::zeros(4, 1);

        eval.stage_jacobians(&problem, &mode, &x, &u, &mut cx, &mut cu);

        assert_eq!(cu[(0, 0)], 1.0);
        assert_eq!(cu[(1, 0)], -1.0);
        assert_eq!(cx[(2, 1)], 1.0);
        assert_eq!(cx[(3, 1)], -1.0);
    }

    #[test]
    fn test_active_set_rule() {
        let (_, _, _, eval) = setup();
        let mut store = TrajectoryStore::new(2, 1, 4, 2, 3);
        for k in 0..2 {
            store.penalty[k].fill(10.0);
        }
        store.penalty_n.fill(10.0);

        // Row 0 violated, row 1 satisfied with positive multiplier, rows
        // 2-3 satisfied with zero multiplier.
        store.c[0][0] = 0.5;
        store.c[0][1] = -1.0;
        store.lambda[0][1] = 2.0;
        store.c[0][2] = -1.0;
        store.c[0][3] = -1.0;

        eval.update_active_set(&mut store);

        assert_eq!(store.active[0][0], 10.0);
        assert_eq!(store.active[0][1], 10.0);
        assert_eq!(store.active[0][2], 0.0);
        assert_eq!(store.active[0][3], 0.0);
        // Terminal equalities always carry the penalty.
        assert_eq!(store.active_n[0], 10.0);
    }

    #[test]
    fn test_al_term_matches_manual() {
        let (_, _, _, eval) = setup();
        let c = DVector::from_vec(vec![0.5, -1.0, -1.0, -1.0]);
        let lambda = DVector::from_vec(vec![1.0, 0.0, 0.0, 0.0]);
        let penalty = DVector::from_element(4, 4.0);

        // Only row 0 is active: 1·0.5 + ½·4·0.25 = 1.0
        let total = eval.al_term(&c, &lambda, &penalty);
        assert!((total - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_max_violation_uses_positive_part_for_inequalities() {
        let (_, _, _, eval) = setup();
        let mut store = TrajectoryStore::new(2, 1, 4, 2, 3);
        store.c[0][0] = -3.0; // satisfied inequality, not a violation
        store.c[1][1] = 0.25;
        store.cn[0] = -0.5; // terminal equality counts in magnitude

        let v = eval.max_violation(&store);
        assert!((v - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_unconstrained_layout_is_empty() {
        let cost = QuadraticCost::new(
            DMatrix::identity(2, 2),
            DMatrix::identity(1, 1),
            DMatrix::identity(2, 2),
            DVector::zeros(2),
        );
        let problem = Problem::new(
            Box::new(DoubleIntegrator),
            cost,
            DVector::zeros(2),
            5,
            0.1,
        );
        let options = SolverOptions::default();
        let mode = SolveMode::derive(&problem, &options);
        let layout = ConstraintLayout::new(&problem, &mode, &options);
        assert_eq!(layout.p, 0);
        assert!(!layout.terminal);
    }
}

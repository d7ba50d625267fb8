//! Problem definition and solve mode
//!
//! A [`Problem`] bundles the external oracles (dynamics, cost, optional
//! user constraint) with the horizon, the initial state, and any bounds.
//! At solve entry the option flags are collapsed into a single
//! [`SolveMode`] descriptor; every hot-path branch keys off that descriptor
//! rather than re-inspecting individual booleans.

use nalgebra::{DMatrix, DVector};
use salto_core::{DiscreteDynamics, QuadraticCost, StageConstraint};

use crate::error::ConfigError;
use crate::options::{
    BackwardPassRegularization, DualUpdate, PenaltyUpdate, SolverOptions,
};

/// A discrete-time trajectory optimization problem.
pub struct Problem {
    pub dynamics: Box<dyn DiscreteDynamics>,
    pub cost: QuadraticCost,
    /// Initial state (always the first knot outside infeasible augmentation)
    pub x0: DVector<f64>,
    /// Number of knot points N (N−1 stages own controls)
    pub num_knots: usize,
    /// Nominal step duration
    pub dt: f64,
    pub u_min: Option<DVector<f64>>,
    pub u_max: Option<DVector<f64>>,
    pub x_min: Option<DVector<f64>>,
    pub x_max: Option<DVector<f64>>,
    pub constraint: Option<Box<dyn StageConstraint>>,
    /// Terminal equality `x_N = x_goal`
    pub goal_constraint: bool,
}

impl Problem {
    pub fn new(
        dynamics: Box<dyn DiscreteDynamics>,
        cost: QuadraticCost,
        x0: DVector<f64>,
        num_knots: usize,
        dt: f64,
    ) -> Self {
        Self {
            dynamics,
            cost,
            x0,
            num_knots,
            dt,
            u_min: None,
            u_max: None,
            x_min: None,
            x_max: None,
            constraint: None,
            goal_constraint: false,
        }
    }

    pub fn with_control_bounds(mut self, u_min: DVector<f64>, u_max: DVector<f64>) -> Self {
        self.u_min = Some(u_min);
        self.u_max = Some(u_max);
        self
    }

    pub fn with_state_bounds(mut self, x_min: DVector<f64>, x_max: DVector<f64>) -> Self {
        self.x_min = Some(x_min);
        self.x_max = Some(x_max);
        self
    }

    pub fn with_constraint(mut self, constraint: Box<dyn StageConstraint>) -> Self {
        self.constraint = Some(constraint);
        self
    }

    pub fn with_goal_constraint(mut self) -> Self {
        self.goal_constraint = true;
        self
    }

    /// State dimension.
    pub fn n(&self) -> usize {
        self.dynamics.state_dim()
    }

    /// Nominal control dimension.
    pub fn m(&self) -> usize {
        self.dynamics.control_dim()
    }

    /// Number of stages owning a control.
    pub fn num_stages(&self) -> usize {
        self.num_knots - 1
    }

    /// Check shapes and horizon before the solve loop starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let n = self.n();
        let m = self.m();

        if self.num_knots < 2 {
            return Err(ConfigError::HorizonTooShort(self.num_knots));
        }
        if self.dt <= 0.0 {
            return Err(ConfigError::InvalidTimeStep(self.dt));
        }
        if self.x0.len() != n {
            return Err(ConfigError::DimensionMismatch {
                what: "initial state",
                expected: n,
                got: self.x0.len(),
            });
        }
        self.cost.validate(n, m)?;

        let check_len = |what, v: &Option<DVector<f64>>, expected| match v {
            Some(v) if v.len() != expected => Err(ConfigError::DimensionMismatch {
                what,
                expected,
                got: v.len(),
            }),
            _ => Ok(()),
        };
        check_len("control lower bound", &self.u_min, m)?;
        check_len("control upper bound", &self.u_max, m)?;
        check_len("state lower bound", &self.x_min, n)?;
        check_len("state upper bound", &self.x_max, n)?;
        Ok(())
    }

    /// Stage map through the augmented control `[u | h | s]`.
    pub fn step_stage(&self, mode: &SolveMode, x: &DVector<f64>, u: &DVector<f64>) -> DVector<f64> {
        let u_nom = u.rows(0, mode.m).into_owned();
        let dt = mode.stage_dt(u, self.dt);
        let mut next = self.dynamics.step(x, &u_nom, dt);
        if let Some(slacks) = mode.slack_range() {
            for (i, j) in slacks.enumerate() {
                next[i] += u[j];
            }
        }
        next
    }

    /// Jacobians of the stage map, padded to the augmented control width.
    pub fn stage_jacobians(
        &self,
        mode: &SolveMode,
        x: &DVector<f64>,
        u: &DVector<f64>,
    ) -> (DMatrix<f64>, DMatrix<f64>) {
        let n = mode.n;
        let u_nom = u.rows(0, mode.m).into_owned();
        let dt = mode.stage_dt(u, self.dt);

        let (fdx, fdu_nom) = self.dynamics.jacobians(x, &u_nom, dt);
        let mut fdu = DMatrix::<f64>::zeros(n, mode.mm);
        fdu.view_mut((0, 0), (n, mode.m)).copy_from(&fdu_nom);

        if let Some(h_idx) = mode.h_index() {
            // dt = h², so ∂x'/∂h = ∂x'/∂dt · 2h.
            let fdt = self.dynamics.dt_jacobian(x, &u_nom, dt);
            let h = u[h_idx];
            for i in 0..n {
                fdu[(i, h_idx)] = fdt[i] * 2.0 * h;
            }
        }
        if let Some(slacks) = mode.slack_range() {
            for (i, j) in slacks.enumerate() {
                fdu[(i, j)] = 1.0;
            }
        }
        (fdx, fdu)
    }
}

/// Solve-mode descriptor computed once at solve entry.
#[derive(Debug, Clone, Copy)]
pub struct SolveMode {
    pub constrained: bool,
    pub minimum_time: bool,
    pub infeasible: bool,
    pub square_root: bool,
    /// State dimension
    pub n: usize,
    /// Nominal control dimension
    pub m: usize,
    /// Nominal plus √dt control
    pub m_bar: usize,
    /// Fully augmented control dimension
    pub mm: usize,
    pub bp_reg: BackwardPassRegularization,
    pub penalty_update: PenaltyUpdate,
    pub dual_update: DualUpdate,
}

impl SolveMode {
    pub fn derive(problem: &Problem, options: &SolverOptions) -> Self {
        let n = problem.n();
        let m = problem.m();
        let m_bar = m + usize::from(options.minimum_time);
        let mm = m_bar + if options.infeasible { n } else { 0 };

        let constrained = options.infeasible
            || options.minimum_time
            || problem.goal_constraint
            || problem.constraint.is_some()
            || problem.u_min.is_some()
            || problem.u_max.is_some()
            || problem.x_min.is_some()
            || problem.x_max.is_some();

        Self {
            constrained,
            minimum_time: options.minimum_time,
            infeasible: options.infeasible,
            square_root: options.square_root,
            n,
            m,
            m_bar,
            mm,
            bp_reg: options.bp_reg_type,
            penalty_update: options.outer_loop_update,
            dual_update: options.dual_update,
        }
    }

    /// Mode for the feasibility-projection phase: slacks stripped, and the
    /// whole constraint machinery dropped when the original problem was
    /// unconstrained.
    pub fn feasible(problem: &Problem, options: &SolverOptions) -> Self {
        let mut options = options.clone();
        options.infeasible = false;
        let mut mode = Self::derive(problem, &options);
        if options.unconstrained_original_problem {
            mode.constrained = false;
        }
        mode
    }

    /// Index of the √dt control, when the minimum-time formulation is on.
    pub fn h_index(&self) -> Option<usize> {
        self.minimum_time.then_some(self.m)
    }

    /// Column range of the slack controls, when infeasible start is on.
    pub fn slack_range(&self) -> Option<std::ops::Range<usize>> {
        self.infeasible.then_some(self.m_bar..self.mm)
    }

    /// Step duration at a stage: the nominal dt, or h² in minimum-time mode.
    pub fn stage_dt(&self, u: &DVector<f64>, nominal_dt: f64) -> f64 {
        match self.h_index() {
            Some(h_idx) => u[h_idx] * u[h_idx],
            None => nominal_dt,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use salto_core::dynamics::DoubleIntegrator;

    fn problem() -> Problem {
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
    }

    #[test]
    fn test_unconstrained_mode() {
        let mode = SolveMode::derive(&problem(), &SolverOptions::default());
        assert!(!mode.constrained);
        assert_eq!(mode.mm, 1);
        assert!(mode.h_index().is_none());
        assert!(mode.slack_range().is_none());
    }

    #[test]
    fn test_bounds_imply_constrained() {
        let p = problem().with_control_bounds(
            DVector::from_vec(vec![-1.0]),
            DVector::from_vec(vec![1.0]),
        );
        let mode = SolveMode::derive(&p, &SolverOptions::default());
        assert!(mode.constrained);
        assert_eq!(mode.mm, 1);
    }

    #[test]
    fn test_augmented_dimensions() {
        let options = SolverOptions {
            minimum_time: true,
            infeasible: true,
            ..SolverOptions::default()
        };
        let mode = SolveMode::derive(&problem(), &options);
        assert_eq!(mode.m_bar, 2);
        assert_eq!(mode.mm, 4);
        assert_eq!(mode.h_index(), Some(1));
        assert_eq!(mode.slack_range(), Some(2..4));
    }

    #[test]
    fn test_slack_columns_feed_through() {
        let options = SolverOptions {
            infeasible: true,
            ..SolverOptions::default()
        };
        let p = problem();
        let mode = SolveMode::derive(&p, &options);

        let x = DVector::from_vec(vec![1.0, 0.0]);
        let u = DVector::from_vec(vec![0.0, 0.5, -0.25]);
        let next = p.step_stage(&mode, &x, &u);

        // Plain step plus the slack offset.
        assert!((next[0] - (1.0 + 0.5)).abs() < 1e-12);
        assert!((next[1] - (0.0 - 0.25)).abs() < 1e-12);

        let (_, fdu) = p.stage_jacobians(&mode, &x, &u);
        assert_eq!(fdu[(0, 1)], 1.0);
        assert_eq!(fdu[(1, 2)], 1.0);
        assert_eq!(fdu[(0, 2)], 0.0);
    }

    #[test]
    fn test_validate_catches_bad_x0() {
        let mut p = problem();
        p.x0 = DVector::zeros(3);
        assert!(p.validate().is_err());
    }
}

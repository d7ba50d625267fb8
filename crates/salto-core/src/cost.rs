//! Quadratic cost oracle
//!
//! The stage cost is
//!
//! ```text
//! ℓ(x, u) = ½(x − x_goal)ᵀ Q (x − x_goal) + ½ uᵀ R u + uᵀ H (x − x_goal)
//! ```
//!
//! with an optional m×n cross term H, and the terminal cost is
//! `½(x − x_goal)ᵀ Qf (x − x_goal)`. The oracle exposes values and exact
//! second-order expansions; since the cost is quadratic the expansions are
//! global.

use nalgebra::{DMatrix, DVector};
use thiserror::Error;

/// Cost coefficient shape errors, reported before the solve loop starts.
#[derive(Debug, Error)]
pub enum CostError {
    #[error("{name} is {rows}x{cols}, expected {expected_rows}x{expected_cols}")]
    BadShape {
        name: &'static str,
        rows: usize,
        cols: usize,
        expected_rows: usize,
        expected_cols: usize,
    },
    #[error("goal state has dimension {got}, expected {expected}")]
    BadGoal { expected: usize, got: usize },
}

/// Second-order expansion of a stage cost, written in place by the oracle.
#[derive(Debug, Clone)]
pub struct StageExpansion {
    pub lxx: DMatrix<f64>,
    pub luu: DMatrix<f64>,
    pub lux: DMatrix<f64>,
    pub lx: DVector<f64>,
    pub lu: DVector<f64>,
}

impl StageExpansion {
    pub fn zeros(n: usize, m: usize) -> Self {
        Self {
            lxx: DMatrix::zeros(n, n),
            luu: DMatrix::zeros(m, m),
            lux: DMatrix::zeros(m, n),
            lx: DVector::zeros(n),
            lu: DVector::zeros(m),
        }
    }
}

/// Quadratic stage/terminal cost with goal state.
#[derive(Debug, Clone)]
pub struct QuadraticCost {
    /// Stage state weight (n×n)
    pub q: DMatrix<f64>,
    /// Stage control weight (m×m)
    pub r: DMatrix<f64>,
    /// Optional control-state cross term (m×n)
    pub h: Option<DMatrix<f64>>,
    /// Terminal state weight (n×n)
    pub qf: DMatrix<f64>,
    /// Goal state (n)
    pub x_goal: DVector<f64>,
}

impl QuadraticCost {
    pub fn new(q: DMatrix<f64>, r: DMatrix<f64>, qf: DMatrix<f64>, x_goal: DVector<f64>) -> Self {
        Self {
            q,
            r,
            h: None,
            qf,
            x_goal,
        }
    }

    /// Attach a control-state cross term.
    pub fn with_cross_term(mut self, h: DMatrix<f64>) -> Self {
        self.h = Some(h);
        self
    }

    /// Check coefficient shapes against the problem dimensions.
    pub fn validate(&self, n: usize, m: usize) -> Result<(), CostError> {
        let check = |name, mat: &DMatrix<f64>, rows, cols| {
            if mat.nrows() != rows || mat.ncols() != cols {
                Err(CostError::BadShape {
                    name,
                    rows: mat.nrows(),
                    cols: mat.ncols(),
                    expected_rows: rows,
                    expected_cols: cols,
                })
            } else {
                Ok(())
            }
        };
        check("Q", &self.q, n, n)?;
        check("R", &self.r, m, m)?;
        check("Qf", &self.qf, n, n)?;
        if let Some(h) = &self.h {
            check("H", h, m, n)?;
        }
        if self.x_goal.len() != n {
            return Err(CostError::BadGoal {
                expected: n,
                got: self.x_goal.len(),
            });
        }
        Ok(())
    }

    /// Stage cost at `(x, u)`.
    pub fn stage(&self, x: &DVector<f64>, u: &DVector<f64>) -> f64 {
        let dx = x - &self.x_goal;
        let mut cost = 0.5 * dx.dot(&(&self.q * &dx)) + 0.5 * u.dot(&(&self.r * u));
        if let Some(h) = &self.h {
            cost += u.dot(&(h * &dx));
        }
        cost
    }

    /// Terminal cost at `x`.
    pub fn terminal(&self, x: &DVector<f64>) -> f64 {
        let dx = x - &self.x_goal;
        0.5 * dx.dot(&(&self.qf * &dx))
    }

    /// Write the stage expansion at `(x, u)` into `exp`.
    pub fn stage_expansion(&self, x: &DVector<f64>, u: &DVector<f64>, exp: &mut StageExpansion) {
        let dx = x - &self.x_goal;

        exp.lxx.copy_from(&self.q);
        exp.luu.copy_from(&self.r);
        exp.lx = &self.q * &dx;
        exp.lu = &self.r * u;

        match &self.h {
            Some(h) => {
                exp.lux.copy_from(h);
                exp.lx += h.transpose() * u;
                exp.lu += h * &dx;
            }
            None => exp.lux.fill(0.0),
        }
    }

    /// Terminal expansion `(∇²ℓ_f, ∇ℓ_f)` at `x`, written in place.
    pub fn terminal_expansion(
        &self,
        x: &DVector<f64>,
        lxx: &mut DMatrix<f64>,
        lx: &mut DVector<f64>,
    ) {
        let dx = x - &self.x_goal;
        lxx.copy_from(&self.qf);
        *lx = &self.qf * dx;
    }
}

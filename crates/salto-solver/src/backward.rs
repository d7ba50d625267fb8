//! Backward pass
//!
//! Riccati-style recursion over the augmented Lagrangian cost. For each
//! stage, working from the terminal knot backward, it produces the affine
//! policy `δu = K·δx + α·d` and the quadratic cost-to-go `(S, s)`, and
//! accumulates the expected-reduction pair
//!
//! ```text
//! Δv₁ = Σₖ dᵀQu        Δv₂ = Σₖ ½·dᵀQuu·d
//! ```
//!
//! Positive definiteness of the regularized control Hessian is checked by
//! attempting a Cholesky factorization; on failure the regularization
//! schedule is bumped and the whole pass restarts from the terminal knot
//! with Δv reset. The value backup always uses the *unregularized* Quu and
//! Qux.

use nalgebra::{Cholesky, DMatrix, Dyn};
use tracing::warn;

use crate::constraints::ConstraintEvaluator;
use crate::error::RegularizationOverflow;
use crate::options::{BackwardPassRegularization, SolverOptions};
use crate::problem::{Problem, SolveMode};
use crate::regularization::Regularization;
use crate::trajectory::TrajectoryStore;

/// Outcome of a successful backward pass.
#[derive(Debug, Clone, Copy)]
pub struct BackwardPass {
    /// Expected-reduction pair (Δv₁, Δv₂) at α = 1
    pub dv: (f64, f64),
    /// Number of indefinite Quu encounters before the pass went through
    pub indefinite_count: usize,
}

/// Cholesky with an escalating diagonal shift, for factorizations that may
/// sit right at the semidefinite boundary (terminal Hessians with zero
/// rows, reduced KKT systems).
pub(crate) fn cholesky_with_jitter(mat: &DMatrix<f64>) -> Option<Cholesky<f64, Dyn>> {
    if let Some(chol) = Cholesky::new(mat.clone()) {
        return Some(chol);
    }
    let n = mat.nrows();
    for exponent in [-12, -10, -8] {
        let shift = 10f64.powi(exponent);
        let mut shifted = mat.clone();
        for i in 0..n {
            shifted[(i, i)] += shift;
        }
        if let Some(chol) = Cholesky::new(shifted) {
            return Some(chol);
        }
    }
    None
}

/// Terminal boundary `(S[N], s[N])`: the terminal cost expansion plus the
/// goal-constraint augmentation (CxN is the identity).
fn terminal_expansion(problem: &Problem, store: &mut TrajectoryStore) {
    let last = store.num_knots() - 1;
    let x = store.states[last].clone();
    problem
        .cost
        .terminal_expansion(&x, &mut store.value_hess[last], &mut store.value_grad[last]);

    if store.p_terminal > 0 {
        for i in 0..store.n {
            store.value_grad[last][i] += store.lambda_n[i] + store.active_n[i] * store.cn[i];
            store.value_hess[last][(i, i)] += store.active_n[i];
        }
    }
}

/// Run the backward pass, writing gains, feedforward terms, and the
/// cost-to-go into the store.
pub fn backward_pass(
    problem: &Problem,
    mode: &SolveMode,
    options: &SolverOptions,
    eval: &mut ConstraintEvaluator,
    store: &mut TrajectoryStore,
    reg: &mut Regularization,
) -> Result<BackwardPass, RegularizationOverflow> {
    let ns = store.num_stages();
    let mut indefinite_count = 0;

    'restart: loop {
        terminal_expansion(problem, store);
        let mut dv1 = 0.0;
        let mut dv2 = 0.0;

        for k in (0..ns).rev() {
            eval.al_stage_expansion(problem, mode, options, store, k);
            let exp = &eval.al_exp;
            let fdx = &store.fdx[k];
            let fdu = &store.fdu[k];
            let s_next = &store.value_grad[k + 1];
            let hess_next = &store.value_hess[k + 1];

            let qx = &exp.lx + fdx.tr_mul(s_next);
            let qu = &exp.lu + fdu.tr_mul(s_next);
            let qxx = &exp.lxx + fdx.tr_mul(&(hess_next * fdx));
            let quu = &exp.luu + fdu.tr_mul(&(hess_next * fdu));
            let qux = &exp.lux + fdu.tr_mul(&(hess_next * fdx));

            let rho = reg.rho();
            let (quu_reg, qux_reg) = match mode.bp_reg {
                BackwardPassRegularization::Control => {
                    let mut quu_reg = quu.clone();
                    for i in 0..mode.mm {
                        quu_reg[(i, i)] += rho;
                    }
                    (quu_reg, qux.clone())
                }
                BackwardPassRegularization::State => (
                    &quu + fdu.tr_mul(fdu) * rho,
                    &qux + fdu.tr_mul(fdx) * rho,
                ),
            };

            let chol = match Cholesky::new(quu_reg) {
                Some(chol) => chol,
                None => {
                    indefinite_count += 1;
                    if reg.increase() {
                        warn!(knot = k, "regularization saturated during backward pass");
                        return Err(RegularizationOverflow);
                    }
                    continue 'restart;
                }
            };

            let gain = -chol.solve(&qux_reg);
            let ff = -chol.solve(&qu);

            // Value backup with the unregularized action-value terms.
            store.value_grad[k] =
                &qx + gain.tr_mul(&(&quu * &ff + &qu)) + qux.tr_mul(&ff);
            let mut hess = &qxx + gain.tr_mul(&(&quu * &gain)) + gain.tr_mul(&qux) + qux.tr_mul(&gain);
            symmetrize(&mut hess);
            store.value_hess[k] = hess;

            dv1 += ff.dot(&qu);
            dv2 += 0.5 * ff.dot(&(&quu * &ff));

            store.gain[k] = gain;
            store.feedforward[k] = ff;
        }

        reg.decrease();
        return Ok(BackwardPass {
            dv: (dv1, dv2),
            indefinite_count,
        });
    }
}

/// Square-root backward pass: identical recursion, but the cost-to-go
/// Hessian is carried as its upper Cholesky factor `Su` (S = SuᵀSu). The
/// action-value Hessian blocks are formed from factor products and every
/// value Hessian is validated through its factorization, so indefiniteness
/// anywhere in the chain routes into the regularization schedule.
pub fn backward_pass_sqrt(
    problem: &Problem,
    mode: &SolveMode,
    options: &SolverOptions,
    eval: &mut ConstraintEvaluator,
    store: &mut TrajectoryStore,
    reg: &mut Regularization,
) -> Result<BackwardPass, RegularizationOverflow> {
    let ns = store.num_stages();
    let mut indefinite_count = 0;

    'restart: loop {
        terminal_expansion(problem, store);
        let last = store.num_knots() - 1;
        let mut su = match cholesky_with_jitter(&store.value_hess[last]) {
            Some(chol) => chol.l().transpose(),
            None => {
                indefinite_count += 1;
                if reg.increase() {
                    warn!("regularization saturated at the terminal factorization");
                    return Err(RegularizationOverflow);
                }
                continue 'restart;
            }
        };

        let mut dv1 = 0.0;
        let mut dv2 = 0.0;

        for k in (0..ns).rev() {
            eval.al_stage_expansion(problem, mode, options, store, k);
            let exp = &eval.al_exp;
            let fdx = &store.fdx[k];
            let fdu = &store.fdu[k];
            let s_next = &store.value_grad[k + 1];

            // Factor products: SuᵀSu never has to be formed explicitly.
            let wx = &su * fdx;
            let wu = &su * fdu;

            let qx = &exp.lx + fdx.tr_mul(s_next);
            let qu = &exp.lu + fdu.tr_mul(s_next);
            let qxx = &exp.lxx + wx.tr_mul(&wx);
            let quu = &exp.luu + wu.tr_mul(&wu);
            let qux = &exp.lux + wu.tr_mul(&wx);

            let rho = reg.rho();
            let (quu_reg, qux_reg) = match mode.bp_reg {
                BackwardPassRegularization::Control => {
                    let mut quu_reg = quu.clone();
                    for i in 0..mode.mm {
                        quu_reg[(i, i)] += rho;
                    }
                    (quu_reg, qux.clone())
                }
                BackwardPassRegularization::State => (
                    &quu + fdu.tr_mul(fdu) * rho,
                    &qux + fdu.tr_mul(fdx) * rho,
                ),
            };

            let chol = match Cholesky::new(quu_reg) {
                Some(chol) => chol,
                None => {
                    indefinite_count += 1;
                    if reg.increase() {
                        warn!(knot = k, "regularization saturated during backward pass");
                        return Err(RegularizationOverflow);
                    }
                    continue 'restart;
                }
            };

            let gain = -chol.solve(&qux_reg);
            let ff = -chol.solve(&qu);

            store.value_grad[k] =
                &qx + gain.tr_mul(&(&quu * &ff + &qu)) + qux.tr_mul(&ff);
            let mut hess = &qxx + gain.tr_mul(&(&quu * &gain)) + gain.tr_mul(&qux) + qux.tr_mul(&gain);
            symmetrize(&mut hess);

            su = match cholesky_with_jitter(&hess) {
                Some(chol) => chol.l().transpose(),
                None => {
                    indefinite_count += 1;
                    if reg.increase() {
                        warn!(knot = k, "regularization saturated on the value factorization");
                        return Err(RegularizationOverflow);
                    }
                    continue 'restart;
                }
            };
            store.value_hess[k] = hess;

            dv1 += ff.dot(&qu);
            dv2 += 0.5 * ff.dot(&(&quu * &ff));

            store.gain[k] = gain;
            store.feedforward[k] = ff;
        }

        reg.decrease();
        return Ok(BackwardPass {
            dv: (dv1, dv2),
            indefinite_count,
        });
    }
}

fn symmetrize(mat: &mut DMatrix<f64>) {
    let sym = (&*mat + mat.transpose()) * 0.5;
    mat.copy_from(&sym);
}

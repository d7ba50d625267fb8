//! User-supplied stage constraints
//!
//! Custom path constraints enter the solver through [`StageConstraint`].
//! The convention matches the rest of the workspace: a row is an
//! inequality `c(x, u) ≤ 0` or an equality `c(x, u) = 0`, with all
//! inequality rows stacked before the equality rows.

use nalgebra::{DMatrix, DVector};

/// A user constraint evaluated at every stage `(x_k, u_k)`.
///
/// `u` is the nominal control; solver-side augmentations (minimum-time,
/// infeasible slacks) are never visible to the user oracle.
pub trait StageConstraint {
    /// Number of inequality rows (stacked first).
    fn num_inequality(&self) -> usize;

    /// Number of equality rows (stacked after the inequalities).
    fn num_equality(&self) -> usize;

    /// Write all rows of `c(x, u)` into `out` (length
    /// `num_inequality() + num_equality()`).
    fn evaluate(&self, x: &DVector<f64>, u: &DVector<f64>, out: &mut DVector<f64>);

    /// Write the Jacobians `∂c/∂x` (p×n) and `∂c/∂u` (p×m) into the given
    /// buffers.
    fn jacobians(&self, x: &DVector<f64>, u: &DVector<f64>, cx: &mut DMatrix<f64>, cu: &mut DMatrix<f64>);

    /// Total row count.
    fn num_rows(&self) -> usize {
        self.num_inequality() + self.num_equality()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `x₀ + x₁ − 1 = 0` as a single equality row.
    struct SumToOne;

    impl StageConstraint for SumToOne {
        fn num_inequality(&self) -> usize {
            0
        }

        fn num_equality(&self) -> usize {
            1
        }

        fn evaluate(&self, x: &DVector<f64>, _u: &DVector<f64>, out: &mut DVector<f64>) {
            out[0] = x[0] + x[1] - 1.0;
        }

        fn jacobians(
            &self,
            _x: &DVector<f64>,
            _u: &DVector<f64>,
            cx: &mut DMatrix<f64>,
            cu: &mut DMatrix<f64>,
        ) {
            cx.fill(0.0);
            cu.fill(0.0);
            cx[(0, 0)] = 1.0;
            cx[(0, 1)] = 1.0;
        }
    }

    #[test]
    fn test_row_counts() {
        let c = SumToOne;
        assert_eq!(c.num_rows(), 1);

        let mut out = DVector::zeros(1);
        c.evaluate(
            &DVector::from_vec(vec![2.0, 0.5]),
            &DVector::zeros(1),
            &mut out,
        );
        assert!((out[0] - 1.5).abs() < 1e-12);
    }
}

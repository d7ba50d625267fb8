//! Discrete double integrator
//!
//! The canonical sanity model: a point mass on a line with acceleration
//! input, discretized exactly as `p' = p + dt·v`, `v' = v + dt·u`. It
//! implements [`DiscreteDynamics`] directly since the stage map is already
//! discrete.

use nalgebra::{DMatrix, DVector};

use super::DiscreteDynamics;

/// Point mass with state `[position, velocity]` and acceleration input.
#[derive(Debug, Clone, Copy, Default)]
pub struct DoubleIntegrator;

impl DiscreteDynamics for DoubleIntegrator {
    fn state_dim(&self) -> usize {
        2
    }

    fn control_dim(&self) -> usize {
        1
    }

    fn step(&self, x: &DVector<f64>, u: &DVector<f64>, dt: f64) -> DVector<f64> {
        DVector::from_vec(vec![x[0] + dt * x[1], x[1] + dt * u[0]])
    }

    fn jacobians(
        &self,
        _x: &DVector<f64>,
        _u: &DVector<f64>,
        dt: f64,
    ) -> (DMatrix<f64>, DMatrix<f64>) {
        let fdx = DMatrix::from_row_slice(2, 2, &[1.0, dt, 0.0, 1.0]);
        let fdu = DMatrix::from_row_slice(2, 1, &[0.0, dt]);
        (fdx, fdu)
    }

    fn dt_jacobian(&self, x: &DVector<f64>, u: &DVector<f64>, _dt: f64) -> DVector<f64> {
        DVector::from_vec(vec![x[1], u[0]])
    }
}

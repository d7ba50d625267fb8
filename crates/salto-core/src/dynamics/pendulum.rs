//! Damped torque-actuated pendulum
//!
//! State `[θ, θ̇]` with θ measured from the hanging position; control is the
//! joint torque. Used by the solver's regularization and penalty tests.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use super::ContinuousDynamics;

/// Pendulum parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pendulum {
    /// Point mass [kg]
    pub mass: f64,
    /// Rod length [m]
    pub length: f64,
    /// Viscous damping [N·m·s/rad]
    pub damping: f64,
    /// Gravity [m/s²]
    pub gravity: f64,
}

impl Default for Pendulum {
    fn default() -> Self {
        Self {
            mass: 1.0,
            length: 0.5,
            damping: 0.1,
            gravity: 9.81,
        }
    }
}

impl ContinuousDynamics for Pendulum {
    fn state_dim(&self) -> usize {
        2
    }

    fn control_dim(&self) -> usize {
        1
    }

    fn dynamics(&self, x: &DVector<f64>, u: &DVector<f64>) -> DVector<f64> {
        let inertia = self.mass * self.length * self.length;
        let theta_acc = (u[0]
            - self.damping * x[1]
            - self.mass * self.gravity * self.length * x[0].sin())
            / inertia;
        DVector::from_vec(vec![x[1], theta_acc])
    }

    fn jacobians(&self, x: &DVector<f64>, _u: &DVector<f64>) -> (DMatrix<f64>, DMatrix<f64>) {
        let inertia = self.mass * self.length * self.length;
        let a = DMatrix::from_row_slice(
            2,
            2,
            &[
                0.0,
                1.0,
                -self.mass * self.gravity * self.length * x[0].cos() / inertia,
                -self.damping / inertia,
            ],
        );
        let b = DMatrix::from_row_slice(2, 1, &[0.0, 1.0 / inertia]);
        (a, b)
    }
}

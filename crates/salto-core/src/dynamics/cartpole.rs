//! Cartpole dynamics
//!
//! Cart on a rail with an unactuated pole. State is
//! `[x, ẋ, θ, θ̇]` with the pole angle θ measured from the upright
//! position, so θ = π is hanging straight down and θ = 0 is the balance
//! point. The control is the horizontal force on the cart.
//!
//! With D = m_c + m_p·sin²θ the accelerations are
//!
//! ```text
//! ẍ = [u + m_p·sinθ·(l·θ̇² − g·cosθ)] / D
//! θ̈ = (g·sinθ − ẍ·cosθ) / l
//! ```

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use super::ContinuousDynamics;

/// Cartpole parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cartpole {
    /// Cart mass [kg]
    pub cart_mass: f64,
    /// Pole point mass [kg]
    pub pole_mass: f64,
    /// Pole length [m]
    pub length: f64,
    /// Gravity [m/s²]
    pub gravity: f64,
}

impl Default for Cartpole {
    fn default() -> Self {
        Self {
            cart_mass: 1.0,
            pole_mass: 0.2,
            length: 0.5,
            gravity: 9.81,
        }
    }
}

impl Cartpole {
    /// Accelerations `(ẍ, θ̈)` at the given configuration.
    fn accelerations(&self, theta: f64, theta_dot: f64, force: f64) -> (f64, f64) {
        let (s, c) = theta.sin_cos();
        let d = self.cart_mass + self.pole_mass * s * s;
        let x_acc =
            (force + self.pole_mass * s * (self.length * theta_dot * theta_dot - self.gravity * c))
                / d;
        let theta_acc = (self.gravity * s - x_acc * c) / self.length;
        (x_acc, theta_acc)
    }
}

impl ContinuousDynamics for Cartpole {
    fn state_dim(&self) -> usize {
        4
    }

    fn control_dim(&self) -> usize {
        1
    }

    fn dynamics(&self, x: &DVector<f64>, u: &DVector<f64>) -> DVector<f64> {
        let (x_acc, theta_acc) = self.accelerations(x[2], x[3], u[0]);
        DVector::from_vec(vec![x[1], x_acc, x[3], theta_acc])
    }

    fn jacobians(&self, x: &DVector<f64>, u: &DVector<f64>) -> (DMatrix<f64>, DMatrix<f64>) {
        let theta = x[2];
        let theta_dot = x[3];
        let force = u[0];

        let (s, c) = theta.sin_cos();
        let mp = self.pole_mass;
        let l = self.length;
        let g = self.gravity;
        let d = self.cart_mass + mp * s * s;

        let n_x = force + mp * s * (l * theta_dot * theta_dot - g * c);
        let x_acc = n_x / d;

        // ∂ẍ/∂θ: quotient rule with D' = 2·m_p·s·c.
        let dn_dtheta = mp * c * (l * theta_dot * theta_dot - g * c) + mp * s * g * s;
        let dd_dtheta = 2.0 * mp * s * c;
        let dxacc_dtheta = (dn_dtheta * d - n_x * dd_dtheta) / (d * d);
        let dxacc_dthetadot = 2.0 * mp * l * theta_dot * s / d;
        let dxacc_du = 1.0 / d;

        // θ̈ = (g·s − ẍ·c)/l.
        let dtacc_dtheta = (g * c - dxacc_dtheta * c + x_acc * s) / l;
        let dtacc_dthetadot = -c * dxacc_dthetadot / l;
        let dtacc_du = -c * dxacc_du / l;

        let mut a = DMatrix::<f64>::zeros(4, 4);
        a[(0, 1)] = 1.0;
        a[(1, 2)] = dxacc_dtheta;
        a[(1, 3)] = dxacc_dthetadot;
        a[(2, 3)] = 1.0;
        a[(3, 2)] = dtacc_dtheta;
        a[(3, 3)] = dtacc_dthetadot;

        let mut b = DMatrix::<f64>::zeros(4, 1);
        b[(1, 0)] = dxacc_du;
        b[(3, 0)] = dtacc_du;

        (a, b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dynamics::testing::check_continuous_jacobians;
    use approx::assert_relative_eq;

    #[test]
    fn test_hanging_equilibrium() {
        // Hanging straight down with no input: only gravity acts and the
        // configuration is an equilibrium.
        let model = Cartpole::default();
        let x = DVector::from_vec(vec![0.0, 0.0, std::f64::consts::PI, 0.0]);
        let u = DVector::from_vec(vec![0.0]);

        let xdot = model.dynamics(&x, &u);
        assert_relative_eq!(xdot.norm(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_upright_is_unstable() {
        // A small perturbation from upright must accelerate away from it.
        let model = Cartpole::default();
        let x = DVector::from_vec(vec![0.0, 0.0, 0.01, 0.0]);
        let u = DVector::from_vec(vec![0.0]);

        let xdot = model.dynamics(&x, &u);
        assert!(xdot[3] > 0.0);
    }

    #[test]
    fn test_jacobians_swing() {
        let model = Cartpole::default();
        let x = DVector::from_vec(vec![0.2, -0.5, 2.3, 1.1]);
        let u = DVector::from_vec(vec![-2.0]);
        check_continuous_jacobians(&model, &x, &u, 1e-6);
    }

    #[test]
    fn test_jacobians_near_upright() {
        let model = Cartpole::default();
        let x = DVector::from_vec(vec![0.0, 0.1, 0.05, -0.2]);
        let u = DVector::from_vec(vec![0.3]);
        check_continuous_jacobians(&model, &x, &u, 1e-6);
    }
}

//! Discretization of continuous models
//!
//! Wraps a [`ContinuousDynamics`] model into the [`DiscreteDynamics`]
//! oracle the solver consumes. The Jacobians of the stage map are obtained
//! by pushing the model's analytic Jacobians through the integration
//! scheme's update formula; nothing is differentiated numerically.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use super::{ContinuousDynamics, DiscreteDynamics};

/// Explicit integration scheme for the stage map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Integration {
    /// Forward Euler: `x' = x + dt·f(x, u)`.
    Euler,
    /// Explicit midpoint: `x' = x + dt·f(x + dt/2·f(x, u), u)`.
    Midpoint,
}

/// Discrete dynamics oracle built from a continuous model.
#[derive(Debug, Clone)]
pub struct Discretizer<M> {
    model: M,
    scheme: Integration,
}

impl<M: ContinuousDynamics> Discretizer<M> {
    pub fn new(model: M, scheme: Integration) -> Self {
        Self { model, scheme }
    }

    /// The wrapped continuous model.
    pub fn model(&self) -> &M {
        &self.model
    }
}

impl<M: ContinuousDynamics> DiscreteDynamics for Discretizer<M> {
    fn state_dim(&self) -> usize {
        self.model.state_dim()
    }

    fn control_dim(&self) -> usize {
        self.model.control_dim()
    }

    fn step(&self, x: &DVector<f64>, u: &DVector<f64>, dt: f64) -> DVector<f64> {
        match self.scheme {
            Integration::Euler => x + self.model.dynamics(x, u) * dt,
            Integration::Midpoint => {
                let xm = x + self.model.dynamics(x, u) * (0.5 * dt);
                x + self.model.dynamics(&xm, u) * dt
            }
        }
    }

    fn jacobians(
        &self,
        x: &DVector<f64>,
        u: &DVector<f64>,
        dt: f64,
    ) -> (DMatrix<f64>, DMatrix<f64>) {
        let n = self.model.state_dim();
        let eye = DMatrix::<f64>::identity(n, n);

        match self.scheme {
            Integration::Euler => {
                let (a, b) = self.model.jacobians(x, u);
                (&eye + a * dt, b * dt)
            }
            Integration::Midpoint => {
                // x' = x + dt·f(xm, u), xm = x + dt/2·f(x, u).
                let (a1, b1) = self.model.jacobians(x, u);
                let xm = x + self.model.dynamics(x, u) * (0.5 * dt);
                let (am, bm) = self.model.jacobians(&xm, u);

                let fdx = &eye + (&am * (&eye + &a1 * (0.5 * dt))) * dt;
                let fdu = (&am * &b1 * (0.5 * dt) + bm) * dt;
                (fdx, fdu)
            }
        }
    }

    fn dt_jacobian(&self, x: &DVector<f64>, u: &DVector<f64>, dt: f64) -> DVector<f64> {
        match self.scheme {
            Integration::Euler => self.model.dynamics(x, u),
            Integration::Midpoint => {
                let f1 = self.model.dynamics(x, u);
                let xm = x + &f1 * (0.5 * dt);
                let (am, _) = self.model.jacobians(&xm, u);
                self.model.dynamics(&xm, u) + am * f1 * (0.5 * dt)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dynamics::testing::check_discrete_jacobians;
    use crate::dynamics::{Cartpole, Pendulum};
    use approx::assert_relative_eq;

    #[test]
    fn test_euler_step_matches_definition() {
        let model = Discretizer::new(Pendulum::default(), Integration::Euler);
        let x = DVector::from_vec(vec![0.3, -0.2]);
        let u = DVector::from_vec(vec![0.5]);
        let dt = 0.01;

        let expected = &x + model.model().dynamics(&x, &u) * dt;
        assert_relative_eq!(model.step(&x, &u, dt), expected, epsilon = 1e-14);
    }

    #[test]
    fn test_midpoint_more_accurate_than_euler() {
        // One pendulum swing step; midpoint should land closer to a finely
        // resolved reference than Euler does.
        let pendulum = Pendulum::default();
        let x = DVector::from_vec(vec![1.0, 0.0]);
        let u = DVector::from_vec(vec![0.0]);
        let dt = 0.05;

        let euler = Discretizer::new(pendulum.clone(), Integration::Euler);
        let midpoint = Discretizer::new(pendulum.clone(), Integration::Midpoint);

        let fine = Discretizer::new(pendulum, Integration::Midpoint);
        let mut reference = x.clone();
        for _ in 0..100 {
            reference = fine.step(&reference, &u, dt / 100.0);
        }

        let err_euler = (euler.step(&x, &u, dt) - &reference).norm();
        let err_midpoint = (midpoint.step(&x, &u, dt) - &reference).norm();
        assert!(err_midpoint < err_euler);
    }

    #[test]
    fn test_euler_jacobians() {
        let model = Discretizer::new(Cartpole::default(), Integration::Euler);
        let x = DVector::from_vec(vec![0.1, -0.4, 2.0, 0.7]);
        let u = DVector::from_vec(vec![1.5]);
        check_discrete_jacobians(&model, &x, &u, 0.05, 1e-6);
    }

    #[test]
    fn test_midpoint_jacobians() {
        let model = Discretizer::new(Cartpole::default(), Integration::Midpoint);
        let x = DVector::from_vec(vec![0.1, -0.4, 2.0, 0.7]);
        let u = DVector::from_vec(vec![1.5]);
        check_discrete_jacobians(&model, &x, &u, 0.05, 1e-6);
    }
}

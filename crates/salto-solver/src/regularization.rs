//! Backward-pass regularization schedule
//!
//! Two-parameter schedule after Tassa: `rho` is the shift in use, `drho`
//! the current multiplicative rate. Repeated failures compound the rate so
//! recovery from a badly scaled region takes O(log) adjustments rather than
//! one per failure.

use crate::options::SolverOptions;

#[derive(Debug, Clone)]
pub struct Regularization {
    rho: f64,
    drho: f64,
    scaling: f64,
    min: f64,
    max: f64,
}

impl Regularization {
    pub fn new(options: &SolverOptions) -> Self {
        Self {
            rho: options.bp_reg_initial,
            drho: 1.0,
            scaling: options.bp_reg_increase_factor,
            min: options.bp_reg_min,
            max: options.bp_reg_max,
        }
    }

    /// Current shift ρ.
    pub fn rho(&self) -> f64 {
        self.rho
    }

    /// Increase ρ. Returns `true` when the schedule saturates at ρ_max.
    pub fn increase(&mut self) -> bool {
        self.drho = (self.drho * self.scaling).max(self.scaling);
        self.rho = (self.rho * self.drho).max(self.min).min(self.max);
        self.rho >= self.max
    }

    /// Decrease ρ, dropping to exactly zero below ρ_min.
    pub fn decrease(&mut self) {
        self.drho = (self.drho / self.scaling).min(1.0 / self.scaling);
        let next = self.rho * self.drho;
        self.rho = if next >= self.min { next } else { 0.0 };
    }
}

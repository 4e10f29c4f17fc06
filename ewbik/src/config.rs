use crate::Error;

/// Solver parameters shared by every bone of a skeleton.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "json", derive(serde::Deserialize))]
#[cfg_attr(feature = "json", serde(default, rename_all = "camelCase"))]
pub struct SolverConfig {
    /// Outer iterations per `solve` call.
    pub iterations: usize,
    /// Largest rotation (radians) a bone may take in a single step, before stiffness.
    pub dampening: f64,
    /// Extra sub-iterations per bone that are kept only when they do not worsen the fit.
    pub stabilization_passes: usize,
    /// Convergence threshold of the optimal-rotation solve.
    pub epsilon: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            iterations: 15,
            dampening: 0.1,
            stabilization_passes: 1,
            epsilon: 1.0e-6,
        }
    }
}

impl SolverConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if !(self.dampening.is_finite() && self.dampening > 0.0) {
            return Err(Error::invalid(format!(
                "dampening must be a positive angle, got {}",
                self.dampening
            )));
        }
        if !(self.epsilon.is_finite() && self.epsilon > 0.0) {
            return Err(Error::invalid(format!(
                "epsilon must be positive, got {}",
                self.epsilon
            )));
        }
        Ok(())
    }
}

use thiserror::Error;

/// Tolerance used when none is given.
pub const DEFAULT_TOLERANCE: f64 = 0.1;

/// Per-run settings for a [`Runner`](crate::Runner).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunConfig {
    max_evaluations: u64,
    tolerance: f64,
}

/// Errors that can occur when validating configuration values.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    #[error("tolerance must be finite and non-negative")]
    Tolerance,

    #[error("error definition (up) must be finite and positive")]
    Up,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_evaluations: 0,
            tolerance: DEFAULT_TOLERANCE,
        }
    }
}

impl RunConfig {
    /// Creates a new config with a validated tolerance.
    ///
    /// A `max_evaluations` of zero selects the engine's default budget,
    /// see [`default_budget`].
    ///
    /// # Errors
    ///
    /// Returns an error if the tolerance is negative or non-finite.
    pub fn new(max_evaluations: u64, tolerance: f64) -> Result<Self, ConfigError> {
        if !tolerance.is_finite() || tolerance < 0.0 {
            return Err(ConfigError::Tolerance);
        }

        Ok(Self {
            max_evaluations,
            tolerance,
        })
    }

    /// Returns the requested budget of cost evaluations (zero means default).
    #[must_use]
    pub fn max_evaluations(&self) -> u64 {
        self.max_evaluations
    }

    /// Returns the convergence tolerance.
    #[must_use]
    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    /// Resolves the cost evaluation budget for a problem with `variables`
    /// free parameters.
    #[must_use]
    pub fn budget(&self, variables: usize) -> u64 {
        if self.max_evaluations == 0 {
            default_budget(variables)
        } else {
            self.max_evaluations
        }
    }
}

/// The default number of cost evaluations: `200 + 100 n + 5 n²`.
#[must_use]
pub fn default_budget(variables: usize) -> u64 {
    let n = variables as u64;
    200 + 100 * n + 5 * n * n
}

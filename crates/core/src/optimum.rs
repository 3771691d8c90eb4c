use crate::state::{ParameterState, StateError};

/// The best-found result of one engine run.
///
/// The runner transports this record without interpreting it. Engines fill
/// in what they know; `covariance` is only present when an engine estimated
/// second derivatives.
#[derive(Debug, Clone, PartialEq)]
pub struct Optimum {
    /// Best external parameter values (fixed parameters included).
    pub params: Vec<f64>,

    /// Cost at `params`.
    pub cost: f64,

    /// Parameter covariance, indexed like `params`.
    ///
    /// Rows and columns of fixed parameters are zero.
    pub covariance: Option<Vec<Vec<f64>>>,

    /// Number of cost evaluations the engine made. Never more than the
    /// run's budget.
    pub cost_calls: u64,

    /// Number of gradient evaluations the engine made.
    pub gradient_calls: u64,

    /// Engine iterations performed.
    ///
    /// Zero when the run was cut short by the call limit, since the engine
    /// stopped in the middle of an iteration.
    pub iters: u64,

    /// Convergence criterion satisfied.
    pub has_converged: bool,

    /// The budget of cost evaluations was exhausted before convergence.
    pub has_reached_call_limit: bool,

    /// Converged without running into any trouble.
    pub is_valid: bool,
}

impl Optimum {
    /// Parameter uncertainties (square roots of the covariance diagonal).
    #[must_use]
    pub fn errors(&self) -> Option<Vec<f64>> {
        self.covariance.as_ref().map(|cov| {
            cov.iter()
                .enumerate()
                .map(|(i, row)| row[i].max(0.0).sqrt())
                .collect()
        })
    }

    /// Builds a parameter state at this optimum, reusing `template`'s names,
    /// steps, and fixed flags.
    ///
    /// When uncertainties are known they become the new step sizes, which is
    /// how follow-up runs (such as an error calculation) are usually seeded.
    ///
    /// # Errors
    ///
    /// Returns an error if the optimum does not match the template.
    pub fn to_state(&self, template: &ParameterState) -> Result<ParameterState, StateError> {
        let state = template.with_values(&self.params)?;
        let Some(errors) = self.errors() else {
            return Ok(state);
        };

        ParameterState::new(state.params().iter().zip(errors).map(|(p, e)| {
            let step = if e.is_finite() && e > 0.0 { e } else { p.step };
            p.clone().with_step(step)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_relative_eq;

    use crate::state::Parameter;

    fn optimum() -> Optimum {
        Optimum {
            params: vec![1.0, 2.0],
            cost: 0.5,
            covariance: Some(vec![vec![4.0, 0.0], vec![0.0, 0.0]]),
            cost_calls: 10,
            gradient_calls: 0,
            iters: 5,
            has_converged: true,
            has_reached_call_limit: false,
            is_valid: true,
        }
    }

    #[test]
    fn errors_from_covariance_diagonal() {
        let errors = optimum().errors().unwrap();
        assert_relative_eq!(errors[0], 2.0);
        assert_relative_eq!(errors[1], 0.0);
    }

    #[test]
    fn to_state_uses_errors_as_steps() {
        let template =
            ParameterState::new([Parameter::variable("a", 0.0), Parameter::fixed("b", 2.0)])
                .unwrap();

        let state = optimum().to_state(&template).unwrap();

        assert_eq!(state.values(), vec![1.0, 2.0]);
        assert_relative_eq!(state.params()[0].step, 2.0);
        // Zero uncertainty (fixed parameter) keeps the template step.
        assert_relative_eq!(state.params()[1].step, template.params()[1].step);
        assert!(state.params()[1].fixed);
    }
}

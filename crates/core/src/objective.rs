mod function;
mod least_squares;
mod sum;

pub use function::FnObjective;
pub use least_squares::{LeastSquares, LeastSquaresError};
pub use sum::{ComponentError, Sum, SumError};

/// A caller-supplied objective evaluated by the minimizer.
///
/// Implementations receive the full parameter vector (fixed parameters
/// included) and return the cost. The adapter layers cancellation checks
/// around every call, so implementations do not need to poll anything.
///
/// Objectives must be `Send + Sync`: engines may evaluate them from several
/// worker threads at once.
pub trait Objective: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Computes the cost at `params`.
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the cost cannot be computed.
    fn cost(&self, params: &[f64]) -> Result<f64, Self::Error>;

    /// Whether [`Objective::gradient`] provides an analytic gradient.
    ///
    /// This must not change over the objective's lifetime.
    fn has_gradient(&self) -> bool {
        false
    }

    /// Computes the gradient of the cost at `params`.
    ///
    /// Returns `None` when the objective has no gradient capability.
    fn gradient(&self, params: &[f64]) -> Option<Result<Vec<f64>, Self::Error>> {
        let _ = params;
        None
    }

    /// The natural error definition ("Up") of this objective.
    ///
    /// Used as the adapter's default Up. A chi-square style cost uses `1.0`.
    fn error_definition(&self) -> f64 {
        1.0
    }

    /// Re-estimates the error definition from a fitted point.
    ///
    /// `params` is the full parameter vector at the fit result and
    /// `variables` holds the indices of the parameters that were varied.
    /// Objectives whose data uncertainties are unknown use this to scale
    /// their error definition by the reduced chi-square, so that a following
    /// error calculation yields meaningful uncertainties. The default keeps
    /// the error definition unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the cost at `params` cannot be computed.
    fn adjust_error_definition(
        &mut self,
        params: &[f64],
        variables: &[usize],
    ) -> Result<(), Self::Error> {
        let _ = (params, variables);
        Ok(())
    }
}

/// A shared reference forwards everything except
/// [`Objective::adjust_error_definition`], which needs the objective itself.
impl<T: Objective + ?Sized> Objective for &T {
    type Error = T::Error;

    fn cost(&self, params: &[f64]) -> Result<f64, Self::Error> {
        (**self).cost(params)
    }

    fn has_gradient(&self) -> bool {
        (**self).has_gradient()
    }

    fn gradient(&self, params: &[f64]) -> Option<Result<Vec<f64>, Self::Error>> {
        (**self).gradient(params)
    }

    fn error_definition(&self) -> f64 {
        (**self).error_definition()
    }
}

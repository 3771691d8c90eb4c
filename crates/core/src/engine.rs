use crate::{
    adapter::CostFunctionAdapter, objective::Objective, optimum::Optimum, state::ParameterState,
};

/// Type-erased failure returned by an engine.
///
/// A cancellation raised by the adapter must stay reachable through
/// `downcast_ref` on this error or one of its sources, see
/// [`EvalError::into_boxed`](crate::EvalError::into_boxed).
pub type EngineError = Box<dyn std::error::Error + Send + Sync>;

/// A minimization algorithm the [`Runner`](crate::Runner) can drive.
///
/// An engine repeatedly evaluates the adapter starting from `state` and
/// returns the best point it found. It owns no cancellation logic: it only
/// has to stop and propagate the adapter's errors when they occur.
pub trait Engine {
    /// Short name used in log records.
    fn name(&self) -> &'static str;

    /// Runs the algorithm once.
    ///
    /// `budget` bounds the number of cost evaluations and `tolerance`
    /// scales the convergence criterion. An engine that runs out of budget
    /// returns its best point with
    /// [`Optimum::has_reached_call_limit`] set rather than failing.
    ///
    /// # Errors
    ///
    /// Returns an error if an evaluation fails (including cancellation) or
    /// the algorithm itself fails.
    fn run_once<O: Objective>(
        &self,
        adapter: &CostFunctionAdapter<O>,
        state: &ParameterState,
        budget: u64,
        tolerance: f64,
    ) -> Result<Optimum, EngineError>;
}

impl<E: Engine> Engine for &E {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn run_once<O: Objective>(
        &self,
        adapter: &CostFunctionAdapter<O>,
        state: &ParameterState,
        budget: u64,
        tolerance: f64,
    ) -> Result<Optimum, EngineError> {
        (**self).run_once(adapter, state, budget, tolerance)
    }
}

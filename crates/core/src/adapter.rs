//! The cost function adapter presented to minimizer engines.
//!
//! Every evaluation runs the same protocol:
//!
//! 1. If cancellation has been requested, return without calling the
//!    objective.
//! 2. Call the objective.
//! 3. Check cancellation again. A request that arrived while the objective
//!    was running discards its result.
//!
//! What "return" means on abort depends on the [`AbortPolicy`]:
//! [`AbortPolicy::Signal`] returns [`EvalError::Cancelled`] so the engine
//! unwinds at once, while [`AbortPolicy::Sentinel`] hands back a non-finite
//! value and lets the engine wind down on its own.

mod error;

pub use error::EvalError;

use rayon::prelude::*;

use crate::{
    cancel::{CancelHandle, CancelKind, Cancelled},
    config::ConfigError,
    objective::Objective,
};

/// How the adapter reports an aborted evaluation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AbortPolicy {
    /// Return [`EvalError::Cancelled`] from the evaluation.
    #[default]
    Signal,

    /// Return `f64::INFINITY` (or a gradient of them) instead of an error.
    Sentinel,
}

/// The value returned for aborted evaluations under [`AbortPolicy::Sentinel`].
pub const SENTINEL: f64 = f64::INFINITY;

/// Wraps an [`Objective`] with cancellation checks.
///
/// The adapter is `Sync`: engines may evaluate it from several threads at
/// once. Its only shared mutable state is the cancellation flag.
#[derive(Debug)]
pub struct CostFunctionAdapter<O> {
    objective: O,
    up: Option<f64>,
    policy: AbortPolicy,
    cancel: CancelHandle,
}

impl<O: Objective> CostFunctionAdapter<O> {
    /// Creates an adapter with the objective's own error definition as Up.
    pub fn new(objective: O) -> Self {
        Self {
            objective,
            up: None,
            policy: AbortPolicy::default(),
            cancel: CancelHandle::new(),
        }
    }

    /// Overrides the error definition ("Up").
    ///
    /// An overridden Up is not affected by
    /// [`Self::adjust_error_definition`].
    ///
    /// # Errors
    ///
    /// Returns an error if `up` is not finite and positive.
    pub fn with_up(mut self, up: f64) -> Result<Self, ConfigError> {
        if !up.is_finite() || up <= 0.0 {
            return Err(ConfigError::Up);
        }
        self.up = Some(up);
        Ok(self)
    }

    /// Sets how aborted evaluations are reported.
    #[must_use]
    pub fn with_policy(mut self, policy: AbortPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Uses an existing cancellation handle instead of a fresh one.
    ///
    /// This lets a caller create the handle up front and hand it to another
    /// thread before the run starts.
    #[must_use]
    pub fn with_cancel_handle(mut self, cancel: CancelHandle) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub fn objective(&self) -> &O {
        &self.objective
    }

    /// The error definition ("Up") forwarded to the engine.
    #[must_use]
    pub fn up(&self) -> f64 {
        self.up.unwrap_or_else(|| self.objective.error_definition())
    }

    /// Lets the objective re-estimate its error definition at a fitted
    /// point, typically before an error calculation.
    ///
    /// `params` is the full parameter vector of the fit result and
    /// `variables` the indices of the varied parameters, see
    /// [`ParameterState::variable_indices`](crate::ParameterState::variable_indices).
    ///
    /// # Errors
    ///
    /// Returns [`EvalError::Objective`] if the objective fails.
    pub fn adjust_error_definition(
        &mut self,
        params: &[f64],
        variables: &[usize],
    ) -> Result<(), EvalError<O::Error>> {
        let before = self.objective.error_definition();
        self.objective
            .adjust_error_definition(params, variables)
            .map_err(EvalError::Objective)?;
        tracing::debug!(
            before,
            after = self.objective.error_definition(),
            "error definition adjusted"
        );
        Ok(())
    }

    #[must_use]
    pub fn policy(&self) -> AbortPolicy {
        self.policy
    }

    /// Whether the objective provides an analytic gradient.
    #[must_use]
    pub fn has_gradient(&self) -> bool {
        self.objective.has_gradient()
    }

    /// Returns a handle that can request cancellation from any thread.
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Requests cancellation. Only the first request takes effect.
    pub fn request_cancellation(&self, kind: CancelKind, reason: impl Into<String>) -> bool {
        self.cancel.request(kind, reason)
    }

    #[must_use]
    pub fn is_cancellation_requested(&self) -> bool {
        self.cancel.is_requested()
    }

    /// Evaluates the cost at `params`.
    ///
    /// # Errors
    ///
    /// Returns [`EvalError::Cancelled`] if cancellation was observed under
    /// the signal policy, [`EvalError::Objective`] if the objective failed,
    /// or [`EvalError::NonFiniteCost`] if it returned a non-finite value.
    pub fn evaluate(&self, params: &[f64]) -> Result<f64, EvalError<O::Error>> {
        if let Some(cancelled) = self.cancel.state().check() {
            return self.abort(cancelled, SENTINEL);
        }

        let result = self.objective.cost(params);

        if let Some(cancelled) = self.cancel.state().check() {
            return self.abort(cancelled, SENTINEL);
        }

        let value = result.map_err(EvalError::Objective)?;
        if !value.is_finite() {
            return Err(EvalError::NonFiniteCost {
                params: params.to_vec(),
                value,
            });
        }
        Ok(value)
    }

    /// Evaluates the analytic gradient at `params`.
    ///
    /// # Errors
    ///
    /// Returns [`EvalError::NoGradient`] if the objective has no gradient
    /// capability, [`EvalError::GradientSize`] if the gradient length differs
    /// from the parameter count, or any error [`Self::evaluate`] can return.
    pub fn evaluate_gradient(&self, params: &[f64]) -> Result<Vec<f64>, EvalError<O::Error>> {
        if let Some(cancelled) = self.cancel.state().check() {
            return self.abort(cancelled, vec![SENTINEL; params.len()]);
        }

        let result = self.objective.gradient(params);

        if let Some(cancelled) = self.cancel.state().check() {
            return self.abort(cancelled, vec![SENTINEL; params.len()]);
        }

        let gradient = result
            .ok_or(EvalError::NoGradient)?
            .map_err(EvalError::Objective)?;

        if gradient.len() != params.len() {
            return Err(EvalError::GradientSize {
                expected: params.len(),
                actual: gradient.len(),
            });
        }
        if gradient.iter().any(|g| !g.is_finite()) {
            return Err(EvalError::NonFiniteGradient {
                params: params.to_vec(),
            });
        }
        Ok(gradient)
    }

    /// Evaluates many parameter vectors in parallel.
    ///
    /// Each point goes through [`Self::evaluate`]; the first error wins.
    ///
    /// # Errors
    ///
    /// Returns an error if any single evaluation fails.
    pub fn evaluate_batch(&self, points: &[Vec<f64>]) -> Result<Vec<f64>, EvalError<O::Error>> {
        points.par_iter().map(|p| self.evaluate(p)).collect()
    }

    fn abort<T>(&self, cancelled: Cancelled, sentinel: T) -> Result<T, EvalError<O::Error>> {
        match self.policy {
            AbortPolicy::Signal => Err(EvalError::Cancelled(cancelled)),
            AbortPolicy::Sentinel => Ok(sentinel),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::{
        convert::Infallible,
        sync::atomic::{AtomicUsize, Ordering},
        thread,
    };

    use approx::assert_relative_eq;
    use thiserror::Error;

    use crate::objective::{FnObjective, LeastSquares};

    /// Counts calls and optionally cancels from inside the evaluation.
    struct Tally {
        calls: AtomicUsize,
        cancel_during_call: Option<CancelHandle>,
    }

    impl Tally {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                cancel_during_call: None,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Objective for Tally {
        type Error = Infallible;

        fn cost(&self, params: &[f64]) -> Result<f64, Self::Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(handle) = &self.cancel_during_call {
                handle.cancel("cancelled mid-evaluation");
            }
            Ok(params.iter().map(|p| p * p).sum())
        }

        fn has_gradient(&self) -> bool {
            true
        }

        fn gradient(&self, params: &[f64]) -> Option<Result<Vec<f64>, Self::Error>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Some(Ok(params.iter().map(|p| 2.0 * p).collect()))
        }
    }

    #[derive(Debug, Error)]
    #[error("host callback threw: {0}")]
    struct HostError(&'static str);

    struct Failing;

    impl Objective for Failing {
        type Error = HostError;

        fn cost(&self, _params: &[f64]) -> Result<f64, Self::Error> {
            Err(HostError("division by zero"))
        }
    }

    #[test]
    fn passes_values_through_unchanged() {
        let adapter = CostFunctionAdapter::new(Tally::new());

        assert_relative_eq!(adapter.evaluate(&[1.0, 2.0]).unwrap(), 5.0);
        assert_eq!(adapter.evaluate_gradient(&[1.0, 2.0]).unwrap(), vec![2.0, 4.0]);
        assert_eq!(adapter.objective().calls(), 2);
    }

    #[test]
    fn cancelled_before_call_skips_objective() {
        let adapter = CostFunctionAdapter::new(Tally::new());
        adapter.request_cancellation(CancelKind::User, "stop");

        let err = adapter.evaluate(&[1.0]).unwrap_err();
        assert_eq!(err.as_cancelled().unwrap().reason, "stop");

        let err = adapter.evaluate_gradient(&[1.0]).unwrap_err();
        assert!(err.as_cancelled().is_some());

        assert_eq!(adapter.objective().calls(), 0);
    }

    #[test]
    fn sentinel_policy_returns_non_finite_value() {
        let adapter = CostFunctionAdapter::new(Tally::new()).with_policy(AbortPolicy::Sentinel);
        adapter.request_cancellation(CancelKind::Cooperative, "shutdown");

        let value = adapter.evaluate(&[1.0]).unwrap();
        assert!(!value.is_finite());

        let gradient = adapter.evaluate_gradient(&[1.0, 2.0]).unwrap();
        assert_eq!(gradient.len(), 2);
        assert!(gradient.iter().all(|g| !g.is_finite()));

        assert_eq!(adapter.objective().calls(), 0);
    }

    #[test]
    fn cancellation_during_call_discards_result() {
        let handle = CancelHandle::new();
        let tally = Tally {
            cancel_during_call: Some(handle.clone()),
            ..Tally::new()
        };
        let adapter = CostFunctionAdapter::new(tally).with_cancel_handle(handle);

        let err = adapter.evaluate(&[3.0]).unwrap_err();
        assert_eq!(err.to_string(), "cancelled mid-evaluation");
        assert_eq!(adapter.objective().calls(), 1);

        // The next evaluation never reaches the objective.
        assert!(adapter.evaluate(&[3.0]).is_err());
        assert_eq!(adapter.objective().calls(), 1);
    }

    #[test]
    fn objective_errors_keep_their_message() {
        let adapter = CostFunctionAdapter::new(Failing);

        let err = adapter.evaluate(&[0.0]).unwrap_err();
        assert!(matches!(err, EvalError::Objective(_)));
        assert_eq!(err.to_string(), "host callback threw: division by zero");
    }

    #[test]
    fn gradient_without_capability_is_rejected() {
        let adapter = CostFunctionAdapter::new(FnObjective::new(|p| p[0]));

        assert!(!adapter.has_gradient());
        assert!(matches!(
            adapter.evaluate_gradient(&[0.0]),
            Err(EvalError::NoGradient)
        ));
    }

    #[test]
    fn gradient_of_wrong_size_is_rejected() {
        let objective = FnObjective::new(|p| p[0] + p[1]).with_gradient(|_| vec![1.0]);
        let adapter = CostFunctionAdapter::new(objective);

        let err = adapter.evaluate_gradient(&[0.0, 0.0]).unwrap_err();
        assert!(matches!(
            err,
            EvalError::GradientSize {
                expected: 2,
                actual: 1
            }
        ));
        assert_eq!(
            err.to_string(),
            "Invalid gradient size: expected 2 value(s) (one per parameter), but got 1."
        );
    }

    #[test]
    fn non_finite_cost_is_an_error() {
        let adapter = CostFunctionAdapter::new(FnObjective::new(|p| p[0].ln()));

        assert!(matches!(
            adapter.evaluate(&[-1.0]),
            Err(EvalError::NonFiniteCost { .. })
        ));
    }

    #[test]
    fn up_defaults_to_error_definition_and_can_be_overridden() {
        let adapter = CostFunctionAdapter::new(FnObjective::new(|p| p[0]));
        assert_relative_eq!(adapter.up(), 1.0);

        let adapter = adapter.with_up(0.5).unwrap();
        assert_relative_eq!(adapter.up(), 0.5);

        let adapter = CostFunctionAdapter::new(FnObjective::new(|p| p[0]));
        assert!(matches!(adapter.with_up(0.0), Err(ConfigError::Up)));
    }

    #[test]
    fn adjusted_error_definition_becomes_up() {
        let objective =
            LeastSquares::unweighted(vec![0.0, 1.0, 2.0], vec![0.0, 3.0, 0.0], |_, p| p[0])
                .unwrap();
        let mut adapter = CostFunctionAdapter::new(objective);
        assert_relative_eq!(adapter.up(), 1.0);

        // Residuals around 1 are -1, 2, -1: chi-square 6, two degrees of freedom.
        adapter.adjust_error_definition(&[1.0], &[0]).unwrap();

        assert_relative_eq!(adapter.up(), 3.0);
    }

    #[test]
    fn overridden_up_ignores_adjustment() {
        let objective =
            LeastSquares::unweighted(vec![0.0, 1.0, 2.0], vec![0.0, 3.0, 0.0], |_, p| p[0])
                .unwrap();
        let mut adapter = CostFunctionAdapter::new(objective).with_up(0.5).unwrap();

        adapter.adjust_error_definition(&[1.0], &[0]).unwrap();

        assert_relative_eq!(adapter.up(), 0.5);
    }

    #[test]
    fn batch_evaluates_every_point() {
        let adapter = CostFunctionAdapter::new(Tally::new());
        let points: Vec<Vec<f64>> = (0..16).map(|i| vec![f64::from(i)]).collect();

        let values = adapter.evaluate_batch(&points).unwrap();

        assert_eq!(values.len(), 16);
        assert_relative_eq!(values[4], 16.0);
        assert_eq!(adapter.objective().calls(), 16);
    }

    #[test]
    fn concurrent_workers_observe_cancellation() {
        let adapter = CostFunctionAdapter::new(Tally::new());
        let handle = adapter.cancel_handle();

        thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    // Keep evaluating until the cancellation is observed.
                    loop {
                        match adapter.evaluate(&[1.0, 1.0]) {
                            Ok(value) => assert_relative_eq!(value, 2.0),
                            Err(err) => {
                                assert!(err.as_cancelled().is_some());
                                break;
                            }
                        }
                    }
                });
            }

            scope.spawn(|| {
                while adapter.objective().calls() < 1_000 {
                    thread::yield_now();
                }
                handle.cancel("stop the workers");
            });
        });

        let calls = adapter.objective().calls();
        for _ in 0..10 {
            assert!(adapter.evaluate(&[1.0, 1.0]).is_err());
        }
        assert_eq!(adapter.objective().calls(), calls);
        assert_eq!(handle.state().get().unwrap().reason, "stop the workers");
    }
}

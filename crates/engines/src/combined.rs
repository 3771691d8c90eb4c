use minrun_core::{
    CostFunctionAdapter, Engine, EngineError, Objective, Optimum, ParameterState, find_cancelled,
};

use crate::{bridge::Counts, migrad::Migrad, simplex::Simplex, strategy::Strategy};

/// [`Migrad`] first, then [`Simplex`] if that did not work out.
///
/// The simplex fallback runs when Migrad fails for any reason other than
/// cancellation, or stops without converging while budget remains. It
/// starts from Migrad's best point when there is one and from the original
/// state otherwise. Both stages draw on one budget of cost evaluations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Combined {
    migrad: Migrad,
    simplex: Simplex,
}

impl Combined {
    #[must_use]
    pub fn new(strategy: Strategy) -> Self {
        Self {
            migrad: Migrad::new(strategy),
            simplex: Simplex,
        }
    }
}

impl Engine for Combined {
    fn name(&self) -> &'static str {
        "combined"
    }

    fn run_once<O: Objective>(
        &self,
        adapter: &CostFunctionAdapter<O>,
        state: &ParameterState,
        budget: u64,
        tolerance: f64,
    ) -> Result<Optimum, EngineError> {
        let counts = Counts::with_limit(budget);

        let start = match self.migrad.minimize(adapter, state, &counts, tolerance) {
            Ok(optimum)
                if optimum.has_converged
                    || optimum.has_reached_call_limit
                    || adapter.is_cancellation_requested() =>
            {
                return Ok(optimum);
            }
            Ok(optimum) => {
                tracing::debug!(
                    iters = optimum.iters,
                    "migrad did not converge, falling back to simplex"
                );
                optimum.to_state(state)?
            }
            Err(err) if find_cancelled(err.as_ref()).is_some() => return Err(err),
            Err(err) => {
                if adapter.is_cancellation_requested() {
                    return Err(err);
                }
                tracing::debug!(error = %err, "migrad failed, falling back to simplex");
                state.clone()
            }
        };

        self.simplex.minimize(adapter, &start, &counts, tolerance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use approx::assert_relative_eq;
    use minrun_core::{CancelKind, FnObjective};
    use thiserror::Error;

    #[derive(Debug, Error)]
    #[error("gradient unavailable")]
    struct Broken;

    /// A parabola that claims a gradient but cannot deliver one.
    struct BrokenGradient;

    impl Objective for BrokenGradient {
        type Error = Broken;

        fn cost(&self, params: &[f64]) -> Result<f64, Self::Error> {
            Ok((params[0] - 2.0).powi(2))
        }

        fn has_gradient(&self) -> bool {
            true
        }

        fn gradient(&self, _params: &[f64]) -> Option<Result<Vec<f64>, Self::Error>> {
            Some(Err(Broken))
        }
    }

    /// Counts cost evaluations of the wrapped objective.
    struct Counting<O> {
        calls: Arc<AtomicUsize>,
        inner: O,
    }

    impl<O: Objective> Objective for Counting<O> {
        type Error = O::Error;

        fn cost(&self, params: &[f64]) -> Result<f64, Self::Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.cost(params)
        }

        fn has_gradient(&self) -> bool {
            self.inner.has_gradient()
        }

        fn gradient(&self, params: &[f64]) -> Option<Result<Vec<f64>, Self::Error>> {
            self.inner.gradient(params)
        }
    }

    #[test]
    fn converged_migrad_result_is_returned() {
        let adapter = CostFunctionAdapter::new(FnObjective::new(|p| (p[0] + 1.0).powi(2)));
        let state = ParameterState::from_values(&[3.0]).unwrap();

        let optimum = Combined::default()
            .run_once(&adapter, &state, 1000, 0.01)
            .unwrap();

        assert!(optimum.has_converged);
        assert!(optimum.gradient_calls > 0);
        assert_relative_eq!(optimum.params[0], -1.0, epsilon = 1e-4);
    }

    #[test]
    fn falls_back_to_simplex() {
        let adapter = CostFunctionAdapter::new(BrokenGradient);
        let state = ParameterState::from_values(&[0.0]).unwrap();

        let optimum = Combined::default()
            .run_once(&adapter, &state, 500, 0.01)
            .unwrap();

        assert_relative_eq!(optimum.params[0], 2.0, epsilon = 1e-2);
    }

    #[test]
    fn both_stages_share_one_budget() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let adapter = CostFunctionAdapter::new(Counting {
            calls: counter,
            inner: BrokenGradient,
        });
        let state = ParameterState::from_values(&[0.0]).unwrap();

        let optimum = Combined::default()
            .run_once(&adapter, &state, 12, 1e-9)
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 12);
        assert_eq!(optimum.cost_calls, 12);
        assert!(optimum.has_reached_call_limit);
    }

    #[test]
    fn cancellation_skips_fallback() {
        let adapter = CostFunctionAdapter::new(BrokenGradient);
        let state = ParameterState::from_values(&[0.0]).unwrap();
        adapter.request_cancellation(CancelKind::Cooperative, "deadline");

        let err = Combined::default()
            .run_once(&adapter, &state, 500, 0.01)
            .unwrap_err();

        assert_eq!(find_cancelled(err.as_ref()).unwrap().reason, "deadline");
    }
}

//! The run controller.
//!
//! A [`Runner`] owns one engine, one adapter, and a starting state. Each call
//! to [`Runner::run`] drives the engine once and folds whatever happened into
//! an [`Outcome`]:
//!
//! 1. **Cancelled** if the engine's failure carries a [`Cancelled`]
//!    condition, or if the adapter uses [`AbortPolicy::Sentinel`] and
//!    cancellation was requested.
//! 2. **Error** for any other failure, including a panic unwinding out of
//!    the engine or the objective. The message is the failure's own text.
//! 3. **Success** otherwise.
//!
//! The cancellation state belongs to the adapter and is never reset: once a
//! runner has been cancelled, every later run reports `Cancelled` again.

mod outcome;


pub use outcome::{Outcome, RunResult};

use std::{
    any::Any,
    error::Error as StdError,
    panic::{self, AssertUnwindSafe},
};

use crate::{
    adapter::{AbortPolicy, CostFunctionAdapter},
    cancel::{CancelHandle, CancelKind, Cancelled},
    config::RunConfig,
    engine::{Engine, EngineError},
    objective::Objective,
    optimum::Optimum,
    state::ParameterState,
};

/// Drives an [`Engine`] over a [`CostFunctionAdapter`] and keeps the outcome.
#[derive(Debug)]
pub struct Runner<E, O> {
    engine: E,
    adapter: CostFunctionAdapter<O>,
    state: ParameterState,
    outcome: Option<Outcome>,
}

impl<E: Engine, O: Objective> Runner<E, O> {
    pub fn new(engine: E, adapter: CostFunctionAdapter<O>, state: ParameterState) -> Self {
        Self {
            engine,
            adapter,
            state,
            outcome: None,
        }
    }

    /// Runs the engine with the given budget and tolerance.
    ///
    /// A `max_evaluations` of zero selects the default budget. An invalid
    /// tolerance is reported as [`RunResult::Error`] without calling the
    /// engine. Any previous outcome is discarded.
    pub fn run(&mut self, max_evaluations: u64, tolerance: f64) -> RunResult {
        self.outcome = None;

        let outcome = match RunConfig::new(max_evaluations, tolerance) {
            Ok(config) => self.execute(&config),
            Err(err) => Outcome::Error {
                message: format!("invalid configuration: {err}"),
            },
        };
        self.finish(outcome)
    }

    /// Runs the engine with a validated config.
    pub fn run_with(&mut self, config: &RunConfig) -> RunResult {
        self.outcome = None;

        let outcome = self.execute(config);
        self.finish(outcome)
    }

    /// Returns the optimum of the last run.
    ///
    /// # Panics
    ///
    /// Panics if the last run did not succeed, or nothing has run yet.
    #[must_use]
    pub fn optimum(&self) -> &Optimum {
        match &self.outcome {
            Some(Outcome::Success(optimum)) => optimum,
            Some(other) => panic!(
                "no optimum available: the last run ended with {:?}",
                other.result()
            ),
            None => panic!("no optimum available: nothing has run yet"),
        }
    }

    /// Returns the diagnostic message of the last run.
    ///
    /// # Panics
    ///
    /// Panics if the last run succeeded, or nothing has run yet.
    #[must_use]
    pub fn error_message(&self) -> &str {
        match &self.outcome {
            Some(Outcome::Cancelled { message, .. } | Outcome::Error { message }) => message,
            Some(_) => panic!("no error message available: the last run succeeded"),
            None => panic!("no error message available: nothing has run yet"),
        }
    }

    /// Returns the outcome of the last run, if any.
    #[must_use]
    pub fn outcome(&self) -> Option<&Outcome> {
        self.outcome.as_ref()
    }

    /// Consumes the runner, returning the outcome of the last run.
    #[must_use]
    pub fn into_outcome(self) -> Option<Outcome> {
        self.outcome
    }

    /// Returns a handle that can cancel runs from any thread.
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        self.adapter.cancel_handle()
    }

    /// Requests cancellation. Only the first request takes effect.
    pub fn request_cancellation(&self, kind: CancelKind, reason: impl Into<String>) -> bool {
        self.adapter.request_cancellation(kind, reason)
    }

    #[must_use]
    pub fn adapter(&self) -> &CostFunctionAdapter<O> {
        &self.adapter
    }

    /// Consumes the runner, returning its adapter.
    ///
    /// The adapter keeps its cancellation state, so a follow-up run (such
    /// as an error calculation) can be stopped through the same handle.
    #[must_use]
    pub fn into_adapter(self) -> CostFunctionAdapter<O> {
        self.adapter
    }

    #[must_use]
    pub fn engine(&self) -> &E {
        &self.engine
    }

    #[must_use]
    pub fn state(&self) -> &ParameterState {
        &self.state
    }

    fn execute(&self, config: &RunConfig) -> Outcome {
        let budget = config.budget(self.state.variable_count());
        tracing::debug!(
            engine = self.engine.name(),
            budget,
            tolerance = config.tolerance(),
            "starting minimization run"
        );

        if let Some(cancelled) = self.adapter.cancel_handle().state().check() {
            return cancelled_outcome(cancelled);
        }

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.engine
                .run_once(&self.adapter, &self.state, budget, config.tolerance())
        }));

        self.classify(result)
    }

    fn classify(
        &self,
        result: Result<Result<Optimum, EngineError>, Box<dyn Any + Send>>,
    ) -> Outcome {
        match result {
            Ok(Ok(optimum)) => match self.sentinel_cancellation() {
                Some(cancelled) => cancelled_outcome(cancelled),
                None => Outcome::Success(optimum),
            },
            Ok(Err(err)) => {
                if let Some(cancelled) = find_cancelled(err.as_ref()) {
                    return cancelled_outcome(cancelled.clone());
                }
                match self.sentinel_cancellation() {
                    Some(cancelled) => cancelled_outcome(cancelled),
                    None => Outcome::Error {
                        message: err.to_string(),
                    },
                }
            }
            Err(payload) => match self.sentinel_cancellation() {
                Some(cancelled) => cancelled_outcome(cancelled),
                None => Outcome::Error {
                    message: panic_message(payload.as_ref()),
                },
            },
        }
    }

    /// Sentinel values are only trusted as a cancellation signal when the
    /// adapter was told to produce them and a request was actually made.
    fn sentinel_cancellation(&self) -> Option<Cancelled> {
        if self.adapter.policy() != AbortPolicy::Sentinel {
            return None;
        }
        self.adapter.cancel_handle().state().check()
    }

    fn finish(&mut self, outcome: Outcome) -> RunResult {
        let result = outcome.result();
        let engine = self.engine.name();

        match &outcome {
            Outcome::Success(optimum) => tracing::info!(
                engine,
                cost = optimum.cost,
                iters = optimum.iters,
                converged = optimum.has_converged,
                "minimization finished"
            ),
            Outcome::Cancelled { kind, message } => {
                tracing::info!(engine, ?kind, reason = %message, "minimization cancelled");
            }
            Outcome::Error { message } => {
                tracing::warn!(engine, error = %message, "minimization failed");
            }
        }

        self.outcome = Some(outcome);
        result
    }
}

/// Searches an error and its sources for a cancellation condition.
#[must_use]
pub fn find_cancelled<'a>(err: &'a (dyn StdError + 'static)) -> Option<&'a Cancelled> {
    let mut current = Some(err);
    while let Some(err) = current {
        if let Some(cancelled) = err.downcast_ref::<Cancelled>() {
            return Some(cancelled);
        }
        current = err.source();
    }
    None
}

fn cancelled_outcome(cancelled: Cancelled) -> Outcome {
    Outcome::Cancelled {
        kind: cancelled.kind,
        message: cancelled.reason,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "minimization panicked".to_string()
    }
}

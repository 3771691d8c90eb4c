use std::sync::{
    Mutex,
    atomic::{AtomicU64, Ordering},
};

use argmin::core::{CostFunction, Gradient, State, TerminationReason, TerminationStatus};
use minrun_core::{
    Cancelled, CostFunctionAdapter, EngineError, EvalError, Objective, Optimum, ParameterState,
};

use crate::{
    error::Error,
    gradient::{Difference, numeric_gradient},
};

/// Evaluation counters and call budget shared by one engine run.
///
/// Also remembers the lowest cost seen, so a run that runs out of budget
/// can still report its best point.
#[derive(Debug)]
pub(crate) struct Counts {
    cost: AtomicU64,
    gradient: AtomicU64,
    limit: u64,
    best: Mutex<Option<(f64, Vec<f64>)>>,
}

impl Default for Counts {
    fn default() -> Self {
        Self::with_limit(u64::MAX)
    }
}

impl Counts {
    /// Counters that allow at most `limit` cost evaluations.
    pub(crate) fn with_limit(limit: u64) -> Self {
        Self {
            cost: AtomicU64::new(0),
            gradient: AtomicU64::new(0),
            limit,
            best: Mutex::new(None),
        }
    }

    pub(crate) fn cost(&self) -> u64 {
        self.cost.load(Ordering::Relaxed)
    }

    pub(crate) fn gradient(&self) -> u64 {
        self.gradient.load(Ordering::Relaxed)
    }

    pub(crate) fn limit(&self) -> u64 {
        self.limit
    }

    pub(crate) fn limit_reached(&self) -> bool {
        self.cost() >= self.limit
    }

    /// Claims `n` cost evaluations, all or nothing.
    fn reserve(&self, n: u64) -> bool {
        self.cost
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |used| {
                used.checked_add(n).filter(|&total| total <= self.limit)
            })
            .is_ok()
    }

    fn record(&self, external: &[f64], cost: f64) {
        if !cost.is_finite() {
            return;
        }
        if let Ok(mut best) = self.best.lock() {
            if best.as_ref().is_none_or(|&(b, _)| cost < b) {
                *best = Some((cost, external.to_vec()));
            }
        }
    }

    fn best(&self) -> Option<(f64, Vec<f64>)> {
        self.best.lock().ok().and_then(|best| best.clone())
    }
}

/// Presents the variable parameters of a [`ParameterState`] to argmin.
///
/// argmin only ever sees the internal vector (one entry per variable
/// parameter, in internal coordinates). Fixed parameters are filled back in
/// and limits applied before every call into the adapter.
pub(crate) struct Bridge<'a, O> {
    adapter: &'a CostFunctionAdapter<O>,
    state: &'a ParameterState,
    difference: Difference,
    counts: &'a Counts,
}

impl<O> Clone for Bridge<'_, O> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<O> Copy for Bridge<'_, O> {}

impl<'a, O: Objective> Bridge<'a, O> {
    pub(crate) fn new(
        adapter: &'a CostFunctionAdapter<O>,
        state: &'a ParameterState,
        difference: Difference,
        counts: &'a Counts,
    ) -> Self {
        Self {
            adapter,
            state,
            difference,
            counts,
        }
    }

    /// Evaluates one internal point.
    ///
    /// Fails with [`EvalError::CallLimit`], without calling the adapter, once
    /// the budget is spent.
    pub(crate) fn cost_at(&self, internal: &[f64]) -> Result<f64, EvalError<O::Error>> {
        if !self.counts.reserve(1) {
            return Err(self.call_limit());
        }
        let external = self.state.external(internal);
        let cost = self.adapter.evaluate(&external)?;
        self.counts.record(&external, cost);
        Ok(cost)
    }

    /// Evaluates several internal points in parallel.
    ///
    /// The batch runs only if the budget covers all of it.
    pub(crate) fn costs_at(&self, points: &[Vec<f64>]) -> Result<Vec<f64>, EvalError<O::Error>> {
        if !self.counts.reserve(points.len() as u64) {
            return Err(self.call_limit());
        }
        let external: Vec<_> = points.iter().map(|p| self.state.external(p)).collect();
        let costs = self.adapter.evaluate_batch(&external)?;
        for (point, &cost) in external.iter().zip(&costs) {
            self.counts.record(point, cost);
        }
        Ok(costs)
    }

    /// The gradient with respect to the internal coordinates.
    pub(crate) fn gradient_at(&self, internal: &[f64]) -> Result<Vec<f64>, EvalError<O::Error>> {
        self.counts.gradient.fetch_add(1, Ordering::Relaxed);
        if self.adapter.has_gradient() {
            let gradient = self
                .adapter
                .evaluate_gradient(&self.state.external(internal))?;
            Ok(self.state.internal_gradient(internal, &gradient))
        } else {
            numeric_gradient(self, internal, self.difference)
        }
    }

    fn call_limit(&self) -> EvalError<O::Error> {
        EvalError::CallLimit {
            limit: self.counts.limit,
        }
    }

    /// Builds an [`Optimum`] from the final argmin state.
    pub(crate) fn optimum<I>(&self, engine: &'static str, state: &I) -> Result<Optimum, EngineError>
    where
        I: State<Param = Vec<f64>, Float = f64>,
    {
        let best = state
            .get_best_param()
            .ok_or(Error::NoBestPoint { engine })?;
        let cost = state.get_best_cost();
        let status = state.get_termination_status();

        tracing::debug!(engine, %status, iters = state.get_iter(), cost, "argmin run finished");

        let has_converged = matches!(
            status,
            TerminationStatus::Terminated(
                TerminationReason::SolverConverged | TerminationReason::TargetCostReached
            )
        );
        let has_reached_call_limit = self.counts.limit_reached()
            || matches!(
                status,
                TerminationStatus::Terminated(TerminationReason::MaxItersReached)
            );

        Ok(Optimum {
            params: self.state.external(best),
            cost,
            covariance: None,
            cost_calls: self.counts.cost(),
            gradient_calls: self.counts.gradient(),
            iters: state.get_iter(),
            has_converged,
            has_reached_call_limit,
            is_valid: has_converged && cost.is_finite(),
        })
    }

    /// Handles a failed argmin run.
    ///
    /// Running out of budget ends the run with the best point seen so far.
    /// Every other failure is passed on.
    pub(crate) fn recover(
        &self,
        engine: &'static str,
        err: argmin::core::Error,
    ) -> Result<Optimum, EngineError> {
        let exhausted = matches!(
            err.downcast_ref::<EvalError<O::Error>>(),
            Some(EvalError::CallLimit { .. })
        );
        if !exhausted {
            return Err(into_engine_error(err));
        }

        let (cost, params) = self.counts.best().ok_or(Error::NoBestPoint { engine })?;
        tracing::debug!(engine, limit = self.counts.limit, cost, "call limit reached");

        Ok(Optimum {
            params,
            cost,
            covariance: None,
            cost_calls: self.counts.cost(),
            gradient_calls: self.counts.gradient(),
            iters: 0,
            has_converged: false,
            has_reached_call_limit: true,
            is_valid: false,
        })
    }
}

impl<O: Objective> CostFunction for Bridge<'_, O> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, param: &Self::Param) -> Result<Self::Output, argmin::core::Error> {
        self.cost_at(param).map_err(into_argmin)
    }
}

impl<O: Objective> Gradient for Bridge<'_, O> {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(&self, param: &Self::Param) -> Result<Self::Gradient, argmin::core::Error> {
        self.gradient_at(param).map_err(into_argmin)
    }
}

/// Converts an adapter error for argmin, keeping a cancellation on top so it
/// can be downcast again on the way out.
fn into_argmin<E>(err: EvalError<E>) -> argmin::core::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    match err {
        EvalError::Cancelled(cancelled) => argmin::core::Error::new(cancelled),
        other => argmin::core::Error::new(other),
    }
}

/// Converts an argmin failure into the runner's error type.
pub(crate) fn into_engine_error(err: argmin::core::Error) -> EngineError {
    match err.downcast::<Cancelled>() {
        Ok(cancelled) => Box::new(cancelled),
        Err(err) => err.into(),
    }
}

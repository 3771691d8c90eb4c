use argmin::{
    core::Executor,
    solver::{linesearch::MoreThuenteLineSearch, quasinewton::LBFGS},
};
use minrun_core::{CostFunctionAdapter, Engine, EngineError, Objective, Optimum, ParameterState};

use crate::{
    bridge::{Bridge, Counts},
    error::Error,
    strategy::Strategy,
};

/// Quasi-Newton minimization with L-BFGS and a More–Thuente line search.
///
/// The objective's analytic gradient is used when it has one. Otherwise the
/// gradient is estimated by finite differences, with all displaced points of
/// one estimate evaluated in parallel. The run converges once the gradient
/// norm drops below `0.002 · tolerance · up`. The budget counts cost
/// evaluations, including those spent on numeric gradients and line
/// searches; when it is spent the best point seen so far is returned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Migrad {
    strategy: Strategy,
}

impl Migrad {
    #[must_use]
    pub fn new(strategy: Strategy) -> Self {
        Self { strategy }
    }

    #[must_use]
    pub fn strategy(&self) -> Strategy {
        self.strategy
    }
}

impl Migrad {
    /// Runs within the budget held by `counts`.
    pub(crate) fn minimize<O: Objective>(
        self,
        adapter: &CostFunctionAdapter<O>,
        state: &ParameterState,
        counts: &Counts,
        tolerance: f64,
    ) -> Result<Optimum, EngineError> {
        if state.variable_count() == 0 {
            return Err(Error::NoVariables.into());
        }

        let linesearch = MoreThuenteLineSearch::new();
        let solver = LBFGS::new(linesearch, self.strategy.lbfgs_memory())
            .with_tolerance_grad(0.002 * tolerance * adapter.up())
            .map_err(|e| Error::config(self.name(), &e))?;

        let bridge = Bridge::new(adapter, state, self.strategy.difference(), counts);

        match Executor::new(bridge, solver)
            .configure(|s| s.param(state.internal_values()).max_iters(counts.limit()))
            .run()
        {
            Ok(result) => bridge.optimum(self.name(), result.state()),
            Err(err) => bridge.recover(self.name(), err),
        }
    }
}

impl Engine for Migrad {
    fn name(&self) -> &'static str {
        "migrad"
    }

    fn run_once<O: Objective>(
        &self,
        adapter: &CostFunctionAdapter<O>,
        state: &ParameterState,
        budget: u64,
        tolerance: f64,
    ) -> Result<Optimum, EngineError> {
        self.minimize(adapter, state, &Counts::with_limit(budget), tolerance)
    }
}

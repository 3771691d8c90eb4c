use argmin::{core::Executor, solver::neldermead::NelderMead};
use minrun_core::{CostFunctionAdapter, Engine, EngineError, Objective, Optimum, ParameterState};

use crate::{
    bridge::{Bridge, Counts},
    error::Error,
    gradient::Difference,
};

/// Derivative-free minimization with the Nelder–Mead simplex method.
///
/// The initial simplex is the starting point plus one vertex per variable
/// parameter, displaced along that parameter by its step size. The run
/// converges once the standard deviation of the vertex costs drops below
/// `0.002 · tolerance · up`, and stops at the best vertex seen once the
/// budget of cost evaluations is spent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Simplex;

impl Simplex {
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

        let solver = NelderMead::new(initial_simplex(state))
            .with_sd_tolerance(0.002 * tolerance * adapter.up())
            .map_err(|e| Error::config(self.name(), &e))?;

        let bridge = Bridge::new(adapter, state, Difference::Central, counts);

        match Executor::new(bridge, solver)
            .configure(|s| s.max_iters(counts.limit()))
            .run()
        {
            Ok(result) => bridge.optimum(self.name(), result.state()),
            Err(err) => bridge.recover(self.name(), err),
        }
    }
}

impl Engine for Simplex {
    fn name(&self) -> &'static str {
        "simplex"
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

fn initial_simplex(state: &ParameterState) -> Vec<Vec<f64>> {
    let origin = state.internal_values();
    let mut vertices = vec![origin.clone()];
    for (i, step) in state.internal_steps().into_iter().enumerate() {
        let mut vertex = origin.clone();
        vertex[i] += step;
        vertices.push(vertex);
    }
    vertices
}

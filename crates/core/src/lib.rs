//! Cancellable minimization runs over external minimizer engines.
//!
//! This crate defines the pieces that sit between a caller's objective and a
//! third-party minimization algorithm:
//!
//! - [`Objective`]: the caller's cost function (and optional gradient), with
//!   stock [`FnObjective`], [`LeastSquares`], and [`Sum`] implementations
//! - [`CostFunctionAdapter`]: presents an objective to an engine and checks
//!   for cancellation around every evaluation
//! - [`CancelHandle`]: requests cancellation from any thread
//! - [`Engine`]: a minimization algorithm, run once per [`Runner::run`]
//! - [`Runner`]: drives an engine and reduces its outcome to
//!   [`RunResult::Success`], [`RunResult::Cancelled`], or [`RunResult::Error`]
//!
//! Engine implementations live in the `minrun-engines` crate.

mod adapter;
mod cancel;
mod config;
mod engine;
mod objective;
mod optimum;
mod runner;
mod state;

pub use adapter::{AbortPolicy, CostFunctionAdapter, EvalError, SENTINEL};
pub use cancel::{CancelHandle, CancelKind, Cancellation, CancellationState, Cancelled};
pub use config::{ConfigError, DEFAULT_TOLERANCE, RunConfig, default_budget};
pub use engine::{Engine, EngineError};
pub use objective::{
    ComponentError, FnObjective, LeastSquares, LeastSquaresError, Objective, Sum, SumError,
};
pub use optimum::Optimum;
pub use runner::{Outcome, RunResult, Runner, find_cancelled};
pub use state::{DEFAULT_STEP, Parameter, ParameterState, StateError};

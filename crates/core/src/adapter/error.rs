use thiserror::Error;

use crate::cancel::Cancelled;

/// Errors produced by a single adapter evaluation.
///
/// `Cancelled` is an expected outcome, not a defect: it tells the engine to
/// unwind so the runner can report the run as cancelled.
#[derive(Debug, Error)]
pub enum EvalError<E> {
    #[error(transparent)]
    Cancelled(#[from] Cancelled),

    #[error(transparent)]
    Objective(E),

    #[error("gradient requested from an objective without gradient capability")]
    NoGradient,

    #[error(
        "Invalid gradient size: expected {expected} value(s) (one per parameter), but got {actual}."
    )]
    GradientSize { expected: usize, actual: usize },

    #[error("cost function returned a non-finite value ({value}) at parameters {params:?}")]
    NonFiniteCost { params: Vec<f64>, value: f64 },

    #[error("cost function returned a non-finite gradient at parameters {params:?}")]
    NonFiniteGradient { params: Vec<f64> },

    /// Raised by an engine, not by the adapter, when an evaluation would
    /// exceed the run's budget. The objective is not called.
    #[error("call limit of {limit} cost evaluations reached")]
    CallLimit { limit: u64 },
}

impl<E> EvalError<E> {
    /// Returns the cancellation condition, if this error is one.
    #[must_use]
    pub fn as_cancelled(&self) -> Option<&Cancelled> {
        match self {
            Self::Cancelled(c) => Some(c),
            _ => None,
        }
    }
}

impl<E> EvalError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Type-erases the error, keeping a cancellation directly downcastable.
    #[must_use]
    pub fn into_boxed(self) -> Box<dyn std::error::Error + Send + Sync> {
        match self {
            Self::Cancelled(c) => Box::new(c),
            other => Box::new(other),
        }
    }
}

use crate::{cancel::CancelKind, optimum::Optimum};

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunResult {
    /// The engine returned an optimum.
    Success,

    /// Cancellation was requested and observed.
    Cancelled,

    /// The engine or the objective failed.
    Error,
}

/// The stored result of the most recent run.
///
/// Exactly one of an [`Optimum`] or a diagnostic message is present.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success(Optimum),

    Cancelled { kind: CancelKind, message: String },

    Error { message: String },
}

impl Outcome {
    #[must_use]
    pub fn result(&self) -> RunResult {
        match self {
            Self::Success(_) => RunResult::Success,
            Self::Cancelled { .. } => RunResult::Cancelled,
            Self::Error { .. } => RunResult::Error,
        }
    }

    /// Returns the optimum of a successful run.
    #[must_use]
    pub fn optimum(&self) -> Option<&Optimum> {
        match self {
            Self::Success(optimum) => Some(optimum),
            _ => None,
        }
    }

    /// Returns the diagnostic message of a cancelled or failed run.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Success(_) => None,
            Self::Cancelled { message, .. } | Self::Error { message } => Some(message),
        }
    }
}

use thiserror::Error;

/// Failures the engines detect themselves, as opposed to those raised by the
/// adapter or by argmin.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    #[error("no variable parameters to minimize")]
    NoVariables,

    #[error("invalid {engine} configuration: {reason}")]
    Config { engine: &'static str, reason: String },

    #[error("{engine} finished without a best point")]
    NoBestPoint { engine: &'static str },

    #[error("Hessian is singular at the current point")]
    SingularHessian,

    #[error("Hessian is not positive definite: variance of {name} is {variance}")]
    NotPositiveDefinite { name: String, variance: f64 },
}

impl Error {
    pub(crate) fn config(engine: &'static str, err: &argmin::core::Error) -> Self {
        Self::Config {
            engine,
            reason: err.to_string(),
        }
    }
}

//! Minimizer engines for [`minrun_core::Runner`].
//!
//! Every engine here hands the actual algorithm to [`argmin`] and only does
//! the plumbing: mapping between the full parameter vector and the variable
//! parameters, counting evaluations, and translating the outcome into an
//! [`Optimum`](minrun_core::Optimum).
//!
//! - [`Simplex`]: Nelder–Mead, derivative-free
//! - [`Migrad`]: L-BFGS with More–Thuente line search, using the
//!   objective's gradient when it has one and finite differences otherwise
//! - [`Combined`]: [`Migrad`], falling back to [`Simplex`] when it fails
//! - [`Hesse`]: covariance from a finite-difference Hessian at the current
//!   point
//!
//! Cancellation raised by the adapter inside argmin surfaces as a
//! [`Cancelled`](minrun_core::Cancelled) error the runner can recognize.

mod bridge;
mod combined;
mod error;
mod gradient;
mod hesse;
mod migrad;
mod simplex;
mod strategy;

pub use combined::Combined;
pub use error::Error;
pub use hesse::Hesse;
pub use migrad::Migrad;
pub use simplex::Simplex;
pub use strategy::Strategy;

//! Cooperative cancellation shared between a caller and a running minimizer.
//!
//! A [`CancellationState`] is a write-once tri-state flag: it starts as
//! "not requested" and moves to "requested" exactly once, recording the
//! [`CancelKind`] and a human-readable reason. Evaluation workers poll it on
//! every call; any thread may write it through a [`CancelHandle`].

use std::sync::{
    Arc, OnceLock,
    atomic::{AtomicU8, Ordering},
};

use thiserror::Error;

const NOT_REQUESTED: u8 = 0;
const REQUESTED_COOPERATIVE: u8 = 1;
const REQUESTED_BY_USER: u8 = 2;

/// Who asked for the run to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelKind {
    /// The hosting program decided to stop (shutdown, superseded request, ...).
    Cooperative,

    /// A person explicitly cancelled the computation.
    User,
}

/// Snapshot of a cancellation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cancellation {
    pub kind: CancelKind,
    pub reason: String,
}

/// The typed condition returned by the adapter once cancellation is observed.
///
/// Its `Display` output is exactly the reason supplied by the caller, so it
/// can be surfaced verbatim as the run's diagnostic message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct Cancelled {
    pub kind: CancelKind,
    pub reason: String,
}

impl From<Cancellation> for Cancelled {
    fn from(cancellation: Cancellation) -> Self {
        Self {
            kind: cancellation.kind,
            reason: cancellation.reason,
        }
    }
}

/// Atomic write-once cancellation flag.
#[derive(Debug, Default)]
pub struct CancellationState {
    flag: AtomicU8,
    reason: OnceLock<String>,
}

impl CancellationState {
    /// Creates a state with no cancellation requested.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    ///
    /// Only the first request takes effect. Later calls leave the recorded
    /// kind and reason untouched and return `false`.
    pub fn request(&self, kind: CancelKind, reason: impl Into<String>) -> bool {
        // The reason slot is the arbiter between racing writers.
        if self.reason.set(reason.into()).is_err() {
            return false;
        }

        let flag = match kind {
            CancelKind::Cooperative => REQUESTED_COOPERATIVE,
            CancelKind::User => REQUESTED_BY_USER,
        };
        self.flag.store(flag, Ordering::Release);

        tracing::debug!(?kind, "cancellation requested");
        true
    }

    /// Returns `true` once a cancellation request has been published.
    #[must_use]
    pub fn is_requested(&self) -> bool {
        self.flag.load(Ordering::Acquire) != NOT_REQUESTED
    }

    /// Returns the recorded request, if any.
    #[must_use]
    pub fn get(&self) -> Option<Cancellation> {
        let kind = match self.flag.load(Ordering::Acquire) {
            REQUESTED_COOPERATIVE => CancelKind::Cooperative,
            REQUESTED_BY_USER => CancelKind::User,
            _ => return None,
        };

        // The reason is written before the flag is released.
        let reason = self.reason.get().cloned().unwrap_or_default();
        Some(Cancellation { kind, reason })
    }

    /// Returns the typed cancellation condition, if a request was published.
    #[must_use]
    pub fn check(&self) -> Option<Cancelled> {
        self.get().map(Cancelled::from)
    }
}

/// Cloneable, thread-safe handle for requesting cancellation of a run.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<CancellationState>);

impl CancelHandle {
    /// Creates a handle to a fresh, unrequested cancellation state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. See [`CancellationState::request`].
    pub fn request(&self, kind: CancelKind, reason: impl Into<String>) -> bool {
        self.0.request(kind, reason)
    }

    /// Requests a user-initiated cancellation.
    pub fn cancel(&self, reason: impl Into<String>) -> bool {
        self.request(CancelKind::User, reason)
    }

    /// Returns `true` once cancellation has been requested.
    #[must_use]
    pub fn is_requested(&self) -> bool {
        self.0.is_requested()
    }

    /// Returns the shared state.
    #[must_use]
    pub fn state(&self) -> &CancellationState {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::thread;

    #[test]
    fn starts_not_requested() {
        let state = CancellationState::new();

        assert!(!state.is_requested());
        assert_eq!(state.get(), None);
        assert_eq!(state.check(), None);
    }

    #[test]
    fn records_kind_and_reason() {
        let state = CancellationState::new();

        assert!(state.request(CancelKind::User, "stop please"));

        assert!(state.is_requested());
        assert_eq!(
            state.get(),
            Some(Cancellation {
                kind: CancelKind::User,
                reason: "stop please".to_string(),
            })
        );
        assert_eq!(state.check().unwrap().to_string(), "stop please");
    }

    #[test]
    fn first_request_wins() {
        let state = CancellationState::new();

        assert!(state.request(CancelKind::Cooperative, "shutdown"));
        assert!(!state.request(CancelKind::User, "user clicked cancel"));

        let cancellation = state.get().unwrap();
        assert_eq!(cancellation.kind, CancelKind::Cooperative);
        assert_eq!(cancellation.reason, "shutdown");
    }

    #[test]
    fn handle_clones_share_state() {
        let handle = CancelHandle::new();
        let other = handle.clone();

        other.cancel("from elsewhere");

        assert!(handle.is_requested());
        assert_eq!(handle.state().get().unwrap().kind, CancelKind::User);
    }

    #[test]
    fn racing_requests_publish_exactly_one() {
        let handle = CancelHandle::new();

        let accepted: usize = thread::scope(|scope| {
            let workers: Vec<_> = (0..8)
                .map(|i| {
                    let handle = handle.clone();
                    scope.spawn(move || usize::from(handle.cancel(format!("worker {i}"))))
                })
                .collect();
            workers.into_iter().map(|w| w.join().unwrap()).sum()
        });

        assert_eq!(accepted, 1);
        let reason = handle.state().get().unwrap().reason;
        assert!(reason.starts_with("worker "));
    }
}

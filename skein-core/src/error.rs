//! Error types for the scheduler.
//!
//! Mirrors the shape of a typical ambient error enum: one variant per
//! failure domain, `#[from] io::Error` for the common case, and a
//! variant that lets a fiber's failure carry through to whoever is
//! watching it.

use std::rc::Rc;

/// Errors produced by the scheduler, its socket wrappers, or by fiber
/// bodies that propagate an I/O failure with `?`.
#[derive(Debug, thiserror::Error, Clone)]
pub enum SchedulerError {
    /// A syscall failed. Most I/O-shaped operations (`recv`, `send`,
    /// `accept`, `connect`, `bind`) funnel their failures through here.
    #[error("I/O error: {0}")]
    Io(Rc<std::io::Error>),

    /// Wraps a fiber's terminal failure so it can be re-delivered to a
    /// delegator, a joiner, or the root fiber without needing the
    /// original error to be `Clone` on its own.
    #[error("fiber failed: {0}")]
    FiberFailure(Rc<SchedulerError>),

    /// The fiber was killed and did not (or could not) swallow the
    /// cancellation signal.
    #[error("fiber was killed")]
    Cancelled,

    /// The scheduler's readiness wait was interrupted by a signal.
    #[error("readiness wait interrupted")]
    Interrupted,
}

impl From<std::io::Error> for SchedulerError {
    fn from(e: std::io::Error) -> Self {
        SchedulerError::Io(Rc::new(e))
    }
}

impl SchedulerError {
    /// Wrap `self` for delivery to a second or third observer (a
    /// delegator, a set of joiners, and the root can all end up
    /// wanting the same failure).
    pub fn into_shared(self) -> Rc<SchedulerError> {
        Rc::new(self)
    }

    /// Walks through any `FiberFailure` wrapping down to the error that
    /// actually caused the failure. Used to check that a root failure
    /// is re-raised with the same kind and message it originally had.
    pub fn root_cause(&self) -> &SchedulerError {
        match self {
            SchedulerError::FiberFailure(inner) => inner.root_cause(),
            other => other,
        }
    }

    /// True for failures that are expected outcomes of an explicit
    /// `kill`, as opposed to a fiber body actually failing.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, SchedulerError::Cancelled)
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SchedulerError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn io_error(msg: &str) -> SchedulerError {
        SchedulerError::from(std::io::Error::new(std::io::ErrorKind::Other, msg))
    }

    #[test]
    fn root_cause_unwraps_nested_fiber_failures() {
        let innermost = io_error("disk on fire");
        let wrapped = SchedulerError::FiberFailure(innermost.clone().into_shared());
        let double_wrapped = SchedulerError::FiberFailure(wrapped.into_shared());
        assert_eq!(double_wrapped.root_cause().to_string(), innermost.to_string());
    }

    #[test]
    fn only_cancelled_counts_as_a_cancellation() {
        assert!(SchedulerError::Cancelled.is_cancellation());
        assert!(!io_error("nope").is_cancellation());
        assert!(!SchedulerError::Interrupted.is_cancellation());
    }

    #[test]
    fn io_error_preserves_its_message() {
        let err = io_error("boom");
        assert_eq!(err.to_string(), "I/O error: boom");
    }
}

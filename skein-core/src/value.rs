//! The dynamically-shaped payload that flows back into a fiber at each
//! resumption point.
//!
//! A fiber body is generic Rust code, but the thing that resumes it is
//! the scheduler, which only knows it fired *some* event and produced
//! *some* result. [`Value`] is the scheduler's half of that handshake;
//! each public suspension point (`recv`, `spawn`, `join`, ...) knows
//! exactly which variant it will get back and unwraps it immediately,
//! so the dynamic typing never leaks past the call site that produced it.

use std::any::Any;
use std::rc::Rc;

use crate::event::FiberId;
use crate::socket::Connection;
use bytes::Bytes;

/// A terminal fiber value handed to a user function via `end`, carried
/// to a delegator or joiner as `Rc<dyn Any>` since more than one
/// observer (several joiners, plus a delegator) may need to see it.
pub type AnyValue = Rc<dyn Any>;

/// Resume value delivered to a fiber when the scheduler advances it.
#[derive(Clone)]
pub enum Value {
    /// No meaningful payload; used for `null`, `kill`, `sendall`.
    Unit,
    /// Byte count written by a non-`sendall` `send`.
    Count(usize),
    /// Bytes read by `recv`.
    Bytes(Bytes),
    /// A freshly accepted or connected socket.
    Connection(Connection),
    /// The id handed back by `spawn`, used to `join` or `kill` later.
    Fiber(FiberId),
    /// The terminal outcome of a delegated or joined fiber: `None` if it
    /// completed without calling `end`, `Some(v)` if it did.
    Terminal(Option<AnyValue>),
}

impl Value {
    pub(crate) fn into_unit(self) {
        debug_assert!(matches!(self, Value::Unit), "expected Value::Unit");
    }

    pub(crate) fn into_count(self) -> usize {
        match self {
            Value::Count(n) => n,
            _ => unreachable!("yield site and resume value disagree on shape"),
        }
    }

    pub(crate) fn into_bytes(self) -> Bytes {
        match self {
            Value::Bytes(b) => b,
            _ => unreachable!("yield site and resume value disagree on shape"),
        }
    }

    pub(crate) fn into_connection(self) -> Connection {
        match self {
            Value::Connection(c) => c,
            _ => unreachable!("yield site and resume value disagree on shape"),
        }
    }

    pub(crate) fn into_fiber_id(self) -> FiberId {
        match self {
            Value::Fiber(id) => id,
            _ => unreachable!("yield site and resume value disagree on shape"),
        }
    }

    pub(crate) fn into_terminal(self) -> Option<AnyValue> {
        match self {
            Value::Terminal(v) => v,
            _ => unreachable!("yield site and resume value disagree on shape"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn into_count_unwraps_a_count() {
        assert_eq!(Value::Count(42).into_count(), 42);
    }

    #[test]
    fn into_bytes_unwraps_bytes() {
        let bytes = Value::Bytes(Bytes::from_static(b"hi")).into_bytes();
        assert_eq!(&bytes[..], b"hi");
    }

    #[test]
    fn into_fiber_id_unwraps_the_id() {
        assert_eq!(Value::Fiber(FiberId(3)).into_fiber_id(), FiberId(3));
    }

    #[test]
    fn into_terminal_roundtrips_the_downcastable_value() {
        let terminal: AnyValue = Rc::new(9i64);
        let value = Value::Terminal(Some(terminal)).into_terminal();
        let unwrapped = value.expect("terminal value present");
        assert_eq!(*unwrapped.downcast::<i64>().unwrap(), 9);
    }

    #[test]
    fn into_terminal_handles_a_child_that_never_called_end() {
        assert!(Value::Terminal(None).into_terminal().is_none());
    }

    #[test]
    #[should_panic(expected = "disagree on shape")]
    fn into_count_panics_on_the_wrong_shape() {
        Value::Unit.into_count();
    }
}

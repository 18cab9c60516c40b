//! The event taxonomy a fiber can suspend on.
//!
//! Each variant carries exactly what the scheduler needs to (a) decide
//! whether the event is immediate or must wait on readiness/a deadline,
//! and (b) perform the underlying operation once it is ready. Socket
//! wrappers only ever *produce* these; firing them (the actual
//! syscall) is the scheduler's job (see `scheduler::fire`).

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::time::Instant;

use bytes::Bytes;
use socket2::Socket;

use crate::error::SchedulerError;
use crate::socket::{Connection, Listener};

/// Identifies a fiber for the lifetime of the scheduler that spawned it.
/// Handed back by [`crate::fiber::spawn`] so callers can `join` or `kill`
/// it later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FiberId(pub(crate) u64);

impl std::fmt::Display for FiberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "fiber#{}", self.0)
    }
}

/// A fiber body: a boxed, pinned future whose only meaningful output is
/// whether it succeeded or failed. An explicit terminal *value* (as
/// opposed to mere success) is carried out-of-band via `End`, never
/// through this `Result`.
pub(crate) type BoxedFiberFuture = Pin<Box<dyn Future<Output = Result<(), SchedulerError>>>>;

pub(crate) enum Event {
    /// Resumes the yielder immediately with `Value::Unit`; used to give
    /// other fibers a turn without waiting on anything.
    Null,

    /// Registers `future` as a brand-new, independently-running fiber
    /// and resumes the yielder with the new fiber's id.
    Spawn(BoxedFiberFuture),

    /// Registers `future` as a new fiber whose termination resumes the
    /// yielder directly, instead of requiring an explicit `join`.
    Delegate(BoxedFiberFuture),

    /// Internal bookkeeping state a fiber is parked in after its
    /// `Delegate` has been registered; never constructed by user code.
    AwaitingChild(FiberId),

    /// Parks the fiber until `deadline` elapses.
    Sleep { deadline: Instant },

    /// Parks the fiber until `conn`'s socket is readable, then reads up
    /// to `bufsize` bytes.
    Readable { conn: Connection, bufsize: usize },

    /// Parks the fiber until `conn`'s socket is writable, then writes
    /// `data`. If `sendall` is set the event re-parks itself with the
    /// unwritten remainder until every byte has been accepted by the
    /// kernel, instead of resuming the fiber after a single partial
    /// write.
    Writable {
        conn: Connection,
        data: Bytes,
        sendall: bool,
    },

    /// Parks the fiber until `listener` has a pending connection.
    Accept { listener: Listener },

    /// Parks the fiber until the in-flight non-blocking `connect(2)` on
    /// `socket` resolves (successfully or not).
    Connect { socket: Rc<RefCell<Socket>> },

    /// Immediately registers `target` for termination; if it is already
    /// running, its next resumption is forced with
    /// `SchedulerError::Cancelled`.
    Kill { target: FiberId },

    /// Parks the fiber until `target` terminates, then resumes with its
    /// terminal value or re-raises its failure.
    Join { target: FiberId },

    /// Immediately terminates the yielding fiber with `value` as its
    /// terminal value, bypassing whatever the fiber's future would
    /// otherwise have returned.
    End(Rc<dyn std::any::Any>),

    /// Forces an exception into a fiber at its current suspension
    /// point, independent of what it was otherwise waiting on. Never
    /// stored as a fiber's own pending event; used only to annotate a
    /// forced resumption in traces.
    ExceptionInject(SchedulerError),
}

impl Event {
    pub(crate) fn label(&self) -> &'static str {
        match self {
            Event::Null => "null",
            Event::Spawn(_) => "spawn",
            Event::Delegate(_) => "delegate",
            Event::AwaitingChild(_) => "awaiting-child",
            Event::Sleep { .. } => "sleep",
            Event::Readable { .. } => "readable",
            Event::Writable { .. } => "writable",
            Event::Accept { .. } => "accept",
            Event::Connect { .. } => "connect",
            Event::Kill { .. } => "kill",
            Event::Join { .. } => "join",
            Event::End(_) => "end",
            Event::ExceptionInject(_) => "exception-inject",
        }
    }
}

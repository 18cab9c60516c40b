//! The suspension primitives every fiber body is built from.
//!
//! A fiber body is ordinary `async` Rust. Suspending it ("yielding an
//! event" in the scheduler's vocabulary) is implemented with a small
//! custom future, [`EventAwait`], whose first `poll` stashes an
//! [`Event`] into a slot the scheduler can see and returns `Pending`;
//! its second `poll` (driven by the scheduler, once it has a result)
//! returns `Ready`. Exactly one `Event` is registered per suspension,
//! which is what lets the scheduler treat "the next thing this fiber is
//! waiting on" as a single value rather than an arbitrary future graph.
//!
//! The link between an `.await` point and the fiber currently being
//! polled is a thread-local: the scheduler sets it immediately before
//! calling `poll` on a fiber's boxed future and clears it immediately
//! after, so by the time any nested `EventAwait::poll` runs, it is
//! guaranteed to see the right slot.

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use crate::error::{Result, SchedulerError};
use crate::event::{BoxedFiberFuture, Event, FiberId};
use crate::value::{AnyValue, Value};

/// Per-fiber mailbox used to pass an `Event` out to the scheduler and a
/// resume `Value`/error back in.
pub(crate) struct FiberSlot {
    pending: RefCell<Option<Event>>,
    resume: RefCell<Option<Result<Value>>>,
}

impl FiberSlot {
    pub(crate) fn new() -> Rc<Self> {
        Rc::new(Self {
            pending: RefCell::new(None),
            resume: RefCell::new(None),
        })
    }

    /// Takes the event the fiber just registered. Panics if the fiber
    /// suspended (returned `Pending`) without registering one, which
    /// would mean a future other than `EventAwait` was awaited directly;
    /// every suspension point in this crate goes through `yield_event`.
    pub(crate) fn take_pending(&self) -> Event {
        self.pending
            .borrow_mut()
            .take()
            .expect("fiber suspended without yielding an event")
    }

    pub(crate) fn set_resume(&self, result: Result<Value>) {
        *self.resume.borrow_mut() = Some(result);
    }
}

thread_local! {
    static CURRENT: RefCell<Option<(FiberId, Rc<FiberSlot>)>> = RefCell::new(None);
}

/// Set while `future` is polled; gives nested `EventAwait`s a way to
/// find the slot belonging to the fiber currently being advanced.
pub(crate) fn poll_with_context(
    id: FiberId,
    slot: &Rc<FiberSlot>,
    future: Pin<&mut BoxedFiberFuture>,
) -> Poll<std::result::Result<(), SchedulerError>> {
    CURRENT.with(|c| *c.borrow_mut() = Some((id, slot.clone())));
    let waker = futures::task::noop_waker();
    let mut cx = Context::from_waker(&waker);
    let poll = future.poll(&mut cx);
    CURRENT.with(|c| *c.borrow_mut() = None);
    poll
}

fn current_slot() -> Rc<FiberSlot> {
    CURRENT.with(|c| {
        c.borrow()
            .as_ref()
            .map(|(_, slot)| slot.clone())
            .expect("fiber primitive used outside of a running fiber")
    })
}

/// The future behind every suspension point in this crate.
struct EventAwait {
    event: Option<Event>,
}

impl Future for EventAwait {
    type Output = Result<Value>;

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let slot = current_slot();
        if let Some(event) = self.event.take() {
            *slot.pending.borrow_mut() = Some(event);
            Poll::Pending
        } else {
            match slot.resume.borrow_mut().take() {
                Some(result) => Poll::Ready(result),
                None => Poll::Pending,
            }
        }
    }
}

/// Suspends the currently running fiber on `event`, resuming with
/// whatever `Value` the scheduler eventually delivers. Every other
/// public function in this module is a thin, typed wrapper around this.
pub(crate) async fn yield_event(event: Event) -> Result<Value> {
    EventAwait { event: Some(event) }.await
}

/// Yields control without waiting on anything; the scheduler resumes
/// the caller on its very next immediate-drain pass.
pub async fn null() -> Result<()> {
    yield_event(Event::Null).await?.into_unit();
    Ok(())
}

/// Parks the fiber until `duration` has elapsed.
pub async fn sleep(duration: Duration) -> Result<()> {
    let deadline = Instant::now() + duration;
    yield_event(Event::Sleep { deadline }).await?.into_unit();
    Ok(())
}

/// Registers `future` as a new, independently-running fiber and
/// resumes immediately with its id. The new fiber's failure, if it is
/// never joined, propagates to the root fiber rather than back to the
/// spawner.
pub async fn spawn<Fut>(future: Fut) -> Result<FiberId>
where
    Fut: Future<Output = Result<()>> + 'static,
{
    let value = yield_event(Event::Spawn(Box::pin(future))).await?;
    Ok(value.into_fiber_id())
}

/// Runs `future` as a child fiber and suspends until it terminates,
/// resuming with its terminal value (or re-raising its failure). The
/// child's failure is delivered here, not to the root.
///
/// The child must terminate via [`end`] for this to resolve to a value;
/// if it completes without calling `end`, this panics. Use
/// [`delegate_unit`] for children that exist only for their side effects.
pub async fn delegate<T: 'static, Fut>(future: Fut) -> Result<Rc<T>>
where
    Fut: Future<Output = Result<()>> + 'static,
{
    let value = yield_event(Event::Delegate(Box::pin(future))).await?;
    let terminal = value
        .into_terminal()
        .expect("delegated fiber completed without calling end(value)");
    downcast_terminal(terminal)
}

/// Like [`delegate`], but for a child fiber whose return value is
/// irrelevant (only its completion, or failure, matters).
pub async fn delegate_unit<Fut>(future: Fut) -> Result<()>
where
    Fut: Future<Output = Result<()>> + 'static,
{
    yield_event(Event::Delegate(Box::pin(future))).await?;
    Ok(())
}

/// Suspends until `target` terminates, discarding any explicit terminal
/// value it produced. Re-raises `target`'s failure, if any.
pub async fn join(target: FiberId) -> Result<()> {
    yield_event(Event::Join { target }).await?;
    Ok(())
}

/// Like [`join`], but expects `target` to have terminated via [`end`]
/// and downcasts its terminal value to `T`.
pub async fn join_value<T: 'static>(target: FiberId) -> Result<Rc<T>> {
    let value = yield_event(Event::Join { target }).await?;
    let terminal = value
        .into_terminal()
        .expect("joined fiber completed without calling end(value)");
    downcast_terminal(terminal)
}

fn downcast_terminal<T: 'static>(terminal: AnyValue) -> Result<Rc<T>> {
    match terminal.downcast::<T>() {
        Ok(v) => Ok(v),
        Err(_) => panic!("terminal value was not of the expected type"),
    }
}

/// Requests that `target` be killed. The killer resumes immediately;
/// `target` is forced to resume with `SchedulerError::Cancelled` at its
/// current suspension point on the scheduler's next turn. If `target`
/// swallows the cancellation and yields again, it keeps running until a
/// second `kill` forces termination outright.
pub async fn kill(target: FiberId) -> Result<()> {
    yield_event(Event::Kill { target }).await?.into_unit();
    Ok(())
}

/// Terminates the calling fiber immediately with `value` as its
/// terminal value. Delegators and joiners see it via [`delegate`] or
/// [`join_value`]; plain [`join`] discards it.
///
/// Intended to be the last expression a fiber body evaluates: the
/// fiber is torn down as soon as this is serviced, so control never
/// actually returns to the caller.
pub async fn end<T: 'static>(value: T) -> Result<()> {
    yield_event(Event::End(Rc::new(value))).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::task::Poll;

    /// Drives `future` one step with `poll_with_context`, under a
    /// throwaway fiber id and slot (enough to exercise `yield_event`
    /// without a real `Scheduler`).
    fn poll_once(
        id: FiberId,
        slot: &Rc<FiberSlot>,
        future: Pin<&mut BoxedFiberFuture>,
    ) -> Poll<std::result::Result<(), SchedulerError>> {
        poll_with_context(id, slot, future)
    }

    #[test]
    fn null_yields_exactly_one_null_event_then_completes() {
        let slot = FiberSlot::new();
        let mut future: BoxedFiberFuture = Box::pin(async {
            null().await?;
            Ok(())
        });

        let poll = poll_once(FiberId(0), &slot, future.as_mut());
        assert!(poll.is_pending());
        assert!(matches!(slot.take_pending(), Event::Null));

        slot.set_resume(Ok(Value::Unit));
        let poll = poll_once(FiberId(0), &slot, future.as_mut());
        assert!(matches!(poll, Poll::Ready(Ok(()))));
    }

    #[test]
    fn sleep_registers_a_deadline_in_the_future() {
        let slot = FiberSlot::new();
        let before = Instant::now();
        let mut future: BoxedFiberFuture = Box::pin(async {
            sleep(Duration::from_secs(5)).await?;
            Ok(())
        });

        poll_once(FiberId(0), &slot, future.as_mut());
        match slot.take_pending() {
            Event::Sleep { deadline } => assert!(deadline >= before + Duration::from_secs(5)),
            other => panic!("expected Sleep, got {}", other.label()),
        }
    }

    #[test]
    fn an_injected_exception_surfaces_at_the_suspension_point() {
        let slot = FiberSlot::new();
        let mut future: BoxedFiberFuture = Box::pin(async {
            null().await?;
            Ok(())
        });

        poll_once(FiberId(0), &slot, future.as_mut());
        slot.take_pending();

        slot.set_resume(Err(SchedulerError::Cancelled));
        let poll = poll_once(FiberId(0), &slot, future.as_mut());
        assert!(matches!(poll, Poll::Ready(Err(SchedulerError::Cancelled))));
    }

    #[test]
    #[should_panic(expected = "suspended without yielding an event")]
    fn take_pending_panics_if_nothing_was_registered() {
        let slot = FiberSlot::new();
        slot.take_pending();
    }
}

//! The scheduler: a single-threaded event loop that multiplexes many
//! fibers over one OS thread.
//!
//! Each turn runs the same four steps: drain every fiber whose pending
//! event can be serviced without waiting (spawns, nulls, kills,
//! already-terminated joins, ...), check whether the root fiber has
//! terminated, compute how long the next readiness wait may block for
//! (the earliest sleep deadline, or indefinitely if nothing is
//! sleeping), then wait and fire whatever became ready.

use std::cell::RefCell;
use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::rc::Rc;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use crate::config::SchedulerConfig;
use crate::error::{Result, SchedulerError};
use crate::event::{BoxedFiberFuture, Event, FiberId};
use crate::fiber::{poll_with_context, FiberSlot};
use crate::value::Value;

type Terminal = std::result::Result<Option<Rc<dyn std::any::Any>>, SchedulerError>;

struct FiberEntry {
    future: BoxedFiberFuture,
    slot: Rc<FiberSlot>,
    pending: Event,
    delegated_by: Option<FiberId>,
    cancel_requested: bool,
}

/// Runs `root` to completion using the default configuration. See
/// [`run_with_config`] to customize socket backlog, read chunk size, or
/// the immediate-drain pass limit.
pub fn run<Fut>(root: Fut) -> Result<()>
where
    Fut: std::future::Future<Output = Result<()>> + 'static,
{
    run_with_config(root, SchedulerConfig::default())
}

/// Runs `root` to completion. Every other fiber is reachable only by
/// `root` spawning or delegating to it, directly or transitively.
///
/// On return, every fiber has terminated: successful ones normally,
/// any still running at the time `root` finished are cancelled, and
/// every socket they held is closed. If `root` itself failed, that
/// failure is re-raised here with the same kind and message it
/// originally carried.
pub fn run_with_config<Fut>(root: Fut, config: SchedulerConfig) -> Result<()>
where
    Fut: std::future::Future<Output = Result<()>> + 'static,
{
    let span = tracing::info_span!("scheduler::run");
    let _enter = span.enter();

    crate::config::with_current(config.clone(), move || {
        let mut scheduler = Scheduler::new(config);
        let root_id = scheduler.register(Box::pin(root), None);
        scheduler.root = Some(root_id);
        scheduler.drive()
    })
}

pub(crate) struct Scheduler {
    config: SchedulerConfig,
    table: HashMap<FiberId, FiberEntry>,
    terminated: HashMap<FiberId, Terminal>,
    next_id: u64,
    root: Option<FiberId>,
    root_outcome: Option<Result<()>>,
}

impl Scheduler {
    fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            table: HashMap::new(),
            terminated: HashMap::new(),
            next_id: 0,
            root: None,
            root_outcome: None,
        }
    }

    fn alloc_id(&mut self) -> FiberId {
        let id = FiberId(self.next_id);
        self.next_id += 1;
        id
    }

    fn register(&mut self, future: BoxedFiberFuture, delegated_by: Option<FiberId>) -> FiberId {
        let id = self.alloc_id();
        debug!(fiber = %id, delegated_by = ?delegated_by, "fiber registered");
        self.table.insert(
            id,
            FiberEntry {
                future,
                slot: FiberSlot::new(),
                pending: Event::Null,
                delegated_by,
                cancel_requested: false,
            },
        );
        id
    }

    /// Runs the full turn loop until the root fiber terminates, then
    /// tears down whatever is left.
    fn drive(&mut self) -> Result<()> {
        loop {
            self.drain_immediate();

            if self.root_outcome.is_some() {
                break;
            }

            let timeout = self.next_timeout();
            let (read_fds, write_fds) = self.collect_io_fds();

            trace!(
                readers = read_fds.len(),
                writers = write_fds.len(),
                ?timeout,
                "entering readiness wait"
            );

            match crate::readiness::wait(&read_fds, &write_fds, timeout) {
                Ok((ready_read, ready_write)) => {
                    self.fire_ready(&ready_read, &ready_write);
                    self.wake_expired_sleepers();
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {
                    if let Some(root_id) = self.root {
                        warn!(fiber = %root_id, "readiness wait interrupted by signal, injecting into root");
                        self.advance(root_id, Err(SchedulerError::Interrupted));
                    }
                    continue;
                }
                Err(e) => return Err(SchedulerError::from(e)),
            }
        }

        self.teardown();
        self.root_outcome
            .take()
            .expect("drive loop only breaks once root_outcome is set")
    }

    /// Repeatedly services every fiber whose pending event needs no
    /// wait (Null, Spawn, Delegate registration, Kill, End, and any
    /// Join whose target has already terminated) until none remain.
    fn drain_immediate(&mut self) {
        let mut passes = 0usize;
        loop {
            if let Some(limit) = self.config.max_immediate_drain_passes {
                if passes >= limit {
                    break;
                }
            }
            passes += 1;

            let ready: Vec<FiberId> = self
                .table
                .iter()
                .filter(|(_, entry)| self.is_immediate(&entry.pending))
                .map(|(id, _)| *id)
                .collect();

            if ready.is_empty() {
                break;
            }

            for id in ready {
                if self.root_outcome.is_some() {
                    return;
                }
                self.service_immediate(id);
            }
        }
    }

    fn is_immediate(&self, event: &Event) -> bool {
        match event {
            Event::Null | Event::Spawn(_) | Event::Delegate(_) | Event::Kill { .. } | Event::End(_) => true,
            Event::Join { target } => self.terminated.contains_key(target),
            Event::AwaitingChild(_)
            | Event::Sleep { .. }
            | Event::Readable { .. }
            | Event::Writable { .. }
            | Event::Accept { .. }
            | Event::Connect { .. }
            | Event::ExceptionInject(_) => false,
        }
    }

    fn service_immediate(&mut self, id: FiberId) {
        let Some(entry) = self.table.get_mut(&id) else { return };
        let pending = std::mem::replace(&mut entry.pending, Event::Null);
        trace!(fiber = %id, event = pending.label(), "servicing immediate event");

        match pending {
            Event::Null => {
                self.advance(id, Ok(Value::Unit));
            }
            Event::Spawn(future) => {
                let child_id = self.register(future, None);
                self.advance(id, Ok(Value::Fiber(child_id)));
            }
            Event::Delegate(future) => {
                let child_id = self.register(future, Some(id));
                if let Some(entry) = self.table.get_mut(&id) {
                    entry.pending = Event::AwaitingChild(child_id);
                }
            }
            Event::Kill { target } => {
                self.advance(id, Ok(Value::Unit));
                self.service_kill(target);
            }
            Event::End(payload) => {
                self.terminate(id, Ok(Some(payload)));
            }
            Event::Join { target } => {
                let outcome = self
                    .terminated
                    .get(&target)
                    .cloned()
                    .expect("is_immediate guaranteed this join's target already terminated");
                self.resume_with_terminal(id, outcome);
            }
            other => {
                if let Some(entry) = self.table.get_mut(&id) {
                    entry.pending = other;
                }
            }
        }
    }

    fn service_kill(&mut self, target: FiberId) {
        let Some(entry) = self.table.get_mut(&target) else { return };
        if entry.cancel_requested {
            warn!(fiber = %target, "forcing termination after repeated kill");
            self.terminate(target, Err(SchedulerError::Cancelled));
            return;
        }
        entry.cancel_requested = true;
        warn!(fiber = %target, "injecting cancellation");
        self.advance(target, Err(SchedulerError::Cancelled));
    }

    /// Resumes `id` with `input`, driving its future until it next
    /// suspends or terminates.
    fn advance(&mut self, id: FiberId, input: Result<Value>) {
        let Some(entry) = self.table.get_mut(&id) else { return };
        entry.slot.set_resume(input);
        let slot = entry.slot.clone();
        let poll = poll_with_context(id, &slot, entry.future.as_mut());

        match poll {
            std::task::Poll::Pending => {
                let event = slot.take_pending();
                if let Some(entry) = self.table.get_mut(&id) {
                    entry.pending = event;
                }
            }
            std::task::Poll::Ready(result) => {
                self.terminate(id, result.map(|()| None));
            }
        }
    }

    fn resume_with_terminal(&mut self, id: FiberId, outcome: Terminal) {
        match outcome {
            Ok(v) => self.advance(id, Ok(Value::Terminal(v))),
            Err(e) => self.advance(id, Err(e)),
        }
    }

    /// Finalizes `id` with `outcome`, notifying its delegator (if any)
    /// or the root if it is an unhandled spawn failure. Any fiber parked
    /// on `Join { target: id }` picks up `outcome` on the next
    /// `drain_immediate` pass, once `is_immediate` sees `id` in
    /// `self.terminated` (there is no separate waiter list to notify
    /// here). The fiber's future is dropped here, which is what runs any
    /// finalization scopes it had open at the time.
    fn terminate(&mut self, id: FiberId, outcome: Terminal) {
        let Some(entry) = self.table.remove(&id) else { return };
        drop(entry.future);

        match &outcome {
            Ok(_) => debug!(fiber = %id, "fiber finished"),
            Err(e) if e.is_cancellation() => debug!(fiber = %id, "fiber cancelled"),
            Err(e) => warn!(fiber = %id, error = %e, "fiber failed"),
        }

        self.terminated.insert(id, outcome.clone());

        if let Some(parent) = entry.delegated_by {
            self.resume_with_terminal(parent, outcome.clone());
            return;
        }

        if Some(id) == self.root {
            self.root_outcome = Some(outcome.map(|_| ()));
            return;
        }

        if let Err(e) = outcome {
            if !e.is_cancellation() {
                self.inject_into_root(e);
            }
        }
    }

    fn inject_into_root(&mut self, error: SchedulerError) {
        let Some(root_id) = self.root else { return };
        warn!(fiber = %root_id, error = %error, "injecting unhandled fiber failure into root");
        let wrapped = SchedulerError::FiberFailure(error.into_shared());
        self.advance(root_id, Err(wrapped));
    }

    fn next_timeout(&self) -> Option<Duration> {
        let now = Instant::now();
        self.table
            .values()
            .filter_map(|entry| match entry.pending {
                Event::Sleep { deadline } => Some(deadline.saturating_duration_since(now)),
                _ => None,
            })
            .min()
    }

    fn collect_io_fds(&self) -> (Vec<RawFd>, Vec<RawFd>) {
        let mut read_fds = Vec::new();
        let mut write_fds = Vec::new();
        for entry in self.table.values() {
            match &entry.pending {
                Event::Readable { conn, .. } => read_fds.push(conn.as_raw_fd()),
                Event::Accept { listener } => read_fds.push(listener.as_raw_fd()),
                Event::Writable { conn, .. } => write_fds.push(conn.as_raw_fd()),
                Event::Connect { socket } => {
                    write_fds.push(std::os::unix::io::AsRawFd::as_raw_fd(&*socket.borrow()))
                }
                _ => {}
            }
        }
        (read_fds, write_fds)
    }

    fn wake_expired_sleepers(&mut self) {
        let now = Instant::now();
        let expired: Vec<FiberId> = self
            .table
            .iter()
            .filter_map(|(id, entry)| match entry.pending {
                Event::Sleep { deadline } if deadline <= now => Some(*id),
                _ => None,
            })
            .collect();
        for id in expired {
            trace!(fiber = %id, "sleep expired");
            self.advance(id, Ok(Value::Unit));
        }
    }

    fn fire_ready(&mut self, ready_read: &[RawFd], ready_write: &[RawFd]) {
        let readers: Vec<FiberId> = self
            .table
            .iter()
            .filter(|(_, e)| matches!(&e.pending, Event::Readable { conn, .. } if ready_read.contains(&conn.as_raw_fd())))
            .map(|(id, _)| *id)
            .collect();
        let accepters: Vec<FiberId> = self
            .table
            .iter()
            .filter(|(_, e)| matches!(&e.pending, Event::Accept { listener } if ready_read.contains(&listener.as_raw_fd())))
            .map(|(id, _)| *id)
            .collect();
        let writers: Vec<FiberId> = self
            .table
            .iter()
            .filter(|(_, e)| matches!(&e.pending, Event::Writable { conn, .. } if ready_write.contains(&conn.as_raw_fd())))
            .map(|(id, _)| *id)
            .collect();
        let connecters: Vec<FiberId> = self
            .table
            .iter()
            .filter(|(_, e)| {
                matches!(&e.pending, Event::Connect { socket }
                    if ready_write.contains(&std::os::unix::io::AsRawFd::as_raw_fd(&*socket.borrow())))
            })
            .map(|(id, _)| *id)
            .collect();

        for id in readers {
            self.fire_readable(id);
        }
        for id in accepters {
            self.fire_accept(id);
        }
        for id in writers {
            self.fire_writable(id);
        }
        for id in connecters {
            self.fire_connect(id);
        }
    }

    fn fire_readable(&mut self, id: FiberId) {
        let Some(entry) = self.table.get_mut(&id) else { return };
        let Event::Readable { conn, bufsize } = std::mem::replace(&mut entry.pending, Event::Null) else {
            unreachable!()
        };
        match conn.read_into(bufsize) {
            Ok(bytes) => self.advance(id, Ok(Value::Bytes(bytes))),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                if let Some(entry) = self.table.get_mut(&id) {
                    entry.pending = Event::Readable { conn, bufsize };
                }
            }
            Err(e) => self.advance(id, Err(SchedulerError::from(e))),
        }
    }

    fn fire_accept(&mut self, id: FiberId) {
        let Some(entry) = self.table.get_mut(&id) else { return };
        let Event::Accept { listener } = std::mem::replace(&mut entry.pending, Event::Null) else {
            unreachable!()
        };
        match listener.try_accept() {
            Ok((stream, peer)) => {
                if let Err(e) = stream.set_nonblocking(true) {
                    self.advance(id, Err(SchedulerError::from(e)));
                    return;
                }
                let conn = crate::socket::Connection::new(stream, peer);
                self.advance(id, Ok(Value::Connection(conn)));
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                if let Some(entry) = self.table.get_mut(&id) {
                    entry.pending = Event::Accept { listener };
                }
            }
            Err(e) => self.advance(id, Err(SchedulerError::from(e))),
        }
    }

    fn fire_writable(&mut self, id: FiberId) {
        let Some(entry) = self.table.get_mut(&id) else { return };
        let Event::Writable { conn, data, sendall } = std::mem::replace(&mut entry.pending, Event::Null) else {
            unreachable!()
        };
        match conn.write_some(&data) {
            Ok(n) if !sendall => self.advance(id, Ok(Value::Count(n))),
            Ok(n) if n == data.len() => self.advance(id, Ok(Value::Unit)),
            Ok(n) => {
                if let Some(entry) = self.table.get_mut(&id) {
                    entry.pending = Event::Writable {
                        conn,
                        data: data.slice(n..),
                        sendall,
                    };
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                if let Some(entry) = self.table.get_mut(&id) {
                    entry.pending = Event::Writable { conn, data, sendall };
                }
            }
            Err(e) => self.advance(id, Err(SchedulerError::from(e))),
        }
    }

    fn fire_connect(&mut self, id: FiberId) {
        let Some(entry) = self.table.get_mut(&id) else { return };
        let Event::Connect { socket } = std::mem::replace(&mut entry.pending, Event::Null) else {
            unreachable!()
        };
        let error = socket.borrow().take_error();
        match error {
            Ok(None) => {
                let raw = match Rc::try_unwrap(socket) {
                    Ok(cell) => cell.into_inner(),
                    Err(_) => {
                        self.advance(
                            id,
                            Err(SchedulerError::from(std::io::Error::new(
                                std::io::ErrorKind::Other,
                                "connecting socket unexpectedly shared",
                            ))),
                        );
                        return;
                    }
                };
                let stream: std::net::TcpStream = raw.into();
                match stream.peer_addr() {
                    Ok(peer) => {
                        let conn = crate::socket::Connection::new(stream, peer);
                        self.advance(id, Ok(Value::Connection(conn)));
                    }
                    Err(e) => self.advance(id, Err(SchedulerError::from(e))),
                }
            }
            Ok(Some(e)) => self.advance(id, Err(SchedulerError::from(e))),
            Err(e) => self.advance(id, Err(SchedulerError::from(e))),
        }
    }

    /// Cancels whatever is still running once the root has terminated.
    /// Dropping each remaining future runs its finalization scopes and
    /// closes whatever sockets it held; nothing is polled again.
    fn teardown(&mut self) {
        let remaining: Vec<FiberId> = self.table.keys().copied().collect();
        for id in remaining {
            if let Some(entry) = self.table.remove(&id) {
                warn!(fiber = %id, "tearing down fiber still running at scheduler shutdown");
                drop(entry.future);
            }
        }
    }
}

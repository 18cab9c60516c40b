//! Component G: the convenience layer on top of `skein-core`'s scheduler.
//!
//! `skein-core` gives fiber bodies the primitive event constructors
//! (`null`, `sleep`, `spawn`, `delegate`, `join`, `kill`, `end`) and the
//! raw `Connection`/`Listener` socket wrappers. This crate adds the
//! handful of things every caller ends up writing on top of those: a
//! `connect` wrapper that skips the `Connection::connect` associated-fn
//! spelling, and `server`, which turns "accept in a loop, spawn a
//! handler per connection" into one call.
//!
//! Everything here is a thin fiber body itself; there is no additional
//! state the scheduler doesn't already track. See `examples/` for
//! runnable uses of each helper; those examples (and this crate's
//! integration tests) are explicitly outside the scheduler's own tested
//! surface, matching the source lineage's own example-suite role.

pub mod dev_tracing;

pub use skein_core::{
    delegate, delegate_unit, end, join, join_value, kill, null, run, run_with_config, sleep,
    spawn, Connection, FiberId, Listener, Result, SchedulerConfig, SchedulerError,
};

use std::future::Future;

/// Resolves and dials `host:port`, suspending the caller until the
/// connection completes or fails to connect.
pub async fn connect(host: &str, port: u16) -> Result<Connection> {
    Connection::connect(host, port).await
}

/// Runs `finalize` exactly once, when the guard is dropped: the
/// `defer`-style cleanup this codebase uses everywhere a fiber needs a
/// socket closed on every terminal path (normal return, `?`-propagated
/// error, or cancellation), none of which is a `try/finally` in Rust.
struct Defer<F: FnMut()>(Option<F>);

fn defer<F: FnMut()>(finalize: F) -> Defer<F> {
    Defer(Some(finalize))
}

impl<F: FnMut()> Drop for Defer<F> {
    fn drop(&mut self) {
        if let Some(mut finalize) = self.0.take() {
            finalize();
        }
    }
}

/// Opens a [`Listener`] on `host:port` and, forever, accepts a
/// connection and spawns `handler(conn)` to run independently.
///
/// `handler`'s fiber closes `conn` in a finalization scope regardless of
/// how it returns, so callers never need to remember to. Cancelling the
/// `server` fiber itself (directly via [`kill`], or because the root
/// fiber is tearing down) closes the listener before the cancellation
/// propagates out of this call; no new connections are accepted after
/// that point, though handlers already spawned keep running
/// independently until the scheduler cancels them too.
pub async fn server<H, Fut>(host: &str, port: u16, handler: H) -> Result<()>
where
    H: Fn(Connection) -> Fut + Clone + 'static,
    Fut: Future<Output = Result<()>> + 'static,
{
    let listener = Listener::bind(host, port, 128)?;
    let _close_on_exit = defer({
        let listener = listener.clone();
        move || listener.close()
    });

    loop {
        let conn = listener.accept().await?;
        let handler = handler.clone();
        spawn(async move {
            let _close_conn = defer({
                let conn = conn.clone();
                move || conn.close()
            });
            handler(conn).await
        })
        .await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn defer_runs_once_on_drop() {
        let count = Rc::new(Cell::new(0));
        {
            let count = count.clone();
            let _guard = defer(move || count.set(count.get() + 1));
        }
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn defer_runs_on_unwind_too() {
        let count = Rc::new(Cell::new(0));
        let counted = count.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = defer(move || counted.set(counted.get() + 1));
            panic!("boom");
        }));
        assert!(result.is_err());
        assert_eq!(count.get(), 1);
    }
}

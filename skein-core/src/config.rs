//! Scheduler configuration.
//!
//! Kept deliberately small: the scheduler has few externally tunable
//! knobs, and the ones it has follow the same builder-style `with_*`
//! pattern used elsewhere in this codebase for per-socket options.

/// Tunables for a [`crate::scheduler::Scheduler`].
///
/// Constructed with [`SchedulerConfig::default`] and customized with the
/// `with_*` methods, mirroring the options-builder pattern used for
/// per-connection settings elsewhere in this crate.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Backlog passed to `listen(2)` for every [`crate::socket::Listener`]
    /// bound while this scheduler is running.
    pub(crate) listen_backlog: i32,

    /// Default chunk size used by `recv`-without-an-explicit-size and by
    /// `readline`'s internal fill loop.
    pub(crate) read_buf_size: usize,

    /// Upper bound on how many consecutive immediate-event drain passes
    /// the scheduler will run in a single turn before forcing a
    /// readiness wait. `None` means unbounded (drain until dry).
    ///
    /// This exists purely as a safety valve against a pathological chain
    /// of fibers that keep yielding more immediate work forever; it is
    /// not needed for any of the scenarios this crate ships with.
    pub(crate) max_immediate_drain_passes: Option<usize>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            listen_backlog: 128,
            read_buf_size: 4096,
            max_immediate_drain_passes: None,
        }
    }
}

thread_local! {
    static CURRENT: std::cell::RefCell<SchedulerConfig> = std::cell::RefCell::new(SchedulerConfig::default());
}

/// The config of whichever scheduler is currently running on this
/// thread. Socket wrappers read this for knobs (like `read_buf_size`)
/// that are set once at `run_with_config` time rather than threaded
/// through every call site.
pub(crate) fn current() -> SchedulerConfig {
    CURRENT.with(|c| c.borrow().clone())
}

/// Installs `config` as the current thread's scheduler config for the
/// duration of `f`, restoring whatever was installed before on return
/// (so a scheduler run nested inside a test fixture, or inside another
/// fiber's own `run`, doesn't leak its config to the outer one).
pub(crate) fn with_current<R>(config: SchedulerConfig, f: impl FnOnce() -> R) -> R {
    let previous = CURRENT.with(|c| c.replace(config));
    let result = f();
    CURRENT.with(|c| *c.borrow_mut() = previous);
    result
}

impl SchedulerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_listen_backlog(mut self, backlog: i32) -> Self {
        self.listen_backlog = backlog;
        self
    }

    pub fn with_read_buf_size(mut self, size: usize) -> Self {
        self.read_buf_size = size;
        self
    }

    pub fn with_max_immediate_drain_passes(mut self, passes: Option<usize>) -> Self {
        self.max_immediate_drain_passes = passes;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_conservative() {
        let cfg = SchedulerConfig::default();
        assert_eq!(cfg.listen_backlog, 128);
        assert_eq!(cfg.read_buf_size, 4096);
        assert_eq!(cfg.max_immediate_drain_passes, None);
    }

    #[test]
    fn builder_methods_chain_and_override_defaults() {
        let cfg = SchedulerConfig::new()
            .with_listen_backlog(16)
            .with_read_buf_size(256)
            .with_max_immediate_drain_passes(Some(64));
        assert_eq!(cfg.listen_backlog, 16);
        assert_eq!(cfg.read_buf_size, 256);
        assert_eq!(cfg.max_immediate_drain_passes, Some(64));
    }
}

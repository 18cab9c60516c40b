//! `skein-core`: a single-threaded, cooperative scheduler for fiber-style
//! network I/O.
//!
//! A *fiber* is an `async fn` whose body suspends only by awaiting one of
//! the free functions in this crate (`null`, `sleep`, `spawn`, `delegate`,
//! `join`, `kill`, `end`, or a [`Connection`]/[`Listener`] operation).
//! [`scheduler::run`] drives a root fiber and everything it transitively
//! spawns or delegates to, multiplexing them over one OS thread with a
//! single readiness wait per turn: the four steps described in
//! [`scheduler`]'s module documentation, repeated forever until the root
//! fiber terminates.
//!
//! This crate is the scheduler only (Components A-F plus the error/config/
//! logging ambient stack). The convenience helpers in `skein` (`server`,
//! a tracing initializer, and the runnable demos) build on top of the
//! free functions re-exported here.

mod config;
mod error;
mod event;
mod fiber;
mod readiness;
mod scheduler;
mod socket;
mod value;

pub use config::SchedulerConfig;
pub use error::{Result, SchedulerError};
pub use event::FiberId;
pub use fiber::{delegate, delegate_unit, end, join, join_value, kill, null, sleep, spawn};
pub use scheduler::{run, run_with_config};
pub use socket::{Connection, Listener};

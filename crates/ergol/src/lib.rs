//! # ergol
//!
//! Development reloader for long-running programs.
//!
//! Runs a script as a child process, watches its files, and restarts it
//! whenever something changes, a `SIGUSR1` arrives, or on demand.
//! Restarts are graceful: the child gets `SIGTERM` first and is only
//! `SIGKILL`ed once the configured kill delay runs out.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use ergol::{OsLauncher, ReloadTarget, SignalSource, WatchSource};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let target = ReloadTarget {
//!     script: "server.js".into(),
//!     interpreter: Some("node".into()),
//!     watch: vec!["lib".into()],
//!     ..ReloadTarget::default()
//! };
//!
//! let (_watcher, events) = WatchSource::spawn(&target).unwrap();
//! let signals = SignalSource::new().unwrap();
//! let shutdown = ergol::run(target, Arc::new(OsLauncher), events, signals)
//!     .await
//!     .unwrap();
//! std::process::exit(shutdown.exit_code());
//! # }
//! ```

pub mod config;
pub mod controller;
pub mod process;
pub mod runner;
pub mod signals;
pub mod types;
pub mod watch;

#[cfg(test)]
mod testing;

pub use config::{ConfigError, ReloadTarget};
pub use controller::Controller;
pub use process::{Launcher, OsLauncher, ProcessError, ProcessHandle};
pub use runner::{run, RunError, Shutdown};
pub use signals::{SignalSource, SignalStream};
pub use types::*;
pub use watch::{WatchError, WatchEvent, WatchSource};

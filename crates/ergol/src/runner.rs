//! Event wiring: watch and signal sources in, controller actions out.
//!
//! A dispatch loop classifies every incoming event without ever blocking on
//! the child. Restart cycles (stop, then start) are queued to one worker
//! task, so two cycles never interleave: each `stop` has fully finished
//! before its `start` runs, and the next cycle only begins after that.
//!
//! A file change is dropped while a change-triggered cycle is queued or in
//! flight, so a burst of changes costs a single restart.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::config::ReloadTarget;
use crate::controller::Controller;
use crate::process::Launcher;
use crate::signals::SignalStream;
use crate::types::{ControlSignal, SupervisorState};
use crate::watch::{WatchError, WatchEvent, EXHAUSTION_HINT};

#[derive(Debug, thiserror::Error)]
pub enum RunError {
	#[error("file watcher failed: {0}")]
	Watch(WatchError),
	#[error("restart worker is gone, cannot restart the process")]
	WorkerGone,
}

/// Why the supervisor stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
	/// `SIGINT`/`SIGTERM` received and forwarded to the child.
	Signalled(ControlSignal),
	/// The OS ran out of file watches; the child was stopped gracefully.
	WatcherExhausted,
	/// Both event sources closed; the child was stopped gracefully.
	SourcesClosed,
}

impl Shutdown {
	pub fn exit_code(&self) -> i32 {
		match self {
			Shutdown::Signalled(_) | Shutdown::SourcesClosed => 0,
			Shutdown::WatcherExhausted => 1,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RestartCause {
	Change,
	Reload,
}

fn queue_restart(tx: &UnboundedSender<RestartCause>, cause: RestartCause) -> Result<(), RunError> {
	tx.send(cause).map_err(|_| {
		tracing::error!(?cause, "restart request lost: worker is gone");
		RunError::WorkerGone
	})
}

/// Start the child and supervise it until shutdown.
pub async fn run<S: SignalStream>(
	target: ReloadTarget,
	launcher: Arc<dyn Launcher>,
	watch_events: UnboundedReceiver<WatchEvent>,
	signals: S,
) -> Result<Shutdown, RunError> {
	let controller = Controller::new(target, launcher);
	supervise(controller, watch_events, signals).await
}

/// Like [`run`], for a controller the caller keeps a handle on.
pub async fn supervise<S: SignalStream>(
	controller: Arc<Controller>,
	mut watch_events: UnboundedReceiver<WatchEvent>,
	mut signals: S,
) -> Result<Shutdown, RunError> {
	let change_pending = Arc::new(AtomicBool::new(false));
	let (restart_tx, restart_rx) = mpsc::unbounded_channel();
	let worker = tokio::spawn(restart_worker(
		Arc::clone(&controller),
		restart_rx,
		Arc::clone(&change_pending),
	));

	controller.start();

	let mut exhaustion_reported = false;
	let mut watch_open = true;
	let mut signals_open = true;

	let outcome = loop {
		tokio::select! {
			event = watch_events.recv(), if watch_open => match event {
				Some(WatchEvent::Changed(path)) => {
					if controller.state() == SupervisorState::Stopping
						|| change_pending.swap(true, Ordering::SeqCst)
					{
						tracing::debug!("change on {} ignored: restart already in flight", path.display());
						continue;
					}
					tracing::info!(
						"change detected on {}. Reloading...",
						controller.target().display_path(&path)
					);
					if let Err(e) = queue_restart(&restart_tx, RestartCause::Change) {
						break Err(e);
					}
				}
				Some(WatchEvent::Error(err)) if err.is_exhausted() => {
					if exhaustion_reported {
						continue;
					}
					exhaustion_reported = true;
					tracing::error!("{}", err);
					for line in EXHAUSTION_HINT {
						tracing::error!("{}", line);
					}

					controller.close();
					drop(restart_tx);
					let _ = worker.await;
					controller.stop().await;
					return Ok(Shutdown::WatcherExhausted);
				}
				Some(WatchEvent::Error(err)) => break Err(RunError::Watch(err)),
				None => {
					tracing::debug!("watch source closed");
					watch_open = false;
				}
			},
			signal = signals.recv(), if signals_open => match signal {
				Some(ControlSignal::Reload) => {
					tracing::info!("caught signal {}. Restarting...", ControlSignal::Reload);
					if let Err(e) = queue_restart(&restart_tx, RestartCause::Reload) {
						break Err(e);
					}
				}
				Some(signal) => {
					controller.close();
					controller.forward(signal);
					break Ok(Shutdown::Signalled(signal));
				}
				None => {
					tracing::debug!("signal source closed");
					signals_open = false;
				}
			},
			else => {
				controller.close();
				drop(restart_tx);
				let _ = worker.await;
				controller.stop().await;
				return Ok(Shutdown::SourcesClosed);
			}
		}
	};

	worker.abort();
	outcome
}

async fn restart_worker(
	controller: Arc<Controller>,
	mut requests: UnboundedReceiver<RestartCause>,
	change_pending: Arc<AtomicBool>,
) {
	while let Some(cause) = requests.recv().await {
		if controller.is_closed() {
			break;
		}
		tracing::debug!(?cause, "restart cycle");
		controller.restart().await;
		if cause == RestartCause::Change {
			change_pending.store(false, Ordering::SeqCst);
		}
	}
}

use std::path::PathBuf;
use std::time::Duration;

use nix::errno::Errno;
use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::Instant;

use crate::config::ReloadTarget;

/// Printed once when the OS runs out of file watches.
pub const EXHAUSTION_HINT: &[&str] = &[
	"  Your system does not have enough file watchers to run ergol.",
	"  You need to increase this number:",
	"    - Linux: \"sudo sysctl -w fs.inotify.max_user_watches=524288\"",
	"    - OSX: \"sudo sysctl -w kern.maxfiles=524288\"",
	"  Or you can just search \"increase system file watcher <your os>\"",
];

#[derive(Debug, Clone)]
pub enum WatchEvent {
	Changed(PathBuf),
	Error(WatchError),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WatchError {
	#[error("not enough file watchers (ENOSPC): {0}")]
	Exhausted(String),
	#[error("{0}")]
	Other(String),
}

impl WatchError {
	pub fn is_exhausted(&self) -> bool {
		matches!(self, WatchError::Exhausted(_))
	}

	pub fn classify(err: &notify::Error) -> Self {
		let message = err.to_string();
		let exhausted = match &err.kind {
			notify::ErrorKind::MaxFilesWatch => true,
			notify::ErrorKind::Io(io) => io.raw_os_error() == Some(Errno::ENOSPC as i32),
			_ => false,
		};
		if exhausted {
			WatchError::Exhausted(message)
		} else {
			Self::from_message(message)
		}
	}

	pub fn from_message(message: impl Into<String>) -> Self {
		let message = message.into();
		if message.contains("ENOSPC") || message.contains("No space left on device") {
			WatchError::Exhausted(message)
		} else {
			WatchError::Other(message)
		}
	}
}

/// Keeps the OS watcher alive; dropping it closes the event stream.
pub struct WatchSource {
	_watcher: RecommendedWatcher,
}

impl WatchSource {
	/// Watch the script and every watch directory of `target`.
	///
	/// Registration failures are delivered on the returned stream rather than
	/// returned, so they take the same path as errors reported later. Paths
	/// that do not exist are skipped with a warning.
	pub fn spawn(target: &ReloadTarget) -> Result<(Self, UnboundedReceiver<WatchEvent>), WatchError> {
		let (raw_tx, raw_rx) = mpsc::unbounded_channel();
		let mut watcher = RecommendedWatcher::new(
			move |res: notify::Result<Event>| {
				let _ = raw_tx.send(res);
			},
			notify::Config::default(),
		)
		.map_err(|e| WatchError::classify(&e))?;

		let (tx, rx) = mpsc::unbounded_channel();
		let script = target.script_path();
		for path in target.watch_paths() {
			let mode = if path == script {
				RecursiveMode::NonRecursive
			} else {
				RecursiveMode::Recursive
			};
			match watcher.watch(&path, mode) {
				Ok(()) => tracing::debug!("watching {}", path.display()),
				Err(e) if matches!(e.kind, notify::ErrorKind::PathNotFound) => {
					tracing::warn!("not watching {}: path not found", path.display())
				}
				Err(e) => {
					let _ = tx.send(WatchEvent::Error(WatchError::classify(&e)));
				}
			}
		}

		tokio::spawn(forward_events(raw_rx, tx, target.debounce()));
		Ok((Self { _watcher: watcher }, rx))
	}
}

/// Turns raw notify results into [`WatchEvent`]s. After a change, further
/// changes are swallowed for `debounce` and a single event is emitted for
/// the first path. Errors are never delayed.
pub(crate) async fn forward_events(
	mut raw: UnboundedReceiver<notify::Result<Event>>,
	tx: UnboundedSender<WatchEvent>,
	debounce: Duration,
) {
	while let Some(res) = raw.recv().await {
		let event = match res {
			Ok(event) => event,
			Err(e) => {
				if tx.send(WatchEvent::Error(WatchError::classify(&e))).is_err() {
					return;
				}
				continue;
			}
		};
		let Some(path) = changed_path(&event) else {
			continue;
		};

		if !debounce.is_zero() {
			let deadline = Instant::now() + debounce;
			while let Ok(Some(res)) = tokio::time::timeout_at(deadline, raw.recv()).await {
				if let Err(e) = res {
					if tx.send(WatchEvent::Error(WatchError::classify(&e))).is_err() {
						return;
					}
				}
			}
		}

		if tx.send(WatchEvent::Changed(path)).is_err() {
			return;
		}
	}
}

/// Content, name and creation events count; access and metadata-only
/// events do not.
fn changed_path(event: &Event) -> Option<PathBuf> {
	let relevant = match event.kind {
		EventKind::Create(_) => true,
		EventKind::Modify(ModifyKind::Metadata(_)) => false,
		EventKind::Modify(_) => true,
		_ => false,
	};
	if relevant {
		event.paths.first().cloned()
	} else {
		None
	}
}

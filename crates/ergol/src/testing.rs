//! In-memory launcher for exercising the state machine without real processes.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use nix::sys::signal::Signal;
use tokio::sync::watch;

use crate::config::ReloadTarget;
use crate::process::{Launcher, ProcessError, ProcessHandle};
use crate::types::ExitReason;

struct Shared {
	tx: watch::Sender<Option<ExitReason>>,
	alive: Arc<AtomicUsize>,
}

impl Shared {
	fn finish(&self, reason: ExitReason) {
		let changed = self.tx.send_if_modified(|current| {
			if current.is_none() {
				*current = Some(reason);
				true
			} else {
				false
			}
		});
		if changed {
			self.alive.fetch_sub(1, Ordering::SeqCst);
		}
	}
}

/// Exits `term_delay` after a `SIGTERM`, or ignores it when `None`.
/// `SIGKILL` always takes it down immediately.
pub struct FakeChild {
	term_delay: Option<Duration>,
	shared: Arc<Shared>,
	rx: watch::Receiver<Option<ExitReason>>,
	signals: Mutex<Vec<Signal>>,
}

impl FakeChild {
	pub fn exit(&self, reason: ExitReason) {
		self.shared.finish(reason);
	}

	pub fn sent(&self, signal: Signal) -> usize {
		self.signals.lock().unwrap().iter().filter(|s| **s == signal).count()
	}
}

impl ProcessHandle for FakeChild {
	fn id(&self) -> Option<u32> {
		Some(4242)
	}

	fn signal(&self, signal: Signal) -> Result<(), ProcessError> {
		self.signals.lock().unwrap().push(signal);
		match (signal, self.term_delay) {
			(Signal::SIGKILL, _) => self.exit(ExitReason::Signal(Signal::SIGKILL as i32)),
			(Signal::SIGTERM, Some(delay)) => {
				let shared = Arc::clone(&self.shared);
				tokio::spawn(async move {
					tokio::time::sleep(delay).await;
					shared.finish(ExitReason::Signal(Signal::SIGTERM as i32));
				});
			}
			_ => {}
		}
		Ok(())
	}

	fn exit_watch(&self) -> watch::Receiver<Option<ExitReason>> {
		self.rx.clone()
	}
}

pub struct FakeLauncher {
	term_delay: Option<Duration>,
	alive: Arc<AtomicUsize>,
	max_alive: AtomicUsize,
	children: Mutex<Vec<Arc<FakeChild>>>,
}

impl FakeLauncher {
	pub fn new(term_delay: Option<Duration>) -> Arc<Self> {
		Arc::new(Self {
			term_delay,
			alive: Arc::new(AtomicUsize::new(0)),
			max_alive: AtomicUsize::new(0),
			children: Mutex::new(Vec::new()),
		})
	}

	pub fn launched(&self) -> usize {
		self.children.lock().unwrap().len()
	}

	/// Highest number of children ever alive at once.
	pub fn max_alive(&self) -> usize {
		self.max_alive.load(Ordering::SeqCst)
	}

	pub fn last(&self) -> Arc<FakeChild> {
		self.children.lock().unwrap().last().cloned().expect("nothing launched")
	}
}

impl Launcher for FakeLauncher {
	fn launch(&self, _target: &ReloadTarget) -> Arc<dyn ProcessHandle> {
		let (tx, rx) = watch::channel(None);
		let now = self.alive.fetch_add(1, Ordering::SeqCst) + 1;
		self.max_alive.fetch_max(now, Ordering::SeqCst);

		let child = Arc::new(FakeChild {
			term_delay: self.term_delay,
			shared: Arc::new(Shared {
				tx,
				alive: Arc::clone(&self.alive),
			}),
			rx,
			signals: Mutex::new(Vec::new()),
		});
		self.children.lock().unwrap().push(Arc::clone(&child));
		child
	}
}

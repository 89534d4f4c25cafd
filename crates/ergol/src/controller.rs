use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use nix::sys::signal::Signal;
use tokio::time::Instant;

use crate::config::ReloadTarget;
use crate::process::{self, Launcher, ProcessHandle};
use crate::types::{ControlSignal, ExitReason, SupervisorState};

/// Owns the supervised child and the state machine around it.
///
/// State and handle sit behind one mutex that is only held for bookkeeping,
/// never across an await. Callers that need restart cycles to be strictly
/// ordered must funnel them through a single task (see [`crate::runner`]).
pub struct Controller {
	target: ReloadTarget,
	launcher: Arc<dyn Launcher>,
	inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
	state: SupervisorState,
	child: Option<Arc<dyn ProcessHandle>>,
	generation: u64,
	// cleared by stop() so the default observer leaves the exit to it
	default_observer: bool,
	// set on shutdown; start() is refused from then on
	closed: bool,
}

impl Controller {
	pub fn new(target: ReloadTarget, launcher: Arc<dyn Launcher>) -> Arc<Self> {
		Arc::new(Self {
			target,
			launcher,
			inner: Mutex::new(Inner::default()),
		})
	}

	pub fn target(&self) -> &ReloadTarget {
		&self.target
	}

	pub fn state(&self) -> SupervisorState {
		self.lock().state
	}

	pub fn child_id(&self) -> Option<u32> {
		self.lock().child.as_ref().and_then(|c| c.id())
	}

	/// Launch the child. Refused unless the controller is `Stopped`.
	///
	/// A spawn failure is not reported here: it arrives through the exit
	/// observer like any other exit and takes the state back to `Stopped`.
	pub fn start(self: &Arc<Self>) -> bool {
		let (child, generation) = {
			let mut inner = self.lock();
			if inner.closed {
				tracing::debug!("start skipped: shutting down");
				return false;
			}
			if inner.state != SupervisorState::Stopped {
				tracing::warn!(state = %inner.state, "start refused: a process is already supervised");
				return false;
			}
			let child = self.launcher.launch(&self.target);
			inner.generation += 1;
			inner.child = Some(Arc::clone(&child));
			inner.state = SupervisorState::Running;
			inner.default_observer = true;
			(child, inner.generation)
		};

		if let Some(pid) = child.id() {
			let (program, args) = self.target.command_line();
			tracing::info!("started {} {} (pid {})", program, args.join(" "), pid);
		}

		let controller = Arc::clone(self);
		let exit = child.exit_watch();
		tokio::spawn(async move {
			let reason = process::wait_for_exit(exit).await;
			controller.on_child_exit(generation, reason);
		});
		true
	}

	/// Default exit observer, installed by every `start`.
	fn on_child_exit(&self, generation: u64, reason: ExitReason) {
		{
			let mut inner = self.lock();
			if inner.generation != generation || !inner.default_observer {
				return;
			}
			inner.child = None;
			inner.state = SupervisorState::Stopped;
			inner.default_observer = false;
		}

		match &reason {
			ExitReason::SpawnFailed(_) | ExitReason::WaitFailed(_) => {
				tracing::error!("process could not run ({}). Waiting for a file change to restart it.", reason)
			}
			_ => tracing::warn!("process exited with {}. Waiting for a file change to restart it.", reason),
		}
	}

	/// Stop with the target's configured kill delay.
	pub async fn stop(&self) {
		self.stop_with(self.target.kill_delay()).await
	}

	/// Gracefully stop the child, escalating to `SIGKILL` once `kill_delay`
	/// has passed. No-op unless `Running`. Returns once the child is gone,
	/// with the state back at `Stopped`.
	pub async fn stop_with(&self, kill_delay: Duration) {
		let child = {
			let mut inner = self.lock();
			if inner.state != SupervisorState::Running {
				return;
			}
			inner.default_observer = false;
			match inner.child.clone() {
				Some(child) => {
					inner.state = SupervisorState::Stopping;
					child
				}
				None => {
					inner.state = SupervisorState::Stopped;
					return;
				}
			}
		};

		let exit = child.exit_watch();
		if let Err(e) = child.signal(Signal::SIGTERM) {
			tracing::warn!("{}", e);
		}

		let deadline = Instant::now() + kill_delay;
		let reason = match tokio::time::timeout_at(deadline, process::wait_for_exit(exit.clone())).await {
			Ok(reason) => reason,
			Err(_) => {
				tracing::warn!(
					"process still here after {}ms. Sending a SIGKILL signal",
					kill_delay.as_millis()
				);
				if let Err(e) = child.signal(Signal::SIGKILL) {
					tracing::error!("{}", e);
				}
				process::wait_for_exit(exit).await
			}
		};
		tracing::info!("process stopped with {}", reason);

		let mut inner = self.lock();
		inner.child = None;
		inner.state = SupervisorState::Stopped;
	}

	/// Stop the child, then start it again. Returns whether a new child was
	/// launched, which is never the case once [`Controller::close`] was called.
	pub async fn restart(self: &Arc<Self>) -> bool {
		self.stop().await;
		self.start()
	}

	/// Refuse every later `start`. A restart already past its stop will not
	/// launch anything, so a child seen by the next `forward` is the last one.
	pub fn close(&self) {
		self.lock().closed = true;
	}

	pub fn is_closed(&self) -> bool {
		self.lock().closed
	}

	/// Pass a control signal straight to the child, without waiting.
	pub fn forward(&self, signal: ControlSignal) {
		let child = self.lock().child.clone();
		if let Some(child) = child {
			tracing::info!("forwarding {} to the process", signal);
			if let Err(e) = child.signal(signal.as_signal()) {
				tracing::warn!("{}", e);
			}
		}
	}

	fn lock(&self) -> MutexGuard<'_, Inner> {
		self.inner.lock().unwrap_or_else(PoisonError::into_inner)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::FakeLauncher;

	fn controller(launcher: &Arc<FakeLauncher>) -> Arc<Controller> {
		let target = ReloadTarget {
			script: "app.js".into(),
			kill_delay_ms: 300,
			..ReloadTarget::default()
		};
		Controller::new(target, Arc::clone(launcher) as Arc<dyn Launcher>)
	}

	#[tokio::test]
	async fn stop_when_not_running_is_noop() {
		let launcher = FakeLauncher::new(Some(Duration::ZERO));
		let ctl = controller(&launcher);
		for _ in 0..3 {
			ctl.stop().await;
			assert_eq!(ctl.state(), SupervisorState::Stopped);
		}
		assert_eq!(launcher.launched(), 0);
	}

	#[tokio::test]
	async fn start_refused_while_running() {
		let launcher = FakeLauncher::new(Some(Duration::ZERO));
		let ctl = controller(&launcher);
		assert!(ctl.start());
		assert!(!ctl.start());
		assert_eq!(launcher.launched(), 1);
		assert_eq!(ctl.child_id(), Some(4242));
	}

	#[tokio::test]
	async fn graceful_stop_without_escalation() {
		let launcher = FakeLauncher::new(Some(Duration::from_millis(20)));
		let ctl = controller(&launcher);
		ctl.start();
		ctl.stop().await;

		let child = launcher.last();
		assert_eq!(ctl.state(), SupervisorState::Stopped);
		assert_eq!(ctl.child_id(), None);
		assert_eq!(child.sent(Signal::SIGTERM), 1);
		assert_eq!(child.sent(Signal::SIGKILL), 0);
	}

	#[tokio::test]
	async fn escalates_exactly_once() {
		let launcher = FakeLauncher::new(None);
		let ctl = controller(&launcher);
		ctl.start();

		let started = std::time::Instant::now();
		ctl.stop_with(Duration::from_millis(150)).await;

		let child = launcher.last();
		assert!(started.elapsed() >= Duration::from_millis(150));
		assert_eq!(ctl.state(), SupervisorState::Stopped);
		assert_eq!(child.sent(Signal::SIGTERM), 1);
		assert_eq!(child.sent(Signal::SIGKILL), 1);
	}

	#[tokio::test]
	async fn state_is_stopping_during_stop() {
		let launcher = FakeLauncher::new(Some(Duration::from_millis(200)));
		let ctl = controller(&launcher);
		ctl.start();

		let stopping = Arc::clone(&ctl);
		let handle = tokio::spawn(async move { stopping.stop().await });
		tokio::time::sleep(Duration::from_millis(50)).await;
		assert_eq!(ctl.state(), SupervisorState::Stopping);

		// a concurrent stop returns immediately and changes nothing
		ctl.stop().await;
		assert_eq!(ctl.state(), SupervisorState::Stopping);
		assert!(!ctl.start());

		handle.await.unwrap();
		assert_eq!(ctl.state(), SupervisorState::Stopped);
		assert_eq!(launcher.last().sent(Signal::SIGTERM), 1);
	}

	#[tokio::test]
	async fn unexpected_exit_goes_back_to_stopped() {
		let launcher = FakeLauncher::new(Some(Duration::ZERO));
		let ctl = controller(&launcher);
		ctl.start();
		launcher.last().exit(ExitReason::Code(0));
		tokio::time::sleep(Duration::from_millis(50)).await;

		assert_eq!(ctl.state(), SupervisorState::Stopped);
		assert_eq!(ctl.child_id(), None);
		assert_eq!(launcher.last().sent(Signal::SIGKILL), 0);

		// and can be started again
		assert!(ctl.start());
		assert_eq!(launcher.launched(), 2);
	}

	#[tokio::test]
	async fn stale_exit_does_not_touch_new_child() {
		let launcher = FakeLauncher::new(Some(Duration::from_millis(10)));
		let ctl = controller(&launcher);
		ctl.start();
		ctl.stop().await;
		ctl.start();
		tokio::time::sleep(Duration::from_millis(50)).await;
		assert_eq!(ctl.state(), SupervisorState::Running);
	}

	#[tokio::test]
	async fn restart_replaces_child() {
		let launcher = FakeLauncher::new(Some(Duration::from_millis(10)));
		let ctl = controller(&launcher);
		ctl.start();
		let first = launcher.last();

		assert!(ctl.restart().await);
		assert_eq!(first.sent(Signal::SIGTERM), 1);
		assert_eq!(launcher.launched(), 2);
		assert_eq!(launcher.max_alive(), 1);
		assert_eq!(ctl.state(), SupervisorState::Running);
	}

	#[tokio::test]
	async fn restart_from_stopped_just_starts() {
		let launcher = FakeLauncher::new(Some(Duration::ZERO));
		let ctl = controller(&launcher);
		assert!(ctl.restart().await);
		assert_eq!(launcher.launched(), 1);
		assert_eq!(ctl.state(), SupervisorState::Running);
	}

	#[tokio::test]
	async fn closed_controller_never_starts() {
		let launcher = FakeLauncher::new(Some(Duration::ZERO));
		let ctl = controller(&launcher);
		ctl.close();
		assert!(ctl.is_closed());
		assert!(!ctl.start());
		assert_eq!(launcher.launched(), 0);
	}

	#[tokio::test]
	async fn close_during_restart_leaves_no_child() {
		let launcher = FakeLauncher::new(Some(Duration::from_millis(100)));
		let ctl = controller(&launcher);
		ctl.start();

		let restarting = Arc::clone(&ctl);
		let handle = tokio::spawn(async move { restarting.restart().await });
		tokio::time::sleep(Duration::from_millis(30)).await;
		assert_eq!(ctl.state(), SupervisorState::Stopping);
		ctl.close();

		assert!(!handle.await.unwrap());
		assert_eq!(launcher.launched(), 1);
		assert_eq!(ctl.state(), SupervisorState::Stopped);
		assert_eq!(ctl.child_id(), None);
	}

	#[tokio::test]
	async fn forward_signals_child() {
		let launcher = FakeLauncher::new(None);
		let ctl = controller(&launcher);
		ctl.forward(ControlSignal::Interrupt);
		ctl.start();
		ctl.forward(ControlSignal::Interrupt);
		assert_eq!(launcher.last().sent(Signal::SIGINT), 1);
		assert_eq!(ctl.state(), SupervisorState::Running);
	}
}

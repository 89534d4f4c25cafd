use std::process::Stdio;
use std::sync::Arc;

use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::process::Command;
use tokio::sync::watch;

use crate::config::ReloadTarget;
use crate::types::ExitReason;

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
	#[error("failed to send {signal} to process group {pgid}: {source}")]
	Signal {
		pgid: u32,
		signal: &'static str,
		#[source]
		source: Errno,
	},
}

/// A launched child as seen by the controller.
///
/// The exit watch holds `None` while the child is alive and the final
/// [`ExitReason`] once it is gone. Every call to `exit_watch` hands out an
/// independent observer.
pub trait ProcessHandle: Send + Sync {
	fn id(&self) -> Option<u32>;
	fn signal(&self, signal: Signal) -> Result<(), ProcessError>;
	fn exit_watch(&self) -> watch::Receiver<Option<ExitReason>>;
}

/// Launches children for a target. Never fails: spawn errors come back as a
/// handle that has already exited with [`ExitReason::SpawnFailed`].
pub trait Launcher: Send + Sync {
	fn launch(&self, target: &ReloadTarget) -> Arc<dyn ProcessHandle>;
}

/// Launches real OS processes, each leading its own process group.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsLauncher;

impl Launcher for OsLauncher {
	fn launch(&self, target: &ReloadTarget) -> Arc<dyn ProcessHandle> {
		Arc::new(OsProcess::spawn(target))
	}
}

pub struct OsProcess {
	pid: Option<u32>,
	exit: watch::Receiver<Option<ExitReason>>,
}

impl OsProcess {
	/// Must be called from within a tokio runtime: the child is reaped by a
	/// background task.
	pub fn spawn(target: &ReloadTarget) -> Self {
		let (tx, rx) = watch::channel(None);
		let (program, args) = target.command_line();

		let mut cmd = Command::new(&program);
		cmd.args(&args)
			.current_dir(&target.cwd)
			.envs(&target.env)
			.stdin(Stdio::null())
			.stdout(Stdio::inherit())
			.stderr(Stdio::inherit())
			.process_group(0);

		match cmd.spawn() {
			Ok(mut child) => {
				let pid = child.id();
				tokio::spawn(async move {
					let reason = match child.wait().await {
						Ok(status) => ExitReason::from_status(status),
						Err(e) => ExitReason::WaitFailed(e.to_string()),
					};
					let _ = tx.send(Some(reason));
				});
				Self { pid, exit: rx }
			}
			Err(e) => {
				let _ = tx.send(Some(ExitReason::SpawnFailed(format!("{}: {}", program, e))));
				Self { pid: None, exit: rx }
			}
		}
	}
}

impl ProcessHandle for OsProcess {
	fn id(&self) -> Option<u32> {
		self.pid
	}

	/// Signals the whole process group so anything the script spawned goes
	/// down with it.
	fn signal(&self, signal: Signal) -> Result<(), ProcessError> {
		let Some(pid) = self.pid else {
			return Ok(());
		};
		if self.exit.borrow().is_some() {
			return Ok(());
		}
		match killpg(Pid::from_raw(pid as i32), signal) {
			Ok(()) | Err(Errno::ESRCH) => Ok(()),
			Err(source) => Err(ProcessError::Signal {
				pgid: pid,
				signal: signal.as_str(),
				source,
			}),
		}
	}

	fn exit_watch(&self) -> watch::Receiver<Option<ExitReason>> {
		self.exit.clone()
	}
}

/// Resolves once the observed child is gone.
pub async fn wait_for_exit(mut exit: watch::Receiver<Option<ExitReason>>) -> ExitReason {
	let reason = match exit.wait_for(Option::is_some).await {
		Ok(reason) => (*reason).clone(),
		Err(_) => None,
	};
	reason.unwrap_or_else(|| ExitReason::WaitFailed("exit notifier dropped".into()))
}

use std::fmt;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;

use nix::sys::signal::Signal;

/// Where the supervised child is in its lifecycle.
///
/// Moves strictly `Stopped -> Running -> Stopping -> Stopped`, except that a
/// child dying on its own takes `Running` straight back to `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SupervisorState {
	#[default]
	Stopped,
	Running,
	Stopping,
}

impl SupervisorState {
	pub fn is_running(&self) -> bool {
		matches!(self, SupervisorState::Running)
	}
}

impl fmt::Display for SupervisorState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			SupervisorState::Stopped => "stopped",
			SupervisorState::Running => "running",
			SupervisorState::Stopping => "stopping",
		};
		f.write_str(s)
	}
}

/// How a child went away, as reported to its exit observer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
	Code(i32),
	Signal(i32),
	SpawnFailed(String),
	WaitFailed(String),
}

impl ExitReason {
	pub fn from_status(status: ExitStatus) -> Self {
		match (status.code(), status.signal()) {
			(Some(code), _) => ExitReason::Code(code),
			(None, Some(sig)) => ExitReason::Signal(sig),
			(None, None) => ExitReason::WaitFailed(format!("unknown exit status {}", status)),
		}
	}

	pub fn is_signal(&self) -> bool {
		matches!(self, ExitReason::Signal(_))
	}
}

impl fmt::Display for ExitReason {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ExitReason::Code(code) => write!(f, "code {}", code),
			ExitReason::Signal(sig) => match Signal::try_from(*sig) {
				Ok(named) => write!(f, "signal {}", named.as_str()),
				Err(_) => write!(f, "signal {}", sig),
			},
			ExitReason::SpawnFailed(e) => write!(f, "spawn failure: {}", e),
			ExitReason::WaitFailed(e) => write!(f, "wait failure: {}", e),
		}
	}
}

/// Process-level control signals the supervisor reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
	/// `SIGUSR1`: restart the child.
	Reload,
	/// `SIGINT`: forward to the child and quit.
	Interrupt,
	/// `SIGTERM`: forward to the child and quit.
	Terminate,
}

impl ControlSignal {
	pub fn as_signal(&self) -> Signal {
		match self {
			ControlSignal::Reload => Signal::SIGUSR1,
			ControlSignal::Interrupt => Signal::SIGINT,
			ControlSignal::Terminate => Signal::SIGTERM,
		}
	}
}

impl fmt::Display for ControlSignal {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_signal().as_str())
	}
}

use std::future::Future;

use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::types::ControlSignal;

/// Anything that yields control signals. `None` means the source is gone.
pub trait SignalStream: Send {
	fn recv(&mut self) -> impl Future<Output = Option<ControlSignal>> + Send;
}

/// `SIGUSR1`, `SIGINT` and `SIGTERM` delivered to this process.
///
/// Handlers are installed once, when the source is created.
pub struct SignalSource {
	reload: Signal,
	interrupt: Signal,
	terminate: Signal,
}

impl SignalSource {
	pub fn new() -> std::io::Result<Self> {
		Ok(Self {
			reload: signal(SignalKind::user_defined1())?,
			interrupt: signal(SignalKind::interrupt())?,
			terminate: signal(SignalKind::terminate())?,
		})
	}
}

impl SignalStream for SignalSource {
	fn recv(&mut self) -> impl Future<Output = Option<ControlSignal>> + Send {
		async move {
			tokio::select! {
				Some(()) = self.reload.recv() => Some(ControlSignal::Reload),
				Some(()) = self.interrupt.recv() => Some(ControlSignal::Interrupt),
				Some(()) = self.terminate.recv() => Some(ControlSignal::Terminate),
				else => None,
			}
		}
	}
}

impl SignalStream for UnboundedReceiver<ControlSignal> {
	fn recv(&mut self) -> impl Future<Output = Option<ControlSignal>> + Send {
		UnboundedReceiver::recv(self)
	}
}

use tokio::sync::mpsc;
use tracing::info;

/// Process termination: completes on SIGINT/SIGTERM (ctrl-c elsewhere) or an
/// explicit [`ShutdownTrigger`], whichever comes first. A second interrupt
/// while shutting down exits immediately.
pub struct Shutdown {
	shutdown_tx: mpsc::Sender<()>,
	shutdown_rx: mpsc::Receiver<()>,
}

impl Shutdown {
	pub fn new() -> Self {
		let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
		Shutdown {
			shutdown_tx,
			shutdown_rx,
		}
	}

	/// A handle that triggers the shutdown programmatically.
	pub fn trigger(&self) -> ShutdownTrigger {
		ShutdownTrigger {
			shutdown_tx: self.shutdown_tx.clone(),
		}
	}

	/// Completes when a shutdown has been requested.
	pub async fn wait(mut self) {
		tokio::select! {
			_ = interrupt() => {
				info!("received interrupt, starting shutdown");
				tokio::spawn(async {
					interrupt().await;
					info!("second interrupt, exiting immediately");
					std::process::exit(0);
				});
			}
			_ = terminate() => {
				info!("received SIGTERM, starting shutdown");
			}
			_ = self.shutdown_rx.recv() => {
				info!("received explicit shutdown signal");
			}
		}
	}
}

impl Default for Shutdown {
	fn default() -> Self {
		Self::new()
	}
}

#[derive(Clone, Debug)]
pub struct ShutdownTrigger {
	shutdown_tx: mpsc::Sender<()>,
}

impl ShutdownTrigger {
	pub async fn shutdown_now(&self) {
		let _ = self.shutdown_tx.send(()).await;
	}
}

async fn interrupt() {
	tokio::signal::ctrl_c()
		.await
		.expect("failed to register interrupt handler");
}

#[cfg(unix)]
async fn terminate() {
	tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
		.expect("failed to register SIGTERM handler")
		.recv()
		.await;
}

#[cfg(not(unix))]
async fn terminate() {
	// Only ctrl-c is meaningful off unix.
	std::future::pending::<()>().await
}

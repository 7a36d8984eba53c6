//! Process assembly: a bound, running server and its teardown handles.

use lock_core::prelude::*;
use lock_core::{drain, signal};
use tokio::task::JoinHandle;

use crate::config::ServerConfig;
use crate::server::Server;

/// Binds and starts a server instance. Errors out (rather than panicking)
/// on bind failure so the binary exits non-zero.
pub async fn run(config: ServerConfig) -> anyhow::Result<Bound> {
	let server = Server::bind(&config)?;
	let local_addr = server.local_addr();
	let shutdown = signal::Shutdown::new();
	let (drain_tx, drain_rx) = drain::new();
	let task = tokio::spawn(server.run(drain_rx).in_current_span());
	Ok(Bound {
		shutdown,
		drain_tx,
		task,
		local_addr,
	})
}

/// A running server plus the handles needed to stop it.
pub struct Bound {
	pub shutdown: signal::Shutdown,
	drain_tx: drain::DrainTrigger,
	task: JoinHandle<()>,
	local_addr: SocketAddr,
}

impl Bound {
	pub fn local_addr(&self) -> SocketAddr {
		self.local_addr
	}

	/// A handle that stops the server without an OS signal.
	pub fn shutdown_trigger(&self) -> signal::ShutdownTrigger {
		self.shutdown.trigger()
	}

	/// Blocks until a shutdown is requested, then drains the accept loop.
	pub async fn wait_termination(self) -> anyhow::Result<()> {
		self.shutdown.wait().await;
		self.drain_tx.start_drain_and_wait().await;
		let _ = self.task.await;
		Ok(())
	}
}

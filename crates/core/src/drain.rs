// Originally derived from https://github.com/istio/ztunnel (Apache 2.0 licensed)

use tokio::sync::{mpsc, watch};
use tracing::info;

/// Constructs a new pair for draining.
/// * DrainTrigger can be used to start a draining sequence and wait for it to complete.
/// * DrainWatcher should be held by anything that wants to participate in the draining. This can be
///   cloned, and a drain will not complete until all outstanding DrainWatchers are dropped.
pub fn new() -> (DrainTrigger, DrainWatcher) {
	let (signal_tx, signal_rx) = watch::channel(false);
	let (drained_tx, drained_rx) = mpsc::channel(1);
	(
		DrainTrigger {
			drained_rx,
			signal_tx,
		},
		DrainWatcher {
			drained_tx,
			signal_rx,
		},
	)
}

enum Never {}

/// Starts a drain and waits for all watchers to release their handles.
pub struct DrainTrigger {
	drained_rx: mpsc::Receiver<Never>,
	signal_tx: watch::Sender<bool>,
}

impl DrainTrigger {
	/// Signals all watchers to begin draining and waits for every handle to be dropped.
	pub async fn start_drain_and_wait(mut self) {
		let _ = self.signal_tx.send(true);
		match self.drained_rx.recv().await {
			None => {},
			Some(n) => match n {},
		}
		info!("drain complete");
	}
}

/// Watches for a drain to be signaled.
///
/// All clones (and all outstanding [`ReleaseShutdown`] handles) must be dropped
/// before the trigger's `start_drain_and_wait` completes.
#[derive(Clone)]
pub struct DrainWatcher {
	drained_tx: mpsc::Sender<Never>,
	signal_rx: watch::Receiver<bool>,
}

impl DrainWatcher {
	/// Completes once a drain has been signaled, returning a handle that must be
	/// dropped when the shutdown work has finished.
	pub async fn wait_for_drain(mut self) -> ReleaseShutdown {
		// If the trigger is gone entirely, treat it the same as a signaled drain.
		let _ = self.signal_rx.wait_for(|signaled| *signaled).await;
		ReleaseShutdown(self.drained_tx)
	}
}

#[must_use = "ReleaseShutdown should be dropped explicitly to release the drain"]
pub struct ReleaseShutdown(mpsc::Sender<Never>);

impl std::fmt::Debug for DrainTrigger {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("DrainTrigger").finish_non_exhaustive()
	}
}

impl std::fmt::Debug for DrainWatcher {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("DrainWatcher").finish_non_exhaustive()
	}
}

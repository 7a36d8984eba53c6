use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

use crate::proto::{LockResponse, cause};

/// Routes responses arriving on any pooled connection back to the caller
/// that issued the request, keyed by identity. Each pending request owns a
/// one-shot completion handle; the connection task that reads the response
/// looks the handle up and fires it.
#[derive(Default)]
pub(crate) struct Correlator {
	pending: Mutex<HashMap<i64, oneshot::Sender<LockResponse>>>,
}

impl Correlator {
	/// Installs a completion slot for `identity` and returns the receiver
	/// the caller blocks on.
	pub fn register(&self, identity: i64) -> oneshot::Receiver<LockResponse> {
		let (tx, rx) = oneshot::channel();
		if self.pending.lock().insert(identity, tx).is_some() {
			// Identities are unique per client; a collision means the
			// previous caller's slot is unreachable and it will observe a
			// synthesized failure when its receiver errors.
			debug!(identity, "duplicate pending identity replaced");
		}
		rx
	}

	/// Completes the matching slot. Responses nobody is waiting for are
	/// dropped (e.g. the late grant of an abandoned request).
	pub fn complete(&self, response: LockResponse) {
		let slot = self.pending.lock().remove(&response.identity);
		match slot {
			Some(tx) => {
				let _ = tx.send(response);
			},
			None => debug!(identity = response.identity, "orphan response dropped"),
		}
	}

	/// Fabricates the transport-failure response for a request that could
	/// not be delivered (or whose connection died first), so the caller
	/// observes the same response shape as for a remote failure.
	pub fn fail(&self, identity: i64, key: &str, is_lock: bool) {
		self.complete(LockResponse {
			key: key.to_string(),
			identity,
			success: false,
			cause: cause::connection_failed(identity),
			is_lock_response: !is_lock,
		});
	}

	#[cfg(test)]
	pub fn pending_count(&self) -> usize {
		self.pending.lock().len()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn completes_the_matching_slot() {
		let c = Correlator::default();
		let rx = c.register(7);
		c.complete(LockResponse {
			key: "k".to_string(),
			identity: 7,
			success: true,
			cause: String::new(),
			is_lock_response: true,
		});
		let resp = rx.await.unwrap();
		assert!(resp.success);
		assert_eq!(c.pending_count(), 0);
	}

	#[tokio::test]
	async fn orphan_responses_are_dropped() {
		let c = Correlator::default();
		let _rx = c.register(1);
		c.complete(LockResponse {
			key: "k".to_string(),
			identity: 2,
			success: true,
			cause: String::new(),
			is_lock_response: true,
		});
		assert_eq!(c.pending_count(), 1);
	}

	#[tokio::test]
	async fn failure_synthesis_has_the_uniform_shape() {
		let c = Correlator::default();
		let rx = c.register(9);
		c.fail(9, "k", true);
		let resp = rx.await.unwrap();
		assert!(!resp.success);
		assert!(resp.cause.starts_with("Connection to server fails"));
		assert_eq!(resp.identity, 9);
		assert!(!resp.is_lock_response);
	}
}

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::{trace, warn};

use super::ExclusiveState;
use crate::proto::{LockRequest, LockResponse, cause};

/// Plain exclusive lock: no reentry, no expiration.
#[derive(Default)]
pub(crate) struct SimpleResolver {
	keys: Mutex<HashMap<String, ExclusiveState>>,
}

impl SimpleResolver {
	pub fn try_lock(&self, req: &LockRequest) -> LockResponse {
		let mut keys = self.keys.lock();
		let state = keys.entry(req.key.clone()).or_default();
		if state.vacant() {
			state.holder = Some(req.clone());
			trace!(key = %req.key, identity = req.identity, "simple try-lock granted");
			LockResponse::granted(req)
		} else {
			LockResponse::denied(req, cause::LOCKED_ALREADY)
		}
	}

	pub async fn lock(&self, req: &LockRequest) -> LockResponse {
		let permit = {
			let mut keys = self.keys.lock();
			let state = keys.entry(req.key.clone()).or_default();
			if state.vacant() {
				state.holder = Some(req.clone());
				return LockResponse::granted(req);
			}
			state.waiters.park()
		};
		// The permit sender is only dropped together with the key state,
		// which cannot happen while we are queued on it.
		if permit.await.is_err() {
			warn!(key = %req.key, "grant permit vanished; treating as granted");
		}
		let mut keys = self.keys.lock();
		let state = keys.entry(req.key.clone()).or_default();
		state.holder = Some(req.clone());
		state.reserved = false;
		trace!(key = %req.key, identity = req.identity, "simple lock granted after wait");
		LockResponse::granted(req)
	}

	pub fn unlock(&self, req: &LockRequest) -> LockResponse {
		let mut keys = self.keys.lock();
		if let Some(state) = keys.get_mut(&req.key) {
			// Only an actual release hands the lock on: a double unlock must
			// not fire a second permit while a handoff is in flight.
			if state.holder.take().is_some() {
				if state.waiters.wake_one() {
					state.reserved = true;
				} else if state.idle() {
					keys.remove(&req.key);
				}
			}
		}
		// Releasing a key nobody holds is benign.
		LockResponse::granted(req)
	}

	#[cfg(test)]
	pub fn holds(&self, key: &str) -> bool {
		self
			.keys
			.lock()
			.get(key)
			.is_some_and(|s| s.holder.is_some())
	}

	#[cfg(test)]
	pub fn tracked_keys(&self) -> usize {
		self.keys.lock().len()
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use super::*;
	use crate::proto::LockKind;

	fn acquire(key: &str, identity: i64) -> LockRequest {
		LockRequest {
			key: key.to_string(),
			application: "test".to_string(),
			thread: "main".to_string(),
			kind: LockKind::Simple,
			is_lock: true,
			try_lock: false,
			time: 0,
			read_lock: false,
			identity,
		}
	}

	fn release(key: &str, identity: i64) -> LockRequest {
		LockRequest {
			is_lock: false,
			..acquire(key, identity)
		}
	}

	#[tokio::test]
	async fn try_lock_contention() {
		let r = SimpleResolver::default();
		assert!(r.try_lock(&acquire("k", 1)).success);
		let denied = r.try_lock(&acquire("k", 2));
		assert!(!denied.success);
		assert_eq!(denied.cause, cause::LOCKED_ALREADY);
		assert!(r.unlock(&release("k", 3)).success);
		assert!(r.try_lock(&acquire("k", 4)).success);
	}

	#[tokio::test]
	async fn blocking_lock_waits_for_release() {
		let r = Arc::new(SimpleResolver::default());
		assert!(r.try_lock(&acquire("k", 1)).success);

		let r2 = r.clone();
		let waiter = tokio::spawn(async move { r2.lock(&acquire("k", 2)).await });
		tokio::task::yield_now().await;
		assert!(!waiter.is_finished());

		r.unlock(&release("k", 3));
		let resp = waiter.await.unwrap();
		assert!(resp.success);
		assert!(r.holds("k"));
	}

	#[tokio::test]
	async fn handoff_window_blocks_try_lock() {
		let r = Arc::new(SimpleResolver::default());
		assert!(r.try_lock(&acquire("k", 1)).success);
		let r2 = r.clone();
		let waiter = tokio::spawn(async move { r2.lock(&acquire("k", 2)).await });
		// Let the waiter park before releasing.
		while !{
			let keys = r.keys.lock();
			keys.get("k").is_some_and(|s| !s.waiters.is_empty())
		} {
			tokio::task::yield_now().await;
		}
		r.unlock(&release("k", 3));
		// The slot is reserved for the woken waiter even though the waiter
		// task has not yet resumed.
		assert!(!r.try_lock(&acquire("k", 4)).success);
		assert!(waiter.await.unwrap().success);
	}

	#[tokio::test]
	async fn unheld_unlock_is_benign_and_state_is_dropped() {
		let r = SimpleResolver::default();
		assert!(r.unlock(&release("ghost", 1)).success);
		assert!(r.try_lock(&acquire("k", 2)).success);
		r.unlock(&release("k", 3));
		assert_eq!(r.tracked_keys(), 0);
	}
}

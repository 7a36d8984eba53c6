use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::{trace, warn};

use crate::proto::{LockRequest, LockResponse, cause};
use crate::server::waitlist::WaitList;

/// Exclusive lock that the owning caller may re-acquire.
///
/// Ownership is the `(application, thread)` pair of the stored holder
/// request: identities are freshly generated per call, so they cannot serve
/// as the reentry check. Each successful re-acquire replaces the stored
/// holder with the newer request; the depth counter must return to zero
/// before the key is released.
#[derive(Default)]
pub(crate) struct ReentrantResolver {
	keys: Mutex<HashMap<String, ReentrantState>>,
}

#[derive(Debug, Default)]
struct ReentrantState {
	holder: Option<LockRequest>,
	count: u32,
	reserved: bool,
	waiters: WaitList,
}

impl ReentrantState {
	fn vacant(&self) -> bool {
		self.holder.is_none() && !self.reserved
	}

	fn idle(&self) -> bool {
		self.vacant() && self.waiters.is_empty()
	}
}

impl ReentrantResolver {
	pub fn try_lock(&self, req: &LockRequest) -> LockResponse {
		let mut keys = self.keys.lock();
		let state = keys.entry(req.key.clone()).or_default();
		if state.vacant() {
			state.holder = Some(req.clone());
			state.count = 1;
			LockResponse::granted(req)
		} else if state.holder.as_ref().is_some_and(|h| h.same_caller(req)) {
			state.count += 1;
			state.holder = Some(req.clone());
			trace!(key = %req.key, depth = state.count, "reentrant re-acquire");
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
				state.count = 1;
				return LockResponse::granted(req);
			}
			if state.holder.as_ref().is_some_and(|h| h.same_caller(req)) {
				state.count += 1;
				state.holder = Some(req.clone());
				return LockResponse::granted(req);
			}
			state.waiters.park()
		};
		if permit.await.is_err() {
			warn!(key = %req.key, "grant permit vanished; treating as granted");
		}
		let mut keys = self.keys.lock();
		let state = keys.entry(req.key.clone()).or_default();
		state.holder = Some(req.clone());
		state.count = 1;
		state.reserved = false;
		LockResponse::granted(req)
	}

	/// Inline re-acquire for the pipeline fast-path: succeeds only when the
	/// requester already owns the key, without touching the queue.
	pub fn reacquire(&self, req: &LockRequest) -> Option<LockResponse> {
		let mut keys = self.keys.lock();
		let state = keys.get_mut(&req.key)?;
		if state.holder.as_ref().is_some_and(|h| h.same_caller(req)) {
			state.count += 1;
			state.holder = Some(req.clone());
			Some(LockResponse::granted(req))
		} else {
			None
		}
	}

	pub fn unlock(&self, req: &LockRequest) -> LockResponse {
		let mut keys = self.keys.lock();
		if let Some(state) = keys.get_mut(&req.key) {
			// A depth already at zero means a double unlock (or an unlock
			// racing a handoff); it must not fire another permit.
			if state.count > 0 {
				state.count -= 1;
				if state.count == 0 {
					state.holder = None;
					if state.waiters.wake_one() {
						state.reserved = true;
					} else if state.idle() {
						keys.remove(&req.key);
					}
				}
			}
		}
		LockResponse::granted(req)
	}

	#[cfg(test)]
	pub fn depth(&self, key: &str) -> u32 {
		self.keys.lock().get(key).map_or(0, |s| s.count)
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

	fn acquire(app: &str, identity: i64) -> LockRequest {
		LockRequest {
			key: "r".to_string(),
			application: app.to_string(),
			thread: "main".to_string(),
			kind: LockKind::Reentrant,
			is_lock: true,
			try_lock: false,
			time: 0,
			read_lock: false,
			identity,
		}
	}

	fn release(app: &str, identity: i64) -> LockRequest {
		LockRequest {
			is_lock: false,
			..acquire(app, identity)
		}
	}

	#[tokio::test]
	async fn depth_balances_to_release() {
		let r = ReentrantResolver::default();
		// Fresh identity per call: ownership is (application, thread).
		assert!(r.try_lock(&acquire("x", 20)).success);
		assert!(r.lock(&acquire("x", 21)).await.success);
		assert!(r.lock(&acquire("x", 22)).await.success);
		assert_eq!(r.depth("r"), 3);

		let denied = r.try_lock(&acquire("y", 23));
		assert!(!denied.success);
		assert_eq!(denied.cause, cause::LOCKED_ALREADY);

		for identity in 24..27 {
			assert!(r.unlock(&release("x", identity)).success);
		}
		assert_eq!(r.tracked_keys(), 0);
		assert!(r.try_lock(&acquire("y", 27)).success);
	}

	#[tokio::test]
	async fn reacquire_fast_path_requires_ownership() {
		let r = ReentrantResolver::default();
		assert!(r.reacquire(&acquire("x", 1)).is_none());
		assert!(r.try_lock(&acquire("x", 2)).success);
		assert!(r.reacquire(&acquire("x", 3)).unwrap().success);
		assert_eq!(r.depth("r"), 2);
		assert!(r.reacquire(&acquire("y", 4)).is_none());
	}

	#[tokio::test]
	async fn a_different_thread_label_is_a_different_caller() {
		let r = ReentrantResolver::default();
		assert!(r.try_lock(&acquire("x", 1)).success);
		let mut other = acquire("x", 2);
		other.thread = "worker".to_string();
		let denied = r.try_lock(&other);
		assert!(!denied.success);
		assert_eq!(denied.cause, cause::LOCKED_ALREADY);
		assert!(r.reacquire(&other).is_none());
	}

	#[tokio::test]
	async fn full_release_admits_next_waiter() {
		let r = Arc::new(ReentrantResolver::default());
		assert!(r.try_lock(&acquire("x", 1)).success);
		assert!(r.try_lock(&acquire("x", 2)).success);

		let r2 = r.clone();
		let waiter = tokio::spawn(async move { r2.lock(&acquire("y", 3)).await });
		tokio::task::yield_now().await;

		r.unlock(&release("x", 4));
		tokio::task::yield_now().await;
		assert!(!waiter.is_finished());
		r.unlock(&release("x", 5));
		assert!(waiter.await.unwrap().success);
		assert_eq!(r.depth("r"), 1);
	}
}

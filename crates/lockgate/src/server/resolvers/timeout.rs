use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use super::ExclusiveState;
use crate::proto::{LockRequest, LockResponse, cause};

type Table = Arc<Mutex<HashMap<String, ExclusiveState>>>;

/// Exclusive lock with a per-acquisition expiration.
///
/// Every successful acquire registers a deadline with the reaper task; the
/// reaper evicts holders whose deadline passed and whose identity still
/// matches, waking the next waiter exactly as an unlock would.
pub(crate) struct TimeoutResolver {
	keys: Table,
	expire_tx: mpsc::UnboundedSender<Expiration>,
}

struct Expiration {
	key: String,
	identity: i64,
	deadline: Instant,
}

impl TimeoutResolver {
	/// Spawns the reaper; must be called from within a tokio runtime.
	pub fn new() -> TimeoutResolver {
		let keys: Table = Default::default();
		let (expire_tx, expire_rx) = mpsc::unbounded_channel();
		tokio::spawn(reap(keys.clone(), expire_rx));
		TimeoutResolver { keys, expire_tx }
	}

	pub fn try_lock(&self, req: &LockRequest) -> LockResponse {
		let mut keys = self.keys.lock();
		let state = keys.entry(req.key.clone()).or_default();
		if state.vacant() {
			state.holder = Some(req.clone());
			drop(keys);
			self.schedule(req);
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
				drop(keys);
				self.schedule(req);
				return LockResponse::granted(req);
			}
			state.waiters.park()
		};
		if permit.await.is_err() {
			warn!(key = %req.key, "grant permit vanished; treating as granted");
		}
		{
			let mut keys = self.keys.lock();
			let state = keys.entry(req.key.clone()).or_default();
			state.holder = Some(req.clone());
			state.reserved = false;
		}
		self.schedule(req);
		trace!(key = %req.key, identity = req.identity, "timeout lock granted after wait");
		LockResponse::granted(req)
	}

	pub fn unlock(&self, req: &LockRequest) -> LockResponse {
		let mut keys = self.keys.lock();
		match keys.get_mut(&req.key) {
			Some(state) if state.holder.as_ref().is_some_and(|h| h.same_caller(req)) => {
				state.holder = None;
				if state.waiters.wake_one() {
					state.reserved = true;
				} else if state.idle() {
					keys.remove(&req.key);
				}
				LockResponse::granted(req)
			},
			// The holder was reaped (and possibly reassigned) before this
			// unlock arrived. The caller's lock is gone either way.
			_ => LockResponse::benign(req, cause::LOCK_EXPIRED),
		}
	}

	fn schedule(&self, req: &LockRequest) {
		let deadline = Instant::now() + Duration::from_millis(req.time.max(0) as u64);
		let _ = self.expire_tx.send(Expiration {
			key: req.key.clone(),
			identity: req.identity,
			deadline,
		});
	}

	#[cfg(test)]
	pub fn holds(&self, key: &str) -> bool {
		self
			.keys
			.lock()
			.get(key)
			.is_some_and(|s| s.holder.is_some())
	}
}

/// The reaper: a delay-ordered queue consumed by a single task. A min-heap
/// keyed by deadline avoids a timer per lock; the task sleeps until the
/// earliest deadline and re-checks identity before evicting, so records for
/// locks that were already released are discarded as stale.
async fn reap(keys: Table, mut expire_rx: mpsc::UnboundedReceiver<Expiration>) {
	let mut pending: BinaryHeap<Reverse<HeapEntry>> = BinaryHeap::new();
	loop {
		let next = pending.peek().map(|Reverse(e)| e.0.deadline);
		tokio::select! {
			entry = expire_rx.recv() => match entry {
				Some(e) => pending.push(Reverse(HeapEntry(e))),
				// All senders gone: the resolver was dropped.
				None => return,
			},
			_ = tokio::time::sleep_until(next.unwrap_or_else(Instant::now)), if next.is_some() => {
				let now = Instant::now();
				while pending
					.peek()
					.is_some_and(|Reverse(e)| e.0.deadline <= now)
				{
					let Reverse(HeapEntry(expired)) = pending.pop().expect("peeked");
					evict(&keys, &expired.key, expired.identity);
				}
			}
		}
	}
}

fn evict(keys: &Mutex<HashMap<String, ExclusiveState>>, key: &str, identity: i64) {
	let mut keys = keys.lock();
	let Some(state) = keys.get_mut(key) else {
		return;
	};
	if !state.holder.as_ref().is_some_and(|h| h.identity == identity) {
		// Stale record: the lock was released (or re-acquired) in the
		// meantime.
		return;
	}
	debug!(key, identity, "expiring timeout lock");
	state.holder = None;
	if state.waiters.wake_one() {
		state.reserved = true;
	} else if state.idle() {
		keys.remove(key);
	}
}

struct HeapEntry(Expiration);

impl PartialEq for HeapEntry {
	fn eq(&self, other: &Self) -> bool {
		self.0.deadline == other.0.deadline && self.0.identity == other.0.identity
	}
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
	fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
		Some(self.cmp(other))
	}
}

impl Ord for HeapEntry {
	fn cmp(&self, other: &Self) -> std::cmp::Ordering {
		self
			.0
			.deadline
			.cmp(&other.0.deadline)
			.then(self.0.identity.cmp(&other.0.identity))
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use super::*;
	use crate::proto::LockKind;

	fn acquire(key: &str, identity: i64, time: i64) -> LockRequest {
		LockRequest {
			key: key.to_string(),
			application: "test".to_string(),
			thread: "main".to_string(),
			kind: LockKind::Timeout,
			is_lock: true,
			try_lock: false,
			time,
			read_lock: false,
			identity,
		}
	}

	fn release(key: &str, identity: i64) -> LockRequest {
		LockRequest {
			is_lock: false,
			..acquire(key, identity, 0)
		}
	}

	#[tokio::test(start_paused = true)]
	async fn expired_lock_is_reaped() {
		let r = TimeoutResolver::new();
		assert!(r.try_lock(&acquire("t", 1, 200)).success);
		tokio::time::sleep(Duration::from_millis(300)).await;
		assert!(!r.holds("t"));
		// A later acquirer succeeds without any unlock.
		assert!(r.try_lock(&acquire("t", 2, 1000)).success);
	}

	#[tokio::test(start_paused = true)]
	async fn release_makes_the_record_stale() {
		let r = TimeoutResolver::new();
		assert!(r.try_lock(&acquire("t", 1, 200)).success);
		assert!(r.unlock(&release("t", 2)).success);
		// Re-acquired by someone else before the old deadline fires.
		assert!(r.try_lock(&acquire("t", 3, 10_000)).success);
		tokio::time::sleep(Duration::from_millis(300)).await;
		// The stale record must not evict the new holder.
		assert!(r.holds("t"));
	}

	#[tokio::test(start_paused = true)]
	async fn unlock_after_expiry_is_benign() {
		let r = TimeoutResolver::new();
		assert!(r.try_lock(&acquire("t", 1, 100)).success);
		tokio::time::sleep(Duration::from_millis(200)).await;
		let resp = r.unlock(&release("t", 2));
		assert!(resp.success);
		assert_eq!(resp.cause, cause::LOCK_EXPIRED);
	}

	#[tokio::test(start_paused = true)]
	async fn unlock_by_another_caller_reports_expired() {
		let r = TimeoutResolver::new();
		assert!(r.try_lock(&acquire("t", 1, 10_000)).success);
		let mut foreign = release("t", 2);
		foreign.application = "other".to_string();
		let resp = r.unlock(&foreign);
		assert!(resp.success);
		assert_eq!(resp.cause, cause::LOCK_EXPIRED);
		// The real holder is untouched.
		assert!(r.holds("t"));
	}

	#[tokio::test(start_paused = true)]
	async fn contention_before_expiry_is_denied() {
		let r = TimeoutResolver::new();
		assert!(r.try_lock(&acquire("t", 1, 10_000)).success);
		let denied = r.try_lock(&acquire("t", 2, 500));
		assert!(!denied.success);
		assert_eq!(denied.cause, cause::LOCKED_ALREADY);
	}

	#[tokio::test(start_paused = true)]
	async fn same_caller_can_reacquire_after_expiry() {
		let r = TimeoutResolver::new();
		assert!(r.try_lock(&acquire("t", 1, 100)).success);
		tokio::time::sleep(Duration::from_millis(200)).await;
		// A fresh acquisition, not a reentry: the old grant is gone.
		assert!(r.try_lock(&acquire("t", 2, 100)).success);
		let resp = r.unlock(&release("t", 3));
		assert!(resp.success);
		assert_eq!(resp.cause, "");
	}

	#[tokio::test(start_paused = true)]
	async fn expiry_wakes_the_next_waiter() {
		let r = Arc::new(TimeoutResolver::new());
		assert!(r.try_lock(&acquire("t", 1, 100)).success);
		let r2 = r.clone();
		let waiter = tokio::spawn(async move { r2.lock(&acquire("t", 2, 5_000)).await });
		tokio::task::yield_now().await;
		assert!(!waiter.is_finished());
		tokio::time::sleep(Duration::from_millis(200)).await;
		assert!(waiter.await.unwrap().success);
		assert!(r.holds("t"));
	}
}

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::{trace, warn};

use crate::proto::{LockRequest, LockResponse, cause};
use crate::server::waitlist::WaitList;

/// Read/write lock: reads are inclusive, writes exclusive. A write holder
/// may additionally take a read lock on the same key and then release the
/// write side (the downgrade window).
///
/// Release policy: a write release admits every parked reader at once; a
/// read release that drops the live count to zero admits exactly one writer.
#[derive(Default)]
pub(crate) struct ReadWriteResolver {
	keys: Mutex<HashMap<String, RwState>>,
}

#[derive(Debug, Default)]
struct RwState {
	write_holder: Option<LockRequest>,
	/// Live read-lock count.
	readers: u32,
	/// Readers that were admitted by a write release but have not installed
	/// themselves yet. Counts as read-held for write admission.
	pending_readers: u32,
	/// A writer was admitted and has not installed itself yet.
	reserved_write: bool,
	read_waiters: WaitList,
	write_waiters: WaitList,
}

impl RwState {
	fn read_held(&self) -> bool {
		self.readers > 0 || self.pending_readers > 0
	}

	fn write_held(&self) -> bool {
		self.write_holder.is_some() || self.reserved_write
	}

	fn idle(&self) -> bool {
		!self.read_held()
			&& !self.write_held()
			&& self.read_waiters.is_empty()
			&& self.write_waiters.is_empty()
	}

	fn downgrade_allowed(&self, req: &LockRequest) -> bool {
		self.write_holder.as_ref().is_some_and(|wh| wh.same_caller(req))
	}
}

impl ReadWriteResolver {
	pub fn try_lock(&self, req: &LockRequest) -> LockResponse {
		if req.read_lock {
			self.try_read(req)
		} else {
			self.try_write(req)
		}
	}

	fn try_read(&self, req: &LockRequest) -> LockResponse {
		let mut keys = self.keys.lock();
		let state = keys.entry(req.key.clone()).or_default();
		if !state.write_held() || state.downgrade_allowed(req) {
			state.readers += 1;
			trace!(key = %req.key, readers = state.readers, "read lock granted");
			LockResponse::granted(req)
		} else {
			LockResponse::denied(req, cause::READ_BLOCKED_BY_WRITE)
		}
	}

	fn try_write(&self, req: &LockRequest) -> LockResponse {
		let mut keys = self.keys.lock();
		let state = keys.entry(req.key.clone()).or_default();
		if state.read_held() {
			LockResponse::denied(req, cause::WRITE_BLOCKED_BY_READ)
		} else if state.write_held() {
			LockResponse::denied(req, cause::WRITE_BLOCKED_BY_WRITE)
		} else {
			state.write_holder = Some(req.clone());
			trace!(key = %req.key, "write lock granted");
			LockResponse::granted(req)
		}
	}

	pub async fn lock(&self, req: &LockRequest) -> LockResponse {
		if req.read_lock {
			self.read_lock(req).await
		} else {
			self.write_lock(req).await
		}
	}

	async fn read_lock(&self, req: &LockRequest) -> LockResponse {
		let permit = {
			let mut keys = self.keys.lock();
			let state = keys.entry(req.key.clone()).or_default();
			if !state.write_held() || state.downgrade_allowed(req) {
				state.readers += 1;
				return LockResponse::granted(req);
			}
			state.read_waiters.park()
		};
		if permit.await.is_err() {
			warn!(key = %req.key, "read grant permit vanished; treating as granted");
		}
		let mut keys = self.keys.lock();
		let state = keys.entry(req.key.clone()).or_default();
		state.pending_readers = state.pending_readers.saturating_sub(1);
		state.readers += 1;
		trace!(key = %req.key, readers = state.readers, "read lock granted after wait");
		LockResponse::granted(req)
	}

	async fn write_lock(&self, req: &LockRequest) -> LockResponse {
		let permit = {
			let mut keys = self.keys.lock();
			let state = keys.entry(req.key.clone()).or_default();
			if !state.read_held() && !state.write_held() {
				state.write_holder = Some(req.clone());
				return LockResponse::granted(req);
			}
			state.write_waiters.park()
		};
		if permit.await.is_err() {
			warn!(key = %req.key, "write grant permit vanished; treating as granted");
		}
		let mut keys = self.keys.lock();
		let state = keys.entry(req.key.clone()).or_default();
		state.write_holder = Some(req.clone());
		state.reserved_write = false;
		trace!(key = %req.key, "write lock granted after wait");
		LockResponse::granted(req)
	}

	pub fn unlock(&self, req: &LockRequest) -> LockResponse {
		if req.read_lock {
			self.read_unlock(req)
		} else {
			self.write_unlock(req)
		}
	}

	fn read_unlock(&self, req: &LockRequest) -> LockResponse {
		let mut keys = self.keys.lock();
		if let Some(state) = keys.get_mut(&req.key) {
			if state.readers > 0 {
				state.readers -= 1;
				if !state.read_held() && state.write_holder.is_none() && !state.reserved_write {
					// Last reader out admits exactly one writer.
					if state.write_waiters.wake_one() {
						state.reserved_write = true;
					} else if state.idle() {
						keys.remove(&req.key);
					}
				}
			}
		}
		LockResponse::granted(req)
	}

	fn write_unlock(&self, req: &LockRequest) -> LockResponse {
		let mut keys = self.keys.lock();
		if let Some(state) = keys.get_mut(&req.key) {
			// Only an actual release admits waiters: a double unlock while a
			// handoff is in flight must not wake anyone again.
			if state.write_holder.take().is_some() {
				let woken = state.read_waiters.wake_all();
				if woken > 0 {
					// Batch admission: every parked reader proceeds before
					// the next writer is considered.
					state.pending_readers += woken as u32;
				} else if !state.read_held() && state.write_waiters.wake_one() {
					state.reserved_write = true;
				} else if state.idle() {
					keys.remove(&req.key);
				}
			}
		}
		LockResponse::granted(req)
	}

	#[cfg(test)]
	pub fn readers(&self, key: &str) -> u32 {
		self.keys.lock().get(key).map_or(0, |s| s.readers)
	}

	#[cfg(test)]
	pub fn write_held(&self, key: &str) -> bool {
		self.keys.lock().get(key).is_some_and(|s| s.write_held())
	}
}

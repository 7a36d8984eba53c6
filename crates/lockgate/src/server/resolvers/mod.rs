//! The four lock-type state machines.
//!
//! Each resolver owns the authoritative table for its flavor: a keyed map of
//! per-lock state behind a short mutex. `resolve_try_lock` and
//! `resolve_unlock` never suspend; `resolve_lock` may park on the key's
//! [`WaitList`](super::waitlist::WaitList) and is only ever invoked from a
//! pipeline worker, which serializes blocking acquires per key.

mod readwrite;
mod reentrant;
mod simple;
mod timeout;

pub(crate) use readwrite::ReadWriteResolver;
pub(crate) use reentrant::ReentrantResolver;
pub(crate) use simple::SimpleResolver;
pub(crate) use timeout::TimeoutResolver;

use crate::proto::{LockKind, LockRequest, LockResponse};
use crate::server::waitlist::WaitList;

/// Shared holder-slot state for the exclusive flavors.
///
/// `reserved` marks the window between an unlock firing a grant permit and
/// the woken waiter installing itself; while set, the slot counts as held.
#[derive(Debug, Default)]
pub(super) struct ExclusiveState {
	pub holder: Option<LockRequest>,
	pub reserved: bool,
	pub waiters: WaitList,
}

impl ExclusiveState {
	pub fn vacant(&self) -> bool {
		self.holder.is_none() && !self.reserved
	}

	pub fn idle(&self) -> bool {
		self.vacant() && self.waiters.is_empty()
	}
}

/// Aggregate of the four resolvers, routed by request kind.
pub(crate) struct Resolvers {
	simple: SimpleResolver,
	timeout: TimeoutResolver,
	reentrant: ReentrantResolver,
	read_write: ReadWriteResolver,
}

impl Resolvers {
	/// Must be called from within a tokio runtime: the timeout resolver
	/// spawns its expiration reaper task.
	pub fn new() -> Resolvers {
		Resolvers {
			simple: SimpleResolver::default(),
			timeout: TimeoutResolver::new(),
			reentrant: ReentrantResolver::default(),
			read_write: ReadWriteResolver::default(),
		}
	}

	pub fn resolve_try_lock(&self, req: &LockRequest) -> LockResponse {
		match req.kind {
			LockKind::Simple => self.simple.try_lock(req),
			LockKind::Timeout => self.timeout.try_lock(req),
			LockKind::Reentrant => self.reentrant.try_lock(req),
			LockKind::ReadWrite => self.read_write.try_lock(req),
		}
	}

	pub async fn resolve_lock(&self, req: &LockRequest) -> LockResponse {
		match req.kind {
			LockKind::Simple => self.simple.lock(req).await,
			LockKind::Timeout => self.timeout.lock(req).await,
			LockKind::Reentrant => self.reentrant.lock(req).await,
			LockKind::ReadWrite => self.read_write.lock(req).await,
		}
	}

	pub fn resolve_unlock(&self, req: &LockRequest) -> LockResponse {
		match req.kind {
			LockKind::Simple => self.simple.unlock(req),
			LockKind::Timeout => self.timeout.unlock(req),
			LockKind::Reentrant => self.reentrant.unlock(req),
			LockKind::ReadWrite => self.read_write.unlock(req),
		}
	}

	/// Inline resolution for a blocking acquire that must not queue: a
	/// reentrant re-acquire by the current owner. Other flavors never
	/// short-circuit.
	pub fn fast_path(&self, req: &LockRequest) -> Option<LockResponse> {
		match req.kind {
			LockKind::Reentrant => self.reentrant.reacquire(req),
			_ => None,
		}
	}
}

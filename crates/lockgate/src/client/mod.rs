//! Client-side correlation fabric: identity generation, pooled multiplexed
//! connections, and response rendezvous.
//!
//! Every call produces exactly one response in bounded time unless it is a
//! blocking acquire genuinely waiting its turn on the server. Transport
//! failures are surfaced in-band as a failed [`LockResponse`] with the same
//! identity, so callers never distinguish local from remote failure paths.

mod correlator;
mod identity;
mod pool;

use lock_core::prelude::*;
use tokio::sync::Semaphore;

use self::correlator::Correlator;
use self::identity::IdentityGen;
use self::pool::{Outbound, Pool};
use crate::config::ClientConfig;
use crate::proto::{LockKind, LockRequest, LockResponse, cause};

pub struct Client {
	application: String,
	admission: Arc<Semaphore>,
	correlator: Arc<Correlator>,
	pool: Pool,
	identities: IdentityGen,
}

impl Client {
	pub fn new(cfg: ClientConfig) -> Client {
		let correlator = Arc::new(Correlator::default());
		Client {
			admission: Arc::new(Semaphore::new(cfg.io_workers.max(1))),
			pool: Pool::new(&cfg, correlator.clone()),
			correlator,
			application: cfg.application,
			identities: IdentityGen::new(),
		}
	}

	/// Blocking acquire of a simple or reentrant lock.
	pub async fn lock(&self, kind: LockKind, key: &str, thread: &str) -> LockResponse {
		self
			.roundtrip(self.request(kind, key, thread, true, false, 0, false))
			.await
	}

	/// Non-blocking acquire of a simple or reentrant lock.
	pub async fn try_lock(&self, kind: LockKind, key: &str, thread: &str) -> LockResponse {
		self
			.roundtrip(self.request(kind, key, thread, true, true, 0, false))
			.await
	}

	pub async fn unlock(&self, kind: LockKind, key: &str, thread: &str) -> LockResponse {
		self
			.roundtrip(self.request(kind, key, thread, false, false, 0, false))
			.await
	}

	/// Blocking acquire of a time-expiring lock; the server reaps the lock
	/// `ttl` after the grant unless it is released first.
	pub async fn lock_with_ttl(&self, key: &str, thread: &str, ttl: Duration) -> LockResponse {
		let time = ttl.as_millis().min(i64::MAX as u128) as i64;
		self
			.roundtrip(self.request(LockKind::Timeout, key, thread, true, false, time, false))
			.await
	}

	pub async fn try_lock_with_ttl(&self, key: &str, thread: &str, ttl: Duration) -> LockResponse {
		let time = ttl.as_millis().min(i64::MAX as u128) as i64;
		self
			.roundtrip(self.request(LockKind::Timeout, key, thread, true, true, time, false))
			.await
	}

	pub async fn read_lock(&self, key: &str, thread: &str) -> LockResponse {
		self
			.roundtrip(self.request(LockKind::ReadWrite, key, thread, true, false, 0, true))
			.await
	}

	pub async fn try_read_lock(&self, key: &str, thread: &str) -> LockResponse {
		self
			.roundtrip(self.request(LockKind::ReadWrite, key, thread, true, true, 0, true))
			.await
	}

	pub async fn read_unlock(&self, key: &str, thread: &str) -> LockResponse {
		self
			.roundtrip(self.request(LockKind::ReadWrite, key, thread, false, false, 0, true))
			.await
	}

	pub async fn write_lock(&self, key: &str, thread: &str) -> LockResponse {
		self
			.roundtrip(self.request(LockKind::ReadWrite, key, thread, true, false, 0, false))
			.await
	}

	pub async fn try_write_lock(&self, key: &str, thread: &str) -> LockResponse {
		self
			.roundtrip(self.request(LockKind::ReadWrite, key, thread, true, true, 0, false))
			.await
	}

	pub async fn write_unlock(&self, key: &str, thread: &str) -> LockResponse {
		self
			.roundtrip(self.request(LockKind::ReadWrite, key, thread, false, false, 0, false))
			.await
	}

	fn request(
		&self,
		kind: LockKind,
		key: &str,
		thread: &str,
		is_lock: bool,
		try_lock: bool,
		time: i64,
		read_lock: bool,
	) -> LockRequest {
		LockRequest {
			key: key.to_string(),
			application: self.application.clone(),
			thread: thread.to_string(),
			kind,
			is_lock,
			try_lock,
			time,
			read_lock,
			identity: self.identities.next(),
		}
	}

	async fn roundtrip(&self, request: LockRequest) -> LockResponse {
		// Validation failures never cross the wire.
		if request.key.is_empty() {
			return LockResponse::denied(&request, cause::EMPTY_KEY);
		}
		let permit = self
			.admission
			.clone()
			.acquire_owned()
			.await
			.expect("admission semaphore is never closed");
		let identity = request.identity;
		let key = request.key.clone();
		let is_lock = request.is_lock;
		let rx = self.correlator.register(identity);
		if !self.pool.send(Outbound { request, permit }).await {
			self.correlator.fail(identity, &key, is_lock);
		}
		match rx.await {
			Ok(response) => response,
			// The completion slot vanished; surface the same in-band shape.
			Err(_) => LockResponse {
				key,
				identity,
				success: false,
				cause: cause::connection_failed(identity),
				is_lock_response: !is_lock,
			},
		}
	}
}

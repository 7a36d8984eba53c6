//! Per-key serialization of blocking acquires.
//!
//! Each `(kind, lane, key)` under blocking contention gets one FIFO queue
//! and one worker draining it, created lazily on first enqueue and retired
//! after an idle grace period so memory tracks contention, not key
//! cardinality. The ReadWrite flavor uses two lanes per key so a write
//! release can batch-admit readers independently of the writer queue.

use std::collections::HashMap;

use lock_core::prelude::*;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::resolvers::Resolvers;
use crate::proto::{LockKind, LockRequest, LockResponse};

pub(crate) type ResponseTx = mpsc::UnboundedSender<LockResponse>;

/// A blocking lock request together with the originating connection's
/// response channel.
pub(crate) struct Envelope {
	pub request: LockRequest,
	pub respond: ResponseTx,
}

#[derive(Clone)]
pub(crate) struct Pipelines {
	inner: Arc<Inner>,
}

struct Inner {
	resolvers: Arc<Resolvers>,
	idle: Duration,
	registry: Mutex<HashMap<PipelineKey, mpsc::UnboundedSender<Envelope>>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PipelineKey {
	kind: LockKind,
	lane: Lane,
	key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Lane {
	Exclusive,
	Read,
	Write,
}

fn lane_of(request: &LockRequest) -> Lane {
	match request.kind {
		LockKind::ReadWrite if request.read_lock => Lane::Read,
		LockKind::ReadWrite => Lane::Write,
		_ => Lane::Exclusive,
	}
}

impl Pipelines {
	pub fn new(resolvers: Arc<Resolvers>, idle: Duration) -> Pipelines {
		Pipelines {
			inner: Arc::new(Inner {
				resolvers,
				idle,
				registry: Mutex::new(HashMap::new()),
			}),
		}
	}

	pub fn enqueue(&self, env: Envelope) {
		// A re-acquire by the current owner must not queue behind foreign
		// waiters: it would deadlock on itself.
		if let Some(resp) = self.inner.resolvers.fast_path(&env.request) {
			let _ = env.respond.send(resp);
			return;
		}
		let key = PipelineKey {
			kind: env.request.kind,
			lane: lane_of(&env.request),
			key: env.request.key.clone(),
		};
		let mut env = env;
		loop {
			// Sends happen under the registry lock: the worker settles the
			// retire-vs-enqueue race by re-checking its queue under the same
			// lock before removing itself.
			let mut registry = self.inner.registry.lock();
			let tx = registry.entry(key.clone()).or_insert_with(|| {
				let (tx, rx) = mpsc::unbounded_channel();
				tokio::spawn(worker(self.inner.clone(), key.clone(), rx));
				tx
			});
			match tx.send(env) {
				Ok(()) => return,
				Err(mpsc::error::SendError(returned)) => {
					// The worker retired between our lookup and the send;
					// replace the entry and try again.
					registry.remove(&key);
					env = returned;
				},
			}
		}
	}

	#[cfg(test)]
	pub fn live_workers(&self) -> usize {
		self.inner.registry.lock().len()
	}
}

async fn worker(inner: Arc<Inner>, key: PipelineKey, mut rx: mpsc::UnboundedReceiver<Envelope>) {
	trace!(key = %key.key, kind = %key.kind, "pipeline worker started");
	loop {
		match tokio::time::timeout(inner.idle, rx.recv()).await {
			Ok(Some(env)) => serve(&inner, env).await,
			Ok(None) => break,
			Err(_) => {
				let mut registry = inner.registry.lock();
				match rx.try_recv() {
					Ok(env) => {
						drop(registry);
						serve(&inner, env).await;
					},
					Err(_) => {
						registry.remove(&key);
						break;
					},
				}
			},
		}
	}
	trace!(key = %key.key, kind = %key.kind, "pipeline worker retired");
}

async fn serve(inner: &Inner, env: Envelope) {
	let resp = inner.resolvers.resolve_lock(&env.request).await;
	if env.respond.send(resp).is_err() {
		debug!(
			key = %env.request.key,
			identity = env.request.identity,
			"connection closed before the grant could be delivered"
		);
	}
}

use lock_core::prelude::*;

use super::pipeline::{Envelope, Pipelines, ResponseTx};
use super::resolvers::Resolvers;
use crate::proto::{LockRequest, LockResponse, cause};

/// Inbound router. Non-blocking operations (`try_lock`, `unlock`) resolve
/// synchronously on the calling task: they only take short critical
/// sections, so connections stay independent without a worker-pool hop and
/// per-connection receive order is preserved. Blocking acquires go through
/// the per-key pipelines.
#[derive(Clone)]
pub(crate) struct Dispatcher {
	resolvers: Arc<Resolvers>,
	pipelines: Pipelines,
}

impl Dispatcher {
	/// Must be called from within a tokio runtime (spawns the expiration
	/// reaper).
	pub fn new(pipeline_idle: Duration) -> Dispatcher {
		let resolvers = Arc::new(Resolvers::new());
		Dispatcher {
			pipelines: Pipelines::new(resolvers.clone(), pipeline_idle),
			resolvers,
		}
	}

	pub fn dispatch(&self, request: LockRequest, respond: ResponseTx) {
		if request.key.is_empty() {
			let _ = respond.send(LockResponse::denied(&request, cause::EMPTY_KEY));
			return;
		}
		debug!(
			key = %request.key,
			kind = %request.kind,
			is_lock = request.is_lock,
			try_lock = request.try_lock,
			identity = request.identity,
			"dispatch"
		);
		if !request.is_lock {
			let _ = respond.send(self.resolvers.resolve_unlock(&request));
		} else if request.try_lock {
			let _ = respond.send(self.resolvers.resolve_try_lock(&request));
		} else {
			self.pipelines.enqueue(Envelope { request, respond });
		}
	}
}

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures_util::{SinkExt, StreamExt};
use lock_core::prelude::*;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::{Mutex, OwnedSemaphorePermit};
use tokio_util::codec::{FramedRead, FramedWrite};

use super::correlator::Correlator;
use crate::config::ClientConfig;
use crate::proto::{ClientCodec, LockRequest};

/// A request queued for the wire, carrying its admission permit. The permit
/// is released once the frame has been written, not when the response
/// returns: in-flight writes are what the admission bound limits.
pub(crate) struct Outbound {
	pub request: LockRequest,
	pub permit: OwnedSemaphorePermit,
}

/// Fixed-size pool of long-lived multiplexed connections.
///
/// Writes go to any live connection (round-robin); responses come back on
/// whichever connection carried the request and are routed by identity, so
/// slots are interchangeable. Dead slots are redialed lazily on next use;
/// when no connection can be obtained the send fails fast and the caller
/// synthesizes a transport failure.
pub(crate) struct Pool {
	target: String,
	slots: Vec<Mutex<Option<ConnHandle>>>,
	next: AtomicUsize,
	correlator: Arc<Correlator>,
}

#[derive(Clone)]
struct ConnHandle {
	tx: mpsc::UnboundedSender<Outbound>,
}

impl Pool {
	pub fn new(cfg: &ClientConfig, correlator: Arc<Correlator>) -> Pool {
		Pool {
			target: format!("{}:{}", cfg.host, cfg.port),
			slots: (0..cfg.connections.max(1)).map(|_| Mutex::new(None)).collect(),
			next: AtomicUsize::new(0),
			correlator,
		}
	}

	/// Hands the request to a live connection. Returns false when every slot
	/// is unusable; the request was not sent and the permit is released.
	pub async fn send(&self, mut out: Outbound) -> bool {
		for _ in 0..self.slots.len() {
			let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.slots.len();
			let handle = match self.checkout(idx).await {
				Some(handle) => handle,
				None => continue,
			};
			match handle.tx.send(out) {
				Ok(()) => return true,
				Err(mpsc::error::SendError(returned)) => {
					// The connection task exited since checkout; clear the
					// slot and move on to the next one.
					debug!(slot = idx, "connection died between checkout and send");
					self.slots[idx].lock().await.take();
					out = returned;
				},
			}
		}
		false
	}

	/// Returns the slot's live handle, dialing a fresh connection if the
	/// slot is empty or its task has exited. The per-slot mutex serializes
	/// dial attempts so a burst of senders does not open duplicate sockets.
	async fn checkout(&self, idx: usize) -> Option<ConnHandle> {
		let mut slot = self.slots[idx].lock().await;
		if let Some(handle) = slot.as_ref() {
			if !handle.tx.is_closed() {
				return Some(handle.clone());
			}
		}
		match TcpStream::connect(&self.target).await {
			Ok(stream) => {
				debug!(slot = idx, target = %self.target, "connection established");
				let (tx, rx) = mpsc::unbounded_channel();
				tokio::spawn(drive(stream, rx, self.correlator.clone()));
				let handle = ConnHandle { tx };
				*slot = Some(handle.clone());
				Some(handle)
			},
			Err(e) => {
				debug!(slot = idx, target = %self.target, err = %e, "connect failed");
				*slot = None;
				None
			},
		}
	}
}

/// Drives one connection: writes queued requests, routes responses through
/// the correlator, and on death fails every request still in flight on this
/// connection so callers never hang on a vanished peer.
async fn drive(
	stream: TcpStream,
	mut outbound: mpsc::UnboundedReceiver<Outbound>,
	correlator: Arc<Correlator>,
) {
	if let Err(e) = stream.set_nodelay(true) {
		debug!(err = %e, "failed to set nodelay");
	}
	let (read_half, write_half) = stream.into_split();
	let mut responses = FramedRead::new(read_half, ClientCodec);
	let mut requests = FramedWrite::new(write_half, ClientCodec);
	// identity -> (key, is_lock), for synthesizing failures on death.
	let mut in_flight: HashMap<i64, (String, bool)> = HashMap::new();

	loop {
		tokio::select! {
			out = outbound.recv() => match out {
				Some(Outbound { request, permit }) => {
					let identity = request.identity;
					let meta = (request.key.clone(), request.is_lock);
					let written = requests.send(request).await;
					drop(permit);
					match written {
						Ok(()) => {
							in_flight.insert(identity, meta);
						},
						Err(e) => {
							debug!(err = %e, "request write failed");
							correlator.fail(identity, &meta.0, meta.1);
							break;
						},
					}
				},
				None => break,
			},
			resp = responses.next() => match resp {
				Some(Ok(resp)) => {
					in_flight.remove(&resp.identity);
					correlator.complete(resp);
				},
				Some(Err(e)) => {
					warn!(err = %e, "response decode failed; dropping connection");
					break;
				},
				None => {
					debug!("server closed connection");
					break;
				},
			},
		}
	}

	for (identity, (key, is_lock)) in in_flight {
		correlator.fail(identity, &key, is_lock);
	}
	// Requests queued but never written get the same treatment.
	outbound.close();
	while let Ok(Outbound { request, permit }) = outbound.try_recv() {
		drop(permit);
		correlator.fail(request.identity, &request.key, request.is_lock);
	}
}

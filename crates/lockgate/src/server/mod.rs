//! Server frontend: accept loop and per-connection plumbing.

mod dispatcher;
mod pipeline;
mod resolvers;
mod waitlist;

use futures_util::{SinkExt, StreamExt};
use lock_core::drain::DrainWatcher;
use lock_core::prelude::*;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpSocket, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::info_span;

use self::dispatcher::Dispatcher;
use crate::config::ServerConfig;
use crate::proto::{LockResponse, ServerCodec};

pub struct Server {
	local_addr: SocketAddr,
	listener: tokio::net::TcpListener,
	dispatcher: Dispatcher,
}

impl Server {
	/// Binds the listener with the configured backlog. Must be called from
	/// within a tokio runtime. Port 0 binds an ephemeral port; the effective
	/// address is available via [`Server::local_addr`].
	pub fn bind(cfg: &ServerConfig) -> anyhow::Result<Server> {
		let addr = SocketAddr::new(cfg.bind, cfg.port);
		let socket = if addr.is_ipv4() {
			TcpSocket::new_v4()?
		} else {
			TcpSocket::new_v6()?
		};
		socket
			.bind(addr)
			.with_context(|| format!("failed to bind {addr}"))?;
		let listener = socket
			.listen(cfg.backlog)
			.with_context(|| format!("failed to listen on {addr}"))?;
		let local_addr = listener.local_addr()?;
		info!(addr = %local_addr, backlog = cfg.backlog, "lock server listening");
		Ok(Server {
			local_addr,
			listener,
			dispatcher: Dispatcher::new(cfg.pipeline_idle),
		})
	}

	pub fn local_addr(&self) -> SocketAddr {
		self.local_addr
	}

	/// Accepts connections until a drain is signaled. Existing connections
	/// are not torn down by the drain: locks they hold stay held until the
	/// process exits.
	pub async fn run(self, drain: DrainWatcher) {
		let Server {
			listener,
			dispatcher,
			..
		} = self;
		let wait = drain.wait_for_drain();
		tokio::pin!(wait);
		loop {
			tokio::select! {
				res = listener.accept() => match res {
					Ok((stream, peer)) => {
						let dispatcher = dispatcher.clone();
						tokio::spawn(
							handle_connection(dispatcher, stream, peer)
								.instrument(info_span!("conn", %peer)),
						);
					},
					Err(e) => {
						warn!(err = %e, "accept failed");
					},
				},
				_release = &mut wait => {
					info!("drain started; no longer accepting connections");
					return;
				}
			}
		}
	}
}

async fn handle_connection(dispatcher: Dispatcher, stream: TcpStream, peer: SocketAddr) {
	debug!("connection started");
	if let Err(e) = stream.set_nodelay(true) {
		debug!(err = %e, "failed to set nodelay");
	}
	let (read_half, write_half) = stream.into_split();
	let mut requests = FramedRead::new(read_half, ServerCodec);
	let (respond, respond_rx) = mpsc::unbounded_channel();
	// One writer task per connection: grants produced by pipeline workers
	// and inline acks share the same ordered sink.
	tokio::spawn(write_responses(
		FramedWrite::new(write_half, ServerCodec),
		respond_rx,
	));

	while let Some(next) = requests.next().await {
		match next {
			Ok(request) => dispatcher.dispatch(request, respond.clone()),
			Err(e) => {
				warn!(%peer, err = %e, "closing connection on protocol error");
				break;
			},
		}
	}
	// The writer drains once every outstanding grant for this connection has
	// been resolved and its sender dropped.
	debug!("connection closed");
}

async fn write_responses(
	mut sink: FramedWrite<OwnedWriteHalf, ServerCodec>,
	mut responses: mpsc::UnboundedReceiver<LockResponse>,
) {
	while let Some(resp) = responses.recv().await {
		if let Err(e) = sink.send(resp).await {
			// The peer is gone; late grants are dropped on the floor and the
			// locks they represent stay held (disconnect releases nothing).
			debug!(err = %e, "response write failed");
			break;
		}
	}
}

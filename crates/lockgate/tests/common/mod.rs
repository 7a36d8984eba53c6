use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use lock_core::drain;
use lockgate::{Client, ClientConfig, Server, ServerConfig};

/// A real server on an ephemeral port, running in-process for the duration
/// of a test.
pub struct TestServer {
	addr: SocketAddr,
	// Dropping the trigger would release the accept loop's drain watcher, so
	// it is held for the server's lifetime.
	_drain_tx: drain::DrainTrigger,
	task: tokio::task::JoinHandle<()>,
}

impl TestServer {
	pub async fn start() -> TestServer {
		lock_core::telemetry::testing::setup_test_logging();
		let cfg = ServerConfig {
			bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
			port: 0,
			..Default::default()
		};
		let server = Server::bind(&cfg).expect("bind ephemeral port");
		let addr = server.local_addr();
		let (_drain_tx, drain_rx) = drain::new();
		let task = tokio::spawn(server.run(drain_rx));
		TestServer {
			addr,
			_drain_tx,
			task,
		}
	}

	pub fn addr(&self) -> SocketAddr {
		self.addr
	}

	pub fn client(&self, application: &str) -> Client {
		self.client_with(application, |_| {})
	}

	pub fn client_with(&self, application: &str, tweak: impl FnOnce(&mut ClientConfig)) -> Client {
		let mut cfg = ClientConfig {
			host: self.addr.ip().to_string(),
			port: self.addr.port(),
			application: application.to_string(),
			..Default::default()
		};
		tweak(&mut cfg);
		Client::new(cfg)
	}

	/// Tears the listener down, freeing the port.
	pub fn stop(self) {
		self.task.abort();
	}
}

impl Drop for TestServer {
	fn drop(&mut self) {
		self.task.abort();
	}
}

// Originally derived from https://github.com/istio/ztunnel (Apache 2.0 licensed)

use std::env;
use std::sync::LazyLock;
use std::time::Instant;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

pub static APPLICATION_START_TIME: LazyLock<Instant> = LazyLock::new(Instant::now);

/// Installs the global tracing subscriber: an env-filtered fmt layer writing
/// through a non-blocking appender. The returned guard must be held for the
/// lifetime of the process so buffered log lines are flushed on exit.
pub fn setup_logging() -> tracing_appender::non_blocking::WorkerGuard {
	LazyLock::force(&APPLICATION_START_TIME);
	let (non_blocking, guard) = tracing_appender::non_blocking(std::io::stdout());
	tracing_subscriber::registry()
		.with(default_filter())
		.with(
			tracing_subscriber::fmt::layer()
				.with_writer(non_blocking)
				.with_target(true),
		)
		.init();
	guard
}

fn default_filter() -> EnvFilter {
	// RUST_LOG wins; default to info.
	let filter = env::var(EnvFilter::DEFAULT_ENV).unwrap_or_else(|_| "info".to_string());
	EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"))
}

pub mod testing {
	use std::sync::atomic::{AtomicBool, Ordering};

	use tracing_subscriber::prelude::*;

	use super::default_filter;

	static INITIALIZED: AtomicBool = AtomicBool::new(false);

	/// Test-friendly logging setup: installs a stderr subscriber once,
	/// silently doing nothing on repeat calls so every test can invoke it.
	pub fn setup_test_logging() {
		if INITIALIZED.swap(true, Ordering::SeqCst) {
			return;
		}
		let _ = tracing_subscriber::registry()
			.with(default_filter())
			.with(tracing_subscriber::fmt::layer().with_test_writer())
			.try_init();
	}
}

//! Server and client configuration.
//!
//! The server reads an optional JSON document, then applies `LOCKGATE_*`
//! environment overrides; CLI flags are applied on top by the binary.

use std::env;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 40417;
pub const DEFAULT_BACKLOG: u32 = 1024;

/// How long a pipeline worker waits on an empty queue before retiring.
const DEFAULT_PIPELINE_IDLE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Serialize)]
pub struct ServerConfig {
	pub bind: IpAddr,
	pub port: u16,
	pub backlog: u32,
	pub pipeline_idle: Duration,
}

impl Default for ServerConfig {
	fn default() -> Self {
		ServerConfig {
			bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
			port: DEFAULT_PORT,
			backlog: DEFAULT_BACKLOG,
			pipeline_idle: DEFAULT_PIPELINE_IDLE,
		}
	}
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawServerConfig {
	bind: Option<IpAddr>,
	port: Option<u16>,
	backlog: Option<u32>,
	pipeline_idle_ms: Option<u64>,
}

/// Builds the effective server config from an optional JSON document plus
/// environment overrides.
pub fn parse_server_config(contents: Option<String>) -> anyhow::Result<ServerConfig> {
	let raw: RawServerConfig = match contents {
		Some(contents) => serde_json::from_str(&contents).context("invalid config document")?,
		None => Default::default(),
	};
	let defaults = ServerConfig::default();
	Ok(ServerConfig {
		bind: parse("LOCKGATE_BIND")?.or(raw.bind).unwrap_or(defaults.bind),
		port: parse("LOCKGATE_PORT")?.or(raw.port).unwrap_or(defaults.port),
		backlog: parse("LOCKGATE_BACKLOG")?
			.or(raw.backlog)
			.unwrap_or(defaults.backlog),
		pipeline_idle: parse("LOCKGATE_PIPELINE_IDLE_MS")?
			.or(raw.pipeline_idle_ms)
			.map(Duration::from_millis)
			.unwrap_or(defaults.pipeline_idle),
	})
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
	pub host: String,
	pub port: u16,
	/// Number of pooled connections.
	pub connections: usize,
	/// Admission bound: how many requests may be in flight on the wire.
	pub io_workers: usize,
	/// Opaque label identifying this client in requests.
	pub application: String,
}

impl Default for ClientConfig {
	fn default() -> Self {
		ClientConfig {
			host: "127.0.0.1".to_string(),
			port: DEFAULT_PORT,
			connections: 4,
			io_workers: 4,
			application: "lockgate-client".to_string(),
		}
	}
}

fn parse<T: FromStr>(name: &str) -> anyhow::Result<Option<T>>
where
	<T as FromStr>::Err: std::error::Error + Send + Sync + 'static,
{
	match env::var(name) {
		Ok(val) if !val.is_empty() => val
			.parse::<T>()
			.map(Some)
			.with_context(|| format!("invalid {name}={val}")),
		_ => Ok(None),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_apply_without_a_document() {
		let cfg = parse_server_config(None).unwrap();
		assert_eq!(cfg.port, DEFAULT_PORT);
		assert_eq!(cfg.backlog, DEFAULT_BACKLOG);
		assert_eq!(cfg.pipeline_idle, Duration::from_secs(1));
	}

	#[test]
	fn document_overrides_defaults() {
		let cfg = parse_server_config(Some(
			r#"{"port": 9000, "backlog": 16, "pipeline_idle_ms": 250}"#.to_string(),
		))
		.unwrap();
		assert_eq!(cfg.port, 9000);
		assert_eq!(cfg.backlog, 16);
		assert_eq!(cfg.pipeline_idle, Duration::from_millis(250));
	}

	#[test]
	fn unknown_fields_are_rejected() {
		assert!(parse_server_config(Some(r#"{"prot": 9000}"#.to_string())).is_err());
	}
}

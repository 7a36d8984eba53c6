use std::path::PathBuf;

use clap::Parser;
use lock_core::{telemetry, version};
use lockgate::ServerConfig;
use tracing::info;

#[derive(Parser, Debug)]
#[command(about, long_about = None)]
struct Args {
	/// Port to listen on.
	#[arg(long, value_name = "port")]
	port: Option<u16>,

	/// TCP accept backlog.
	#[arg(long, value_name = "backlog")]
	backlog: Option<u32>,

	/// Use config from file (JSON).
	#[arg(short, long, value_name = "file")]
	file: Option<PathBuf>,

	/// Print version.
	#[arg(short = 'V', long = "version")]
	version: bool,
}

fn main() -> anyhow::Result<()> {
	let _log_flush = telemetry::setup_logging();

	let args = Args::parse();
	if args.version {
		println!("{}", version::BuildInfo::new());
		return Ok(());
	}

	tokio::runtime::Builder::new_multi_thread()
		.enable_all()
		.build()
		.expect("failed to build runtime")
		.block_on(async move {
			let contents = args.file.map(std::fs::read_to_string).transpose()?;
			let mut config = lockgate::config::parse_server_config(contents)?;
			if let Some(port) = args.port {
				config.port = port;
			}
			if let Some(backlog) = args.backlog {
				config.backlog = backlog;
			}
			serve(config).await
		})
}

async fn serve(config: ServerConfig) -> anyhow::Result<()> {
	info!("version: {}", version::BuildInfo::new());
	info!("running with config: {}", serde_json::to_string(&config)?);

	// A bind failure propagates out of main for a non-zero exit.
	lockgate::app::run(config).await?.wait_termination().await
}

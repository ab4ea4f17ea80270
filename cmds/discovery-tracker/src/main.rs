//! Runs an API resource tracker against a cluster and reports every change.

use std::{path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use discovery_tracker::{ClusterConfig, Tracker, TrackerConfig};
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};

mod telemetry;

#[derive(Parser)]
#[command(name = "discovery-tracker")]
#[command(about = "Track the API resource types served by a Kubernetes cluster")]
struct Cli {
	/// Kubeconfig context to use (defaults to the current context)
	#[arg(long)]
	context: Option<String>,

	/// YAML file with tracker settings
	#[arg(short = 'c', long)]
	config: Option<PathBuf>,

	/// Seconds between full discovery queries (overrides the config file)
	#[arg(long)]
	resync_interval: Option<u64>,

	/// Seconds between full rescans that also refresh known definitions
	/// (overrides the config file)
	#[arg(long)]
	full_resync_interval: Option<u64>,

	/// Log level (trace, debug, info, warn, error); defaults to $RUST_LOG or info
	#[arg(long)]
	log_level: Option<Level>,

	/// Print the snapshot as JSON on stdout whenever it changes
	#[arg(long)]
	print: bool,
}

impl Cli {
	fn tracker_config(&self) -> Result<TrackerConfig> {
		let mut config = match &self.config {
			Some(path) => TrackerConfig::load_from_file(path)?,
			None => TrackerConfig::default(),
		};
		if let Some(secs) = self.resync_interval {
			config.resync_interval = Duration::from_secs(secs);
		}
		if let Some(secs) = self.full_resync_interval {
			config.full_resync_interval = Duration::from_secs(secs);
		}
		config.validate()?;
		Ok(config)
	}
}

#[tokio::main]
async fn main() -> Result<()> {
	let cli = Cli::parse();
	telemetry::init(cli.log_level);

	let config = cli.tracker_config()?;
	let cluster = ClusterConfig {
		context: cli.context.clone(),
		..ClusterConfig::default()
	};

	let tracker = Tracker::connect(&cluster, config)
		.await
		.context("connecting to cluster")?;

	let reader = tracker.clone();
	let print = cli.print;
	tracker.add_signal_func(move || {
		let snapshot = reader.api_resources()?;
		info!(
			group_versions = snapshot.len(),
			resources = snapshot.resource_count(),
			"API resources changed"
		);
		if print {
			println!("{}", serde_json::to_string(&snapshot)?);
		}
		Ok(())
	});

	let shutdown = CancellationToken::new();
	let on_signal = shutdown.clone();
	tokio::spawn(async move {
		if tokio::signal::ctrl_c().await.is_ok() {
			info!("shutting down");
		}
		on_signal.cancel();
	});

	tracker.start(shutdown).await.context("running tracker")?;
	Ok(())
}

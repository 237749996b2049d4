//! Main entry point for the orderflow service.
//!
//! This binary runs the complete order execution pipeline: it admits
//! trade orders over HTTP, executes them asynchronously against the
//! configured liquidity venues, and reports live progress to WebSocket
//! subscribers while durably recording history.

use clap::Parser;
use orderflow_config::Config;
use orderflow_core::{Pipeline, PipelineBuilder, PipelineError};
use std::path::PathBuf;
use std::sync::Arc;

mod server;

// Import implementations from individual crates
use orderflow_router::implementations::simulated::create_venue;
use orderflow_storage::implementations::file::create_history as create_file_history;
use orderflow_storage::implementations::memory::create_history as create_memory_history;

/// Command-line arguments for the orderflow service.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
	/// Path to configuration file
	#[arg(short, long, default_value = "config.toml")]
	config: PathBuf,

	/// Log level (trace, debug, info, warn, error)
	#[arg(short, long, default_value = "info")]
	log_level: String,
}

/// Main entry point for the orderflow service.
///
/// This function:
/// 1. Parses command-line arguments
/// 2. Initializes logging infrastructure
/// 3. Loads configuration from file
/// 4. Builds the pipeline with all implementations
/// 5. Serves the API until interrupted
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	// Initialize tracing with env filter
	use tracing_subscriber::{fmt, EnvFilter};

	let default_directive = args.log_level.to_string();
	let env_filter =
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

	fmt()
		.with_env_filter(env_filter)
		.with_thread_ids(true)
		.with_target(true)
		.init();

	tracing::info!("Started orderflow");

	// Load configuration
	let config = Config::from_file(&args.config.to_string_lossy()).await?;
	tracing::info!("Loaded configuration");

	// Build the pipeline with implementations and start the worker pool
	let pipeline = Arc::new(build_pipeline(config.clone())?);
	pipeline.start().await;

	// Periodic sweep of expired cache entries, the TTL safety net for
	// entries orphaned by a crash between dual-store writes.
	let cleanup_pipeline = Arc::clone(&pipeline);
	let cleanup_interval = config.storage.cleanup_interval();
	tokio::spawn(async move {
		let mut ticker = tokio::time::interval(cleanup_interval);
		ticker.tick().await; // the first tick completes immediately
		loop {
			ticker.tick().await;
			if let Err(e) = cleanup_pipeline.cleanup_expired().await {
				tracing::warn!(error = %e, "Cache cleanup failed");
			}
		}
	});

	// Serve the API until it stops or the process is interrupted
	let server_task = server::start_server(config.server.clone(), Arc::clone(&pipeline));
	tokio::select! {
		result = server_task => {
			tracing::info!("API server finished");
			result?;
		}
		_ = tokio::signal::ctrl_c() => {
			tracing::info!("Shutting down gracefully");
		}
	}

	pipeline.shutdown().await;
	tracing::info!("Stopped orderflow");
	Ok(())
}

/// Builds the pipeline with all necessary implementations.
///
/// This function wires up the concrete implementations for the durable
/// history backends and the liquidity venues; the configuration selects
/// which of them are used.
fn build_pipeline(config: Config) -> Result<Pipeline, PipelineError> {
	PipelineBuilder::new(config)
		.with_history_factory("memory", create_memory_history)
		.with_history_factory("file", create_file_history)
		.with_venue_factory("simulated", create_venue)
		.build()
}

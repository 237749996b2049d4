//! Core engine for the orderflow pipeline.
//!
//! This module wires the job queue, the dual-store layer, the liquidity
//! router and the broadcaster into one engine, and provides the builder
//! used to assemble it from configuration with pluggable backend
//! implementations.

use async_trait::async_trait;
use orderflow_broadcast::Broadcaster;
use orderflow_config::Config;
use orderflow_queue::{JobError, JobExecutor, JobQueue, QueueError, QueueOptions};
use orderflow_router::{RouterService, VenueFactory, VenueInterface};
use orderflow_storage::implementations::memory::MemoryCache;
use orderflow_storage::{HistoryFactory, StorageError, StoreService};
use orderflow_types::{truncate_id, Order, OrderRequest, OrderStatus, QueueMetrics};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

pub mod executor;

use executor::ExecutionPipeline;

/// Errors that can occur during pipeline operations.
#[derive(Debug, Error)]
pub enum PipelineError {
	/// Error related to configuration issues.
	#[error("Configuration error: {0}")]
	Config(String),
	/// Error from the dual-store layer.
	#[error("Storage error: {0}")]
	Storage(#[from] StorageError),
	/// Error from the job queue.
	#[error("Queue error: {0}")]
	Queue(#[from] QueueError),
	/// Error while gathering quotes.
	#[error("Routing failed: {0}")]
	Routing(String),
	/// A limit order's price requirement was not met by the quote.
	#[error("Limit price not met. Required: {required}, Got: {achieved}")]
	LimitNotMet {
		required: Decimal,
		achieved: Decimal,
	},
	/// Error while submitting the swap.
	#[error("Submission failed: {0}")]
	Submission(String),
	/// A status transition that the state machine forbids.
	#[error("Invalid status transition: {from} -> {to}")]
	InvalidTransition {
		from: OrderStatus,
		to: OrderStatus,
	},
	/// An external capability call exceeded its deadline.
	#[error("{operation} timed out after {timeout_ms}ms")]
	Timeout {
		operation: &'static str,
		timeout_ms: u64,
	},
}

/// Adapter running the execution state machine as the queue's executor.
struct QueueAdapter {
	executor: ExecutionPipeline,
}

#[async_trait]
impl JobExecutor for QueueAdapter {
	async fn execute(&self, order: Order, attempt: u32) -> Result<(), JobError> {
		self.executor
			.execute(order, attempt)
			.await
			.map_err(|e| JobError(e.to_string()))
	}
}

/// The order execution engine.
///
/// Admits validated submissions, schedules them through the job queue,
/// and exposes lookups, queue metrics and the subscription feed.
pub struct Pipeline {
	store: Arc<StoreService>,
	queue: Arc<JobQueue>,
	broadcaster: Broadcaster,
}

impl Pipeline {
	/// Admits a validated submission into the pipeline.
	///
	/// Assigns the order id, persists the admission record in both
	/// stores, and enqueues exactly one job for it.
	pub async fn submit(&self, request: OrderRequest) -> Result<Order, PipelineError> {
		let order = Order::from_request(request);
		tracing::info!(
			order_id = %truncate_id(&order.order_id),
			kind = %order.kind,
			"Order admitted"
		);

		self.store.record(&order).await?;
		self.queue.enqueue(order.clone())?;
		Ok(order)
	}

	/// Looks up the current snapshot of an order, cache first.
	pub async fn order(&self, order_id: &str) -> Result<Option<Order>, PipelineError> {
		Ok(self.store.lookup(order_id).await?)
	}

	/// Queue metrics as of this call.
	pub fn metrics(&self) -> QueueMetrics {
		self.queue.metrics()
	}

	/// The broadcaster carrying the status-event feed.
	pub fn broadcaster(&self) -> &Broadcaster {
		&self.broadcaster
	}

	/// Direct access to the dual-store layer.
	pub fn store(&self) -> &Arc<StoreService> {
		&self.store
	}

	/// Starts the worker pool.
	pub async fn start(&self) {
		self.queue.run().await;
	}

	/// Sweeps expired cache entries, returning the number removed.
	pub async fn cleanup_expired(&self) -> Result<usize, PipelineError> {
		Ok(self.store.cleanup_expired().await?)
	}

	/// Stops intake, drains in-flight executions and releases all
	/// subscribers.
	pub async fn shutdown(&self) {
		self.queue.close().await;
		self.broadcaster.close();
	}
}

/// Builder for constructing a Pipeline with pluggable implementations.
///
/// Factories are registered per backend or venue kind and selected by
/// the configuration, so different storage backends and venue
/// implementations can be plugged in without touching the engine.
pub struct PipelineBuilder {
	config: Config,
	history_factories: HashMap<String, HistoryFactory>,
	venue_factories: HashMap<String, VenueFactory>,
}

impl PipelineBuilder {
	/// Creates a new PipelineBuilder with the given configuration.
	pub fn new(config: Config) -> Self {
		Self {
			config,
			history_factories: HashMap::new(),
			venue_factories: HashMap::new(),
		}
	}

	/// Registers a factory for a durable history backend.
	///
	/// The name must match the `storage.backend` configuration value.
	pub fn with_history_factory(mut self, name: &str, factory: HistoryFactory) -> Self {
		self.history_factories.insert(name.to_string(), factory);
		self
	}

	/// Registers a factory for a venue implementation kind.
	///
	/// The name must match the `kind` field of venue configurations.
	pub fn with_venue_factory(mut self, kind: &str, factory: VenueFactory) -> Self {
		self.venue_factories.insert(kind.to_string(), factory);
		self
	}

	/// Builds the Pipeline using the configured factories.
	pub fn build(self) -> Result<Pipeline, PipelineError> {
		// Create the durable history backend
		let backend = &self.config.storage.backend;
		let factory = self.history_factories.get(backend).ok_or_else(|| {
			PipelineError::Config(format!(
				"No history factory registered for backend '{}'",
				backend
			))
		})?;
		let storage_config = toml::Value::try_from(&self.config.storage)
			.map_err(|e| PipelineError::Config(e.to_string()))?;
		let history = factory(&storage_config).map_err(|e| {
			tracing::error!(
				component = "storage",
				implementation = %backend,
				error = %e,
				"Failed to create history backend"
			);
			PipelineError::Config(format!(
				"Failed to create history backend '{}': {}",
				backend, e
			))
		})?;
		let store = Arc::new(StoreService::new(
			history,
			Box::new(MemoryCache::new()),
			self.config.storage.cache_ttl(),
		));
		tracing::info!(component = "storage", implementation = %backend, "Loaded");

		// Create the venue implementations
		let mut venues: Vec<Box<dyn VenueInterface>> = Vec::new();
		for (name, venue_config) in &self.config.router.venues {
			let kind = venue_config
				.get("kind")
				.and_then(|v| v.as_str())
				.unwrap_or("simulated");
			let Some(factory) = self.venue_factories.get(kind) else {
				tracing::error!(
					component = "router",
					implementation = %name,
					kind = %kind,
					"No venue factory registered for kind, skipping"
				);
				continue;
			};
			match factory(name, venue_config) {
				Ok(venue) => match venue.config_schema().validate(venue_config) {
					Ok(()) => {
						tracing::info!(component = "router", implementation = %name, "Loaded");
						venues.push(venue);
					}
					Err(e) => {
						tracing::error!(
							component = "router",
							implementation = %name,
							error = %e,
							"Invalid configuration for venue, skipping"
						);
					}
				},
				Err(e) => {
					tracing::error!(
						component = "router",
						implementation = %name,
						error = %e,
						"Failed to create venue, skipping"
					);
				}
			}
		}
		if venues.is_empty() {
			return Err(PipelineError::Config(
				"No venues available - the pipeline would not be able to route any orders".into(),
			));
		}
		let router = Arc::new(RouterService::new(venues));

		let broadcaster = Broadcaster::new();
		let executor = ExecutionPipeline::new(
			Arc::clone(&store),
			Arc::clone(&router),
			broadcaster.clone(),
			self.config.router.quote_timeout(),
			self.config.router.swap_timeout(),
		);

		let queue = Arc::new(JobQueue::new(
			QueueOptions {
				max_concurrent: self.config.queue.max_concurrent,
				max_attempts: self.config.queue.max_attempts,
				retry_backoff: self.config.queue.retry_backoff(),
				rate_limit_max: self.config.queue.rate_limit_max,
				rate_limit_window: self.config.queue.rate_limit_window(),
			},
			Arc::new(QueueAdapter { executor }),
		)?);

		Ok(Pipeline {
			store,
			queue,
			broadcaster,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use orderflow_router::implementations::simulated::create_venue;
	use orderflow_storage::implementations::memory::create_history;
	use orderflow_types::{OrderKind, StatusUpdate};
	use rust_decimal_macros::dec;
	use std::time::Duration;

	fn config(max_concurrent: usize) -> Config {
		let toml = format!(
			r#"
[storage]
backend = "memory"

[queue]
max_concurrent = {}
max_attempts = 3
retry_backoff_ms = 10

[router]
quote_timeout_ms = 1000
swap_timeout_ms = 1000

[router.venues.raydium]
kind = "simulated"
base_rate = 1.5
rate_jitter = 0.0
success_rate = 1.0
quote_latency_ms = 0
processing_time_ms = 0
seed = 42

[router.venues.meteora]
kind = "simulated"
base_rate = 1.48
rate_jitter = 0.0
success_rate = 1.0
quote_latency_ms = 0
processing_time_ms = 0
seed = 43
"#,
			max_concurrent
		);
		toml.parse().unwrap()
	}

	fn build(max_concurrent: usize) -> Pipeline {
		PipelineBuilder::new(config(max_concurrent))
			.with_history_factory("memory", create_history)
			.with_venue_factory("simulated", create_venue)
			.build()
			.unwrap()
	}

	fn request() -> OrderRequest {
		OrderRequest {
			wallet_address: "7xKXtg2CW87d97TXJSDpbD5jBkheTqA83TZRuJosgAsU".into(),
			token_in: "SOL".into(),
			token_out: "USDC".into(),
			amount_in: dec!(1.5),
			kind: OrderKind::Market,
			slippage: dec!(0.5),
			limit_price: None,
		}
	}

	async fn wait_until(mut condition: impl FnMut() -> bool) {
		tokio::time::timeout(Duration::from_secs(10), async {
			while !condition() {
				tokio::time::sleep(Duration::from_millis(10)).await;
			}
		})
		.await
		.expect("condition not reached in time");
	}

	#[tokio::test]
	async fn test_submit_executes_to_exactly_one_terminal_state() {
		let pipeline = build(2);
		let (_id, mut rx) = pipeline.broadcaster().subscribe();
		pipeline.start().await;

		let admitted = pipeline.submit(request()).await.unwrap();
		assert_eq!(admitted.status, OrderStatus::Pending);

		wait_until(|| pipeline.metrics().completed + pipeline.metrics().failed == 1).await;

		let mut terminal = Vec::new();
		while let Ok(payload) = rx.try_recv() {
			let update: StatusUpdate = serde_json::from_str(&payload).unwrap();
			if update.status.is_terminal() {
				terminal.push(update);
			}
		}
		assert_eq!(terminal.len(), 1);
		match terminal[0].status {
			OrderStatus::Confirmed => {
				assert!(!terminal[0].tx_signature.as_deref().unwrap().is_empty())
			}
			OrderStatus::Failed => {
				assert!(!terminal[0].error_message.as_deref().unwrap().is_empty())
			}
			other => panic!("unexpected terminal status {}", other),
		}

		let stored = pipeline.order(&admitted.order_id).await.unwrap().unwrap();
		assert!(stored.status.is_terminal());
		pipeline.shutdown().await;
	}

	#[tokio::test]
	async fn test_single_worker_never_interleaves_orders() {
		let pipeline = build(1);
		let (_id, mut rx) = pipeline.broadcaster().subscribe();
		pipeline.start().await;

		let first = pipeline.submit(request()).await.unwrap();
		let second = pipeline.submit(request()).await.unwrap();
		assert_ne!(first.order_id, second.order_id);

		wait_until(|| pipeline.metrics().completed + pipeline.metrics().failed == 2).await;

		let mut sequence = Vec::new();
		while let Ok(payload) = rx.try_recv() {
			let update: StatusUpdate = serde_json::from_str(&payload).unwrap();
			sequence.push(update.order_id);
		}
		// One worker runs each order's full sequence to completion, so
		// the feed shows two contiguous blocks, never a mid-sequence
		// switch between orders.
		let switches = sequence.windows(2).filter(|w| w[0] != w[1]).count();
		assert_eq!(switches, 1);
		pipeline.shutdown().await;
	}

	#[tokio::test]
	async fn test_lookup_of_unknown_order() {
		let pipeline = build(1);
		assert!(pipeline.order("missing").await.unwrap().is_none());
	}

	#[tokio::test]
	async fn test_builder_rejects_unknown_backend_factory() {
		let result = PipelineBuilder::new(config(1))
			.with_venue_factory("simulated", create_venue)
			.build();
		assert!(matches!(result, Err(PipelineError::Config(_))));
	}

	#[tokio::test]
	async fn test_builder_requires_at_least_one_venue() {
		// No venue factory registered: every venue is skipped at build.
		let result = PipelineBuilder::new(config(1))
			.with_history_factory("memory", create_history)
			.build();
		assert!(matches!(result, Err(PipelineError::Config(_))));
	}
}

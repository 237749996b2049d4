//! The per-order execution state machine.
//!
//! Drives one order through the fixed sequence
//! pending → routing → building → submitted → {confirmed | failed}.
//! Every transition is a single atomic unit from the orchestrator's
//! perspective: mutate the in-memory order, write both stores, broadcast.
//! Any failure along the way funnels into the failed transition and is
//! re-raised so the job queue's retry policy applies; a fresh attempt
//! restarts the whole sequence from pending.

use crate::PipelineError;
use chrono::Utc;
use orderflow_broadcast::Broadcaster;
use orderflow_router::RouterService;
use orderflow_storage::StoreService;
use orderflow_types::{truncate_id, Order, OrderKind, OrderStatus, StatusUpdate};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::instrument;

/// Executes one order's full state-machine sequence.
pub struct ExecutionPipeline {
	store: Arc<StoreService>,
	router: Arc<RouterService>,
	broadcaster: Broadcaster,
	/// Bound on one round of quote gathering.
	quote_timeout: Duration,
	/// Bound on one swap submission.
	swap_timeout: Duration,
}

impl ExecutionPipeline {
	pub fn new(
		store: Arc<StoreService>,
		router: Arc<RouterService>,
		broadcaster: Broadcaster,
		quote_timeout: Duration,
		swap_timeout: Duration,
	) -> Self {
		Self {
			store,
			router,
			broadcaster,
			quote_timeout,
			swap_timeout,
		}
	}

	/// Runs one execution attempt for the order.
	///
	/// On failure the order's terminal failed state is persisted and
	/// broadcast before the error is re-raised to the queue, so a retried
	/// attempt re-creates its cache entry from scratch.
	#[instrument(skip_all, fields(order_id = %truncate_id(&order.order_id), attempt = attempt))]
	pub async fn execute(&self, mut order: Order, attempt: u32) -> Result<(), PipelineError> {
		order.attempts = attempt;

		match self.run_attempt(&mut order).await {
			Ok(()) => Ok(()),
			Err(e) => {
				order.error_message = Some(e.to_string());
				self.transition(&mut order, OrderStatus::Failed).await?;
				Err(e)
			}
		}
	}

	async fn run_attempt(&self, order: &mut Order) -> Result<(), PipelineError> {
		// Re-assert pending: every attempt starts the sequence over.
		self.transition(order, OrderStatus::Pending).await?;

		self.transition(order, OrderStatus::Routing).await?;
		let quote = timeout(
			self.quote_timeout,
			self.router.best_quote(
				&order.token_in,
				&order.token_out,
				order.amount_in,
				order.slippage,
			),
		)
		.await
		.map_err(|_| PipelineError::Timeout {
			operation: "quote",
			timeout_ms: self.quote_timeout.as_millis() as u64,
		})?
		.map_err(|e| PipelineError::Routing(e.to_string()))?;

		order.quote = Some(quote.clone());
		order.selected_venue = Some(quote.venue.clone());
		order.updated_at = Utc::now();
		self.store.record(order).await?;
		self.broadcaster.broadcast(&StatusUpdate::from_order(order));
		tracing::info!(venue = %quote.venue, amount_out = %quote.amount_out, "Selected quote");

		self.check_limit(order)?;

		self.transition(order, OrderStatus::Building).await?;

		self.transition(order, OrderStatus::Submitted).await?;
		let result = timeout(
			self.swap_timeout,
			self.router.execute_swap(&quote.venue, order, &quote),
		)
		.await
		.map_err(|_| PipelineError::Timeout {
			operation: "swap",
			timeout_ms: self.swap_timeout.as_millis() as u64,
		})?
		.map_err(|e| PipelineError::Submission(e.to_string()))?;

		if result.success {
			if let Some(signature) = result.tx_signature {
				order.tx_signature = Some(signature);
				self.transition(order, OrderStatus::Confirmed).await?;
				return Ok(());
			}
		}

		Err(PipelineError::Submission(
			result
				.error_message
				.unwrap_or_else(|| "Transaction failed".to_string()),
		))
	}

	/// Inline limit check between routing and building.
	///
	/// Compares the quoted effective price against the order's limit
	/// price. Deterministic for a given quote, so it is never worth
	/// retrying within the same attempt; a fresh attempt re-quotes.
	fn check_limit(&self, order: &Order) -> Result<(), PipelineError> {
		if order.kind != OrderKind::Limit {
			return Ok(());
		}
		let (Some(required), Some(achieved)) = (order.limit_price, order.effective_price()) else {
			return Ok(());
		};
		if achieved < required {
			return Err(PipelineError::LimitNotMet { required, achieved });
		}
		Ok(())
	}

	/// Applies one status transition as an atomic unit:
	/// mutate → dual-store write → broadcast.
	///
	/// A store-write failure leaves the transition not-yet-durable and
	/// propagates, putting the order on the queue's retry path.
	async fn transition(
		&self,
		order: &mut Order,
		status: OrderStatus,
	) -> Result<(), PipelineError> {
		if !order.status.permits(status) {
			return Err(PipelineError::InvalidTransition {
				from: order.status,
				to: status,
			});
		}
		order.status = status;
		order.updated_at = Utc::now();

		if status.is_terminal() {
			self.store.finalize(order).await?;
		} else {
			self.store.record(order).await?;
		}
		self.broadcaster.broadcast(&StatusUpdate::from_order(order));
		tracing::debug!(status = %status, "Order transitioned");
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use orderflow_router::implementations::simulated::SimulatedVenue;
	use orderflow_storage::implementations::memory::{MemoryCache, MemoryHistory};
	use orderflow_types::{OrderRequest, VenueQuote};
	use rust_decimal::Decimal;
	use rust_decimal_macros::dec;
	use tokio::sync::mpsc;

	fn venue(
		name: &str,
		base_rate: f64,
		success_rate: f64,
	) -> Box<dyn orderflow_router::VenueInterface> {
		Box::new(SimulatedVenue::new(
			name.into(),
			base_rate,
			0.0,
			dec!(0.003),
			0.0,
			success_rate,
			Duration::ZERO,
			Duration::ZERO,
			Some(42),
		))
	}

	fn pipeline(
		venues: Vec<Box<dyn orderflow_router::VenueInterface>>,
	) -> (ExecutionPipeline, Arc<StoreService>) {
		let store = Arc::new(StoreService::new(
			Box::new(MemoryHistory::new()),
			Box::new(MemoryCache::new()),
			Duration::from_secs(3600),
		));
		let router = Arc::new(RouterService::new(venues));
		let executor = ExecutionPipeline::new(
			Arc::clone(&store),
			router,
			Broadcaster::new(),
			Duration::from_secs(1),
			Duration::from_secs(1),
		);
		(executor, store)
	}

	fn order(kind: OrderKind, limit_price: Option<Decimal>) -> Order {
		Order::from_request(OrderRequest {
			wallet_address: "7xKXtg2CW87d97TXJSDpbD5jBkheTqA83TZRuJosgAsU".into(),
			token_in: "SOL".into(),
			token_out: "USDC".into(),
			amount_in: dec!(1.5),
			kind,
			slippage: dec!(0.5),
			limit_price,
		})
	}

	async fn drain(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<StatusUpdate> {
		let mut updates = Vec::new();
		while let Ok(payload) = rx.try_recv() {
			updates.push(serde_json::from_str(&payload).unwrap());
		}
		updates
	}

	#[tokio::test]
	async fn test_market_order_walks_the_full_sequence() {
		let (executor, store) = pipeline(vec![venue("raydium", 1.5, 1.0)]);
		let (_id, mut rx) = executor.broadcaster.subscribe();
		let order = order(OrderKind::Market, None);

		executor.execute(order.clone(), 0).await.unwrap();

		let statuses: Vec<OrderStatus> =
			drain(&mut rx).await.iter().map(|u| u.status).collect();
		// The routing state appears twice: once on entry, once with the
		// captured quote.
		assert_eq!(
			statuses,
			vec![
				OrderStatus::Pending,
				OrderStatus::Routing,
				OrderStatus::Routing,
				OrderStatus::Building,
				OrderStatus::Submitted,
				OrderStatus::Confirmed,
			]
		);

		let stored = store.lookup(&order.order_id).await.unwrap().unwrap();
		assert_eq!(stored.status, OrderStatus::Confirmed);
		assert_eq!(stored.selected_venue.as_deref(), Some("raydium"));
		assert_eq!(stored.tx_signature.as_ref().unwrap().len(), 88);
		assert!(stored.quote.is_some());
		// Terminal orders leave the active set but stay in history.
		assert!(store.active_ids().await.unwrap().is_empty());
		assert!(store.history().get(&order.order_id).await.unwrap().is_some());
	}

	#[tokio::test]
	async fn test_routing_picks_the_better_venue() {
		let (executor, store) = pipeline(vec![
			venue("raydium", 1.5, 1.0),
			venue("meteora", 1.48, 1.0),
		]);
		let order = order(OrderKind::Market, None);

		executor.execute(order.clone(), 0).await.unwrap();

		let stored = store.lookup(&order.order_id).await.unwrap().unwrap();
		assert_eq!(stored.selected_venue.as_deref(), Some("raydium"));
	}

	#[tokio::test]
	async fn test_unmet_limit_fails_before_submission() {
		let (executor, store) = pipeline(vec![venue("raydium", 1.5, 1.0)]);
		let (_id, mut rx) = executor.broadcaster.subscribe();
		// Rate is ~1.5, so an effective price of 1000 is unreachable.
		let order = order(OrderKind::Limit, Some(dec!(1000)));

		let result = executor.execute(order.clone(), 0).await;
		assert!(matches!(result, Err(PipelineError::LimitNotMet { .. })));

		let statuses: Vec<OrderStatus> =
			drain(&mut rx).await.iter().map(|u| u.status).collect();
		assert!(!statuses.contains(&OrderStatus::Building));
		assert!(!statuses.contains(&OrderStatus::Submitted));
		assert_eq!(*statuses.last().unwrap(), OrderStatus::Failed);

		let stored = store.lookup(&order.order_id).await.unwrap().unwrap();
		assert_eq!(stored.status, OrderStatus::Failed);
		assert!(stored
			.error_message
			.as_deref()
			.unwrap()
			.contains("Limit price not met"));
		assert!(store.active_ids().await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_met_limit_proceeds_to_confirmation() {
		let (executor, store) = pipeline(vec![venue("raydium", 1.5, 1.0)]);
		let order = order(OrderKind::Limit, Some(dec!(1.2)));

		executor.execute(order.clone(), 0).await.unwrap();

		let stored = store.lookup(&order.order_id).await.unwrap().unwrap();
		assert_eq!(stored.status, OrderStatus::Confirmed);
	}

	#[tokio::test]
	async fn test_submission_failure_persists_cause_and_reraises() {
		let (executor, store) = pipeline(vec![venue("raydium", 1.5, 0.0)]);
		let order = order(OrderKind::Market, None);

		let result = executor.execute(order.clone(), 0).await;
		assert!(matches!(result, Err(PipelineError::Submission(_))));

		let stored = store.lookup(&order.order_id).await.unwrap().unwrap();
		assert_eq!(stored.status, OrderStatus::Failed);
		assert!(stored
			.error_message
			.as_deref()
			.unwrap()
			.contains("execution failed"));
		assert!(store.active_ids().await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_retry_restarts_the_whole_sequence() {
		let store = Arc::new(StoreService::new(
			Box::new(MemoryHistory::new()),
			Box::new(MemoryCache::new()),
			Duration::from_secs(3600),
		));
		let broadcaster = Broadcaster::new();
		let build = |success_rate: f64| {
			ExecutionPipeline::new(
				Arc::clone(&store),
				Arc::new(RouterService::new(vec![venue("raydium", 1.5, success_rate)])),
				broadcaster.clone(),
				Duration::from_secs(1),
				Duration::from_secs(1),
			)
		};
		let admitted = order(OrderKind::Market, None);

		// First attempt hits a capability failure and leaves a terminal
		// failed record with no cache entry.
		let failing = build(0.0);
		assert!(failing.execute(admitted.clone(), 0).await.is_err());
		assert!(store.active_ids().await.unwrap().is_empty());

		// The queue re-delivers the admission snapshot on retry; the next
		// attempt walks the sequence again from pending, re-creating the
		// cache entry from scratch and re-asserting the final state.
		let recovering = build(1.0);
		recovering.execute(admitted.clone(), 1).await.unwrap();

		let stored = store.lookup(&admitted.order_id).await.unwrap().unwrap();
		assert_eq!(stored.status, OrderStatus::Confirmed);
		assert_eq!(stored.attempts, 1);
		assert!(store.active_ids().await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_quote_update_carries_the_quote() {
		let (executor, _store) = pipeline(vec![venue("raydium", 1.5, 1.0)]);
		let (_id, mut rx) = executor.broadcaster.subscribe();

		executor.execute(order(OrderKind::Market, None), 0).await.unwrap();

		let updates = drain(&mut rx).await;
		let quoted: Vec<&VenueQuote> = updates.iter().filter_map(|u| u.quote.as_ref()).collect();
		assert!(!quoted.is_empty());
		assert_eq!(quoted[0].venue, "raydium");
	}
}

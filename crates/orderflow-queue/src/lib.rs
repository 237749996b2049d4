//! Job queue module for the orderflow pipeline.
//!
//! This module owns admission and concurrency control for order execution:
//! one job per order id, a bounded pool of workers, a rolling-window rate
//! limiter on dequeues, and an exponential-backoff retry policy bounded by
//! a configurable attempt cap. The retry and concurrency policy is owned
//! by this crate rather than delegated to an external queue library.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use orderflow_types::{truncate_id, Order, QueueMetrics};
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

/// Errors that can occur during queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
	/// Error that occurs when enqueueing into a closed queue.
	#[error("Queue is closed")]
	Closed,
	/// Error that occurs when the queue options are invalid.
	#[error("Invalid queue configuration: {0}")]
	Configuration(String),
}

/// Failure reported by a job executor.
///
/// The executor has already persisted the order's own failure state; this
/// error only drives the queue's retry decision.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct JobError(pub String);

/// Trait implemented by the component that executes one order to
/// completion.
///
/// `attempt` is zero-based; each invocation restarts the order's entire
/// execution sequence from scratch.
#[async_trait]
pub trait JobExecutor: Send + Sync {
	async fn execute(&self, order: Order, attempt: u32) -> Result<(), JobError>;
}

/// Tuning options for the queue and its worker pool.
#[derive(Debug, Clone)]
pub struct QueueOptions {
	/// Number of concurrent workers.
	pub max_concurrent: usize,
	/// Maximum execution attempts per order, including the first.
	pub max_attempts: u32,
	/// Base delay for exponential retry backoff.
	pub retry_backoff: Duration,
	/// Maximum dequeues per rate-limit window.
	pub rate_limit_max: u32,
	/// Length of the rolling rate-limit window.
	pub rate_limit_window: Duration,
}

impl Default for QueueOptions {
	fn default() -> Self {
		Self {
			max_concurrent: 10,
			max_attempts: 3,
			retry_backoff: Duration::from_millis(1000),
			rate_limit_max: 100,
			rate_limit_window: Duration::from_secs(60),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobState {
	Waiting,
	Active,
	RetryScheduled,
}

struct Job {
	order: Order,
	attempt: u32,
}

/// Admission and concurrency control for order execution.
///
/// `enqueue` is idempotent per order id: while a job for that id is
/// waiting, active or retry-scheduled, further calls are no-ops, which
/// guarantees at most one in-flight execution per order.
pub struct JobQueue {
	options: QueueOptions,
	executor: Arc<dyn JobExecutor>,
	jobs: Arc<DashMap<String, JobState>>,
	job_tx: mpsc::UnboundedSender<Job>,
	job_rx: Mutex<Option<mpsc::UnboundedReceiver<Job>>>,
	limiter: Arc<DefaultDirectRateLimiter>,
	completed: Arc<AtomicU64>,
	failed: Arc<AtomicU64>,
	shutdown_tx: watch::Sender<bool>,
	workers: Mutex<Vec<JoinHandle<()>>>,
}

impl JobQueue {
	/// Creates a new queue executing jobs through the given executor.
	pub fn new(options: QueueOptions, executor: Arc<dyn JobExecutor>) -> Result<Self, QueueError> {
		if options.max_concurrent == 0 {
			return Err(QueueError::Configuration(
				"max_concurrent must be greater than 0".into(),
			));
		}
		if options.max_attempts == 0 {
			return Err(QueueError::Configuration(
				"max_attempts must be greater than 0".into(),
			));
		}
		let max = NonZeroU32::new(options.rate_limit_max).ok_or_else(|| {
			QueueError::Configuration("rate_limit_max must be greater than 0".into())
		})?;

		// N dequeues per rolling window, modeled as one cell every
		// window/N with a burst allowance of the full window.
		let period = options
			.rate_limit_window
			.checked_div(options.rate_limit_max)
			.filter(|period| !period.is_zero())
			.unwrap_or(Duration::from_nanos(1));
		let quota = Quota::with_period(period)
			.ok_or_else(|| {
				QueueError::Configuration("rate_limit_window must be greater than 0".into())
			})?
			.allow_burst(max);

		let (job_tx, job_rx) = mpsc::unbounded_channel();
		let (shutdown_tx, _) = watch::channel(false);

		Ok(Self {
			options,
			executor,
			jobs: Arc::new(DashMap::new()),
			job_tx,
			job_rx: Mutex::new(Some(job_rx)),
			limiter: Arc::new(RateLimiter::direct(quota)),
			completed: Arc::new(AtomicU64::new(0)),
			failed: Arc::new(AtomicU64::new(0)),
			shutdown_tx,
			workers: Mutex::new(Vec::new()),
		})
	}

	/// Admits an order for execution.
	///
	/// A no-op if a job for this order id already exists in any
	/// non-terminal state.
	pub fn enqueue(&self, order: Order) -> Result<(), QueueError> {
		let order_id = order.order_id.clone();
		match self.jobs.entry(order_id.clone()) {
			Entry::Occupied(_) => {
				tracing::debug!(
					order_id = %truncate_id(&order_id),
					"Duplicate enqueue ignored"
				);
				return Ok(());
			}
			Entry::Vacant(slot) => {
				slot.insert(JobState::Waiting);
			}
		}

		if self.job_tx.send(Job { order, attempt: 0 }).is_err() {
			self.jobs.remove(&order_id);
			return Err(QueueError::Closed);
		}

		tracing::info!(order_id = %truncate_id(&order_id), "Order added to queue");
		Ok(())
	}

	/// Starts the worker pool. Subsequent calls are no-ops.
	pub async fn run(&self) {
		let Some(rx) = self.job_rx.lock().await.take() else {
			return;
		};
		let rx = Arc::new(Mutex::new(rx));

		let mut workers = self.workers.lock().await;
		for id in 0..self.options.max_concurrent {
			let worker = Worker {
				id,
				rx: Arc::clone(&rx),
				jobs: Arc::clone(&self.jobs),
				executor: Arc::clone(&self.executor),
				limiter: Arc::clone(&self.limiter),
				job_tx: self.job_tx.clone(),
				completed: Arc::clone(&self.completed),
				failed: Arc::clone(&self.failed),
				shutdown: self.shutdown_tx.subscribe(),
				max_attempts: self.options.max_attempts,
				retry_backoff: self.options.retry_backoff,
			};
			workers.push(tokio::spawn(worker.run()));
		}
		tracing::info!(workers = self.options.max_concurrent, "Job queue started");
	}

	/// Returns the queue's bookkeeping counts as of this call.
	pub fn metrics(&self) -> QueueMetrics {
		let mut waiting = 0u64;
		let mut active = 0u64;
		for entry in self.jobs.iter() {
			match entry.value() {
				JobState::Waiting | JobState::RetryScheduled => waiting += 1,
				JobState::Active => active += 1,
			}
		}
		QueueMetrics::new(
			waiting,
			active,
			self.completed.load(Ordering::Relaxed),
			self.failed.load(Ordering::Relaxed),
		)
	}

	/// Stops intake and waits for in-flight executions to finish.
	pub async fn close(&self) {
		let _ = self.shutdown_tx.send(true);
		let mut workers = self.workers.lock().await;
		for handle in workers.drain(..) {
			let _ = handle.await;
		}
		tracing::info!("Job queue closed");
	}
}

struct Worker {
	id: usize,
	rx: Arc<Mutex<mpsc::UnboundedReceiver<Job>>>,
	jobs: Arc<DashMap<String, JobState>>,
	executor: Arc<dyn JobExecutor>,
	limiter: Arc<DefaultDirectRateLimiter>,
	job_tx: mpsc::UnboundedSender<Job>,
	completed: Arc<AtomicU64>,
	failed: Arc<AtomicU64>,
	shutdown: watch::Receiver<bool>,
	max_attempts: u32,
	retry_backoff: Duration,
}

impl Worker {
	async fn run(mut self) {
		loop {
			let job = {
				let mut rx = self.rx.lock().await;
				tokio::select! {
					job = rx.recv() => job,
					_ = self.shutdown.changed() => None,
				}
			};
			let Some(job) = job else { break };

			// Rolling-window cap on dequeues, independent of pool size.
			self.limiter.until_ready().await;
			self.process(job).await;
		}
	}

	async fn process(&self, job: Job) {
		let order_id = job.order.order_id.clone();
		self.jobs.insert(order_id.clone(), JobState::Active);
		tracing::info!(
			order_id = %truncate_id(&order_id),
			attempt = job.attempt + 1,
			worker = self.id,
			"Processing order"
		);

		match self.executor.execute(job.order.clone(), job.attempt).await {
			Ok(()) => {
				self.jobs.remove(&order_id);
				self.completed.fetch_add(1, Ordering::Relaxed);
				tracing::info!(
					order_id = %truncate_id(&order_id),
					"Order completed successfully"
				);
			}
			Err(e) => {
				let next_attempt = job.attempt + 1;
				if next_attempt >= self.max_attempts {
					// The order's own terminal failed status, already
					// persisted by the executor, stands as the final record.
					self.jobs.remove(&order_id);
					self.failed.fetch_add(1, Ordering::Relaxed);
					tracing::error!(
						order_id = %truncate_id(&order_id),
						attempts = next_attempt,
						error = %e,
						"Order failed permanently"
					);
				} else {
					self.schedule_retry(job.order, job.attempt, &e);
				}
			}
		}
	}

	fn schedule_retry(&self, order: Order, failed_attempt: u32, error: &JobError) {
		let delay = self.retry_backoff * 2u32.saturating_pow(failed_attempt);
		let order_id = order.order_id.clone();
		self.jobs.insert(order_id.clone(), JobState::RetryScheduled);
		tracing::warn!(
			order_id = %truncate_id(&order_id),
			error = %error,
			delay_ms = delay.as_millis() as u64,
			"Order failed, retry scheduled"
		);

		let jobs = Arc::clone(&self.jobs);
		let job_tx = self.job_tx.clone();
		let mut shutdown = self.shutdown.clone();
		let retry = Job {
			order,
			attempt: failed_attempt + 1,
		};
		tokio::spawn(async move {
			tokio::select! {
				_ = tokio::time::sleep(delay) => {
					jobs.insert(retry.order.order_id.clone(), JobState::Waiting);
					if job_tx.send(retry).is_err() {
						jobs.remove(&order_id);
					}
				}
				_ = shutdown.changed() => {}
			}
		});
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use orderflow_types::{OrderKind, OrderRequest};
	use rust_decimal_macros::dec;
	use std::sync::atomic::AtomicU32;
	use tokio::sync::Notify;
	use tokio::time::Instant;

	fn order() -> Order {
		Order::from_request(OrderRequest {
			wallet_address: "7xKXtg2CW87d97TXJSDpbD5jBkheTqA83TZRuJosgAsU".into(),
			token_in: "SOL".into(),
			token_out: "USDC".into(),
			amount_in: dec!(1.5),
			kind: OrderKind::Market,
			slippage: dec!(0.5),
			limit_price: None,
		})
	}

	fn options(max_concurrent: usize, max_attempts: u32) -> QueueOptions {
		QueueOptions {
			max_concurrent,
			max_attempts,
			retry_backoff: Duration::from_millis(100),
			..QueueOptions::default()
		}
	}

	/// Executor that blocks every job until released by the test.
	struct GatedExecutor {
		gate: Notify,
		started: AtomicU32,
		in_flight: AtomicU32,
		max_in_flight: AtomicU32,
	}

	impl GatedExecutor {
		fn new() -> Self {
			Self {
				gate: Notify::new(),
				started: AtomicU32::new(0),
				in_flight: AtomicU32::new(0),
				max_in_flight: AtomicU32::new(0),
			}
		}
	}

	#[async_trait]
	impl JobExecutor for GatedExecutor {
		async fn execute(&self, _order: Order, _attempt: u32) -> Result<(), JobError> {
			self.started.fetch_add(1, Ordering::SeqCst);
			let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
			self.max_in_flight.fetch_max(current, Ordering::SeqCst);
			self.gate.notified().await;
			self.in_flight.fetch_sub(1, Ordering::SeqCst);
			Ok(())
		}
	}

	/// Executor that fails every attempt, recording when it ran.
	struct FailingExecutor {
		attempts: Mutex<Vec<(u32, Instant)>>,
	}

	#[async_trait]
	impl JobExecutor for FailingExecutor {
		async fn execute(&self, _order: Order, attempt: u32) -> Result<(), JobError> {
			self.attempts.lock().await.push((attempt, Instant::now()));
			Err(JobError("simulated capability failure".into()))
		}
	}

	async fn wait_until(mut condition: impl FnMut() -> bool) {
		tokio::time::timeout(Duration::from_secs(30), async {
			while !condition() {
				tokio::time::sleep(Duration::from_millis(10)).await;
			}
		})
		.await
		.expect("condition not reached in time");
	}

	#[tokio::test]
	async fn test_duplicate_enqueue_is_noop() {
		let executor = Arc::new(GatedExecutor::new());
		let queue = JobQueue::new(options(1, 3), executor.clone()).unwrap();

		let order = order();
		queue.enqueue(order.clone()).unwrap();
		queue.enqueue(order.clone()).unwrap();
		queue.enqueue(order).unwrap();

		let metrics = queue.metrics();
		assert_eq!(metrics.waiting, 1);
		assert_eq!(metrics.total, 1);
	}

	#[tokio::test]
	async fn test_metrics_account_for_every_admitted_order() {
		let executor = Arc::new(GatedExecutor::new());
		let queue = JobQueue::new(options(1, 3), executor.clone()).unwrap();

		for _ in 0..3 {
			queue.enqueue(order()).unwrap();
		}
		queue.run().await;

		// Pool of one: a single active job, the rest waiting.
		wait_until(|| queue.metrics().active == 1).await;
		let metrics = queue.metrics();
		assert_eq!(metrics.waiting + metrics.active, 3);

		// Release jobs one at a time and drain.
		for expected in 1..=3u64 {
			wait_until(|| queue.metrics().active == 1).await;
			executor.gate.notify_one();
			wait_until(|| queue.metrics().completed == expected).await;
		}
		let metrics = queue.metrics();
		assert_eq!(metrics.waiting, 0);
		assert_eq!(metrics.active, 0);
		assert_eq!(metrics.total, 3);
	}

	#[tokio::test]
	async fn test_worker_pool_bounds_concurrency() {
		let executor = Arc::new(GatedExecutor::new());
		let queue = JobQueue::new(options(2, 3), executor.clone()).unwrap();

		for _ in 0..5 {
			queue.enqueue(order()).unwrap();
		}
		queue.run().await;

		wait_until(|| executor.started.load(Ordering::SeqCst) == 2).await;
		for expected in 1..=5u64 {
			wait_until(|| {
				executor.started.load(Ordering::SeqCst) as u64 > queue.metrics().completed
			})
			.await;
			executor.gate.notify_one();
			wait_until(|| queue.metrics().completed == expected).await;
		}

		assert!(executor.max_in_flight.load(Ordering::SeqCst) <= 2);
	}

	#[tokio::test(start_paused = true)]
	async fn test_retry_backoff_doubles_per_attempt() {
		let executor = Arc::new(FailingExecutor {
			attempts: Mutex::new(Vec::new()),
		});
		let queue = JobQueue::new(options(1, 3), executor.clone()).unwrap();

		queue.enqueue(order()).unwrap();
		queue.run().await;
		wait_until(|| queue.metrics().failed == 1).await;

		let attempts = executor.attempts.lock().await;
		assert_eq!(
			attempts.iter().map(|(attempt, _)| *attempt).collect::<Vec<_>>(),
			vec![0, 1, 2]
		);
		// delay >= base * 2^k after failing attempt k
		let base = Duration::from_millis(100);
		assert!(attempts[1].1 - attempts[0].1 >= base);
		assert!(attempts[2].1 - attempts[1].1 >= base * 2);

		// Attempt cap reached: permanently failed, nothing rescheduled.
		let metrics = queue.metrics();
		assert_eq!(metrics.failed, 1);
		assert_eq!(metrics.waiting, 0);
		assert_eq!(metrics.active, 0);
	}

	#[tokio::test]
	async fn test_order_can_be_enqueued_again_after_completion() {
		let executor = Arc::new(GatedExecutor::new());
		let queue = JobQueue::new(options(1, 3), executor.clone()).unwrap();

		let order = order();
		queue.enqueue(order.clone()).unwrap();
		queue.run().await;
		executor.gate.notify_one();
		wait_until(|| queue.metrics().completed == 1).await;

		// The previous job is gone, so admission accepts the id again.
		queue.enqueue(order).unwrap();
		assert_eq!(queue.metrics().waiting, 1);
	}

	#[tokio::test]
	async fn test_close_stops_workers() {
		let executor = Arc::new(GatedExecutor::new());
		let queue = JobQueue::new(options(2, 3), executor.clone()).unwrap();
		queue.run().await;
		queue.close().await;
	}

	#[test]
	fn test_invalid_options_rejected() {
		let executor = Arc::new(GatedExecutor::new());
		let mut bad = options(0, 3);
		assert!(JobQueue::new(bad.clone(), executor.clone()).is_err());

		bad = options(1, 0);
		assert!(JobQueue::new(bad.clone(), executor.clone()).is_err());

		bad = options(1, 3);
		bad.rate_limit_max = 0;
		assert!(JobQueue::new(bad, executor).is_err());
	}
}

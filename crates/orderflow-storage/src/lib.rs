//! Storage module for the orderflow pipeline.
//!
//! This module provides the dual-store consistency layer: a durable,
//! authoritative history of every order and an ephemeral, TTL-bounded
//! cache of orders still in flight. Writes to both stores are issued
//! together on every transition; the history store is canonical once an
//! order leaves the cache.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orderflow_types::{ConfigSchema, Order, OrderStatus};
use std::time::Duration;
use thiserror::Error;

/// Re-export implementations
pub mod implementations {
	pub mod file;
	pub mod memory;
}

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
	/// Error that occurs during serialization/deserialization.
	#[error("Serialization error: {0}")]
	Serialization(String),
	/// Error that occurs in the storage backend.
	#[error("Backend error: {0}")]
	Backend(String),
	/// Error that occurs during configuration validation.
	#[error("Configuration error: {0}")]
	Configuration(String),
}

/// Trait defining the durable, authoritative order history.
///
/// Every write is an idempotent last-write-wins upsert keyed by order id,
/// so re-delivery or duplicate writes from retries cause no corruption.
/// Rows are never deleted.
#[async_trait]
pub trait HistoryInterface: Send + Sync {
	/// Inserts or fully replaces the row for this order.
	async fn upsert(&self, order: &Order) -> Result<(), StorageError>;

	/// Retrieves an order by id.
	async fn get(&self, order_id: &str) -> Result<Option<Order>, StorageError>;

	/// Lists all orders currently in the given status.
	async fn find_by_status(&self, status: OrderStatus) -> Result<Vec<Order>, StorageError>;

	/// Lists all orders submitted by the given wallet.
	async fn find_by_wallet(&self, wallet_address: &str) -> Result<Vec<Order>, StorageError>;

	/// Lists orders created within the given inclusive time range,
	/// ordered by creation time.
	async fn find_created_between(
		&self,
		from: DateTime<Utc>,
		to: DateTime<Utc>,
	) -> Result<Vec<Order>, StorageError>;

	/// Returns the configuration schema for validation.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;
}

/// Trait defining the ephemeral cache of in-flight orders.
///
/// Entries hold the full current order snapshot, refresh their TTL on
/// every write, and are tracked in an active-set index for enumeration.
/// The TTL is a safety net: terminal transitions remove entries
/// explicitly, expiry only mops up after crashes.
#[async_trait]
pub trait ActiveCacheInterface: Send + Sync {
	/// Stores the order snapshot, refreshing its TTL and active-set
	/// membership.
	async fn put(&self, order: &Order, ttl: Duration) -> Result<(), StorageError>;

	/// Retrieves a live (non-expired) snapshot by order id.
	async fn get(&self, order_id: &str) -> Result<Option<Order>, StorageError>;

	/// Drops the entry and its active-set membership.
	async fn remove(&self, order_id: &str) -> Result<(), StorageError>;

	/// Enumerates the ids of all live in-flight orders.
	async fn active_ids(&self) -> Result<Vec<String>, StorageError>;

	/// Removes expired entries, returning the number swept.
	async fn cleanup_expired(&self) -> Result<usize, StorageError>;
}

/// Type alias for history backend factory functions.
pub type HistoryFactory = fn(&toml::Value) -> Result<Box<dyn HistoryInterface>, StorageError>;

/// The dual-store consistency layer.
///
/// Issues writes to the history store and the active cache together on
/// every transition. The history write happens first: it is canonical,
/// and a crash between the two writes leaves at worst a stale or missing
/// cache entry that TTL expiry heals, never an incorrect terminal
/// history record.
pub struct StoreService {
	history: Box<dyn HistoryInterface>,
	cache: Box<dyn ActiveCacheInterface>,
	cache_ttl: Duration,
}

impl StoreService {
	/// Creates a new StoreService over the given backends.
	pub fn new(
		history: Box<dyn HistoryInterface>,
		cache: Box<dyn ActiveCacheInterface>,
		cache_ttl: Duration,
	) -> Self {
		Self {
			history,
			cache,
			cache_ttl,
		}
	}

	/// Records a non-terminal order state in both stores.
	pub async fn record(&self, order: &Order) -> Result<(), StorageError> {
		self.history.upsert(order).await?;
		self.cache.put(order, self.cache_ttl).await
	}

	/// Records a terminal order state and drops it from the active cache.
	pub async fn finalize(&self, order: &Order) -> Result<(), StorageError> {
		self.history.upsert(order).await?;
		self.cache.remove(&order.order_id).await
	}

	/// Looks up the current snapshot of an order.
	///
	/// Consults the cache first; falls back to the history store once the
	/// order has left the cache.
	pub async fn lookup(&self, order_id: &str) -> Result<Option<Order>, StorageError> {
		if let Some(order) = self.cache.get(order_id).await? {
			return Ok(Some(order));
		}
		self.history.get(order_id).await
	}

	/// Enumerates the ids of all in-flight orders.
	pub async fn active_ids(&self) -> Result<Vec<String>, StorageError> {
		self.cache.active_ids().await
	}

	/// Sweeps expired cache entries, returning the number removed.
	pub async fn cleanup_expired(&self) -> Result<usize, StorageError> {
		self.cache.cleanup_expired().await
	}

	/// Direct access to the durable history for secondary queries.
	pub fn history(&self) -> &dyn HistoryInterface {
		self.history.as_ref()
	}
}

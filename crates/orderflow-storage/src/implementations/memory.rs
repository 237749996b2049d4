//! In-memory backend implementations for the dual-store layer.
//!
//! This module provides memory-based implementations of both the durable
//! history interface and the active cache. The history variant is useful
//! for testing and development; the cache variant is the production cache,
//! since cache contents are ephemeral by definition.

use crate::{ActiveCacheInterface, HistoryInterface, StorageError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orderflow_types::{ConfigSchema, Order, OrderStatus, Schema, ValidationError};
use std::collections::{BTreeSet, HashMap};
use std::ops::Bound;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// In-memory history implementation.
///
/// Rows live in a HashMap with secondary indexes by status, wallet and
/// creation time, maintained on every upsert.
pub struct MemoryHistory {
	inner: RwLock<HistoryInner>,
}

#[derive(Default)]
struct HistoryInner {
	orders: HashMap<String, Order>,
	by_status: HashMap<OrderStatus, BTreeSet<String>>,
	by_wallet: HashMap<String, BTreeSet<String>>,
	by_created: BTreeSet<(DateTime<Utc>, String)>,
}

impl MemoryHistory {
	/// Creates a new MemoryHistory instance.
	pub fn new() -> Self {
		Self {
			inner: RwLock::new(HistoryInner::default()),
		}
	}
}

impl Default for MemoryHistory {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl HistoryInterface for MemoryHistory {
	async fn upsert(&self, order: &Order) -> Result<(), StorageError> {
		let mut inner = self.inner.write().await;

		// Re-home the status index entry when the status changed; wallet
		// and creation time are immutable so their entries stay put.
		let previous_status = inner.orders.get(&order.order_id).map(|o| o.status);
		if let Some(previous_status) = previous_status {
			if previous_status != order.status {
				if let Some(ids) = inner.by_status.get_mut(&previous_status) {
					ids.remove(&order.order_id);
				}
			}
		}

		inner
			.by_status
			.entry(order.status)
			.or_default()
			.insert(order.order_id.clone());
		inner
			.by_wallet
			.entry(order.wallet_address.clone())
			.or_default()
			.insert(order.order_id.clone());
		inner
			.by_created
			.insert((order.created_at, order.order_id.clone()));
		inner.orders.insert(order.order_id.clone(), order.clone());

		Ok(())
	}

	async fn get(&self, order_id: &str) -> Result<Option<Order>, StorageError> {
		let inner = self.inner.read().await;
		Ok(inner.orders.get(order_id).cloned())
	}

	async fn find_by_status(&self, status: OrderStatus) -> Result<Vec<Order>, StorageError> {
		let inner = self.inner.read().await;
		let orders = inner
			.by_status
			.get(&status)
			.into_iter()
			.flatten()
			.filter_map(|id| inner.orders.get(id).cloned())
			.collect();
		Ok(orders)
	}

	async fn find_by_wallet(&self, wallet_address: &str) -> Result<Vec<Order>, StorageError> {
		let inner = self.inner.read().await;
		let orders = inner
			.by_wallet
			.get(wallet_address)
			.into_iter()
			.flatten()
			.filter_map(|id| inner.orders.get(id).cloned())
			.collect();
		Ok(orders)
	}

	async fn find_created_between(
		&self,
		from: DateTime<Utc>,
		to: DateTime<Utc>,
	) -> Result<Vec<Order>, StorageError> {
		let inner = self.inner.read().await;
		let mut orders = Vec::new();
		let lower = Bound::Included((from, String::new()));
		for (created_at, id) in inner.by_created.range((lower, Bound::Unbounded)) {
			if *created_at > to {
				break;
			}
			if let Some(order) = inner.orders.get(id) {
				orders.push(order.clone());
			}
		}
		Ok(orders)
	}

	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(MemoryHistorySchema)
	}
}

/// Configuration schema for MemoryHistory.
pub struct MemoryHistorySchema;

impl ConfigSchema for MemoryHistorySchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		// Memory history has no required configuration
		let schema = Schema::new(vec![], vec![]);
		schema.validate(config)
	}
}

/// Factory function to create a memory history backend from configuration.
pub fn create_history(
	_config: &toml::Value,
) -> Result<Box<dyn HistoryInterface>, StorageError> {
	Ok(Box::new(MemoryHistory::new()))
}

/// In-memory active cache implementation.
///
/// Entries are keyed `order:{order_id}` and carry an expiry instant;
/// membership in a separate active-set index allows enumeration of all
/// in-flight orders. Expired entries stop being visible immediately and
/// are physically removed by `cleanup_expired`.
pub struct MemoryCache {
	inner: RwLock<CacheInner>,
}

#[derive(Default)]
struct CacheInner {
	entries: HashMap<String, CacheEntry>,
	active: BTreeSet<String>,
}

struct CacheEntry {
	order: Order,
	expires_at: Instant,
}

impl CacheEntry {
	fn is_expired(&self) -> bool {
		Instant::now() >= self.expires_at
	}
}

fn entry_key(order_id: &str) -> String {
	format!("order:{}", order_id)
}

impl MemoryCache {
	/// Creates a new MemoryCache instance.
	pub fn new() -> Self {
		Self {
			inner: RwLock::new(CacheInner::default()),
		}
	}
}

impl Default for MemoryCache {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl ActiveCacheInterface for MemoryCache {
	async fn put(&self, order: &Order, ttl: Duration) -> Result<(), StorageError> {
		let mut inner = self.inner.write().await;
		inner.entries.insert(
			entry_key(&order.order_id),
			CacheEntry {
				order: order.clone(),
				expires_at: Instant::now() + ttl,
			},
		);
		inner.active.insert(order.order_id.clone());
		Ok(())
	}

	async fn get(&self, order_id: &str) -> Result<Option<Order>, StorageError> {
		let inner = self.inner.read().await;
		Ok(inner
			.entries
			.get(&entry_key(order_id))
			.filter(|entry| !entry.is_expired())
			.map(|entry| entry.order.clone()))
	}

	async fn remove(&self, order_id: &str) -> Result<(), StorageError> {
		let mut inner = self.inner.write().await;
		inner.entries.remove(&entry_key(order_id));
		inner.active.remove(order_id);
		Ok(())
	}

	async fn active_ids(&self) -> Result<Vec<String>, StorageError> {
		let inner = self.inner.read().await;
		Ok(inner
			.active
			.iter()
			.filter(|id| {
				inner
					.entries
					.get(&entry_key(id))
					.is_some_and(|entry| !entry.is_expired())
			})
			.cloned()
			.collect())
	}

	async fn cleanup_expired(&self) -> Result<usize, StorageError> {
		let mut inner = self.inner.write().await;
		let expired: Vec<String> = inner
			.entries
			.iter()
			.filter(|(_, entry)| entry.is_expired())
			.map(|(_, entry)| entry.order.order_id.clone())
			.collect();
		for order_id in &expired {
			inner.entries.remove(&entry_key(order_id));
			inner.active.remove(order_id);
		}
		if !expired.is_empty() {
			tracing::debug!(count = expired.len(), "Swept expired cache entries");
		}
		Ok(expired.len())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use orderflow_types::{OrderKind, OrderRequest};
	use rust_decimal_macros::dec;

	fn order_for(wallet: &str) -> Order {
		Order::from_request(OrderRequest {
			wallet_address: wallet.into(),
			token_in: "SOL".into(),
			token_out: "USDC".into(),
			amount_in: dec!(1.5),
			kind: OrderKind::Market,
			slippage: dec!(0.5),
			limit_price: None,
		})
	}

	#[tokio::test]
	async fn test_history_upsert_and_get() {
		let history = MemoryHistory::new();
		let order = order_for("7xKXtg2CW87d97TXJSDpbD5jBkheTqA83TZRuJosgAsU");

		history.upsert(&order).await.unwrap();
		let found = history.get(&order.order_id).await.unwrap().unwrap();
		assert_eq!(found.order_id, order.order_id);

		assert!(history.get("missing").await.unwrap().is_none());
	}

	#[tokio::test]
	async fn test_history_upsert_is_last_write_wins() {
		let history = MemoryHistory::new();
		let mut order = order_for("7xKXtg2CW87d97TXJSDpbD5jBkheTqA83TZRuJosgAsU");
		history.upsert(&order).await.unwrap();

		order.status = OrderStatus::Failed;
		order.error_message = Some("simulated".into());
		// A duplicate write of the same row must not corrupt anything.
		history.upsert(&order).await.unwrap();
		history.upsert(&order).await.unwrap();

		let found = history.get(&order.order_id).await.unwrap().unwrap();
		assert_eq!(found.status, OrderStatus::Failed);
		assert_eq!(history.find_by_status(OrderStatus::Failed).await.unwrap().len(), 1);
		assert!(history
			.find_by_status(OrderStatus::Pending)
			.await
			.unwrap()
			.is_empty());
	}

	#[tokio::test]
	async fn test_history_status_index_follows_transitions() {
		let history = MemoryHistory::new();
		let mut order = order_for("7xKXtg2CW87d97TXJSDpbD5jBkheTqA83TZRuJosgAsU");
		history.upsert(&order).await.unwrap();

		order.status = OrderStatus::Routing;
		history.upsert(&order).await.unwrap();

		assert!(history
			.find_by_status(OrderStatus::Pending)
			.await
			.unwrap()
			.is_empty());
		assert_eq!(
			history.find_by_status(OrderStatus::Routing).await.unwrap().len(),
			1
		);
	}

	#[tokio::test]
	async fn test_history_wallet_and_created_queries() {
		let history = MemoryHistory::new();
		let before = Utc::now();
		let a = order_for("7xKXtg2CW87d97TXJSDpbD5jBkheTqA83TZRuJosgAsU");
		let b = order_for("9yLZuh3DX98e08UYKTEqcE6kClifUrB94UaSvKptgBtV");
		history.upsert(&a).await.unwrap();
		history.upsert(&b).await.unwrap();
		let after = Utc::now();

		let mine = history.find_by_wallet(&a.wallet_address).await.unwrap();
		assert_eq!(mine.len(), 1);
		assert_eq!(mine[0].order_id, a.order_id);

		let range = history.find_created_between(before, after).await.unwrap();
		assert_eq!(range.len(), 2);
		assert!(history
			.find_created_between(after + chrono::Duration::seconds(1), after + chrono::Duration::seconds(2))
			.await
			.unwrap()
			.is_empty());
	}

	#[tokio::test]
	async fn test_cache_put_get_remove() {
		let cache = MemoryCache::new();
		let order = order_for("7xKXtg2CW87d97TXJSDpbD5jBkheTqA83TZRuJosgAsU");

		cache.put(&order, Duration::from_secs(60)).await.unwrap();
		assert!(cache.get(&order.order_id).await.unwrap().is_some());
		assert_eq!(cache.active_ids().await.unwrap(), vec![order.order_id.clone()]);

		cache.remove(&order.order_id).await.unwrap();
		assert!(cache.get(&order.order_id).await.unwrap().is_none());
		assert!(cache.active_ids().await.unwrap().is_empty());
	}

	#[tokio::test(start_paused = true)]
	async fn test_cache_entries_expire() {
		let cache = MemoryCache::new();
		let order = order_for("7xKXtg2CW87d97TXJSDpbD5jBkheTqA83TZRuJosgAsU");

		cache.put(&order, Duration::from_secs(60)).await.unwrap();
		tokio::time::advance(Duration::from_secs(61)).await;

		assert!(cache.get(&order.order_id).await.unwrap().is_none());
		assert!(cache.active_ids().await.unwrap().is_empty());
		assert_eq!(cache.cleanup_expired().await.unwrap(), 1);
		assert_eq!(cache.cleanup_expired().await.unwrap(), 0);
	}

	#[tokio::test(start_paused = true)]
	async fn test_cache_ttl_refreshed_on_write() {
		let cache = MemoryCache::new();
		let order = order_for("7xKXtg2CW87d97TXJSDpbD5jBkheTqA83TZRuJosgAsU");

		cache.put(&order, Duration::from_secs(60)).await.unwrap();
		tokio::time::advance(Duration::from_secs(40)).await;
		cache.put(&order, Duration::from_secs(60)).await.unwrap();
		tokio::time::advance(Duration::from_secs(40)).await;

		// 80s since the first write, 40s since the refresh: still live.
		assert!(cache.get(&order.order_id).await.unwrap().is_some());
	}
}

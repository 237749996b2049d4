//! File-based history backend for the dual-store layer.
//!
//! This implementation stores one JSON document per order under a base
//! directory, providing simple persistence without requiring external
//! dependencies. Secondary queries scan the directory; history queries
//! are not on the execution hot path.

use crate::{HistoryInterface, StorageError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orderflow_types::{ConfigSchema, Field, FieldType, Order, OrderStatus, Schema, ValidationError};
use std::path::PathBuf;
use tokio::fs;

/// File-based history implementation.
pub struct FileHistory {
	/// Base directory path for storing order documents.
	base_path: PathBuf,
}

impl FileHistory {
	/// Creates a new FileHistory rooted at the given directory.
	pub fn new(base_path: PathBuf) -> Self {
		Self { base_path }
	}

	/// Converts an order id to a filesystem-safe document path.
	fn document_path(&self, order_id: &str) -> PathBuf {
		let safe: String = order_id
			.chars()
			.map(|c| {
				if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
					c
				} else {
					'_'
				}
			})
			.collect();
		self.base_path.join(format!("{}.json", safe))
	}

	/// Reads and deserializes every order document under the base path.
	///
	/// Unreadable or corrupt documents are skipped with a warning rather
	/// than failing the whole query.
	async fn load_all(&self) -> Result<Vec<Order>, StorageError> {
		let mut orders = Vec::new();

		let mut entries = match fs::read_dir(&self.base_path).await {
			Ok(entries) => entries,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(orders),
			Err(e) => return Err(StorageError::Backend(e.to_string())),
		};

		while let Some(entry) = entries
			.next_entry()
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?
		{
			let path = entry.path();
			if path.extension().and_then(|e| e.to_str()) != Some("json") {
				continue;
			}
			match fs::read(&path).await {
				Ok(bytes) => match serde_json::from_slice::<Order>(&bytes) {
					Ok(order) => orders.push(order),
					Err(e) => {
						tracing::warn!(path = %path.display(), error = %e, "Skipping corrupt order document");
					}
				},
				Err(e) => {
					tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable order document");
				}
			}
		}

		Ok(orders)
	}
}

#[async_trait]
impl HistoryInterface for FileHistory {
	async fn upsert(&self, order: &Order) -> Result<(), StorageError> {
		fs::create_dir_all(&self.base_path)
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?;

		let bytes = serde_json::to_vec_pretty(order)
			.map_err(|e| StorageError::Serialization(e.to_string()))?;
		fs::write(self.document_path(&order.order_id), bytes)
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))
	}

	async fn get(&self, order_id: &str) -> Result<Option<Order>, StorageError> {
		let bytes = match fs::read(self.document_path(order_id)).await {
			Ok(bytes) => bytes,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
			Err(e) => return Err(StorageError::Backend(e.to_string())),
		};
		serde_json::from_slice(&bytes)
			.map(Some)
			.map_err(|e| StorageError::Serialization(e.to_string()))
	}

	async fn find_by_status(&self, status: OrderStatus) -> Result<Vec<Order>, StorageError> {
		let mut orders = self.load_all().await?;
		orders.retain(|order| order.status == status);
		Ok(orders)
	}

	async fn find_by_wallet(&self, wallet_address: &str) -> Result<Vec<Order>, StorageError> {
		let mut orders = self.load_all().await?;
		orders.retain(|order| order.wallet_address == wallet_address);
		Ok(orders)
	}

	async fn find_created_between(
		&self,
		from: DateTime<Utc>,
		to: DateTime<Utc>,
	) -> Result<Vec<Order>, StorageError> {
		let mut orders = self.load_all().await?;
		orders.retain(|order| order.created_at >= from && order.created_at <= to);
		orders.sort_by_key(|order| order.created_at);
		Ok(orders)
	}

	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(FileHistorySchema)
	}
}

/// Configuration schema for FileHistory.
pub struct FileHistorySchema;

impl ConfigSchema for FileHistorySchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(vec![Field::new("path", FieldType::String)], vec![]);
		schema.validate(config)
	}
}

/// Factory function to create a file history backend from configuration.
///
/// Configuration parameters:
/// - `path`: base directory for order documents (required)
pub fn create_history(config: &toml::Value) -> Result<Box<dyn HistoryInterface>, StorageError> {
	FileHistorySchema
		.validate(config)
		.map_err(|e| StorageError::Configuration(e.to_string()))?;

	let path = config
		.get("path")
		.and_then(|v| v.as_str())
		.ok_or_else(|| StorageError::Configuration("path is required".into()))?;

	Ok(Box::new(FileHistory::new(PathBuf::from(path))))
}

#[cfg(test)]
mod tests {
	use super::*;
	use orderflow_types::{OrderKind, OrderRequest};
	use rust_decimal_macros::dec;

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

	#[tokio::test]
	async fn test_upsert_and_get_roundtrip() {
		let dir = tempfile::tempdir().unwrap();
		let history = FileHistory::new(dir.path().to_path_buf());
		let order = order();

		history.upsert(&order).await.unwrap();
		let found = history.get(&order.order_id).await.unwrap().unwrap();
		assert_eq!(found.order_id, order.order_id);
		assert_eq!(found.amount_in, order.amount_in);

		assert!(history.get("missing").await.unwrap().is_none());
	}

	#[tokio::test]
	async fn test_upsert_overwrites_full_row() {
		let dir = tempfile::tempdir().unwrap();
		let history = FileHistory::new(dir.path().to_path_buf());
		let mut order = order();
		history.upsert(&order).await.unwrap();

		order.status = OrderStatus::Confirmed;
		order.tx_signature = Some("sig".into());
		history.upsert(&order).await.unwrap();

		let found = history.get(&order.order_id).await.unwrap().unwrap();
		assert_eq!(found.status, OrderStatus::Confirmed);
		assert_eq!(found.tx_signature.as_deref(), Some("sig"));
	}

	#[tokio::test]
	async fn test_queries_scan_documents() {
		let dir = tempfile::tempdir().unwrap();
		let history = FileHistory::new(dir.path().to_path_buf());
		let before = Utc::now();
		let a = order();
		let mut b = order();
		b.status = OrderStatus::Failed;
		history.upsert(&a).await.unwrap();
		history.upsert(&b).await.unwrap();

		let pending = history.find_by_status(OrderStatus::Pending).await.unwrap();
		assert_eq!(pending.len(), 1);
		assert_eq!(pending[0].order_id, a.order_id);

		let by_wallet = history.find_by_wallet(&a.wallet_address).await.unwrap();
		assert_eq!(by_wallet.len(), 2);

		let range = history
			.find_created_between(before, Utc::now())
			.await
			.unwrap();
		assert_eq!(range.len(), 2);
	}

	#[tokio::test]
	async fn test_queries_on_missing_directory() {
		let dir = tempfile::tempdir().unwrap();
		let history = FileHistory::new(dir.path().join("never-created"));
		assert!(history
			.find_by_status(OrderStatus::Pending)
			.await
			.unwrap()
			.is_empty());
	}

	#[test]
	fn test_factory_requires_path() {
		let config: toml::Value = toml::from_str("").unwrap();
		assert!(create_history(&config).is_err());

		let config: toml::Value = toml::from_str(r#"path = "/tmp/orders""#).unwrap();
		assert!(create_history(&config).is_ok());
	}
}

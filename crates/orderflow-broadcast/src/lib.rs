//! Broadcast module for the orderflow pipeline.
//!
//! Maintains an explicit registry of connected subscribers and fans status
//! updates out to all of them. Delivery is best-effort: there is no queuing
//! for disconnected subscribers and no cross-subscriber ordering guarantee;
//! per-subscriber delivery is in-order on the underlying channel. A
//! subscriber whose channel has closed is silently pruned from the registry
//! rather than aborting the broadcast.

use dashmap::DashMap;
use orderflow_types::StatusUpdate;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Identifier handed out to each subscriber at registration.
pub type SubscriberId = u64;

/// Registry of live subscribers with best-effort fan-out.
///
/// All operations are safe to call concurrently; registration and
/// unregistration may race with an in-progress broadcast.
#[derive(Clone, Default)]
pub struct Broadcaster {
	inner: Arc<BroadcasterInner>,
}

#[derive(Default)]
struct BroadcasterInner {
	subscribers: DashMap<SubscriberId, mpsc::UnboundedSender<String>>,
	next_id: AtomicU64,
}

impl Broadcaster {
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers a new subscriber and returns its id and message stream.
	pub fn subscribe(&self) -> (SubscriberId, mpsc::UnboundedReceiver<String>) {
		let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
		let (tx, rx) = mpsc::unbounded_channel();
		self.inner.subscribers.insert(id, tx);
		tracing::debug!(
			subscriber_id = id,
			total = self.inner.subscribers.len(),
			"Subscriber connected"
		);
		(id, rx)
	}

	/// Removes a subscriber from the registry.
	pub fn unsubscribe(&self, id: SubscriberId) {
		if self.inner.subscribers.remove(&id).is_some() {
			tracing::debug!(
				subscriber_id = id,
				total = self.inner.subscribers.len(),
				"Subscriber disconnected"
			);
		}
	}

	/// Serializes the update once and delivers it to every subscriber.
	///
	/// Subscribers whose receiving side has gone away are pruned; the
	/// broadcast itself never fails.
	pub fn broadcast(&self, update: &StatusUpdate) {
		let payload = match serde_json::to_string(update) {
			Ok(payload) => payload,
			Err(e) => {
				tracing::error!(error = %e, "Failed to serialize status update");
				return;
			}
		};

		let mut stale = Vec::new();
		for entry in self.inner.subscribers.iter() {
			if entry.value().send(payload.clone()).is_err() {
				stale.push(*entry.key());
			}
		}
		for id in stale {
			self.inner.subscribers.remove(&id);
		}

		tracing::debug!(
			order_id = %update.order_id,
			status = %update.status,
			subscribers = self.inner.subscribers.len(),
			"Broadcast status update"
		);
	}

	/// Number of currently registered subscribers.
	pub fn subscriber_count(&self) -> usize {
		self.inner.subscribers.len()
	}

	/// Drops every registered subscriber, closing their streams.
	pub fn close(&self) {
		self.inner.subscribers.clear();
	}
}

//! Status-event types delivered to subscribers.
//!
//! One `StatusUpdate` is produced per status transition and fanned out to
//! every connected subscriber in per-order chronological order.

use crate::{Order, OrderStatus, VenueQuote};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single status transition of one order, as seen by observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
	pub order_id: String,
	pub status: OrderStatus,
	pub timestamp: DateTime<Utc>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub quote: Option<VenueQuote>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub tx_signature: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error_message: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub selected_venue: Option<String>,
}

impl StatusUpdate {
	/// Captures the order's current state as a broadcastable event.
	pub fn from_order(order: &Order) -> Self {
		Self {
			order_id: order.order_id.clone(),
			status: order.status,
			timestamp: order.updated_at,
			quote: order.quote.clone(),
			tx_signature: order.tx_signature.clone(),
			error_message: order.error_message.clone(),
			selected_venue: order.selected_venue.clone(),
		}
	}
}

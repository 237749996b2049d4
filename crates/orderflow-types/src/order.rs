//! Order types for the execution pipeline.
//!
//! This module defines the order data model tracked through the execution
//! lifecycle, the validated submission that creates one, and the quote and
//! swap-result structures exchanged with the routing capability.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use validator::Validate;

/// Kind of order accepted by the pipeline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum OrderKind {
	/// Execute at whatever price the selected venue quotes.
	Market,
	/// Execute only if the quoted effective price meets the limit price.
	Limit,
}

impl fmt::Display for OrderKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			OrderKind::Market => write!(f, "market"),
			OrderKind::Limit => write!(f, "limit"),
		}
	}
}

/// Status of an order in the execution pipeline.
///
/// Transitions are forward-only along the fixed sequence
/// pending → routing → building → submitted → {confirmed | failed}.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
	/// Order admitted, awaiting execution.
	Pending,
	/// Quotes are being gathered from liquidity venues.
	Routing,
	/// Transaction is being assembled.
	Building,
	/// Transaction handed to the submission capability.
	Submitted,
	/// Submission succeeded and a result reference was recorded.
	Confirmed,
	/// Execution failed; the error message records the cause.
	Failed,
}

impl OrderStatus {
	/// Returns true for statuses that end the order's lifecycle.
	pub fn is_terminal(&self) -> bool {
		matches!(self, OrderStatus::Confirmed | OrderStatus::Failed)
	}

	fn rank(&self) -> u8 {
		match self {
			OrderStatus::Pending => 0,
			OrderStatus::Routing => 1,
			OrderStatus::Building => 2,
			OrderStatus::Submitted => 3,
			OrderStatus::Confirmed | OrderStatus::Failed => 4,
		}
	}

	/// Whether a transition from this status to `next` is allowed.
	///
	/// Statuses only move forward and terminal statuses permit nothing.
	/// Re-asserting the current status is allowed so a fresh execution
	/// attempt can restart from `pending`.
	pub fn permits(&self, next: OrderStatus) -> bool {
		!self.is_terminal() && next.rank() >= self.rank()
	}
}

impl fmt::Display for OrderStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			OrderStatus::Pending => write!(f, "pending"),
			OrderStatus::Routing => write!(f, "routing"),
			OrderStatus::Building => write!(f, "building"),
			OrderStatus::Submitted => write!(f, "submitted"),
			OrderStatus::Confirmed => write!(f, "confirmed"),
			OrderStatus::Failed => write!(f, "failed"),
		}
	}
}

/// A priced execution plan returned by a liquidity venue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VenueQuote {
	/// Name of the venue that produced this quote.
	pub venue: String,
	/// Output amount after fees.
	pub amount_out: Decimal,
	/// Estimated price impact in percent.
	pub price_impact: Decimal,
	/// Fee charged by the venue, denominated in the input asset.
	pub fee: Decimal,
	/// Asset route taken for the swap.
	pub route: Vec<String>,
}

/// Outcome reported by the submission capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapResult {
	pub success: bool,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub tx_signature: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error_message: Option<String>,
}

/// A validated order submission from the admission layer.
///
/// Field constraints mirror the admission contract: positive amount,
/// slippage within [0, 100], and a limit price required iff the order
/// kind is `limit`.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
#[validate(schema(function = "validate_limit_fields"))]
pub struct OrderRequest {
	#[validate(length(min = 32, max = 44))]
	pub wallet_address: String,
	#[validate(length(min = 1))]
	pub token_in: String,
	#[validate(length(min = 1))]
	pub token_out: String,
	#[validate(custom(function = "validate_positive_amount"))]
	pub amount_in: Decimal,
	#[serde(rename = "orderType")]
	pub kind: OrderKind,
	#[validate(custom(function = "validate_slippage"))]
	pub slippage: Decimal,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub limit_price: Option<Decimal>,
}

fn validate_positive_amount(amount: &Decimal) -> Result<(), validator::ValidationError> {
	if *amount <= Decimal::ZERO {
		return Err(validator::ValidationError::new("amount_in must be positive"));
	}
	Ok(())
}

fn validate_slippage(slippage: &Decimal) -> Result<(), validator::ValidationError> {
	if *slippage < Decimal::ZERO || *slippage > Decimal::from(100) {
		return Err(validator::ValidationError::new(
			"slippage must be between 0 and 100",
		));
	}
	Ok(())
}

fn validate_limit_fields(request: &OrderRequest) -> Result<(), validator::ValidationError> {
	match (request.kind, request.limit_price) {
		(OrderKind::Limit, None) => Err(validator::ValidationError::new(
			"limit orders must include limitPrice",
		)),
		(_, Some(price)) if price <= Decimal::ZERO => Err(validator::ValidationError::new(
			"limitPrice must be positive",
		)),
		_ => Ok(()),
	}
}

/// An order tracked through its execution lifecycle.
///
/// Created at admission with a fresh id and `pending` status, mutated only
/// by the execution orchestrator, and immutable once a terminal status is
/// reached with no retries remaining.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
	/// Unique identifier, assigned at admission and never changed.
	pub order_id: String,
	pub wallet_address: String,
	pub token_in: String,
	pub token_out: String,
	pub amount_in: Decimal,
	#[serde(rename = "orderType")]
	pub kind: OrderKind,
	pub slippage: Decimal,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub limit_price: Option<Decimal>,
	/// Current status along the execution state machine.
	pub status: OrderStatus,
	/// Venue selected during routing.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub selected_venue: Option<String>,
	/// Quote captured during routing.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub quote: Option<VenueQuote>,
	/// Result reference, set only on confirmation.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub tx_signature: Option<String>,
	/// Failure cause, set only on the failed transition.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error_message: Option<String>,
	/// Execution attempts made so far; bounded by the queue's attempt cap.
	pub attempts: u32,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl Order {
	/// Creates a new order from a validated submission.
	///
	/// Assigns a fresh order id, `pending` status, zero attempts, and
	/// admission timestamps.
	pub fn from_request(request: OrderRequest) -> Self {
		let now = Utc::now();
		Self {
			order_id: uuid::Uuid::new_v4().to_string(),
			wallet_address: request.wallet_address,
			token_in: request.token_in,
			token_out: request.token_out,
			amount_in: request.amount_in,
			kind: request.kind,
			slippage: request.slippage,
			limit_price: request.limit_price,
			status: OrderStatus::Pending,
			selected_venue: None,
			quote: None,
			tx_signature: None,
			error_message: None,
			attempts: 0,
			created_at: now,
			updated_at: now,
		}
	}

	/// Effective price implied by the captured quote (output per input unit).
	///
	/// Returns None before routing has captured a quote.
	pub fn effective_price(&self) -> Option<Decimal> {
		let quote = self.quote.as_ref()?;
		if self.amount_in.is_zero() {
			return None;
		}
		Some(quote.amount_out / self.amount_in)
	}
}

//! Liquidity routing module for the orderflow pipeline.
//!
//! This module models the routing and submission capability behind a
//! polymorphic venue interface. The router service fans quote requests out
//! to every configured venue concurrently and selects the best quote by a
//! caller-supplied ranking; the orchestrator is agnostic to how many
//! venues are queried or how each produces its numbers.

use async_trait::async_trait;
use futures::future::join_all;
use orderflow_types::{ConfigSchema, Order, SwapResult, VenueQuote};
use rust_decimal::Decimal;
use std::cmp::Ordering;
use std::sync::Arc;
use thiserror::Error;

/// Re-export implementations
pub mod implementations {
	pub mod simulated;
}

/// Errors that can occur during routing and submission operations.
#[derive(Debug, Error)]
pub enum RouterError {
	/// Error that occurs while fetching a quote from a venue.
	#[error("Quote failed: {0}")]
	Quote(String),
	/// Error that occurs when no venue produced a usable quote.
	#[error("No quotes available")]
	NoQuotes,
	/// Error that occurs when a named venue is not configured.
	#[error("No venue named '{0}'")]
	UnknownVenue(String),
	/// Error that occurs while submitting a swap.
	#[error("Swap submission failed: {0}")]
	Submission(String),
	/// Error that occurs during configuration validation.
	#[error("Configuration error: {0}")]
	Configuration(String),
}

/// Trait defining the interface for liquidity venues.
///
/// This trait must be implemented by any venue that wants to serve quotes
/// and accept swap submissions from the pipeline, whether simulated or
/// live.
#[async_trait]
pub trait VenueInterface: Send + Sync {
	/// Name of this venue, used for selection and dispatch.
	fn name(&self) -> &str;

	/// Returns the configuration schema for this venue implementation.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	/// Produces a priced execution plan for the given pair and amount.
	async fn fetch_quote(
		&self,
		token_in: &str,
		token_out: &str,
		amount_in: Decimal,
		slippage: Decimal,
	) -> Result<VenueQuote, RouterError>;

	/// Submits the swap described by a previously fetched quote.
	///
	/// A swap that the venue rejects is reported through the returned
	/// `SwapResult`, not as an error; errors are reserved for the call
	/// itself failing.
	async fn execute_swap(
		&self,
		order: &Order,
		quote: &VenueQuote,
	) -> Result<SwapResult, RouterError>;
}

/// Type alias for venue factory functions.
pub type VenueFactory =
	fn(name: &str, config: &toml::Value) -> Result<Box<dyn VenueInterface>, RouterError>;

/// Comparison used to rank quotes; the greater quote wins.
pub type QuoteRanking = Arc<dyn Fn(&VenueQuote, &VenueQuote) -> Ordering + Send + Sync>;

/// Ranks quotes by output amount, the default selection policy.
pub fn rank_by_amount_out(a: &VenueQuote, b: &VenueQuote) -> Ordering {
	a.amount_out.cmp(&b.amount_out)
}

/// Service that manages quote gathering and swap submission across venues.
pub struct RouterService {
	venues: Vec<Box<dyn VenueInterface>>,
	ranking: QuoteRanking,
}

impl RouterService {
	/// Creates a new RouterService ranking quotes by output amount.
	pub fn new(venues: Vec<Box<dyn VenueInterface>>) -> Self {
		Self {
			venues,
			ranking: Arc::new(rank_by_amount_out),
		}
	}

	/// Replaces the quote ranking with a caller-supplied comparison.
	pub fn with_ranking(mut self, ranking: QuoteRanking) -> Self {
		self.ranking = ranking;
		self
	}

	/// Queries every venue concurrently and returns the best quote.
	///
	/// Individual venue failures are tolerated as long as at least one
	/// quote arrives; they are logged and excluded from selection.
	pub async fn best_quote(
		&self,
		token_in: &str,
		token_out: &str,
		amount_in: Decimal,
		slippage: Decimal,
	) -> Result<VenueQuote, RouterError> {
		let requests = self
			.venues
			.iter()
			.map(|venue| venue.fetch_quote(token_in, token_out, amount_in, slippage));
		let results = join_all(requests).await;

		let mut quotes = Vec::new();
		for (venue, result) in self.venues.iter().zip(results) {
			match result {
				Ok(quote) => quotes.push(quote),
				Err(e) => {
					tracing::warn!(venue = venue.name(), error = %e, "Quote request failed");
				}
			}
		}

		quotes
			.into_iter()
			.max_by(|a, b| (self.ranking)(a, b))
			.ok_or(RouterError::NoQuotes)
	}

	/// Submits a swap through the named venue.
	pub async fn execute_swap(
		&self,
		venue_name: &str,
		order: &Order,
		quote: &VenueQuote,
	) -> Result<SwapResult, RouterError> {
		let venue = self
			.venues
			.iter()
			.find(|venue| venue.name() == venue_name)
			.ok_or_else(|| RouterError::UnknownVenue(venue_name.to_string()))?;

		venue.execute_swap(order, quote).await
	}

	/// Names of all configured venues.
	pub fn venue_names(&self) -> Vec<&str> {
		self.venues.iter().map(|venue| venue.name()).collect()
	}
}

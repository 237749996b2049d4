//! Simulated venue implementation.
//!
//! Serves quotes from a configurable numeric model: a base exchange rate
//! with bounded jitter, a proportional fee, and a price-impact band. Swap
//! submissions succeed with a configurable probability after a simulated
//! processing delay. An optional fixed seed makes the model deterministic
//! for tests.

use crate::{RouterError, VenueInterface};
use async_trait::async_trait;
use orderflow_types::{
	truncate_id, ConfigSchema, Field, FieldType, Order, Schema, SwapResult, ValidationError,
	VenueQuote,
};
use rand::distributions::Alphanumeric;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::sleep;

/// Simulated liquidity venue.
pub struct SimulatedVenue {
	name: String,
	/// Center of the exchange-rate band (output units per input unit).
	base_rate: f64,
	/// Full width of the uniform jitter applied to the base rate.
	rate_jitter: f64,
	/// Proportional fee charged on the input amount.
	fee_rate: Decimal,
	/// Upper bound of the uniform price-impact band, in percent.
	max_price_impact: f64,
	/// Probability that a submitted swap succeeds.
	success_rate: f64,
	quote_latency: Duration,
	processing_time: Duration,
	rng: Mutex<StdRng>,
}

impl SimulatedVenue {
	#[allow(clippy::too_many_arguments)]
	pub fn new(
		name: String,
		base_rate: f64,
		rate_jitter: f64,
		fee_rate: Decimal,
		max_price_impact: f64,
		success_rate: f64,
		quote_latency: Duration,
		processing_time: Duration,
		seed: Option<u64>,
	) -> Self {
		let rng = match seed {
			Some(seed) => StdRng::seed_from_u64(seed),
			None => StdRng::from_entropy(),
		};
		Self {
			name,
			base_rate,
			rate_jitter,
			fee_rate,
			max_price_impact,
			success_rate,
			quote_latency,
			processing_time,
			rng: Mutex::new(rng),
		}
	}
}

fn to_decimal(value: f64) -> Result<Decimal, RouterError> {
	Decimal::from_f64(value)
		.ok_or_else(|| RouterError::Quote(format!("non-finite value: {}", value)))
}

fn mock_signature(rng: &mut StdRng) -> String {
	std::iter::repeat_with(|| rng.sample(Alphanumeric))
		.take(88)
		.map(char::from)
		.collect()
}

#[async_trait]
impl VenueInterface for SimulatedVenue {
	fn name(&self) -> &str {
		&self.name
	}

	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(SimulatedVenueSchema)
	}

	async fn fetch_quote(
		&self,
		token_in: &str,
		token_out: &str,
		amount_in: Decimal,
		_slippage: Decimal,
	) -> Result<VenueQuote, RouterError> {
		// Simulated network delay
		sleep(self.quote_latency).await;

		let (rate, impact) = {
			let mut rng = self.rng.lock().await;
			let rate = self.base_rate + (rng.gen::<f64>() - 0.5) * self.rate_jitter;
			let impact = rng.gen::<f64>() * self.max_price_impact;
			(rate, impact)
		};

		let fee = amount_in * self.fee_rate;
		let amount_out = amount_in * to_decimal(rate)? - fee;

		Ok(VenueQuote {
			venue: self.name.clone(),
			amount_out,
			price_impact: to_decimal(impact)?,
			fee,
			route: vec![token_in.to_string(), token_out.to_string()],
		})
	}

	async fn execute_swap(
		&self,
		order: &Order,
		_quote: &VenueQuote,
	) -> Result<SwapResult, RouterError> {
		tracing::debug!(
			venue = %self.name,
			order_id = %truncate_id(&order.order_id),
			"Submitting swap"
		);

		// Simulated transaction building and submission delay
		sleep(self.processing_time).await;

		let (success, signature) = {
			let mut rng = self.rng.lock().await;
			let success = rng.gen::<f64>() < self.success_rate;
			let signature = success.then(|| mock_signature(&mut rng));
			(success, signature)
		};

		if success {
			Ok(SwapResult {
				success: true,
				tx_signature: signature,
				error_message: None,
			})
		} else {
			Ok(SwapResult {
				success: false,
				tx_signature: None,
				error_message: Some(format!(
					"{} execution failed: simulated network error",
					self.name
				)),
			})
		}
	}
}

/// Configuration schema for SimulatedVenue.
pub struct SimulatedVenueSchema;

impl ConfigSchema for SimulatedVenueSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![Field::new(
				"base_rate",
				FieldType::Float {
					min: Some(0.0),
					max: None,
				},
			)],
			vec![
				Field::new(
					"rate_jitter",
					FieldType::Float {
						min: Some(0.0),
						max: None,
					},
				),
				Field::new(
					"fee_rate",
					FieldType::Float {
						min: Some(0.0),
						max: Some(1.0),
					},
				),
				Field::new(
					"max_price_impact",
					FieldType::Float {
						min: Some(0.0),
						max: None,
					},
				),
				Field::new(
					"success_rate",
					FieldType::Float {
						min: Some(0.0),
						max: Some(1.0),
					},
				),
				Field::new(
					"quote_latency_ms",
					FieldType::Integer {
						min: Some(0),
						max: None,
					},
				),
				Field::new(
					"processing_time_ms",
					FieldType::Integer {
						min: Some(0),
						max: None,
					},
				),
				Field::new(
					"seed",
					FieldType::Integer {
						min: Some(0),
						max: None,
					},
				),
			],
		);
		schema.validate(config)
	}
}

fn get_f64(config: &toml::Value, key: &str, default: f64) -> f64 {
	config
		.get(key)
		.and_then(|v| v.as_float().or_else(|| v.as_integer().map(|i| i as f64)))
		.unwrap_or(default)
}

fn get_u64(config: &toml::Value, key: &str, default: u64) -> u64 {
	config
		.get(key)
		.and_then(|v| v.as_integer())
		.map(|i| i as u64)
		.unwrap_or(default)
}

/// Factory function to create a simulated venue from configuration.
///
/// Configuration parameters:
/// - `base_rate`: center of the exchange-rate band (required)
/// - `rate_jitter`: width of the rate band (default 0.1, i.e. ±5%)
/// - `fee_rate`: proportional fee on the input amount (default 0.003)
/// - `max_price_impact`: price-impact band upper bound in percent (default 2.0)
/// - `success_rate`: swap success probability (default 0.95)
/// - `quote_latency_ms` / `processing_time_ms`: simulated delays
/// - `seed`: fixed RNG seed for deterministic behavior
pub fn create_venue(
	name: &str,
	config: &toml::Value,
) -> Result<Box<dyn VenueInterface>, RouterError> {
	SimulatedVenueSchema
		.validate(config)
		.map_err(|e| RouterError::Configuration(e.to_string()))?;

	let fee_rate = to_decimal(get_f64(config, "fee_rate", 0.003))?;
	let seed = config
		.get("seed")
		.and_then(|v| v.as_integer())
		.map(|i| i as u64);

	Ok(Box::new(SimulatedVenue::new(
		name.to_string(),
		get_f64(config, "base_rate", 1.5),
		get_f64(config, "rate_jitter", 0.1),
		fee_rate,
		get_f64(config, "max_price_impact", 2.0),
		get_f64(config, "success_rate", 0.95),
		Duration::from_millis(get_u64(config, "quote_latency_ms", 100)),
		Duration::from_millis(get_u64(config, "processing_time_ms", 2000)),
		seed,
	)))
}

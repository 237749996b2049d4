//! HTTP and WebSocket server for the orderflow API.
//!
//! Exposes order admission, order lookup, queue metrics and a health
//! probe under /api, plus a WebSocket endpoint streaming one status
//! event per transition to every connected subscriber.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use chrono::Utc;
use orderflow_config::ServerConfig;
use orderflow_core::Pipeline;
use orderflow_types::{Order, OrderRequest, OrderStatus, QueueMetrics};
use serde::Serialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use validator::Validate;

/// Shared application state for the API server.
#[derive(Clone)]
pub struct AppState {
	/// Reference to the pipeline engine for processing requests.
	pub pipeline: Arc<Pipeline>,
}

/// API-level errors mapped onto HTTP responses.
pub enum ApiError {
	/// The submission failed admission validation.
	Validation(String),
	/// The requested resource does not exist.
	NotFound(&'static str),
	/// An unexpected pipeline failure.
	Internal(String),
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let (status, message) = match self {
			ApiError::Validation(details) => (StatusCode::BAD_REQUEST, details),
			ApiError::NotFound(what) => (StatusCode::NOT_FOUND, what.to_string()),
			ApiError::Internal(message) => (StatusCode::INTERNAL_SERVER_ERROR, message),
		};
		(status, Json(serde_json::json!({ "error": message }))).into_response()
	}
}

/// Starts the HTTP server for the API.
pub async fn start_server(
	config: ServerConfig,
	pipeline: Arc<Pipeline>,
) -> Result<(), Box<dyn std::error::Error>> {
	let app = Router::new()
		.nest(
			"/api",
			Router::new()
				.route("/orders", post(submit_order))
				.route("/orders/{id}", get(get_order))
				.route("/metrics", get(get_metrics)),
		)
		.route("/ws", get(ws_upgrade))
		.route("/health", get(health))
		.layer(
			ServiceBuilder::new()
				.layer(TraceLayer::new_for_http())
				.layer(CorsLayer::permissive()),
		)
		.with_state(AppState { pipeline });

	let bind_address = format!("{}:{}", config.host, config.port);
	let listener = TcpListener::bind(&bind_address).await?;

	tracing::info!("Orderflow API server starting on {}", bind_address);

	axum::serve(listener, app).await?;

	Ok(())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitResponse {
	order_id: String,
	status: OrderStatus,
	message: &'static str,
}

/// Handles POST /api/orders requests.
///
/// Validates the submission against the admission contract and enqueues
/// it; the 202 response carries the assigned order id.
async fn submit_order(
	State(state): State<AppState>,
	Json(request): Json<OrderRequest>,
) -> Result<impl IntoResponse, ApiError> {
	request
		.validate()
		.map_err(|e| ApiError::Validation(e.to_string()))?;

	let order = state
		.pipeline
		.submit(request)
		.await
		.map_err(|e| ApiError::Internal(e.to_string()))?;

	Ok((
		StatusCode::ACCEPTED,
		Json(SubmitResponse {
			order_id: order.order_id,
			status: order.status,
			message: "Order submitted successfully",
		}),
	))
}

/// Handles GET /api/orders/{id} requests.
///
/// Returns the order's full current snapshot, read from the active cache
/// while the order is in flight and from durable history afterwards.
async fn get_order(
	Path(id): Path<String>,
	State(state): State<AppState>,
) -> Result<Json<Order>, ApiError> {
	match state.pipeline.order(&id).await {
		Ok(Some(order)) => Ok(Json(order)),
		Ok(None) => Err(ApiError::NotFound("Order not found")),
		Err(e) => {
			tracing::warn!("Order retrieval failed: {}", e);
			Err(ApiError::Internal(e.to_string()))
		}
	}
}

/// Handles GET /api/metrics requests.
async fn get_metrics(State(state): State<AppState>) -> Json<QueueMetrics> {
	Json(state.pipeline.metrics())
}

/// Handles GET /health requests.
async fn health() -> Json<serde_json::Value> {
	Json(serde_json::json!({ "status": "ok", "timestamp": Utc::now() }))
}

/// Handles GET /ws requests by upgrading to a WebSocket subscription.
async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
	ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Bridges one subscriber's event stream onto its WebSocket.
///
/// Delivery is best-effort: a send failure tears the subscription down
/// and the registry prunes the entry.
async fn handle_socket(mut socket: WebSocket, state: AppState) {
	let (subscriber_id, mut updates) = state.pipeline.broadcaster().subscribe();

	let greeting = serde_json::json!({
		"type": "connected",
		"message": "WebSocket connection established",
		"timestamp": Utc::now(),
	});
	if socket
		.send(Message::Text(greeting.to_string().into()))
		.await
		.is_err()
	{
		state.pipeline.broadcaster().unsubscribe(subscriber_id);
		return;
	}

	loop {
		tokio::select! {
			update = updates.recv() => {
				let Some(update) = update else { break };
				if socket.send(Message::Text(update.into())).await.is_err() {
					break;
				}
			}
			incoming = socket.recv() => {
				match incoming {
					Some(Ok(Message::Close(_))) | None => break,
					// Inbound frames carry nothing the feed needs
					Some(Ok(_)) => {}
					Some(Err(_)) => break,
				}
			}
		}
	}

	state.pipeline.broadcaster().unsubscribe(subscriber_id);
}

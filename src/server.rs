//! Axum HTTP server for the notification service.
//!
//! Three route groups: provider webhooks (inbound parse and delivery
//! events), the manual reminder trigger, and health.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    routing::{get, post},
};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::db::{Database, SchemaCapabilities};
use crate::email::context::EmailContext;
use crate::email::reply::ReplyCleaner;
use crate::error::InboundError;
use crate::processor::{self, DeliveryEventStats, InboundEmail};
use crate::scheduler::{ReminderRunSummary, ReminderScheduler};

/// Shared state for all handlers.
pub struct AppState {
    pub db: Arc<dyn Database>,
    pub caps: SchemaCapabilities,
    pub cleaner: Arc<dyn ReplyCleaner>,
    pub scheduler: Arc<ReminderScheduler>,
    pub app_base_url: String,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
}

#[derive(Serialize)]
struct InboundReplyResponse {
    success: bool,
    communication_id: i64,
    matter_id: i64,
    context: EmailContext,
}

pub fn build_router(state: Arc<AppState>, inbound_body_max_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route(
            "/webhooks/email/inbound",
            post(inbound_handler).layer(DefaultBodyLimit::max(inbound_body_max_bytes)),
        )
        .route("/webhooks/email/events", post(events_handler))
        .route("/internal/reminders/run", post(reminders_run_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve until `ctrl-c`.
pub async fn serve(addr: SocketAddr, app: Router) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await?;
    Ok(())
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "docketmail",
    })
}

fn inbound_error_response(err: InboundError) -> (StatusCode, String) {
    match err {
        InboundError::InvalidReplyContext => (StatusCode::BAD_REQUEST, err.to_string()),
        InboundError::MatterNotFound(_) => (StatusCode::NOT_FOUND, err.to_string()),
        InboundError::Database(err) => {
            warn!("inbound reply failed: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to process inbound email".to_string(),
            )
        }
    }
}

/// SendGrid inbound-parse webhook: one multipart form per received email.
async fn inbound_handler(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<InboundReplyResponse>, (StatusCode, String)> {
    let mut payload = InboundEmail::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("Multipart read error: {e}")))?
    {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        let value = field
            .text()
            .await
            .map_err(|e| (StatusCode::BAD_REQUEST, format!("Multipart read error: {e}")))?;
        match name.as_str() {
            "to" => payload.to = value,
            "from" => payload.from = value,
            "subject" => payload.subject = value,
            "text" => payload.text = value,
            "html" => payload.html = value,
            "headers" => payload.headers_json = Some(value),
            // The parse webhook posts many more fields (envelope, spam
            // score, attachment info); none of them drive routing.
            _ => {}
        }
    }

    let result = processor::process_inbound_reply(
        state.db.as_ref(),
        state.caps,
        state.cleaner.as_ref(),
        &state.app_base_url,
        &payload,
    )
    .await
    .map_err(inbound_error_response)?;

    Ok(Json(InboundReplyResponse {
        success: true,
        communication_id: result.communication_id,
        matter_id: result.matter_id,
        context: result.context,
    }))
}

/// SendGrid event webhook: a JSON array of delivery events per call.
async fn events_handler(
    State(state): State<Arc<AppState>>,
    Json(events): Json<Vec<serde_json::Value>>,
) -> Json<DeliveryEventStats> {
    let stats = processor::process_delivery_events(state.db.as_ref(), state.caps, &events).await;
    Json(stats)
}

/// Manual sweep trigger. Always 200: partial failure is reported in the
/// summary body, not via status code.
async fn reminders_run_handler(State(state): State<Arc<AppState>>) -> Json<ReminderRunSummary> {
    Json(state.scheduler.run().await)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::error::DatabaseError;

    #[test]
    fn invalid_context_maps_to_400_with_exact_message() {
        let (status, body) = inbound_error_response(InboundError::InvalidReplyContext);
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, "Invalid reply context");
    }

    #[test]
    fn unknown_matter_maps_to_404() {
        let (status, _) = inbound_error_response(InboundError::MatterNotFound(7));
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn database_errors_map_to_500_without_leaking_detail() {
        let err = InboundError::Database(DatabaseError::Pool("password=hunter2".to_string()));
        let (status, body) = inbound_error_response(err);
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!body.contains("hunter2"));
    }
}

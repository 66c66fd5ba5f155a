//! Billing service webhook

use axum::{extract::State, http::HeaderMap, Json};
use listwise_billing::WebhookOutcome;
use serde::Serialize;

use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
};

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub received: bool,
    #[serde(flatten)]
    pub outcome: WebhookOutcome,
}

/// Verify, parse and apply one billing event
pub async fn billing_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> ApiResult<Json<WebhookResponse>> {
    tracing::info!(body_len = body.len(), "Billing webhook received");

    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            tracing::warn!("Billing webhook missing signature header");
            ApiError::BadRequest("Missing signature header".to_string())
        })?;

    let event = state.reconciler.verify_event(&body, signature).map_err(|e| {
        tracing::warn!(error = %e, "Billing webhook rejected");
        ApiError::from(e)
    })?;

    let outcome = state.reconciler.handle_event(&event).await.map_err(|e| {
        tracing::error!(
            event_id = %event.id,
            event_type = %event.event_type,
            error = %e,
            "Billing webhook handling failed"
        );
        ApiError::from(e)
    })?;

    Ok(Json(WebhookResponse {
        received: true,
        outcome,
    }))
}

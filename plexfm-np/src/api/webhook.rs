//! Plex webhook endpoint
//!
//! Plex posts `multipart/form-data` with a `payload` part holding the event
//! JSON (and sometimes a `thumb` image part). URL-encoded forms with the
//! same field are accepted too.
//!
//! Malformed input is rejected with 400. Any well-formed event is
//! acknowledged, whether or not it changed the session.

use axum::{
    extract::{FromRequest, Multipart, Request, State},
    http::header::CONTENT_TYPE,
    routing::post,
    Form, Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ApiError, ApiResult};
use crate::models::{EventKind, WebhookPayload};
use crate::AppState;

/// Name of the form field carrying the event JSON
const PAYLOAD_FIELD: &str = "payload";

#[derive(Debug, Deserialize)]
struct WebhookForm {
    payload: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WebhookResponse {
    pub message: String,
}

fn is_multipart(request: &Request) -> bool {
    request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("multipart/form-data"))
}

/// Pull the raw `payload` field out of either form encoding
async fn read_payload_field(request: Request) -> ApiResult<String> {
    if is_multipart(&request) {
        let mut multipart = Multipart::from_request(request, &())
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?
        {
            if field.name() == Some(PAYLOAD_FIELD) {
                return field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(e.body_text()));
            }
        }

        return Err(ApiError::BadRequest(format!(
            "missing '{}' form field",
            PAYLOAD_FIELD
        )));
    }

    let Form(form) = Form::<WebhookForm>::from_request(request, &())
        .await
        .map_err(|e| ApiError::BadRequest(e.body_text()))?;
    Ok(form.payload)
}

/// Parse the event JSON, distinguishing bad JSON from a bad shape
pub fn parse_payload(raw: &str) -> ApiResult<WebhookPayload> {
    let value: serde_json::Value = serde_json::from_str(raw).map_err(|e| {
        debug!("Failed to decode JSON from payload: {}", e);
        ApiError::BadRequest("Invalid JSON payload".to_string())
    })?;

    serde_json::from_value(value).map_err(|e| {
        debug!("Webhook payload failed validation: {}", e);
        ApiError::BadRequest("Invalid payload structure".to_string())
    })
}

fn log_payload(payload: &WebhookPayload) {
    let is_play = matches!(
        EventKind::from_plex_event(&payload.event),
        Some(EventKind::Play | EventKind::Resume)
    );
    if !is_play {
        return;
    }

    let metadata = payload.metadata.as_ref();
    info!(
        event = %payload.event,
        artist = metadata.and_then(|m| m.grandparent_title.as_deref()).unwrap_or(""),
        studio = metadata.and_then(|m| m.parent_studio.as_deref()).unwrap_or(""),
        title = metadata.and_then(|m| m.title.as_deref()).unwrap_or(""),
        album = metadata.and_then(|m| m.parent_title.as_deref()).unwrap_or(""),
        account = payload.account.as_ref().and_then(|a| a.title.as_deref()).unwrap_or(""),
        player = payload.player.as_ref().and_then(|p| p.name.as_deref()).unwrap_or(""),
        "Received webhook payload"
    );
}

/// POST /webhook
pub async fn plex_webhook(
    State(state): State<AppState>,
    request: Request,
) -> ApiResult<Json<WebhookResponse>> {
    let raw = read_payload_field(request).await?;
    let payload = parse_payload(&raw)?;

    log_payload(&payload);
    state.session.process_webhook(&payload).await;

    Ok(Json(WebhookResponse {
        message: "Webhook received".to_string(),
    }))
}

/// Build webhook routes
pub fn webhook_routes() -> Router<AppState> {
    Router::new().route("/webhook", post(plex_webhook))
}

//! Vendor webhook endpoint.
//!
//! URL validation is the only synchronous path; every other event is
//! verified against the signature header, acknowledged with 200
//! immediately, and processed asynchronously.

use crate::domain::models::ProductKind;
use crate::rtms::router::WebhookOutcome;
use crate::service::AppService;
use crate::wire::signature;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json};
use serde_json::{json, Value};
use std::sync::Arc;

const SIGNATURE_HEADER: &str = "x-signature";
const TIMESTAMP_HEADER: &str = "x-timestamp";

/// POST /webhook
pub async fn handle_webhook(
    State(service): State<Arc<AppService>>,
    headers: HeaderMap,
    body: String,
) -> impl IntoResponse {
    let parsed: Value = match serde_json::from_str(&body) {
        Ok(value) => value,
        Err(error) => {
            log::warn!("Webhook body is not JSON: {}", error);
            return (StatusCode::BAD_REQUEST, Json(json!({"error": "invalid JSON body"})));
        }
    };

    let event = parsed
        .get("event")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let payload = parsed.get("payload").cloned().unwrap_or(Value::Null);

    // The validation challenge must be answered synchronously and is the
    // one event that arrives unsigned
    if event == "endpoint.url_validation" {
        return match service.router.handle_event(&event, &payload).await {
            Ok(WebhookOutcome::Validation(response)) => match serde_json::to_value(&response) {
                Ok(value) => (StatusCode::OK, Json(value)),
                Err(error) => {
                    log::error!("validation serialization failed: {}", error);
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        Json(json!({"error": "internal error"})),
                    )
                }
            },
            Ok(_) => (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "malformed validation event"})),
            ),
            Err(error) => (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": error.to_string()})),
            ),
        };
    }

    // The vendor signs each event with the secret token of the product it
    // belongs to
    if !verify_signature(&service, event_product(&event), &headers, &body) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "signature verification failed"})),
        );
    }

    // Ack first, work async
    let service = Arc::clone(&service);
    tokio::spawn(async move {
        if let Err(error) = service.router.handle_event(&event, &payload).await {
            log::warn!("webhook event {} failed: {}", event, error);
        }
    });

    (StatusCode::OK, Json(json!({"success": true})))
}

/// Maps an event name to the product whose secret token signed it;
/// events without a product prefix use the meeting record.
fn event_product(event: &str) -> ProductKind {
    event
        .split_once('.')
        .and_then(|(prefix, _)| ProductKind::from_event_prefix(prefix))
        .unwrap_or(ProductKind::Meeting)
}

fn verify_signature(
    service: &AppService,
    product: ProductKind,
    headers: &HeaderMap,
    body: &str,
) -> bool {
    let Some(credentials) = service.config.credentials_for(product) else {
        return false;
    };
    let Some(sig) = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok()) else {
        log::warn!("webhook missing {} header", SIGNATURE_HEADER);
        return false;
    };
    let Some(timestamp) = headers.get(TIMESTAMP_HEADER).and_then(|v| v.to_str().ok()) else {
        log::warn!("webhook missing {} header", TIMESTAMP_HEADER);
        return false;
    };
    signature::verify_webhook(body, timestamp, sig, &credentials.secret_token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_product_follows_prefix() {
        assert_eq!(event_product("webinar.rtms_started"), ProductKind::Webinar);
        assert_eq!(event_product("session.rtms_stopped"), ProductKind::VideoSdk);
        assert_eq!(event_product("phone.rtms_started"), ProductKind::Phone);
        // Unknown prefixes and unprefixed names fall back to meeting
        assert_eq!(event_product("meeting.rtms_started"), ProductKind::Meeting);
        assert_eq!(event_product("endpoint.url_validation"), ProductKind::Meeting);
        assert_eq!(event_product("bogus"), ProductKind::Meeting);
    }
}

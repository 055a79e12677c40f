//! Webhook configuration and the delivery ledger. Outbound delivery itself
//! belongs to an external worker; this surface only manages configuration
//! and queues test deliveries.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use stockpile_model::{DeliveryStatus, Webhook, WebhookDelivery, epoch_now};
use uuid::Uuid;

use crate::errors::{AppError, AppResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WebhookBody {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub events: Vec<String>,
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

pub async fn list_webhooks(State(state): State<AppState>) -> AppResult<Json<serde_json::Value>> {
    Ok(Json(json!({ "webhooks": state.db.list_webhooks().await? })))
}

pub async fn create_webhook(
    State(state): State<AppState>,
    Json(body): Json<WebhookBody>,
) -> AppResult<Json<serde_json::Value>> {
    if !body.url.starts_with("http://") && !body.url.starts_with("https://") {
        return Err(AppError::bad_request("webhook url must be http(s)"));
    }
    let now = epoch_now();
    let webhook = Webhook {
        id: Uuid::new_v4().to_string(),
        name: body.name,
        url: body.url,
        events: if body.events.is_empty() {
            vec!["*".to_string()]
        } else {
            body.events
        },
        secret: body.secret,
        enabled: body.enabled,
        created_at: now,
        updated_at: now,
    };
    state.db.create_webhook(&webhook).await?;
    Ok(Json(serde_json::to_value(webhook)?))
}

pub async fn get_webhook(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    let webhook = state
        .db
        .get_webhook(&id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("no webhook {id}")))?;
    Ok(Json(serde_json::to_value(webhook)?))
}

pub async fn update_webhook(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<WebhookBody>,
) -> AppResult<Json<serde_json::Value>> {
    let mut webhook = state
        .db
        .get_webhook(&id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("no webhook {id}")))?;
    webhook.name = body.name;
    webhook.url = body.url;
    webhook.events = body.events;
    webhook.secret = body.secret;
    webhook.enabled = body.enabled;
    state.db.update_webhook(&webhook).await?;
    Ok(Json(serde_json::to_value(webhook)?))
}

pub async fn delete_webhook(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    if !state.db.delete_webhook(&id).await? {
        return Err(AppError::not_found(format!("no webhook {id}")));
    }
    Ok(Json(json!({ "deleted": id })))
}

/// POST /webhooks/<id>/test — queue a pending test delivery for the
/// outbound worker.
pub async fn test_webhook(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    let webhook = state
        .db
        .get_webhook(&id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("no webhook {id}")))?;
    if !webhook.enabled {
        return Err(AppError::conflict("webhook is disabled"));
    }
    let delivery = WebhookDelivery {
        id: Uuid::new_v4().to_string(),
        webhook_id: webhook.id.clone(),
        event: "test".to_string(),
        status: DeliveryStatus::Pending,
        status_code: None,
        response_body: None,
        error_message: None,
        duration_ms: None,
        retry_count: 0,
        created_at: epoch_now(),
    };
    state.db.insert_delivery(&delivery).await?;
    Ok(Json(json!({ "queued": delivery.id })))
}

#[derive(Debug, Deserialize)]
pub struct DeliveriesQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    50
}

pub async fn list_deliveries(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<DeliveriesQuery>,
) -> AppResult<Json<serde_json::Value>> {
    let deliveries = state.db.list_deliveries(&id, query.limit.clamp(1, 500)).await?;
    Ok(Json(json!({ "deliveries": deliveries })))
}

pub async fn webhook_stats(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    let (total, success, failed) = state.db.delivery_stats(&id).await?;
    Ok(Json(json!({
        "total": total,
        "success": success,
        "failed": failed,
        "pending": total - success - failed,
    })))
}

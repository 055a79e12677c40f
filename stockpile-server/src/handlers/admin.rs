//! Admin API key management. The plaintext key appears exactly once, in
//! the creation response.

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::errors::{AppError, AppResult};
use crate::state::AppState;

pub async fn list_keys(State(state): State<AppState>) -> AppResult<Json<serde_json::Value>> {
    let keys: Vec<serde_json::Value> = state
        .auth
        .list_admin_keys()
        .into_iter()
        .map(|key| {
            json!({
                "key_id": key.key_id,
                "name": key.name,
                "level": key.level,
                "created_at": key.created_at,
                "last_used": key.last_used,
                "expires_at": key.expires_at,
                "allowed_ips": key.allowed_ips,
                "permissions": key.permissions,
                "enabled": key.enabled,
            })
        })
        .collect();
    Ok(Json(json!({ "keys": keys })))
}

#[derive(Debug, Deserialize)]
pub struct CreateKeyBody {
    pub name: String,
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub expires_days: Option<i64>,
    #[serde(default)]
    pub allowed_ips: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
}

fn default_level() -> String {
    "admin".to_string()
}

pub async fn create_key(
    State(state): State<AppState>,
    Json(body): Json<CreateKeyBody>,
) -> AppResult<Json<serde_json::Value>> {
    if body.name.trim().is_empty() {
        return Err(AppError::bad_request("key needs a name"));
    }
    let (key, plaintext) = state.auth.create_admin_key(
        body.name.trim(),
        &body.level,
        body.expires_days,
        body.allowed_ips,
        body.permissions,
    );
    Ok(Json(json!({
        "key_id": key.key_id,
        "name": key.name,
        // Shown once; only the hash is retained.
        "key": plaintext,
    })))
}

pub async fn delete_key(
    State(state): State<AppState>,
    Path(key_id): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    if !state.auth.delete_admin_key(&key_id) {
        return Err(AppError::not_found(format!("no key {key_id}")));
    }
    Ok(Json(json!({ "deleted": key_id })))
}

pub async fn set_key_enabled(
    State(state): State<AppState>,
    Path((key_id, action)): Path<(String, String)>,
) -> AppResult<Json<serde_json::Value>> {
    let enabled = match action.as_str() {
        "enable" => true,
        "disable" => false,
        other => return Err(AppError::bad_request(format!("unknown action: {other}"))),
    };
    if !state.auth.set_admin_key_enabled(&key_id, enabled) {
        return Err(AppError::not_found(format!("no key {key_id}")));
    }
    Ok(Json(json!({ "key_id": key_id, "enabled": enabled })))
}

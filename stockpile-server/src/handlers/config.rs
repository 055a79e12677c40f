//! Configuration endpoints: read, patch, hot reload, and the override
//! view. Secrets are redacted from every read.

use axum::extract::State;
use axum::Json;
use serde_json::json;

use crate::errors::{AppError, AppResult};
use crate::state::AppState;

/// GET /config — the effective configuration, secrets redacted.
pub async fn get_config(State(state): State<AppState>) -> AppResult<Json<serde_json::Value>> {
    let mut value = serde_json::to_value(state.config().as_ref())?;
    redact(&mut value);
    Ok(Json(value))
}

/// PUT /config — deep-merge a patch into settings.json and swap the live
/// record. Round trip law: saving then reloading yields the same config.
pub async fn put_config(
    State(state): State<AppState>,
    Json(patch): Json<serde_json::Value>,
) -> AppResult<Json<serde_json::Value>> {
    if !patch.is_object() {
        return Err(AppError::bad_request("config patch must be an object"));
    }
    let Some(settings_path) = state.settings_path.clone() else {
        return Err(AppError::conflict("no settings file configured"));
    };
    let reloaded = stockpile_config::Config::save_patch(&settings_path, patch)?;
    state.swap_config(reloaded);
    Ok(Json(json!({ "saved": true })))
}

/// POST /config/reload — re-run the defaults/file/env merge and swap.
pub async fn reload_config(State(state): State<AppState>) -> AppResult<Json<serde_json::Value>> {
    let reloaded = stockpile_config::Config::load(state.settings_path.as_deref())?;
    state.swap_config(reloaded);
    Ok(Json(json!({ "reloaded": true })))
}

/// GET /config/changes — the raw override file (what differs from
/// defaults), rather than the expanded effective config.
pub async fn config_changes(State(state): State<AppState>) -> AppResult<Json<serde_json::Value>> {
    let Some(settings_path) = state.settings_path.as_deref() else {
        return Ok(Json(json!({})));
    };
    if !settings_path.exists() {
        return Ok(Json(json!({})));
    }
    let raw = std::fs::read_to_string(settings_path)
        .map_err(|err| AppError::internal(err.to_string()))?;
    let mut value: serde_json::Value = serde_json::from_str(&raw)
        .map_err(|err| AppError::internal(format!("settings file is not valid JSON: {err}")))?;
    redact(&mut value);
    Ok(Json(value))
}

/// Blank out credential-bearing fields wherever they appear.
fn redact(value: &mut serde_json::Value) {
    const SENSITIVE: &[&str] = &["password", "secret_key", "admin_password", "secret"];
    match value {
        serde_json::Value::Object(map) => {
            for (key, child) in map.iter_mut() {
                if SENSITIVE.contains(&key.as_str()) && child.is_string() {
                    if !child.as_str().unwrap_or_default().is_empty() {
                        *child = serde_json::Value::String("********".to_string());
                    }
                } else {
                    redact(child);
                }
            }
        }
        serde_json::Value::Array(items) => items.iter_mut().for_each(redact),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::redact;
    use serde_json::json;

    #[test]
    fn secrets_are_masked_recursively() {
        let mut value = json!({
            "auth": { "secret_key": "abc", "admin_password": "" },
            "database": { "password": "pg", "host": "db" },
            "mirrors": { "entries": { "docker": { "password": "reg" } } },
        });
        redact(&mut value);
        assert_eq!(value["auth"]["secret_key"], "********");
        assert_eq!(value["auth"]["admin_password"], ""); // empty stays empty
        assert_eq!(value["database"]["password"], "********");
        assert_eq!(value["database"]["host"], "db");
        assert_eq!(value["mirrors"]["entries"]["docker"]["password"], "********");
    }
}

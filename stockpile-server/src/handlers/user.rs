//! Authentication endpoints: login, password change, login audit.

use axum::extract::{Query, Request, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use stockpile_core::auth::AuthIdentity;
use stockpile_model::{User, epoch_now};

use crate::errors::{AppError, AppResult};
use crate::middleware::client_ip;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct LoginBody {
    pub username: String,
    pub password: String,
}

/// POST /user/login — verify credentials, mint a session, and return both
/// the token and a `Set-Cookie` header.
pub async fn login(
    State(state): State<AppState>,
    request: Request,
) -> Result<Response, AppError> {
    let ip = client_ip(&request);
    let user_agent = request
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let bytes = axum::body::to_bytes(request.into_body(), 64 * 1024)
        .await
        .map_err(|err| AppError::bad_request(format!("unreadable body: {err}")))?;
    let body: LoginBody = serde_json::from_slice(&bytes)
        .map_err(|err| AppError::bad_request(format!("invalid login body: {err}")))?;

    let identity = state
        .auth
        .verify_user(&body.username, &body.password, &ip, &user_agent)
        .await?;
    let cookie_value = state.auth.create_session(&identity.subject, &identity.level);

    let payload = Json(json!({
        "username": identity.subject,
        "role": identity.level,
        "token": cookie_value,
    }));
    let cookie = format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax",
        state.auth.cookie_name(),
        cookie_value
    );
    let mut response = payload.into_response();
    response.headers_mut().insert(
        header::SET_COOKIE,
        cookie.parse().map_err(|_| AppError::internal("cookie encoding"))?,
    );
    Ok(response)
}

#[derive(Debug, Deserialize)]
pub struct PasswordBody {
    pub username: Option<String>,
    pub old_password: Option<String>,
    pub new_password: String,
}

/// PUT /user/password — change the caller's (or, for admins, a named
/// user's) password; creates the user row on first change away from the
/// static account.
pub async fn change_password(
    State(state): State<AppState>,
    identity: axum::Extension<AuthIdentity>,
    Json(body): Json<PasswordBody>,
) -> AppResult<Json<serde_json::Value>> {
    if body.new_password.len() < 8 {
        return Err(AppError::bad_request("password must be at least 8 characters"));
    }
    let target = body.username.clone().unwrap_or_else(|| identity.subject.clone());
    if target != identity.subject && identity.level != "admin" {
        return Err(AppError::forbidden("only admins may change other accounts"));
    }

    let hash = state.auth.hash_password(&body.new_password)?;
    match state.db.get_user(&target).await? {
        Some(user) => {
            // Self-service changes must present the current password.
            if target == identity.subject {
                let old = body
                    .old_password
                    .as_deref()
                    .ok_or_else(|| AppError::bad_request("old_password required"))?;
                if !state.auth.verify_password_hash(old, &user.password_hash) {
                    return Err(AppError::unauthorized("old password does not match"));
                }
            }
            state.db.set_user_password(&target, &hash).await?;
        }
        None => {
            state
                .db
                .create_user(&User {
                    username: target.clone(),
                    password_hash: hash,
                    role: identity.level.clone(),
                    email: None,
                    last_login: None,
                    login_count: 0,
                    failed_attempts: 0,
                    locked_until: None,
                    enabled: true,
                    created_at: epoch_now(),
                })
                .await?;
        }
    }
    Ok(Json(json!({ "changed": target })))
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    100
}

/// GET /user/login-logs — the append-only audit trail.
pub async fn login_logs(
    State(state): State<AppState>,
    Query(query): Query<LogsQuery>,
) -> AppResult<Json<serde_json::Value>> {
    let logs = state.db.list_login_logs(query.limit.clamp(1, 1000)).await?;
    Ok(Json(json!({ "logs": logs })))
}

/// POST /user/logout — destroy the presented session.
pub async fn logout(
    State(state): State<AppState>,
    request: Request,
) -> AppResult<Json<serde_json::Value>> {
    let credentials = crate::middleware::extract_credentials(&state, &request);
    let destroyed = credentials
        .cookie
        .or(credentials.bearer)
        .and_then(|value| value.split('.').next().map(str::to_string))
        .map(|session_id| state.auth.destroy_session(&session_id))
        .unwrap_or(false);
    Ok(Json(json!({ "logged_out": destroyed })))
}

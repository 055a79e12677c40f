//! Request-path middleware: the lifecycle/rate/allow-list gate at router
//! entry, the access log, and the auth gate for protected API routes.

use std::net::SocketAddr;
use std::time::Instant;

use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{Method, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::Engine;
use stockpile_core::auth::Credentials;
use tracing::warn;

use crate::errors::AppError;
use crate::state::AppState;

/// Router entry gate, outermost layer. Order is deliberate: the IP
/// allow-list and rate limiter run before any credential is looked at, and
/// a stopping server refuses new work before anything else happens.
pub async fn entry_gate(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(_guard) = state.lifecycle.begin_request() else {
        return AppError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "server is shutting down",
        )
        .into_response();
    };

    let client_ip = client_ip(&request);
    if !state.auth.ip_allowed(&client_ip) {
        return AppError::forbidden("source address not allowed").into_response();
    }
    if !state.auth.check_rate(&client_ip) {
        return AppError::new(StatusCode::TOO_MANY_REQUESTS, "rate limit exceeded")
            .into_response();
    }

    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = Instant::now();

    let response = next.run(request).await;

    write_access_log(
        &state,
        &client_ip,
        &method,
        &path,
        response.status(),
        started.elapsed().as_millis() as u64,
    );
    response
}

/// Auth gate for `/api` routers: public endpoints pass through, everything
/// else needs a valid credential (first success in the specified order
/// wins). The resolved identity lands in request extensions.
pub async fn api_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_lowercase();
    if !is_protected(request.method(), &path) {
        return next.run(request).await;
    }

    let credentials = extract_credentials(&state, &request);
    match state.auth.authenticate(&credentials).await {
        Ok(identity) => {
            request.extensions_mut().insert(identity);
            next.run(request).await
        }
        Err(err) => AppError::from(err).into_response(),
    }
}

/// Endpoint classification. Matching is done on the lowercased path; the
/// original casing is never used for routing decisions.
pub fn is_protected(method: &Method, path: &str) -> bool {
    // Login must stay reachable without credentials.
    if path.ends_with("/user/login") {
        return false;
    }
    if method != Method::GET && method != Method::HEAD {
        return true;
    }

    const PROTECTED_GET: &[&str] = &[
        "/config",
        "/webhooks",
        "/user/login-logs",
        "/server/restart",
        "/admin/",
        "/cache/prewarm",
    ];
    PROTECTED_GET.iter().any(|fragment| path.contains(fragment))
}

/// Pull every supported credential source out of one request.
pub fn extract_credentials(state: &AppState, request: &Request) -> Credentials {
    let headers = request.headers();
    let mut credentials = Credentials {
        client_ip: client_ip(request),
        user_agent: headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string(),
        ..Default::default()
    };

    if let Some(authorization) = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        if let Some(token) = authorization.strip_prefix("Bearer ") {
            credentials.bearer = Some(token.to_string());
        } else if let Some(encoded) = authorization.strip_prefix("Basic ") {
            credentials.basic = base64::engine::general_purpose::STANDARD
                .decode(encoded)
                .ok()
                .and_then(|raw| String::from_utf8(raw).ok())
                .and_then(|pair| {
                    pair.split_once(':')
                        .map(|(user, pass)| (user.to_string(), pass.to_string()))
                });
        }
    }

    credentials.api_key_header = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    if let Some(cookies) = headers.get(header::COOKIE).and_then(|v| v.to_str().ok()) {
        let wanted = state.auth.cookie_name();
        credentials.cookie = cookies.split(';').find_map(|cookie| {
            let (name, value) = cookie.trim().split_once('=')?;
            (name == wanted).then(|| value.to_string())
        });
    }

    if let Some(query) = request.uri().query() {
        credentials.query_key = query.split('&').find_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            (name == "key").then(|| value.to_string())
        });
    }

    credentials
}

/// Best-effort client address: `X-Forwarded-For` first, then the socket.
pub fn client_ip(request: &Request<Body>) -> String {
    if let Some(forwarded) = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn write_access_log(
    state: &AppState,
    ip: &str,
    method: &Method,
    path: &str,
    status: StatusCode,
    duration_ms: u64,
) {
    let line = format!(
        "{} {ip} {method} {path} {} {duration_ms}ms\n",
        chrono::Utc::now().to_rfc3339(),
        status.as_u16(),
    );
    let log_path = state.config().server.access_log.clone();
    tokio::task::spawn_blocking(move || {
        use std::io::Write;
        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .and_then(|mut file| file.write_all(line.as_bytes()));
        if let Err(err) = result {
            warn!(error = %err, "access log write failed");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mutating_methods_are_always_protected() {
        assert!(is_protected(&Method::POST, "/api/v2/cache/clean"));
        assert!(is_protected(&Method::PUT, "/api/v2/config"));
        assert!(is_protected(&Method::DELETE, "/api/v2/files/x"));
    }

    #[test]
    fn read_only_endpoints_are_public() {
        assert!(!is_protected(&Method::GET, "/api/v2/stats"));
        assert!(!is_protected(&Method::GET, "/api/v2/health/sources"));
        assert!(!is_protected(&Method::GET, "/api/v2/monitor/realtime"));
        assert!(!is_protected(&Method::GET, "/api/v2/sync/history"));
    }

    #[test]
    fn sensitive_reads_require_auth() {
        assert!(is_protected(&Method::GET, "/api/v2/config"));
        assert!(is_protected(&Method::GET, "/api/v2/webhooks"));
        assert!(is_protected(&Method::GET, "/api/v2/user/login-logs"));
        assert!(is_protected(&Method::GET, "/api/v2/server/restart/history"));
    }

    #[test]
    fn login_is_reachable_without_credentials() {
        assert!(!is_protected(&Method::POST, "/api/v2/user/login"));
    }
}

//! Authentication middleware.
//!
//! `chatbot_auth_middleware` guards the bot API:
//! 1. Read the `X-API-Key` header and request metadata
//! 2. Run the gateway (hash, lookup, rate limits)
//! 3. Inject the resolved `Identity` into the request extensions
//! 4. Record the usage with the handler's status code, or with 499 if the
//!    request is dropped before the handler finishes
//!
//! `admin_auth_middleware` guards the key administration routes with a static
//! token compared in constant time.

use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};

use crate::{
    error::AppError,
    gateway::{API_KEY_HEADER, Denial, RequestMeta},
    hasher,
    state::AppState,
};

/// Header carrying the admin token.
pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

/// Chatbot API key middleware function.
///
/// # Headers
///
/// ```text
/// X-API-Key: crb_LIVE_0123456789abcdef0123456789abcdef
/// ```
///
/// # Returns
///
/// - `Ok(Response)` from the downstream handler when admitted
/// - `Err(Denial)` otherwise, rendered with the status and body code of
///   the denial (and `Retry-After` on 429)
pub async fn chatbot_auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, Denial> {
    let meta = RequestMeta {
        method: request.method().to_string(),
        endpoint: request.uri().path().to_string(),
        ip: client_ip(&request),
        start_time: state.clock.now(),
    };

    // Cancelled when the server starts shutting down
    let cancel = state.shutdown.child_token();

    let header = request
        .headers()
        .get(API_KEY_HEADER)
        .map(|value| value.as_bytes());
    let identity = state
        .gateway
        .authenticate_and_admit(header, &meta, &cancel)
        .await?;

    // Route handlers can extract this using Extension<Identity>
    request.extensions_mut().insert(identity.clone());

    // Records on drop too, so an admission always counts toward the limits
    let usage = state.gateway.track(identity, meta);

    let response = next.run(request).await;
    usage.finish(response.status().as_u16());

    Ok(response)
}

/// Admin token middleware function.
///
/// Both sides are hashed before comparison so the comparison is fixed-width
/// and constant-time regardless of the presented token's length.
pub async fn admin_auth_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let expected = state
        .admin_token_hash
        .as_deref()
        .ok_or(AppError::Unauthorized)?;

    let presented = request
        .headers()
        .get(ADMIN_TOKEN_HEADER)
        .ok_or(AppError::Unauthorized)?;
    let presented =
        hasher::hash_key(presented.as_bytes()).map_err(|_| AppError::Unauthorized)?;

    if !hasher::hashes_match(&presented.key_hash, expected) {
        return Err(AppError::Unauthorized);
    }

    Ok(next.run(request).await)
}

/// First `X-Forwarded-For` hop, else the socket peer, else `"unknown"`.
fn client_ip(request: &Request) -> String {
    let forwarded = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());
    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

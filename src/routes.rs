//! HTTP router.

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::{
    handlers,
    middleware::auth::{admin_auth_middleware, chatbot_auth_middleware},
    state::AppState,
};

/// Build the application router.
///
/// - `/health` is public
/// - `/api/bot/v1/*` runs behind the chatbot gateway
/// - `/api/admin/v1/*` exists only when an admin token is configured
pub fn router(state: AppState) -> Router {
    let bot_routes = Router::new()
        .route("/api/bot/v1/whoami", get(handlers::bot::whoami))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            chatbot_auth_middleware,
        ));

    let mut app = Router::new()
        .route("/health", get(handlers::health::health_check))
        .merge(bot_routes);

    if state.admin_token_hash.is_some() {
        let admin_routes = Router::new()
            .route(
                "/api/admin/v1/tenants/{tenant_id}/chatbots/{chatbot_id}/keys",
                post(handlers::api_keys::create_key).get(handlers::api_keys::list_keys),
            )
            .route(
                "/api/admin/v1/tenants/{tenant_id}/keys/{key_id}/revoke",
                post(handlers::api_keys::revoke_key),
            )
            .route_layer(axum_middleware::from_fn_with_state(
                state.clone(),
                admin_auth_middleware,
            ));
        app = app.merge(admin_routes);
    }

    app.layer(TraceLayer::new_for_http()).with_state(state)
}

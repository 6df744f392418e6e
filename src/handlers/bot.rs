//! Bot API endpoints.
//!
//! Every route here sits behind `chatbot_auth_middleware`; the resolved
//! identity is available as `Extension<Identity>`.

use axum::{Extension, Json};

use crate::gateway::Identity;

/// Echo the identity the gateway resolved for the presented key.
///
/// # Endpoint
///
/// `GET /api/bot/v1/whoami`
///
/// # Response (200 OK)
///
/// ```json
/// {
///   "tenant_id": "11111111-1111-1111-1111-111111111111",
///   "chatbot_id": "33333333-3333-3333-3333-333333333333",
///   "api_key_id": "44444444-4444-4444-4444-444444444444",
///   "environment": "LIVE",
///   "capabilities": {
///     "can_read_complaints": true,
///     "can_respond": true,
///     "can_change_state": false,
///     "can_send_messages": true,
///     "can_read_metrics": false
///   }
/// }
/// ```
pub async fn whoami(Extension(identity): Extension<Identity>) -> Json<Identity> {
    Json(identity)
}

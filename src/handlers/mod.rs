//! HTTP request handlers (route handlers).

/// Key administration endpoints
pub mod api_keys;
/// Endpoints behind the chatbot gateway
pub mod bot;
/// Service health and gateway counters
pub mod health;

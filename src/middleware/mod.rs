//! HTTP middleware components.
//!
//! Middleware run before route handlers and can short-circuit a request.

/// Chatbot API key gateway and admin token guard
pub mod auth;

//! Data models representing database entities.
//!
//! This module contains the records the gateway reads and writes, plus the
//! request/response bodies of the administrative key endpoints.

/// API key credential model
pub mod api_key;
/// Chatbot capability carrier
pub mod chatbot;
/// Append-only usage records
pub mod chatbot_log;

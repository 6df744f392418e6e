//! Chatbot API-key gateway for the complaints-book backend.
//!
//! Authenticates chatbot requests by opaque API key, enforces a per-key
//! sliding minute limit and a per-tenant UTC daily limit, and records a usage
//! log row for every attributable request.
//!
//! # Architecture
//!
//! - **Web Framework**: Axum (async HTTP server)
//! - **Database**: PostgreSQL with sqlx (async queries)
//! - **Authentication**: `X-API-Key` header, stored as SHA-256 only
//! - **Post-admission work**: bounded background queue with drop counters

pub mod background;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod hasher;
pub mod limiter;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
pub mod store;

//! Business logic services.
//!
//! Services hold the logic behind the administrative handlers, separated from
//! HTTP concerns.

pub mod key_service;

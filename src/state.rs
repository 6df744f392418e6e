//! Shared application state handed to every handler and middleware.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::{
    clock::Clock, config::IssuanceConfig, db::DbPool, gateway::Gateway, store::KeyStore,
};

#[derive(Clone)]
pub struct AppState {
    pub gateway: Gateway,
    pub keys: Arc<dyn KeyStore>,
    pub clock: Arc<dyn Clock>,
    pub issuance: IssuanceConfig,

    /// SHA-256 of the admin token. Admin routes are only mounted when set.
    pub admin_token_hash: Option<Arc<str>>,

    /// Cancelled on shutdown; in-flight authentications return `cancelled`.
    pub shutdown: CancellationToken,

    /// Present when backed by Postgres; probed by the health check.
    pub db: Option<DbPool>,
}

//! Recording of admitted requests.

use tracing::debug;

use super::{CLIENT_CLOSED_REQUEST, Gateway, Identity, RequestMeta};

/// Created on admission; records the request's usage exactly once.
///
/// The middleware calls `finish` with the downstream status. If the request
/// future is dropped while the handler runs (client disconnect, timeout),
/// `Drop` records it with `CLIENT_CLOSED_REQUEST` so it still counts toward
/// the key's limits.
#[must_use = "dropping the guard records the request as abandoned"]
pub struct UsageGuard {
    gateway: Gateway,
    identity: Identity,
    meta: RequestMeta,
    recorded: bool,
}

impl UsageGuard {
    pub(super) fn new(gateway: Gateway, identity: Identity, meta: RequestMeta) -> Self {
        Self {
            gateway,
            identity,
            meta,
            recorded: false,
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Record the request with the status the downstream handler returned.
    pub fn finish(mut self, status_code: u16) {
        self.record(status_code);
    }

    fn record(&mut self, status_code: u16) {
        if self.recorded {
            return;
        }
        self.recorded = true;
        self.gateway.record_admitted(&self.identity, &self.meta, status_code);
    }
}

impl Drop for UsageGuard {
    fn drop(&mut self) {
        if !self.recorded {
            debug!(
                api_key_id = %self.identity.api_key_id,
                endpoint = %self.meta.endpoint,
                "admitted request abandoned before completion"
            );
            self.record(CLIENT_CLOSED_REQUEST);
        }
    }
}

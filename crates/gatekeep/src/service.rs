//! The request facing side of the [`Resolver`].
//!
//! Every request is tied to the server's shutdown token, so that callers still waiting for a
//! value are released once the server shuts down.

use std::sync::Arc;

use gatekeep_service::services::{ResolveError, Resolver};
use tokio_util::sync::CancellationToken;

/// State shared by all request handlers.
#[derive(Clone, Debug)]
pub struct RequestService {
    resolver: Arc<Resolver>,
    shutdown: CancellationToken,
}

impl RequestService {
    pub fn new(resolver: Arc<Resolver>, shutdown: CancellationToken) -> Self {
        Self { resolver, shutdown }
    }

    /// Returns the value for `key`, producing it if necessary.
    pub async fn resolve(&self, key: &str) -> Result<String, ResolveError> {
        self.resolver
            .resolve_with_cancellation(key, &self.shutdown)
            .await
    }
}

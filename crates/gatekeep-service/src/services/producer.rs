use std::fmt;
use std::time::Duration;

use futures::future::BoxFuture;

use crate::config::ProducerConfig;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProducerError {
    /// An empty value can not be told apart from the lock placeholder, so it is never stored.
    #[error("producer returned an empty value")]
    EmptyValue,
    #[error("{0}")]
    Failed(String),
}

impl ProducerError {
    pub fn failed(reason: impl fmt::Display) -> Self {
        Self::Failed(reason.to_string())
    }
}

/// The expensive computation guarded by the [`Resolver`](super::Resolver).
///
/// It is invoked at most once concurrently per key, by whichever caller won the advisory lock.
/// Work that blocks the thread should be moved off the runtime, e.g. with
/// [`tokio::task::spawn_blocking`].
pub trait ValueProducer: Send + Sync + 'static {
    /// Computes the value for `key`.
    fn produce<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<String, ProducerError>>;
}

/// A stand-in for a slow backend query that always yields the same value.
#[derive(Debug, Clone)]
pub struct SlowQueryProducer {
    delay: Duration,
    value: String,
}

impl SlowQueryProducer {
    pub fn new(config: &ProducerConfig) -> Self {
        Self {
            delay: config.delay,
            value: config.value.clone(),
        }
    }
}

impl ValueProducer for SlowQueryProducer {
    fn produce<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<String, ProducerError>> {
        Box::pin(async move {
            tracing::info!(key, "Fetching slow query");
            tokio::time::sleep(self.delay).await;
            tracing::info!(key, "Fetched value from slow query");
            Ok(self.value.clone())
        })
    }
}

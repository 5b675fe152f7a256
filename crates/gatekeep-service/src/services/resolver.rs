//! The cache-miss protocol.
//!
//! A [`Resolver`] serves values from the [`TtlCache`], and makes sure that concurrent callers
//! missing the same key only run the [`ValueProducer`] once:
//!
//! 1. Look the key up. A non-empty value is returned right away.
//! 2. Try to take the advisory lock: an empty placeholder written with set-if-absent and a
//!    `lock_ttl`.
//! 3. The caller holding the lock runs the producer, stores the value with `value_ttl` and
//!    publishes it on the [`TopicBroker`] under the key.
//! 4. Everybody else subscribes to the key, checks the cache once more in case the value arrived
//!    in the meantime, and waits for the broadcast. Running into `wait_timeout`, or the lock
//!    being released without a value, starts the protocol over from step 1.
//!
//! A failing producer releases the lock and wakes all waiters, so one of them can take over
//! right away instead of waiting for the lock to expire.
//!
//! ### Metrics
//!
//! - `cache.hit` / `cache.miss`: Lookups at the start of each attempt.
//! - `resolve.lock_acquired`: Attempts that ended up running the producer.
//! - `resolve.wait`: Attempts that waited for another caller's value.
//! - `resolve.retry`: Attempts that had to start over.
//! - `producer.duration` / `producer.failure`: Producer timings and failures.

use std::sync::Arc;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::producer::{ProducerError, ValueProducer};
use crate::broker::{Subscription, SubscriptionId, TopicBroker};
use crate::caching::{SetOptions, TtlCache};
use crate::config::CoalescingConfig;
use crate::utils::defer::defer;

/// Marks a key as being produced. Never returned to callers.
const PLACEHOLDER: &str = "";

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("failed to produce value for `{key}`")]
    Producer {
        key: String,
        #[source]
        source: ProducerError,
    },
    #[error("gave up on `{key}` after {attempts} attempts")]
    RetryExhausted { key: String, attempts: u32 },
    #[error("resolving `{key}` was cancelled")]
    Cancelled { key: String },
}

fn is_placeholder(value: &str) -> bool {
    value == PLACEHOLDER
}

/// How a wait for another caller's value ended.
enum WaitOutcome {
    Value(String),
    Retry,
}

/// Resolves keys to values, see the [module level docs](self).
pub struct Resolver {
    cache: Arc<TtlCache>,
    broker: Arc<TopicBroker>,
    producer: Arc<dyn ValueProducer>,
    config: CoalescingConfig,
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("config", &self.config)
            .field("cache entries", &self.cache.len())
            .field("topics", &self.broker.topic_count())
            .finish()
    }
}

impl Resolver {
    pub fn new(
        cache: Arc<TtlCache>,
        broker: Arc<TopicBroker>,
        producer: Arc<dyn ValueProducer>,
        config: CoalescingConfig,
    ) -> Self {
        Self {
            cache,
            broker,
            producer,
            config,
        }
    }

    pub fn cache(&self) -> &Arc<TtlCache> {
        &self.cache
    }

    pub fn broker(&self) -> &Arc<TopicBroker> {
        &self.broker
    }

    /// Returns the value for `key`, producing it if necessary.
    pub async fn resolve(&self, key: &str) -> Result<String, ResolveError> {
        self.resolve_with_cancellation(key, &CancellationToken::new())
            .await
    }

    /// Returns the value for `key`, producing it if necessary.
    ///
    /// Once `cancel` fires, this gives up its subscription or lock and returns
    /// [`ResolveError::Cancelled`].
    #[tracing::instrument(skip_all, fields(key = key))]
    pub async fn resolve_with_cancellation(
        &self,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<String, ResolveError> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            if cancel.is_cancelled() {
                return Err(ResolveError::Cancelled { key: key.to_owned() });
            }

            if let Some(value) = self.lookup(key) {
                tracing::debug!(attempt, "Cache hit");
                metric!(counter("cache.hit") += 1);
                return Ok(value);
            }
            tracing::debug!(attempt, "Cache miss");
            metric!(counter("cache.miss") += 1);

            let lock = SetOptions::default()
                .with_ttl(self.config.lock_ttl)
                .only_if_absent();
            if self.cache.set(key, PLACEHOLDER, lock) {
                metric!(counter("resolve.lock_acquired") += 1);
                return self.produce(key, cancel).await;
            }

            match self.wait(key, cancel).await? {
                WaitOutcome::Value(value) => return Ok(value),
                WaitOutcome::Retry => {}
            }

            if self.config.max_retries.is_some_and(|max| attempt > max) {
                tracing::error!(attempt, "Giving up waiting for value");
                return Err(ResolveError::RetryExhausted {
                    key: key.to_owned(),
                    attempts: attempt,
                });
            }
            metric!(counter("resolve.retry") += 1);
        }
    }

    /// Looks up an actual value, skipping lock placeholders.
    fn lookup(&self, key: &str) -> Option<String> {
        self.cache.get(key).filter(|value| !is_placeholder(value))
    }

    /// Runs the producer while holding the lock for `key`.
    async fn produce(&self, key: &str, cancel: &CancellationToken) -> Result<String, ResolveError> {
        // Releases the lock unless a value was stored, including when this future is dropped.
        let release = defer(|| self.release_lock(key));

        let start = Instant::now();
        let result = tokio::select! {
            result = self.producer.produce(key) => result,
            _ = cancel.cancelled() => {
                tracing::debug!("Cancelled while producing");
                return Err(ResolveError::Cancelled { key: key.to_owned() });
            }
        };
        metric!(timer("producer.duration") = start.elapsed());

        let result = match result {
            Ok(value) if value.is_empty() => Err(ProducerError::EmptyValue),
            result => result,
        };

        match result {
            Ok(value) => {
                let options = SetOptions::default().with_ttl(self.config.value_ttl);
                self.cache.set(key, value.as_str(), options);
                release.disarm();

                let delivered = self.broker.publish(key, &value).await;
                tracing::info!(delivered, "Stored produced value");
                Ok(value)
            }
            Err(error) => {
                tracing::error!(error = &error as &dyn std::error::Error, "Producer failed");
                metric!(counter("producer.failure") += 1);
                release.run();
                Err(ResolveError::Producer {
                    key: key.to_owned(),
                    source: error,
                })
            }
        }
    }

    /// Deletes the placeholder and wakes up everybody waiting for `key`.
    ///
    /// Once our lock expired, another caller may have stored a value in the meantime. That value
    /// and its topic are left alone.
    fn release_lock(&self, key: &str) {
        if self.cache.delete_if(key, is_placeholder) {
            let woken = self.broker.close(key);
            tracing::debug!(woken, "Released lock");
        } else {
            tracing::debug!("Lock was taken over, keeping stored value");
        }
    }

    /// Waits for the caller holding the lock to publish a value.
    async fn wait(
        &self,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<WaitOutcome, ResolveError> {
        metric!(counter("resolve.wait") += 1);

        let Subscription { id, mut inbox, .. } = self.broker.subscribe(key);
        let _unsubscribe = defer(|| self.unsubscribe(key, id));

        // The value, or a released lock, may have landed before we subscribed.
        match self.cache.get(key) {
            Some(value) if !is_placeholder(&value) => {
                tracing::debug!("Found value after subscribing");
                return Ok(WaitOutcome::Value(value));
            }
            Some(_) => {}
            None => {
                tracing::debug!("Lock released before subscribing");
                return Ok(WaitOutcome::Retry);
            }
        }

        tracing::debug!("Waiting for value");
        tokio::select! {
            message = inbox.recv() => match message {
                Some(value) => {
                    tracing::debug!("Received value from broker");
                    Ok(WaitOutcome::Value(value))
                }
                None => {
                    tracing::debug!("Lock released while waiting");
                    Ok(WaitOutcome::Retry)
                }
            },
            _ = tokio::time::sleep(self.config.wait_timeout) => {
                tracing::warn!("Timeout waiting for value");
                Ok(WaitOutcome::Retry)
            }
            _ = cancel.cancelled() => {
                tracing::debug!("Cancelled while waiting");
                Err(ResolveError::Cancelled { key: key.to_owned() })
            }
        }
    }

    fn unsubscribe(&self, key: &str, id: SubscriptionId) {
        // A released lock closes the topic, which already removed us.
        if let Err(error) = self.broker.unsubscribe(key, id) {
            tracing::debug!(
                error = &error as &dyn std::error::Error,
                "Subscription already removed"
            );
        }
    }
}

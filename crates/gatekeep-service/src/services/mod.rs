//! Provides the gatekeep services and a way to initialize them.
//!
//! The [`TtlCache`] and the [`TopicBroker`] are created once per process and shared by every
//! request through the [`Resolver`]. [`SharedServices`] wires them up according to the provided
//! [`Config`].

use std::sync::Arc;

use crate::broker::TopicBroker;
use crate::caching::TtlCache;
use crate::config::Config;

mod producer;
mod resolver;

pub use producer::{ProducerError, SlowQueryProducer, ValueProducer};
pub use resolver::{ResolveError, Resolver};

#[derive(Debug)]
pub struct SharedServices {
    pub config: Config,
    pub cache: Arc<TtlCache>,
    pub broker: Arc<TopicBroker>,
    pub resolver: Arc<Resolver>,
}

impl SharedServices {
    /// Creates the services with the bundled [`SlowQueryProducer`].
    pub fn new(config: Config) -> Self {
        let producer = Arc::new(SlowQueryProducer::new(&config.producer));
        Self::with_producer(config, producer)
    }

    pub fn with_producer(config: Config, producer: Arc<dyn ValueProducer>) -> Self {
        for problem in config.coalescing.check() {
            tracing::warn!("Questionable coalescing configuration: {problem}");
        }

        let cache = Arc::new(TtlCache::new());
        let broker = Arc::new(TopicBroker::new(config.coalescing.delivery_timeout));
        let resolver = Arc::new(Resolver::new(
            Arc::clone(&cache),
            Arc::clone(&broker),
            producer,
            config.coalescing,
        ));

        Self {
            config,
            cache,
            broker,
            resolver,
        }
    }

    /// Starts the background sweeper evicting expired cache entries.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn_sweeper(&self) -> tokio::task::JoinHandle<()> {
        self.cache
            .spawn_sweeper(self.config.coalescing.effective_sweep_interval())
    }
}

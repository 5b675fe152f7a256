//! The gatekeep services.
//!
//! gatekeep fronts an expensive computation with a [`TtlCache`](caching::TtlCache) and makes sure
//! that concurrent requests for the same missing key only trigger the computation once. See
//! [`services::Resolver`] for the protocol.

#[macro_use]
pub mod metrics;

pub mod broker;
pub mod caching;
pub mod config;
pub mod services;
pub mod utils;

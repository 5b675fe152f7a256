//! gatekeep.
//!
//! gatekeep is a standalone web service that fronts an expensive computation with an in-memory
//! TTL cache. Concurrent requests for the same missing key are coalesced, so that the computation
//! only runs once while all other requests wait for its result.

#![warn(
    missing_docs,
    missing_debug_implementations,
    unused_crate_dependencies,
    clippy::all
)]

mod cli;
mod endpoints;
mod logging;
mod server;
mod service;

fn main() {
    match cli::execute() {
        Ok(()) => std::process::exit(0),
        Err(error) => {
            logging::ensure_log_error(&error);
            std::process::exit(1);
        }
    }
}

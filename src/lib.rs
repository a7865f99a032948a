//! simple-message: a message client and a forking server
//!
//! The client sends `user`, `message` and an optional image reference
//! and stores whatever files the reply carries. The server accepts TCP
//! connections and runs a handler program per connection with the
//! socket as its stdin and stdout.
//!
//! - `protocol`: request and response wire format
//! - `client`: address resolution, connect fallback, response parsing
//! - `server`: listener, per-connection dispatch, child reaping

pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod server;

pub use error::{Error, Result};

use tracing_subscriber::EnvFilter;

/// Initialise logging to stderr.
///
/// `RUST_LOG` wins over `level` when set.
pub fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

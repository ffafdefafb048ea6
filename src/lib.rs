//! Token Authorizer Library
//!
//! Bearer-token authorizer for API gateways: fingerprints the presented
//! token, looks it up in a token store, and answers with an Allow/Deny
//! policy that carries the owning client id as usage key and context.
//!
//! # Features
//!
//! - **Fail-closed**: unknown tokens, store errors and timeouts all deny
//! - **No raw secrets at rest**: the store is keyed by SHA-256 fingerprints
//! - **Usage tracking**: `lastUsed` refreshed on every successful check
//! - **Stores**: `DynamoDB` (SigV4-signed JSON API) or in-memory
//! - **Gateway-cacheable**: verdict TTL advertised via `Cache-Control`

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod authorizer;
pub mod cli;
pub mod config;
pub mod error;
pub mod server;
pub mod store;

pub use error::{Error, Result};

use std::io;

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
///
/// Log lines go to stderr; stdout is reserved for command output such as the
/// policy printed by `check`.
///
/// # Errors
///
/// Returns [`Error::Config`] if a global subscriber is already installed.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    let result = match format {
        Some("json") => subscriber
            .with(fmt::layer().json().with_writer(io::stderr))
            .try_init(),
        _ => subscriber.with(fmt::layer().with_writer(io::stderr)).try_init(),
    };

    result.map_err(|e| Error::Config(format!("Failed to install tracing subscriber: {e}")))
}

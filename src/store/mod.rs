//! Token store: persistence for issued token fingerprints.
//!
//! The [`TokenStore`] trait is the only surface the authorizer depends on:
//! a point lookup by fingerprint and a last-write-wins `lastUsed` update.
//! Two implementations ship with the crate:
//!
//! - [`InMemoryTokenStore`]: `DashMap`-backed, for local runs and tests
//! - [`DynamoDbTokenStore`]: the production table, over the `DynamoDB` JSON API,
//!   signed with refreshing AWS credentials from [`credentials`]
//!
//! Table provisioning, the client-id secondary index and token issuance are
//! deployment concerns and live outside this crate.

pub mod credentials;
pub mod dynamodb;
pub mod memory;
mod sigv4;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::Result;
use crate::authorizer::Fingerprint;
use crate::config::{StoreBackend, StoreConfig};

pub use credentials::{AwsCredentials, CredentialsCache, ProvideCredentials};
pub use dynamodb::DynamoDbTokenStore;
pub use memory::InMemoryTokenStore;

/// One issued token, keyed by its fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    /// Digest of the raw token (primary key)
    pub fingerprint: Fingerprint,
    /// Owner of the token
    pub client_id: String,
    /// Most recent successful validation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
}

impl TokenRecord {
    /// A record that has never been used
    #[must_use]
    pub fn new(fingerprint: Fingerprint, client_id: impl Into<String>) -> Self {
        Self {
            fingerprint,
            client_id: client_id.into(),
            last_used_at: None,
        }
    }
}

/// Trait abstracting the token storage backend.
///
/// Implementations must be `Send + Sync` because one store handle is shared
/// by every concurrent invocation.
#[async_trait::async_trait]
pub trait TokenStore: Send + Sync + 'static {
    /// Look up a record by fingerprint. `Ok(None)` means no such token.
    async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<TokenRecord>>;

    /// Set `lastUsed` to `at`. Concurrent touches on the same key race
    /// harmlessly; the last write wins.
    async fn touch(&self, fingerprint: &Fingerprint, at: DateTime<Utc>) -> Result<()>;

    /// Backend name for logs
    fn name(&self) -> &'static str;
}

/// Build the configured store. Called once at process start; the returned
/// handle is shared for the life of the process.
///
/// For `DynamoDB` the credential source is selected and queried once here,
/// so a host without usable AWS credentials fails to start.
///
/// # Errors
///
/// Returns an error if the backend cannot be constructed (no AWS
/// credentials, invalid endpoint, malformed seed records).
pub async fn connect(config: &StoreConfig) -> Result<Arc<dyn TokenStore>> {
    let store: Arc<dyn TokenStore> = match config.backend {
        StoreBackend::Memory => {
            let store = InMemoryTokenStore::from_seed(&config.memory.seed)?;
            info!(records = store.len(), "Using in-memory token store");
            Arc::new(store)
        }
        StoreBackend::Dynamodb => {
            let provider = credentials::default_provider(&config.dynamodb.region)?;
            let store = DynamoDbTokenStore::new(config.dynamodb.clone(), provider, config.timeout)?;
            store.prime_credentials().await?;
            info!(
                table = %config.dynamodb.table,
                region = %config.dynamodb.region,
                endpoint = %config.dynamodb.endpoint_url(),
                "Using DynamoDB token store"
            );
            Arc::new(store)
        }
    };
    Ok(store)
}

//! In-memory token store backed by a `DashMap`.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::debug;

use super::{TokenRecord, TokenStore};
use crate::authorizer::Fingerprint;
use crate::config::SeedRecord;
use crate::{Error, Result};

/// Fingerprint → record map. Lookups and touches are O(1) and lock only the
/// shard holding the key.
#[derive(Debug, Default)]
pub struct InMemoryTokenStore {
    records: DashMap<Fingerprint, TokenRecord>,
}

impl InMemoryTokenStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from configured seed records.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a seed names neither or both of
    /// `token`/`fingerprint`, carries a malformed fingerprint, or references
    /// an unset `env:` variable.
    pub fn from_seed(seed: &[SeedRecord]) -> Result<Self> {
        let store = Self::new();
        for (index, entry) in seed.iter().enumerate() {
            let token = entry.resolve_token().map_err(|e| match e {
                Error::Config(reason) => Error::Config(format!("store.memory.seed[{index}]: {reason}")),
                other => other,
            })?;
            let fingerprint = match (token, entry.fingerprint.as_deref()) {
                (Some(token), None) => Fingerprint::of(token),
                (None, Some(hex_digest)) => Fingerprint::from_hex(hex_digest).ok_or_else(|| {
                    Error::Config(format!(
                        "store.memory.seed[{index}]: fingerprint must be 64 hex characters"
                    ))
                })?,
                _ => {
                    return Err(Error::Config(format!(
                        "store.memory.seed[{index}]: set exactly one of `token` or `fingerprint`"
                    )));
                }
            };
            store.insert(TokenRecord::new(fingerprint, entry.client_id.clone()));
        }
        Ok(store)
    }

    /// Insert or replace a record.
    pub fn insert(&self, record: TokenRecord) {
        self.records.insert(record.fingerprint.clone(), record);
    }

    /// Remove a record, returning it if present.
    pub fn remove(&self, fingerprint: &Fingerprint) -> Option<TokenRecord> {
        self.records.remove(fingerprint).map(|(_, record)| record)
    }

    /// Number of records
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store holds no records
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait::async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<TokenRecord>> {
        Ok(self.records.get(fingerprint).map(|entry| entry.value().clone()))
    }

    async fn touch(&self, fingerprint: &Fingerprint, at: DateTime<Utc>) -> Result<()> {
        // Never resurrect a removed token
        let Some(mut entry) = self.records.get_mut(fingerprint) else {
            return Err(Error::UpdateFailed(format!(
                "no record for fingerprint {}",
                fingerprint.short()
            )));
        };
        entry.last_used_at = Some(at);
        debug!(fingerprint = %fingerprint.short(), "Touched token record");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

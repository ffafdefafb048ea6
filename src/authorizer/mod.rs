//! Bearer-token authorizer.
//!
//! Turns a raw token and a method ARN into an Allow/Deny [`Verdict`]:
//!
//! ```text
//! raw token
//!   -> fingerprint (SHA-256 hex)
//!   -> store.get        -- bounded by store timeout
//!        found     -> store.touch (best effort) -> Allow { usage_key = clientId }
//!        not found -> Deny
//!        error     -> Deny
//! ```
//!
//! [`TokenAuthorizer::authorize`] is total: every input and every store
//! failure produces a verdict. Nothing is cached here; reusing verdicts is
//! the calling gateway's job.

pub mod fingerprint;
pub mod verdict;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::{AuthorizerConfig, TouchMode};
use crate::store::{TokenRecord, TokenStore};
use crate::{Error, Result};

pub use fingerprint::Fingerprint;
pub use verdict::{AuthorizerEvent, AuthorizerResponse, Effect, Verdict};

/// Decides whether a bearer token may invoke a resource.
///
/// Holds only configuration and the process-wide store handle, so one
/// instance is shared by every concurrent invocation.
pub struct TokenAuthorizer {
    store: Arc<dyn TokenStore>,
    config: AuthorizerConfig,
    store_timeout: Duration,
}

impl TokenAuthorizer {
    /// Create an authorizer over `store`. Each store call is cut off after
    /// `store_timeout`.
    #[must_use]
    pub fn new(store: Arc<dyn TokenStore>, config: AuthorizerConfig, store_timeout: Duration) -> Self {
        Self {
            store,
            config,
            store_timeout,
        }
    }

    /// Authorizer configuration
    #[must_use]
    pub fn config(&self) -> &AuthorizerConfig {
        &self.config
    }

    /// Handle a gateway invocation event.
    pub async fn handle(&self, event: &AuthorizerEvent) -> AuthorizerResponse {
        self.authorize(&event.authorization_token, &event.method_arn)
            .await
            .into()
    }

    /// Authorize `raw_token` for `resource`. Never fails.
    pub async fn authorize(&self, raw_token: &str, resource: &str) -> Verdict {
        let token = if self.config.strip_bearer_prefix {
            strip_bearer(raw_token)
        } else {
            raw_token
        };
        self.authorize_bytes(token.as_bytes(), resource).await
    }

    /// Authorize a token that may not be valid UTF-8.
    pub async fn authorize_bytes(&self, raw_token: &[u8], resource: &str) -> Verdict {
        let principal = self.config.principal_id.as_str();

        if raw_token.is_empty() {
            debug!(resource, "Empty token, denying");
            return Verdict::deny(principal, resource);
        }

        let fingerprint = Fingerprint::of(raw_token);

        let record = match self.lookup(&fingerprint).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                info!(fingerprint = %fingerprint.short(), resource, effect = "Deny", "Unknown token");
                return Verdict::deny(principal, resource);
            }
            Err(e) => {
                warn!(
                    fingerprint = %fingerprint.short(),
                    store = self.store.name(),
                    transient = e.is_transient(),
                    error = %e,
                    "Token lookup failed, denying"
                );
                return Verdict::deny(principal, resource);
            }
        };

        // The verdict is fixed from here on; touch failures are only logged.
        let verdict = Verdict::allow(principal, resource, record.client_id);

        match self.config.touch {
            TouchMode::Await => {
                touch(self.store.as_ref(), &fingerprint, self.store_timeout).await;
            }
            TouchMode::Spawn => {
                let store = Arc::clone(&self.store);
                let fingerprint = fingerprint.clone();
                let store_timeout = self.store_timeout;
                tokio::spawn(async move {
                    touch(store.as_ref(), &fingerprint, store_timeout).await;
                });
            }
        }

        info!(
            fingerprint = %fingerprint.short(),
            client_id = verdict.client_id().unwrap_or_default(),
            resource,
            effect = "Allow",
            "Token authorized"
        );
        verdict
    }

    async fn lookup(&self, fingerprint: &Fingerprint) -> Result<Option<TokenRecord>> {
        timeout(self.store_timeout, self.store.get(fingerprint))
            .await
            .map_err(|_| Error::StoreTimeout(self.store_timeout))?
    }
}

/// Best-effort `lastUsed` update. Never retried.
async fn touch(store: &dyn TokenStore, fingerprint: &Fingerprint, store_timeout: Duration) {
    let result = timeout(store_timeout, store.touch(fingerprint, Utc::now()))
        .await
        .map_err(|_| Error::StoreTimeout(store_timeout))
        .and_then(|r| r);

    if let Err(e) = result {
        warn!(
            fingerprint = %fingerprint.short(),
            store = store.name(),
            error = %e,
            "Failed to update lastUsed"
        );
    }
}

/// Remove a leading `Bearer ` scheme (case-insensitive).
fn strip_bearer(raw: &str) -> &str {
    let trimmed = raw.trim_start();
    match trimmed.get(..7) {
        Some(scheme) if scheme.eq_ignore_ascii_case("bearer ") => trimmed[7..].trim_start(),
        _ => raw,
    }
}

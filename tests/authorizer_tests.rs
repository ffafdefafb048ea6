//! End-to-end authorizer behaviour against misbehaving stores
//!
//! Covers:
//! - Allow/Deny for known and unknown tokens
//! - Malformed input (empty, oversized, binary)
//! - Store lookup errors and timeouts collapsing to Deny
//! - Touch failures never downgrading an Allow
//! - Concurrent invocations against a slow `touch`

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use pretty_assertions::assert_eq;
use tokio::task::JoinSet;
use token_authorizer::authorizer::{
    AuthorizerResponse, Effect, Fingerprint, TokenAuthorizer, Verdict,
};
use token_authorizer::config::{AuthorizerConfig, TouchMode};
use token_authorizer::store::{InMemoryTokenStore, TokenRecord, TokenStore};
use token_authorizer::{Error, Result};

const ARN: &str = "arn:aws:execute-api:us-east-1:123456789012:abcdef/dev/GET/health";
const STORE_TIMEOUT: Duration = Duration::from_millis(200);

// ---------------------------------------------------------------------------
// Test doubles
// ---------------------------------------------------------------------------

/// Store whose lookups always fail
struct UnavailableStore;

#[async_trait::async_trait]
impl TokenStore for UnavailableStore {
    async fn get(&self, _fingerprint: &Fingerprint) -> Result<Option<TokenRecord>> {
        Err(Error::StoreUnavailable("connection reset".into()))
    }

    async fn touch(&self, _fingerprint: &Fingerprint, _at: DateTime<Utc>) -> Result<()> {
        Err(Error::StoreUnavailable("connection reset".into()))
    }

    fn name(&self) -> &'static str {
        "unavailable"
    }
}

/// Store whose lookups never finish within the timeout
struct HangingStore;

#[async_trait::async_trait]
impl TokenStore for HangingStore {
    async fn get(&self, _fingerprint: &Fingerprint) -> Result<Option<TokenRecord>> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(None)
    }

    async fn touch(&self, _fingerprint: &Fingerprint, _at: DateTime<Utc>) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "hanging"
    }
}

/// Wraps an in-memory store; `touch` can be slowed down or made to fail
struct InstrumentedStore {
    inner: InMemoryTokenStore,
    touch_delay: Duration,
    touch_fails: bool,
    touches: AtomicUsize,
}

impl InstrumentedStore {
    fn new(touch_delay: Duration, touch_fails: bool) -> Self {
        let inner = InMemoryTokenStore::new();
        inner.insert(TokenRecord::new(Fingerprint::of("abc123"), "tenant-42"));
        Self {
            inner,
            touch_delay,
            touch_fails,
            touches: AtomicUsize::new(0),
        }
    }
}

#[async_trait::async_trait]
impl TokenStore for InstrumentedStore {
    async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<TokenRecord>> {
        self.inner.get(fingerprint).await
    }

    async fn touch(&self, fingerprint: &Fingerprint, at: DateTime<Utc>) -> Result<()> {
        tokio::time::sleep(self.touch_delay).await;
        self.touches.fetch_add(1, Ordering::SeqCst);
        if self.touch_fails {
            return Err(Error::UpdateFailed("throttled".into()));
        }
        self.inner.touch(fingerprint, at).await
    }

    fn name(&self) -> &'static str {
        "instrumented"
    }
}

fn authorizer(store: Arc<dyn TokenStore>) -> TokenAuthorizer {
    TokenAuthorizer::new(store, AuthorizerConfig::default(), STORE_TIMEOUT)
}

fn seeded() -> Arc<InMemoryTokenStore> {
    let store = InMemoryTokenStore::new();
    store.insert(TokenRecord::new(Fingerprint::of("abc123"), "tenant-42"));
    Arc::new(store)
}

fn assert_structural_deny(verdict: &Verdict) {
    assert_eq!(verdict.effect, Effect::Deny);
    assert_eq!(verdict.principal_id, "user");
    assert_eq!(verdict.resource, ARN);
    assert!(verdict.usage_key.is_none());
    assert!(verdict.context.is_empty());
}

// ---------------------------------------------------------------------------
// Allow / Deny
// ---------------------------------------------------------------------------

#[tokio::test]
async fn known_token_allows_with_usage_key() {
    let authorizer = authorizer(seeded());

    let response = AuthorizerResponse::from(authorizer.authorize("abc123", ARN).await);

    assert_eq!(response.effect(), Some(Effect::Allow));
    assert_eq!(response.usage_identifier_key.as_deref(), Some("tenant-42"));
    assert_eq!(
        response.context.as_ref().and_then(|c| c.get("clientId")).map(String::as_str),
        Some("tenant-42")
    );
}

#[tokio::test]
async fn wrong_token_denies_without_usage_key() {
    let authorizer = authorizer(seeded());

    let response = AuthorizerResponse::from(authorizer.authorize("wrong-token", ARN).await);

    assert_eq!(response.effect(), Some(Effect::Deny));
    assert!(response.usage_identifier_key.is_none());
    assert!(response.context.is_none());
}

#[tokio::test]
async fn every_unknown_token_denies() {
    let authorizer = authorizer(seeded());
    for token in ["abc1234", "ABC123", " abc123", "abc123 ", "tenant-42"] {
        assert_structural_deny(&authorizer.authorize(token, ARN).await);
    }
}

#[tokio::test]
async fn removed_token_is_denied_on_next_call() {
    let store = seeded();
    let authorizer = authorizer(Arc::clone(&store) as Arc<dyn TokenStore>);
    assert!(authorizer.authorize("abc123", ARN).await.is_allowed());

    store.remove(&Fingerprint::of("abc123"));

    assert_structural_deny(&authorizer.authorize("abc123", ARN).await);
}

// ---------------------------------------------------------------------------
// Malformed input
// ---------------------------------------------------------------------------

#[tokio::test]
async fn malformed_tokens_yield_structural_deny() {
    let authorizer = authorizer(seeded());

    assert_structural_deny(&authorizer.authorize("", ARN).await);
    assert_structural_deny(&authorizer.authorize(&"x".repeat(10_000), ARN).await);

    let garbage: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
    assert_structural_deny(&authorizer.authorize_bytes(&garbage, ARN).await);
    let lossy = String::from_utf8_lossy(&garbage).into_owned();
    assert_structural_deny(&authorizer.authorize(&lossy, ARN).await);
}

// ---------------------------------------------------------------------------
// Store failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn lookup_error_denies() {
    let authorizer = authorizer(Arc::new(UnavailableStore));
    assert_structural_deny(&authorizer.authorize("abc123", ARN).await);
}

#[tokio::test(start_paused = true)]
async fn lookup_timeout_denies() {
    let authorizer = authorizer(Arc::new(HangingStore));
    assert_structural_deny(&authorizer.authorize("abc123", ARN).await);
}

#[tokio::test]
async fn touch_failure_keeps_allow() {
    let store = Arc::new(InstrumentedStore::new(Duration::ZERO, true));
    let authorizer = authorizer(Arc::clone(&store) as Arc<dyn TokenStore>);

    let verdict = authorizer.authorize("abc123", ARN).await;

    assert_eq!(verdict, Verdict::allow("user", ARN, "tenant-42"));
    // Attempted exactly once: no retry loop
    assert_eq!(store.touches.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn touch_timeout_keeps_allow() {
    let store = Arc::new(InstrumentedStore::new(Duration::from_secs(3600), false));
    let authorizer = authorizer(Arc::clone(&store) as Arc<dyn TokenStore>);

    let verdict = authorizer.authorize("abc123", ARN).await;

    assert!(verdict.is_allowed());
    assert_eq!(store.touches.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn spawned_touch_returns_before_update_completes() {
    let store = Arc::new(InstrumentedStore::new(Duration::from_millis(100), false));
    let config = AuthorizerConfig {
        touch: TouchMode::Spawn,
        ..AuthorizerConfig::default()
    };
    let authorizer =
        TokenAuthorizer::new(Arc::clone(&store) as Arc<dyn TokenStore>, config, STORE_TIMEOUT);

    let verdict = authorizer.authorize("abc123", ARN).await;
    assert!(verdict.is_allowed());
    assert_eq!(store.touches.load(Ordering::SeqCst), 0);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(store.touches.load(Ordering::SeqCst), 1);
    let record = store.get(&Fingerprint::of("abc123")).await.unwrap().unwrap();
    assert!(record.last_used_at.is_some());
}

// ---------------------------------------------------------------------------
// Idempotence and concurrency
// ---------------------------------------------------------------------------

#[tokio::test]
async fn repeated_calls_yield_identical_verdicts() {
    let authorizer = authorizer(seeded());

    let first = authorizer.authorize("abc123", ARN).await;
    let second = authorizer.authorize("abc123", ARN).await;
    assert_eq!(first, second);

    let first = authorizer.authorize("wrong-token", ARN).await;
    let second = authorizer.authorize("wrong-token", ARN).await;
    assert_eq!(first, second);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_calls_with_slow_touch_all_allow() {
    const CALLS: usize = 100;

    let store = Arc::new(InstrumentedStore::new(Duration::from_millis(20), false));
    let authorizer = Arc::new(authorizer(Arc::clone(&store) as Arc<dyn TokenStore>));

    let mut set = JoinSet::new();
    for _ in 0..CALLS {
        let authorizer = Arc::clone(&authorizer);
        set.spawn(async move { authorizer.authorize("abc123", ARN).await });
    }

    let mut responses = 0;
    while let Some(joined) = tokio::time::timeout(Duration::from_secs(10), set.join_next())
        .await
        .expect("authorize calls deadlocked")
    {
        let verdict = joined.expect("task should not panic");
        assert_eq!(verdict.effect, Effect::Allow);
        assert_eq!(verdict.usage_key.as_deref(), Some("tenant-42"));
        responses += 1;
    }

    assert_eq!(responses, CALLS);
    assert_eq!(store.touches.load(Ordering::SeqCst), CALLS);
}

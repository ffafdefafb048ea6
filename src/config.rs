//! Configuration management

use std::{env, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "TOKEN_AUTHORIZER_";

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Authorizer behaviour
    pub authorizer: AuthorizerConfig,
    /// Token store configuration
    pub store: StoreConfig,
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist, cannot be parsed,
    /// or fails validation.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // TOKEN_AUTHORIZER_STORE__DYNAMODB__TABLE=Tokens
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.store.dynamodb.apply_region_fallback();
        config.validate()?;

        Ok(config)
    }

    /// Reject values that would make every request fail or hang.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.store.timeout.is_zero() {
            return Err(Error::Config("store.timeout must be greater than zero".into()));
        }
        if self.authorizer.principal_id.trim().is_empty() {
            return Err(Error::Config("authorizer.principal_id must not be empty".into()));
        }
        if self.store.backend == StoreBackend::Dynamodb {
            let ddb = &self.store.dynamodb;
            if ddb.table.trim().is_empty() {
                return Err(Error::Config("store.dynamodb.table must not be empty".into()));
            }
            if ddb.region.trim().is_empty() {
                return Err(Error::Config("store.dynamodb.region must not be empty".into()));
            }
            for (field, value) in [
                ("key_attribute", &ddb.key_attribute),
                ("client_id_attribute", &ddb.client_id_attribute),
                ("last_used_attribute", &ddb.last_used_attribute),
            ] {
                if value.is_empty() {
                    return Err(Error::Config(format!(
                        "store.dynamodb.{field} must not be empty"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Whole-request timeout enforced by the HTTP layer
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Graceful shutdown timeout
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 39480,
            request_timeout: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(15),
        }
    }
}

/// How the `lastUsed` touch is scheduled after a successful lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TouchMode {
    /// Await the touch (bounded by the store timeout) before returning
    #[default]
    Await,
    /// Detach the touch onto a background task and return immediately
    Spawn,
}

/// Authorizer behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthorizerConfig {
    /// Principal placed on every verdict
    pub principal_id: String,
    /// How long the calling gateway may reuse a verdict.
    /// Advertised to the gateway, never enforced here.
    #[serde(with = "humantime_serde")]
    pub result_ttl: Duration,
    /// Scheduling of the `lastUsed` update
    pub touch: TouchMode,
    /// Strip a leading `Bearer ` scheme before fingerprinting
    pub strip_bearer_prefix: bool,
}

impl Default for AuthorizerConfig {
    fn default() -> Self {
        Self {
            principal_id: "user".to_string(),
            result_ttl: Duration::from_secs(30),
            touch: TouchMode::Await,
            strip_bearer_prefix: false,
        }
    }
}

/// Which token store implementation to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// In-process map, seeded from configuration
    Memory,
    /// `DynamoDB` table
    #[default]
    Dynamodb,
}

/// Token store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Backend selection
    pub backend: StoreBackend,
    /// Upper bound for every single store call (lookup or touch)
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// `DynamoDB` settings
    pub dynamodb: DynamoDbConfig,
    /// In-memory settings
    pub memory: MemoryStoreConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Dynamodb,
            timeout: Duration::from_secs(3),
            dynamodb: DynamoDbConfig::default(),
            memory: MemoryStoreConfig::default(),
        }
    }
}

/// `DynamoDB` table settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DynamoDbConfig {
    /// Table name
    pub table: String,
    /// AWS region. Falls back to `AWS_REGION` / `AWS_DEFAULT_REGION` when unset.
    pub region: String,
    /// Override endpoint (e.g. `http://localhost:8000` for `DynamoDB` Local)
    pub endpoint: Option<String>,
    /// Partition key attribute holding the token fingerprint
    pub key_attribute: String,
    /// Attribute holding the owning client id
    pub client_id_attribute: String,
    /// Attribute updated on every successful validation
    pub last_used_attribute: String,
}

impl Default for DynamoDbConfig {
    fn default() -> Self {
        Self {
            table: "Tokens".to_string(),
            region: String::new(),
            endpoint: None,
            key_attribute: "token".to_string(),
            client_id_attribute: "clientId".to_string(),
            last_used_attribute: "lastUsed".to_string(),
        }
    }
}

impl DynamoDbConfig {
    /// Region used when neither config nor environment name one
    pub const DEFAULT_REGION: &'static str = "us-east-1";

    fn apply_region_fallback(&mut self) {
        if !self.region.is_empty() {
            return;
        }
        self.region = env::var("AWS_REGION")
            .or_else(|_| env::var("AWS_DEFAULT_REGION"))
            .unwrap_or_else(|_| Self::DEFAULT_REGION.to_string());
    }

    /// Resolved service endpoint
    #[must_use]
    pub fn endpoint_url(&self) -> String {
        self.endpoint
            .clone()
            .unwrap_or_else(|| format!("https://dynamodb.{}.amazonaws.com", self.region))
    }
}

/// In-memory store settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct MemoryStoreConfig {
    /// Records loaded at startup
    pub seed: Vec<SeedRecord>,
}

/// A token record supplied through configuration.
///
/// Exactly one of `token` (raw value, fingerprinted on load) or
/// `fingerprint` (precomputed hex digest) must be set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedRecord {
    /// Raw token value; supports `env:VAR_NAME`
    #[serde(default)]
    pub token: Option<String>,
    /// Precomputed SHA-256 hex fingerprint
    #[serde(default)]
    pub fingerprint: Option<String>,
    /// Owning client id
    pub client_id: String,
}

impl SeedRecord {
    /// Resolve the raw token, expanding `env:VAR_NAME`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the referenced variable is unset or
    /// empty. The literal `env:...` string is never used as a token.
    pub fn resolve_token(&self) -> Result<Option<String>> {
        let Some(token) = &self.token else {
            return Ok(None);
        };
        let Some(var_name) = token.strip_prefix("env:") else {
            return Ok(Some(token.clone()));
        };
        match env::var(var_name) {
            Ok(value) if !value.is_empty() => Ok(Some(value)),
            _ => Err(Error::Config(format!("env var {var_name} is not set"))),
        }
    }
}

//! `DynamoDB` token store.
//!
//! Speaks the `DynamoDB` JSON 1.0 protocol directly over `reqwest`, signing
//! each call with SigV4. Only two operations are used:
//!
//! | Operation | Purpose |
//! |-----------|---------|
//! | `GetItem` | point lookup by fingerprint (eventually consistent) |
//! | `UpdateItem` | `SET lastUsed = :now`, conditional on the item existing |
//!
//! One client (connection pool included) is built at startup and shared by
//! every invocation. Credentials are not: each call signs with whatever the
//! [`CredentialsCache`] currently holds, so rotated role credentials are
//! picked up without a restart.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::StatusCode;
use serde_json::{Value, json};
use tracing::debug;
use url::Url;

use super::credentials::{CredentialsCache, ProvideCredentials};
use super::sigv4::{self, CanonicalRequest};
use super::{TokenRecord, TokenStore};
use crate::authorizer::Fingerprint;
use crate::config::DynamoDbConfig;
use crate::{Error, Result};

const SERVICE: &str = "dynamodb";
const CONTENT_TYPE: &str = "application/x-amz-json-1.0";
const TARGET_PREFIX: &str = "DynamoDB_20120810";

/// Token store backed by a `DynamoDB` table
pub struct DynamoDbTokenStore {
    client: reqwest::Client,
    config: DynamoDbConfig,
    credentials: CredentialsCache,
    endpoint: Url,
    host: String,
}

impl DynamoDbTokenStore {
    /// Create a store client. `timeout` bounds each HTTP call; requests are
    /// signed with credentials from `credentials`, refreshed before expiry.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint is not a valid URL or the HTTP
    /// client cannot be built.
    pub fn new(
        config: DynamoDbConfig,
        credentials: Arc<dyn ProvideCredentials>,
        timeout: Duration,
    ) -> Result<Self> {
        let endpoint = Url::parse(&config.endpoint_url())
            .map_err(|e| Error::Config(format!("Invalid DynamoDB endpoint: {e}")))?;
        let host = match (endpoint.host_str(), endpoint.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => {
                return Err(Error::Config(format!(
                    "DynamoDB endpoint has no host: {endpoint}"
                )));
            }
        };

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            config,
            credentials: CredentialsCache::new(credentials),
            endpoint,
            host,
        })
    }

    /// Fetch credentials once so a missing role or unreachable credential
    /// source fails startup rather than the first request.
    ///
    /// # Errors
    ///
    /// Returns the credential source's error.
    pub async fn prime_credentials(&self) -> Result<()> {
        self.credentials.credentials().await.map(|_| ())
    }

    /// Issue one signed `DynamoDB` API call and return the parsed body.
    async fn call(&self, operation: &str, body: &Value) -> Result<Value> {
        let payload = serde_json::to_vec(body)?;
        let target = format!("{TARGET_PREFIX}.{operation}");
        let credentials = self.credentials.credentials().await?;

        let signature = sigv4::sign(
            &CanonicalRequest {
                method: "POST",
                path: self.endpoint.path(),
                host: &self.host,
                headers: &[("content-type", CONTENT_TYPE), ("x-amz-target", target.as_str())],
                payload: &payload,
            },
            &credentials,
            &self.config.region,
            SERVICE,
            Utc::now(),
        )?;

        let mut request = self
            .client
            .post(self.endpoint.clone())
            .header("content-type", CONTENT_TYPE)
            .header("x-amz-target", &target)
            .header("x-amz-date", &signature.amz_date)
            .header("authorization", &signature.authorization);
        if let Some(token) = &signature.security_token {
            request = request.header("x-amz-security-token", token);
        }

        let response = request.body(payload).send().await.map_err(|e| {
            if e.is_timeout() {
                Error::StoreUnavailable(format!("{operation} timed out: {e}"))
            } else {
                Error::Http(e)
            }
        })?;

        let status = response.status();
        let bytes = response.bytes().await?;
        if status.is_success() {
            return Ok(serde_json::from_slice(&bytes)?);
        }

        Err(classify_error(operation, status, &bytes))
    }
}

/// Map a `DynamoDB` error response onto the crate taxonomy.
fn classify_error(operation: &str, status: StatusCode, body: &[u8]) -> Error {
    let parsed: Value = serde_json::from_slice(body).unwrap_or(Value::Null);
    let kind = parsed
        .get("__type")
        .and_then(Value::as_str)
        .and_then(|t| t.rsplit('#').next())
        .unwrap_or("Unknown");
    let message = parsed
        .get("message")
        .or_else(|| parsed.get("Message"))
        .and_then(Value::as_str)
        .unwrap_or("");

    debug!(operation, status = status.as_u16(), kind, "DynamoDB call failed");

    if kind == "ConditionalCheckFailedException" {
        return Error::UpdateFailed(format!("{operation}: token no longer exists"));
    }
    Error::StoreUnavailable(format!("{operation} returned {status} {kind}: {message}"))
}

/// `GetItem` request body
pub(crate) fn get_item_request(config: &DynamoDbConfig, fingerprint: &Fingerprint) -> Value {
    json!({
        "TableName": config.table,
        "Key": { config.key_attribute.as_str(): { "S": fingerprint.as_str() } },
        "ProjectionExpression": "#client, #lastUsed",
        "ExpressionAttributeNames": {
            "#client": config.client_id_attribute,
            "#lastUsed": config.last_used_attribute,
        },
    })
}

/// `UpdateItem` request body setting the last-used timestamp
pub(crate) fn update_item_request(
    config: &DynamoDbConfig,
    fingerprint: &Fingerprint,
    at: DateTime<Utc>,
) -> Value {
    json!({
        "TableName": config.table,
        "Key": { config.key_attribute.as_str(): { "S": fingerprint.as_str() } },
        "UpdateExpression": "SET #lastUsed = :now",
        "ConditionExpression": "attribute_exists(#key)",
        "ExpressionAttributeNames": {
            "#lastUsed": config.last_used_attribute,
            "#key": config.key_attribute,
        },
        "ExpressionAttributeValues": {
            ":now": { "S": at.to_rfc3339_opts(SecondsFormat::Millis, true) },
        },
    })
}

/// Parse a `GetItem` response. An absent `Item` means the token is unknown.
pub(crate) fn parse_get_item_response(
    config: &DynamoDbConfig,
    fingerprint: &Fingerprint,
    body: &Value,
) -> Result<Option<TokenRecord>> {
    let Some(item) = body.get("Item") else {
        return Ok(None);
    };

    let client_id = item
        .get(&config.client_id_attribute)
        .and_then(|attr| attr.get("S"))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            Error::CorruptRecord(format!(
                "item {} has no string `{}` attribute",
                fingerprint.short(),
                config.client_id_attribute
            ))
        })?;

    let last_used_at = item
        .get(&config.last_used_attribute)
        .and_then(|attr| attr.get("S"))
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc));

    Ok(Some(TokenRecord {
        fingerprint: fingerprint.clone(),
        client_id: client_id.to_string(),
        last_used_at,
    }))
}

#[async_trait::async_trait]
impl TokenStore for DynamoDbTokenStore {
    async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<TokenRecord>> {
        let body = self
            .call("GetItem", &get_item_request(&self.config, fingerprint))
            .await?;
        parse_get_item_response(&self.config, fingerprint, &body)
    }

    async fn touch(&self, fingerprint: &Fingerprint, at: DateTime<Utc>) -> Result<()> {
        self.call("UpdateItem", &update_item_request(&self.config, fingerprint, at))
            .await
            .map(|_| ())
    }

    fn name(&self) -> &'static str {
        "dynamodb"
    }
}

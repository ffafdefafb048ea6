//! AWS credential sources for the `DynamoDB` store.
//!
//! A long-running server cannot read credentials once and keep them: role
//! credentials from ECS, EKS or EC2 expire after a few hours. Every signed
//! call therefore goes through a [`CredentialsCache`], which hands out the
//! current credentials and refreshes them from a [`ProvideCredentials`]
//! source shortly before they expire.
//!
//! [`default_provider`] picks the source once at startup, in the same order
//! the AWS SDKs use:
//!
//! | Source | Selected when |
//! |--------|---------------|
//! | environment | `AWS_ACCESS_KEY_ID` is set |
//! | [`WebIdentityProvider`] | `AWS_WEB_IDENTITY_TOKEN_FILE` and `AWS_ROLE_ARN` are set (EKS IRSA) |
//! | [`ContainerProvider`] | `AWS_CONTAINER_CREDENTIALS_RELATIVE_URI` or `_FULL_URI` is set (ECS, EKS Pod Identity) |
//! | [`ImdsProvider`] | otherwise, unless `AWS_EC2_METADATA_DISABLED=true` |

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use url::Url;

use crate::{Error, Result};

/// Refresh this long before the provider-reported expiry
pub const DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(300);

const CONTAINER_HOST: &str = "http://169.254.170.2";
const IMDS_ENDPOINT: &str = "http://169.254.169.254";
const IMDS_TOKEN_TTL_SECONDS: &str = "21600";
const STS_API_VERSION: &str = "2011-06-15";
const DEFAULT_SESSION_NAME: &str = "token-authorizer";

/// A set of AWS credentials.
#[derive(Clone)]
pub struct AwsCredentials {
    /// `AWS_ACCESS_KEY_ID`
    pub access_key_id: String,
    /// `AWS_SECRET_ACCESS_KEY`
    pub secret_access_key: String,
    /// `AWS_SESSION_TOKEN` (temporary credentials only)
    pub session_token: Option<String>,
    /// When temporary credentials stop being valid. `None` never expires.
    pub expires_at: Option<DateTime<Utc>>,
}

impl AwsCredentials {
    /// Read static credentials from the standard environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the key id or secret is missing.
    pub fn from_env() -> Result<Self> {
        let access_key_id = env::var("AWS_ACCESS_KEY_ID")
            .map_err(|_| Error::Config("AWS_ACCESS_KEY_ID is not set".into()))?;
        let secret_access_key = env::var("AWS_SECRET_ACCESS_KEY")
            .map_err(|_| Error::Config("AWS_SECRET_ACCESS_KEY is not set".into()))?;
        let session_token = env::var("AWS_SESSION_TOKEN").ok().filter(|t| !t.is_empty());
        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token,
            expires_at: None,
        })
    }

    /// Whether these credentials expire within `margin` of `now`
    #[must_use]
    pub fn expires_within(&self, margin: Duration, now: DateTime<Utc>) -> bool {
        let Some(expires_at) = self.expires_at else {
            return false;
        };
        TimeDelta::from_std(margin)
            .ok()
            .and_then(|margin| now.checked_add_signed(margin))
            .is_none_or(|deadline| deadline >= expires_at)
    }
}

impl fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// A source of AWS credentials
#[async_trait::async_trait]
pub trait ProvideCredentials: Send + Sync + 'static {
    /// Fetch a fresh set of credentials.
    async fn provide(&self) -> Result<AwsCredentials>;

    /// Source name for logs
    fn name(&self) -> &'static str;
}

/// Fixed credentials, e.g. read from the environment at startup
#[async_trait::async_trait]
impl ProvideCredentials for AwsCredentials {
    async fn provide(&self) -> Result<AwsCredentials> {
        Ok(self.clone())
    }

    fn name(&self) -> &'static str {
        "static"
    }
}

/// Select the credential source for this process from the environment.
///
/// # Errors
///
/// Returns [`Error::Config`] if no source is available or a selected
/// source is misconfigured.
pub fn default_provider(region: &str) -> Result<Arc<dyn ProvideCredentials>> {
    let var = |name: &str| env::var(name).ok().filter(|v| !v.is_empty());

    if var("AWS_ACCESS_KEY_ID").is_some() {
        info!(source = "environment", "Using AWS credentials");
        return Ok(Arc::new(AwsCredentials::from_env()?));
    }

    if let (Some(token_file), Some(role_arn)) =
        (var("AWS_WEB_IDENTITY_TOKEN_FILE"), var("AWS_ROLE_ARN"))
    {
        let session_name =
            var("AWS_ROLE_SESSION_NAME").unwrap_or_else(|| DEFAULT_SESSION_NAME.to_string());
        let sts_endpoint = Url::parse(&format!("https://sts.{region}.amazonaws.com/"))
            .map_err(|e| Error::Config(format!("Invalid STS endpoint: {e}")))?;
        info!(source = "web-identity", role_arn = %role_arn, "Using AWS credentials");
        return Ok(Arc::new(WebIdentityProvider::new(
            sts_endpoint,
            role_arn,
            session_name,
            PathBuf::from(token_file),
        )?));
    }

    let container_uri = match (
        var("AWS_CONTAINER_CREDENTIALS_RELATIVE_URI"),
        var("AWS_CONTAINER_CREDENTIALS_FULL_URI"),
    ) {
        (Some(relative), _) => Some(format!("{CONTAINER_HOST}{relative}")),
        (None, full) => full,
    };
    if let Some(uri) = container_uri {
        let uri = Url::parse(&uri)
            .map_err(|e| Error::Config(format!("Invalid container credentials URI: {e}")))?;
        let auth = match (
            var("AWS_CONTAINER_AUTHORIZATION_TOKEN_FILE"),
            var("AWS_CONTAINER_AUTHORIZATION_TOKEN"),
        ) {
            (Some(file), _) => ContainerAuth::File(PathBuf::from(file)),
            (None, Some(token)) => ContainerAuth::Token(token),
            (None, None) => ContainerAuth::None,
        };
        info!(source = "container", "Using AWS credentials");
        return Ok(Arc::new(ContainerProvider::new(uri, auth)?));
    }

    if var("AWS_EC2_METADATA_DISABLED").is_some_and(|v| v.eq_ignore_ascii_case("true")) {
        return Err(Error::Config(
            "No AWS credentials: set AWS_ACCESS_KEY_ID, a web identity, or a container \
             credentials URI, or enable the instance metadata service"
                .into(),
        ));
    }
    let endpoint = var("AWS_EC2_METADATA_SERVICE_ENDPOINT").unwrap_or_else(|| IMDS_ENDPOINT.into());
    let endpoint = Url::parse(&endpoint)
        .map_err(|e| Error::Config(format!("Invalid instance metadata endpoint: {e}")))?;
    info!(source = "imds", "Using AWS credentials");
    Ok(Arc::new(ImdsProvider::new(endpoint)?))
}

/// Caches credentials and refreshes them before they expire.
///
/// Readers share the cached value; a single refresh runs at a time. If a
/// refresh fails while the cached credentials are still inside their
/// validity window, the cached credentials keep being served.
pub struct CredentialsCache {
    provider: Arc<dyn ProvideCredentials>,
    cached: RwLock<Option<AwsCredentials>>,
    refresh: Mutex<()>,
    margin: Duration,
}

impl CredentialsCache {
    /// Cache in front of `provider`, refreshing [`DEFAULT_REFRESH_MARGIN`]
    /// before expiry.
    #[must_use]
    pub fn new(provider: Arc<dyn ProvideCredentials>) -> Self {
        Self {
            provider,
            cached: RwLock::new(None),
            refresh: Mutex::new(()),
            margin: DEFAULT_REFRESH_MARGIN,
        }
    }

    /// Override how long before expiry a refresh is triggered
    #[must_use]
    pub fn with_refresh_margin(mut self, margin: Duration) -> Self {
        self.margin = margin;
        self
    }

    /// Current credentials, refreshed if they are missing or about to expire.
    ///
    /// # Errors
    ///
    /// Returns the provider error if no usable credentials are cached and
    /// the refresh fails.
    pub async fn credentials(&self) -> Result<AwsCredentials> {
        if let Some(fresh) = self.cached_unless_expiring(self.margin).await {
            return Ok(fresh);
        }

        let _refreshing = self.refresh.lock().await;
        // Another caller may have refreshed while we waited for the lock
        if let Some(fresh) = self.cached_unless_expiring(self.margin).await {
            return Ok(fresh);
        }

        match self.provider.provide().await {
            Ok(credentials) => {
                debug!(
                    source = self.provider.name(),
                    expires_at = ?credentials.expires_at,
                    "Refreshed AWS credentials"
                );
                *self.cached.write().await = Some(credentials.clone());
                Ok(credentials)
            }
            Err(e) => match self.cached_unless_expiring(Duration::ZERO).await {
                Some(still_valid) => {
                    warn!(
                        source = self.provider.name(),
                        error = %e,
                        expires_at = ?still_valid.expires_at,
                        "Credential refresh failed, using cached credentials"
                    );
                    Ok(still_valid)
                }
                None => Err(e),
            },
        }
    }

    async fn cached_unless_expiring(&self, margin: Duration) -> Option<AwsCredentials> {
        self.cached
            .read()
            .await
            .as_ref()
            .filter(|c| !c.expires_within(margin, Utc::now()))
            .cloned()
    }
}

/// Credentials document returned by the container endpoint, IMDS, and STS.
#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CredentialsDocument {
    access_key_id: String,
    secret_access_key: String,
    #[serde(default, alias = "SessionToken")]
    token: Option<String>,
    #[serde(default, deserialize_with = "deserialize_expiration")]
    expiration: Option<DateTime<Utc>>,
}

impl From<CredentialsDocument> for AwsCredentials {
    fn from(doc: CredentialsDocument) -> Self {
        Self {
            access_key_id: doc.access_key_id,
            secret_access_key: doc.secret_access_key,
            session_token: doc.token.filter(|t| !t.is_empty()),
            expires_at: doc.expiration,
        }
    }
}

/// Accepts RFC 3339 strings (container, IMDS) and epoch seconds (STS JSON).
fn deserialize_expiration<'de, D>(deserializer: D) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    let parsed = match value {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::String(s)) => DateTime::parse_from_rfc3339(&s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        #[allow(clippy::cast_possible_truncation)]
        Some(Value::Number(n)) => n
            .as_f64()
            .and_then(|secs| DateTime::from_timestamp(secs as i64, 0)),
        Some(_) => None,
    };
    parsed
        .map(Some)
        .ok_or_else(|| serde::de::Error::custom("unrecognized credential expiration"))
}

fn http_client(connect_timeout: Duration) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .connect_timeout(connect_timeout)
        .build()?)
}

async fn read_body(source: &str, response: reqwest::Response) -> Result<String> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| Error::Credentials(format!("{source}: {e}")))?;
    if !status.is_success() {
        return Err(Error::Credentials(format!("{source} returned {status}: {body}")));
    }
    Ok(body)
}

fn parse_document(source: &str, body: &str) -> Result<AwsCredentials> {
    serde_json::from_str::<CredentialsDocument>(body)
        .map(AwsCredentials::from)
        .map_err(|e| Error::Credentials(format!("{source}: malformed credentials: {e}")))
}

/// How the container endpoint authenticates callers
#[derive(Debug, Clone)]
pub enum ContainerAuth {
    /// No `Authorization` header (classic ECS)
    None,
    /// Fixed token
    Token(String),
    /// Token re-read from a file on every fetch (EKS Pod Identity rotates it)
    File(PathBuf),
}

/// ECS task role / EKS Pod Identity credentials endpoint
pub struct ContainerProvider {
    client: reqwest::Client,
    uri: Url,
    auth: ContainerAuth,
}

impl ContainerProvider {
    /// Provider fetching from `uri`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(uri: Url, auth: ContainerAuth) -> Result<Self> {
        Ok(Self {
            client: http_client(Duration::from_secs(2))?,
            uri,
            auth,
        })
    }
}

#[async_trait::async_trait]
impl ProvideCredentials for ContainerProvider {
    async fn provide(&self) -> Result<AwsCredentials> {
        let mut request = self.client.get(self.uri.clone());
        match &self.auth {
            ContainerAuth::None => {}
            ContainerAuth::Token(token) => request = request.header("authorization", token),
            ContainerAuth::File(path) => {
                let token = tokio::fs::read_to_string(path).await.map_err(|e| {
                    Error::Credentials(format!("container auth token {}: {e}", path.display()))
                })?;
                request = request.header("authorization", token.trim());
            }
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Credentials(format!("container endpoint: {e}")))?;
        let body = read_body("container endpoint", response).await?;
        parse_document("container endpoint", &body)
    }

    fn name(&self) -> &'static str {
        "container"
    }
}

/// EC2 instance metadata service (IMDSv2)
pub struct ImdsProvider {
    client: reqwest::Client,
    endpoint: Url,
}

impl ImdsProvider {
    /// Provider talking to the metadata service at `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(endpoint: Url) -> Result<Self> {
        Ok(Self {
            client: http_client(Duration::from_secs(1))?,
            endpoint,
        })
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.endpoint
            .join(path)
            .map_err(|e| Error::Credentials(format!("imds: invalid path {path}: {e}")))
    }

    async fn get(&self, path: &str, session: &str) -> Result<String> {
        let response = self
            .client
            .get(self.url(path)?)
            .header("x-aws-ec2-metadata-token", session)
            .send()
            .await
            .map_err(|e| Error::Credentials(format!("imds: {e}")))?;
        read_body("imds", response).await
    }
}

#[async_trait::async_trait]
impl ProvideCredentials for ImdsProvider {
    async fn provide(&self) -> Result<AwsCredentials> {
        let response = self
            .client
            .put(self.url("/latest/api/token")?)
            .header("x-aws-ec2-metadata-token-ttl-seconds", IMDS_TOKEN_TTL_SECONDS)
            .send()
            .await
            .map_err(|e| Error::Credentials(format!("imds: {e}")))?;
        let session = read_body("imds", response).await?;

        let roles = self
            .get("/latest/meta-data/iam/security-credentials/", &session)
            .await?;
        let role = roles
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .ok_or_else(|| Error::Credentials("imds: no instance role attached".into()))?;

        let body = self
            .get(&format!("/latest/meta-data/iam/security-credentials/{role}"), &session)
            .await?;
        parse_document("imds", &body)
    }

    fn name(&self) -> &'static str {
        "imds"
    }
}

/// `AssumeRoleWithWebIdentity` with a projected service-account token (EKS IRSA)
pub struct WebIdentityProvider {
    client: reqwest::Client,
    sts_endpoint: Url,
    role_arn: String,
    session_name: String,
    token_file: PathBuf,
}

impl WebIdentityProvider {
    /// Provider assuming `role_arn` through the STS at `sts_endpoint`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        sts_endpoint: Url,
        role_arn: String,
        session_name: String,
        token_file: PathBuf,
    ) -> Result<Self> {
        Ok(Self {
            client: http_client(Duration::from_secs(2))?,
            sts_endpoint,
            role_arn,
            session_name,
            token_file,
        })
    }
}

#[async_trait::async_trait]
impl ProvideCredentials for WebIdentityProvider {
    async fn provide(&self) -> Result<AwsCredentials> {
        // Kubernetes rotates the projected token, so read it on every call
        let token = tokio::fs::read_to_string(&self.token_file).await.map_err(|e| {
            Error::Credentials(format!(
                "web identity token {}: {e}",
                self.token_file.display()
            ))
        })?;

        let mut url = self.sts_endpoint.clone();
        url.query_pairs_mut()
            .append_pair("Action", "AssumeRoleWithWebIdentity")
            .append_pair("Version", STS_API_VERSION)
            .append_pair("RoleArn", &self.role_arn)
            .append_pair("RoleSessionName", &self.session_name)
            .append_pair("WebIdentityToken", token.trim());

        let response = self
            .client
            .get(url)
            .header("accept", "application/json")
            .send()
            .await
            .map_err(|e| Error::Credentials(format!("sts: {e}")))?;
        let body = read_body("sts", response).await?;

        let parsed: Value = serde_json::from_str(&body)
            .map_err(|e| Error::Credentials(format!("sts: malformed response: {e}")))?;
        let credentials = parsed
            .pointer("/AssumeRoleWithWebIdentityResponse/AssumeRoleWithWebIdentityResult/Credentials")
            .ok_or_else(|| Error::Credentials("sts: response has no Credentials".into()))?;
        parse_document("sts", &credentials.to_string())
    }

    fn name(&self) -> &'static str {
        "web-identity"
    }
}

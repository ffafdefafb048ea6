//! Verdicts and the gateway wire format.
//!
//! The authorizer produces one [`Verdict`] per invocation. [`AuthorizerResponse`]
//! is its serialized form: an IAM-style policy document with a single
//! `execute-api:Invoke` statement, plus the usage identifier key and
//! context map the gateway uses for quota accounting and request logging.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Policy language version expected by the gateway
pub const POLICY_VERSION: &str = "2012-10-17";

/// Action granted or denied by every statement
pub const INVOKE_ACTION: &str = "execute-api:Invoke";

/// Context key carrying the caller's client id
pub const CLIENT_ID_CONTEXT_KEY: &str = "clientId";

/// Outcome of an authorization decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    /// Request may proceed
    Allow,
    /// Request is rejected
    Deny,
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allow => f.write_str("Allow"),
            Self::Deny => f.write_str("Deny"),
        }
    }
}

/// Authorization decision for one invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    /// Allow or Deny
    pub effect: Effect,
    /// Principal the gateway attributes the request to
    pub principal_id: String,
    /// Method/resource identifier the verdict applies to
    pub resource: String,
    /// Client id for usage-plan accounting (Allow only)
    pub usage_key: Option<String>,
    /// String attributes forwarded to the backend (Allow only)
    pub context: BTreeMap<String, String>,
}

impl Verdict {
    /// Allow `resource` on behalf of `client_id`
    #[must_use]
    pub fn allow(
        principal_id: impl Into<String>,
        resource: impl Into<String>,
        client_id: impl Into<String>,
    ) -> Self {
        let client_id = client_id.into();
        let mut context = BTreeMap::new();
        context.insert(CLIENT_ID_CONTEXT_KEY.to_string(), client_id.clone());
        Self {
            effect: Effect::Allow,
            principal_id: principal_id.into(),
            resource: resource.into(),
            usage_key: Some(client_id),
            context,
        }
    }

    /// Deny `resource`
    #[must_use]
    pub fn deny(principal_id: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            effect: Effect::Deny,
            principal_id: principal_id.into(),
            resource: resource.into(),
            usage_key: None,
            context: BTreeMap::new(),
        }
    }

    /// Whether the verdict allows the request
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        self.effect == Effect::Allow
    }

    /// Client id attached to an Allow verdict
    #[must_use]
    pub fn client_id(&self) -> Option<&str> {
        self.context.get(CLIENT_ID_CONTEXT_KEY).map(String::as_str)
    }
}

/// Invocation event sent by the gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizerEvent {
    /// Authorizer type, `TOKEN` for header-token authorizers
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Raw value of the identity source header
    #[serde(default)]
    pub authorization_token: String,
    /// ARN of the method being invoked
    pub method_arn: String,
}

/// Single policy statement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Statement {
    /// Always [`INVOKE_ACTION`]
    pub action: String,
    /// Allow or Deny
    pub effect: Effect,
    /// Method ARN
    pub resource: String,
}

/// IAM-style policy document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyDocument {
    /// Always [`POLICY_VERSION`]
    pub version: String,
    /// Exactly one statement
    pub statement: Vec<Statement>,
}

/// Response returned to the gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizerResponse {
    /// Principal identifier
    pub principal_id: String,
    /// Policy granting or denying the invoke
    pub policy_document: PolicyDocument,
    /// Usage-plan key; omitted on Deny
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage_identifier_key: Option<String>,
    /// Context map; omitted when empty
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<BTreeMap<String, String>>,
}

impl AuthorizerResponse {
    /// Effect of the single statement
    #[must_use]
    pub fn effect(&self) -> Option<Effect> {
        self.policy_document.statement.first().map(|s| s.effect)
    }
}

impl From<Verdict> for AuthorizerResponse {
    fn from(verdict: Verdict) -> Self {
        let context = (!verdict.context.is_empty()).then_some(verdict.context);
        Self {
            principal_id: verdict.principal_id,
            policy_document: PolicyDocument {
                version: POLICY_VERSION.to_string(),
                statement: vec![Statement {
                    action: INVOKE_ACTION.to_string(),
                    effect: verdict.effect,
                    resource: verdict.resource,
                }],
            },
            usage_identifier_key: verdict.usage_key,
            context,
        }
    }
}

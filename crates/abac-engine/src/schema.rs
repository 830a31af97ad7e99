use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::Attributes;
use crate::rule::{Effect, PolicyRule};

/// HTTP methods an endpoint may be registered under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported HTTP method '{0}' (expected GET, POST, PUT, PATCH or DELETE)")]
pub struct UnknownMethod(pub String);

impl FromStr for HttpMethod {
    type Err = UnknownMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            other => Err(UnknownMethod(other.to_string())),
        }
    }
}

/// Endpoint metadata the decision point needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndPointMeta {
    pub id: Uuid,
    pub method: HttpMethod,
    /// Route template, e.g. `/clients/{id}`.
    pub path: String,
    /// Deny when no rule matches. `false` makes the endpoint public by
    /// default.
    #[serde(default)]
    pub deny_unauthorized: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// An inbound request to authorize. Subject claims travel separately.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationRequest {
    pub method: HttpMethod,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<Attributes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_params: Option<Attributes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Attributes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<Attributes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<Attributes>,
}

/// The caller-facing answer. `error` only ever holds a generic marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationResponse {
    pub allowed: bool,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effect: Option<Effect>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuthorizationResponse {
    pub fn denied(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
            policy_id: None,
            policy_name: None,
            effect: None,
            error: None,
        }
    }
}

/// A set of endpoints and their policies, loaded from one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyBundle {
    /// Schema version; currently must be "1.0".
    pub version: String,
    #[serde(default)]
    pub endpoints: Vec<EndPointMeta>,
    #[serde(default)]
    pub policies: Vec<PolicyRule>,
}

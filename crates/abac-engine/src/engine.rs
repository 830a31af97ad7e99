use std::fmt;

use tracing::{debug, info};
use uuid::Uuid;

use crate::context::{Attributes, RequestContext};
use crate::decision::{decide, AuthorizationDecision};
use crate::rule::PolicyRule;
use crate::schema::{AuthorizationRequest, AuthorizationResponse, EndPointMeta, HttpMethod, PolicyBundle};

// ---------------------------------------------------------------------------
// PolicySource
// ---------------------------------------------------------------------------

/// Where endpoints and their rules come from.
pub trait PolicySource {
    /// The endpoint registered for `method` and the route template `path`.
    fn endpoint(&self, method: HttpMethod, path: &str) -> Option<&EndPointMeta>;

    /// Every rule attached to `endpoint_id`, in storage order.
    fn rules_for(&self, endpoint_id: Uuid) -> Vec<&PolicyRule>;
}

impl PolicySource for PolicyBundle {
    fn endpoint(&self, method: HttpMethod, path: &str) -> Option<&EndPointMeta> {
        self.endpoints
            .iter()
            .find(|endpoint| endpoint.method == method && endpoint.path == path)
    }

    fn rules_for(&self, endpoint_id: Uuid) -> Vec<&PolicyRule> {
        self.policies
            .iter()
            .filter(|rule| rule.end_point_id == endpoint_id)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("endpoint not found: {method} {path}")]
    UnknownEndpoint { method: HttpMethod, path: String },
}

// ---------------------------------------------------------------------------
// PolicyEngine
// ---------------------------------------------------------------------------

/// Entry point for authorizing requests against a [`PolicySource`].
pub struct PolicyEngine<S = PolicyBundle> {
    source: S,
}

impl fmt::Debug for PolicyEngine<PolicyBundle> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyEngine")
            .field("version", &self.source.version)
            .field("num_endpoints", &self.source.endpoints.len())
            .field("num_policies", &self.source.policies.len())
            .finish()
    }
}

impl<S: PolicySource> PolicyEngine<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Look up the endpoint, assemble the context and run the decision
    /// point. Only an unknown endpoint is an error.
    pub fn decide_request(
        &self,
        subject: Attributes,
        request: &AuthorizationRequest,
    ) -> Result<AuthorizationDecision, EngineError> {
        let endpoint = self
            .source
            .endpoint(request.method, &request.path)
            .ok_or_else(|| EngineError::UnknownEndpoint {
                method: request.method,
                path: request.path.clone(),
            })?;
        let rules = self.source.rules_for(endpoint.id);
        debug!(
            method = %request.method,
            path = %request.path,
            rules = rules.len(),
            "authorizing request"
        );
        let ctx = RequestContext::from_request(subject, request);
        Ok(decide(rules, &ctx, endpoint))
    }

    /// Authorize a request, mapping every outcome to a caller-safe response.
    pub fn authorize(
        &self,
        subject: Attributes,
        request: &AuthorizationRequest,
    ) -> AuthorizationResponse {
        match self.decide_request(subject, request) {
            Ok(decision) => decision.to_response(),
            Err(err) => {
                info!(%err, "authorization requested for unregistered endpoint");
                AuthorizationResponse::denied(err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::{load_bundle_from_str, BundleFormat};
    use crate::validator::ValidationConfig;
    use serde_json::{json, Value};

    const BUNDLE: &str = r#"
version: "1.0"
endpoints:
  - id: 3f0c9a52-1b7e-4d0a-8c55-6a2f0e9d1b11
    method: GET
    path: "/clients/{id}"
    deny_unauthorized: true
  - id: 5b4a3928-1706-4f5e-8d4c-3b2a19081726
    method: GET
    path: /health
policies:
  - id: 9d3e1c20-7a4b-4f5e-b8a1-0c2d3e4f5a6b
    name: client self access
    effect: Allow
    end_point_id: 3f0c9a52-1b7e-4d0a-8c55-6a2f0e9d1b11
    conditions:
      logic_type: AND
      children:
        - leaf:
            attribute: subject.company_id
            operator: IsNull
        - leaf:
            attribute: subject.id
            operator: Equals
            resource_attribute: path.id
  - id: 0c1d2e3f-4a5b-4c6d-8e7f-9a0b1c2d3e4f
    name: suspended clients
    effect: Deny
    end_point_id: 3f0c9a52-1b7e-4d0a-8c55-6a2f0e9d1b11
    conditions:
      leaf:
        attribute: subject.status
        operator: Equals
        value: suspended
"#;

    fn engine() -> PolicyEngine {
        let bundle =
            load_bundle_from_str(BUNDLE, BundleFormat::Yaml, &ValidationConfig::default()).unwrap();
        PolicyEngine::new(bundle)
    }

    fn subject(value: Value) -> Attributes {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    fn request(method: &str, path: &str, path_params: Value) -> AuthorizationRequest {
        serde_json::from_value(json!({
            "method": method,
            "path": path,
            "path_params": path_params,
        }))
        .unwrap()
    }

    #[test]
    fn allows_matching_client() {
        let response = engine().authorize(
            subject(json!({"id": "C1", "status": "active"})),
            &request("GET", "/clients/{id}", json!({"id": "C1"})),
        );
        assert!(response.allowed);
        assert_eq!(response.policy_name.as_deref(), Some("client self access"));
    }

    #[test]
    fn deny_rule_wins() {
        let response = engine().authorize(
            subject(json!({"id": "C1", "status": "suspended"})),
            &request("GET", "/clients/{id}", json!({"id": "C1"})),
        );
        assert!(!response.allowed);
        assert_eq!(response.policy_name.as_deref(), Some("suspended clients"));
    }

    #[test]
    fn missing_status_is_recorded_but_not_leaked() {
        let engine = engine();
        let req = request("GET", "/clients/{id}", json!({"id": "C1"}));
        let decision = engine
            .decide_request(subject(json!({"id": "C1"})), &req)
            .unwrap();
        assert!(decision.is_allowed());
        assert_eq!(decision.errors.len(), 1);

        let response = engine.authorize(subject(json!({"id": "C1"})), &req);
        assert_eq!(response.error.as_deref(), Some("policy evaluation error"));
    }

    #[test]
    fn endpoint_without_rules_uses_its_default() {
        let response = engine().authorize(subject(json!({})), &request("GET", "/health", json!({})));
        assert!(response.allowed);
        assert!(response.policy_id.is_none());
    }

    #[test]
    fn unknown_endpoint_is_denied() {
        let engine = engine();
        let req = request("POST", "/clients/{id}", json!({}));
        assert_eq!(
            engine.decide_request(subject(json!({})), &req),
            Err(EngineError::UnknownEndpoint {
                method: HttpMethod::Post,
                path: "/clients/{id}".into(),
            })
        );
        let response = engine.authorize(subject(json!({})), &req);
        assert!(!response.allowed);
        assert_eq!(response.reason, "endpoint not found: POST /clients/{id}");
    }

    #[test]
    fn debug_summarises_bundle() {
        let rendered = format!("{:?}", engine());
        assert!(rendered.contains("num_policies: 2"));
    }
}

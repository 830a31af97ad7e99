//! The policy decision point.
//!
//! [`decide`] combines the rules attached to an endpoint with
//! deny-overrides: any matching Deny wins, otherwise any matching Allow wins,
//! otherwise the endpoint's `deny_unauthorized` flag decides. A rule whose
//! conditions cannot be evaluated counts as not matching and is reported in
//! [`AuthorizationDecision::errors`].

use serde::Serialize;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::context::RequestContext;
use crate::evaluator::{evaluate, explain, EvalError};
use crate::rule::{Effect, PolicyRule};
use crate::schema::{AuthorizationResponse, EndPointMeta};

/// Marker placed in [`AuthorizationResponse::error`] when any rule failed to
/// evaluate. The underlying error is never sent to the caller.
pub const EVALUATION_ERROR_MARKER: &str = "policy evaluation error";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DecisionOutcome {
    Allowed,
    Denied,
}

/// Identity of a rule, as reported in decisions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleRef {
    pub id: Uuid,
    pub name: String,
    pub effect: Effect,
}

impl From<&PolicyRule> for RuleRef {
    fn from(rule: &PolicyRule) -> Self {
        Self {
            id: rule.id,
            name: rule.name.clone(),
            effect: rule.effect,
        }
    }
}

/// A rule that was skipped because its conditions raised an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleFailure {
    pub rule: RuleRef,
    pub error: EvalError,
}

/// The final answer for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationDecision {
    pub outcome: DecisionOutcome,
    /// The rule that decided, or `None` when the endpoint default applied.
    pub matched_rule: Option<RuleRef>,
    pub reason: String,
    pub errors: Vec<RuleFailure>,
}

impl AuthorizationDecision {
    pub fn is_allowed(&self) -> bool {
        self.outcome == DecisionOutcome::Allowed
    }

    fn from_rule(rule: &PolicyRule, errors: Vec<RuleFailure>) -> Self {
        let (outcome, reason) = match rule.effect {
            Effect::Allow => (
                DecisionOutcome::Allowed,
                format!("access granted by policy '{}'", rule.name),
            ),
            Effect::Deny => (
                DecisionOutcome::Denied,
                format!("access denied by policy '{}'", rule.name),
            ),
        };
        Self {
            outcome,
            matched_rule: Some(RuleRef::from(rule)),
            reason,
            errors,
        }
    }

    fn endpoint_default(endpoint: &EndPointMeta, errors: Vec<RuleFailure>) -> Self {
        let (outcome, reason) = if endpoint.deny_unauthorized {
            (DecisionOutcome::Denied, "no allow policy matched the request")
        } else {
            (
                DecisionOutcome::Allowed,
                "no policy matched; endpoint allows unmatched requests",
            )
        };
        Self {
            outcome,
            matched_rule: None,
            reason: reason.to_string(),
            errors,
        }
    }

    /// Map to the caller-facing response. Evaluation errors collapse into
    /// [`EVALUATION_ERROR_MARKER`].
    pub fn to_response(&self) -> AuthorizationResponse {
        AuthorizationResponse {
            allowed: self.is_allowed(),
            reason: self.reason.clone(),
            policy_id: self.matched_rule.as_ref().map(|rule| rule.id),
            policy_name: self.matched_rule.as_ref().map(|rule| rule.name.clone()),
            effect: self.matched_rule.as_ref().map(|rule| rule.effect),
            error: (!self.errors.is_empty()).then(|| EVALUATION_ERROR_MARKER.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Decision
// ---------------------------------------------------------------------------

/// Decide a request for `endpoint` given the rules attached to it.
///
/// Deny rules are scanned first, then Allow rules, each in the order given;
/// storage order therefore never lets an Allow outrank a Deny.
pub fn decide<'r>(
    rules: impl IntoIterator<Item = &'r PolicyRule>,
    ctx: &RequestContext,
    endpoint: &EndPointMeta,
) -> AuthorizationDecision {
    debug!(
        method = %endpoint.method,
        path = %endpoint.path,
        "deciding request"
    );
    let (deny, allow): (Vec<&PolicyRule>, Vec<&PolicyRule>) = rules
        .into_iter()
        .partition(|rule| rule.effect == Effect::Deny);
    let mut errors = Vec::new();

    for rule in deny.into_iter().chain(allow) {
        if rule_matches(rule, ctx, &mut errors) {
            let decision = AuthorizationDecision::from_rule(rule, errors);
            debug!(
                rule = %rule.name,
                outcome = ?decision.outcome,
                "decided by rule"
            );
            return decision;
        }
    }

    let decision = AuthorizationDecision::endpoint_default(endpoint, errors);
    debug!(
        deny_unauthorized = endpoint.deny_unauthorized,
        outcome = ?decision.outcome,
        "no rule matched; endpoint default applied"
    );
    decision
}

fn rule_matches(rule: &PolicyRule, ctx: &RequestContext, errors: &mut Vec<RuleFailure>) -> bool {
    match evaluate(&rule.conditions, ctx) {
        Ok(matched) => {
            trace!(rule = %rule.name, effect = %rule.effect, matched, "rule evaluated");
            matched
        }
        Err(error) => {
            warn!(
                rule = %rule.name,
                policy_id = %rule.id,
                %error,
                "policy evaluation failed; treating rule as not matching"
            );
            errors.push(RuleFailure {
                rule: RuleRef::from(rule),
                error,
            });
            false
        }
    }
}

// ---------------------------------------------------------------------------
// Single-policy evaluation
// ---------------------------------------------------------------------------

/// Result of running one rule in isolation, for policy authors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyEvaluation {
    pub rule: RuleRef,
    pub matched: bool,
    pub reason: String,
    /// The full evaluation error, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Failed conditions, one per line.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<String>,
}

/// Evaluate one rule against `ctx` and explain the outcome.
pub fn evaluate_policy(rule: &PolicyRule, ctx: &RequestContext) -> PolicyEvaluation {
    let rule_ref = RuleRef::from(rule);
    match explain(&rule.conditions, ctx) {
        Ok(explanation) => PolicyEvaluation {
            rule: rule_ref,
            matched: explanation.matched,
            reason: if explanation.matched {
                "policy conditions met".to_string()
            } else {
                explanation.reason()
            },
            error: None,
            failures: explanation.failures,
        },
        Err(error) => PolicyEvaluation {
            rule: rule_ref,
            matched: false,
            reason: format!("policy evaluation error: {error}"),
            error: Some(error.to_string()),
            failures: Vec::new(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::ConditionNode;
    use crate::context::Attributes;
    use crate::rule::{PolicyDraft, RuleError};
    use crate::schema::HttpMethod;
    use crate::validator::{ValidationConfig, ValidationErrorKind};
    use serde_json::{json, Value};

    fn attrs(value: Value) -> Attributes {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    fn endpoint(deny_unauthorized: bool) -> EndPointMeta {
        EndPointMeta {
            id: Uuid::new_v4(),
            method: HttpMethod::Get,
            path: "/clients/{id}".to_string(),
            deny_unauthorized,
            description: None,
        }
    }

    fn rule(name: &str, effect: Effect, conditions: Value) -> PolicyRule {
        PolicyRule {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: None,
            effect,
            end_point_id: Uuid::nil(),
            conditions: ConditionNode::from_value(conditions).expect("fixture parses"),
        }
    }

    fn client_self_access() -> PolicyRule {
        rule(
            "client self access",
            Effect::Allow,
            json!({
                "logic_type": "AND",
                "children": [
                    {"leaf": {"attribute": "subject.company_id", "operator": "IsNull"}},
                    {"leaf": {"attribute": "subject.id", "operator": "Equals", "resource_attribute": "resource.client_id"}}
                ]
            }),
        )
    }

    fn role_check(name: &str, effect: Effect, role: &str) -> PolicyRule {
        rule(
            name,
            effect,
            json!({"leaf": {"attribute": "subject.roles[*].id", "operator": "Contains", "value": role}}),
        )
    }

    #[test]
    fn scenario_client_reads_own_record() {
        let ctx = RequestContext::new(attrs(json!({"id": "C1"})))
            .with_resource(attrs(json!({"client_id": "C1"})));
        let decision = decide(&[client_self_access()], &ctx, &endpoint(true));
        assert_eq!(decision.outcome, DecisionOutcome::Allowed);
        assert_eq!(
            decision.matched_rule.map(|r| r.name),
            Some("client self access".to_string())
        );
    }

    #[test]
    fn scenario_client_reads_other_record() {
        let ctx = RequestContext::new(attrs(json!({"id": "C1"})))
            .with_resource(attrs(json!({"client_id": "C2"})));
        let decision = decide(&[client_self_access()], &ctx, &endpoint(true));
        assert_eq!(decision.outcome, DecisionOutcome::Denied);
        assert!(decision.matched_rule.is_none());
        assert!(decision.errors.is_empty());
    }

    #[test]
    fn scenario_deny_overrides_matching_allow() {
        let staff = rule(
            "staff access",
            Effect::Allow,
            json!({"logic_type": "OR", "children": [
                {"leaf": {"attribute": "subject.roles[*].id", "operator": "Contains", "value": "Owner"}},
                {"leaf": {"attribute": "subject.roles[*].id", "operator": "Contains", "value": "Manager"}}
            ]}),
        );
        let manager = role_check("managers", Effect::Allow, "Manager");
        let no_owner = role_check("owners blocked", Effect::Deny, "Owner");
        let ctx = RequestContext::new(attrs(json!({"roles": [{"id": "Owner"}]})));

        // Deny wins wherever it sits in storage order.
        for rules in [
            vec![staff.clone(), manager.clone(), no_owner.clone()],
            vec![no_owner.clone(), staff.clone(), manager.clone()],
        ] {
            let decision = decide(&rules, &ctx, &endpoint(false));
            assert_eq!(decision.outcome, DecisionOutcome::Denied);
            assert_eq!(decision.matched_rule.unwrap().id, no_owner.id);
        }
    }

    #[test]
    fn scenario_malformed_leaf_never_reaches_evaluation() {
        let draft: PolicyDraft = serde_json::from_value(json!({
            "name": "broken rule",
            "effect": "Allow",
            "end_point_id": Uuid::new_v4(),
            "conditions": {"leaf": {"attribute": "subject.id", "operator": "Equals"}}
        }))
        .unwrap();
        let err = draft.into_rule(&ValidationConfig::default()).unwrap_err();
        let RuleError::Invalid { source, .. } = err else {
            panic!("expected a validation failure");
        };
        assert!(matches!(source.kind, ValidationErrorKind::MissingComparand { .. }));
    }

    #[test]
    fn scenario_type_mismatch_falls_through() {
        let broken = rule(
            "company members",
            Effect::Allow,
            json!({"leaf": {"attribute": "resource.company_id", "operator": "Contains", "value": "acme"}}),
        );
        let ctx = RequestContext::new(attrs(json!({"id": "C1"})))
            .with_resource(attrs(json!({"company_id": "acme", "client_id": "C1"})));

        // Falls through to the endpoint default.
        let decision = decide(&[broken.clone()], &ctx, &endpoint(true));
        assert_eq!(decision.outcome, DecisionOutcome::Denied);
        assert_eq!(decision.errors.len(), 1);
        assert!(matches!(decision.errors[0].error, EvalError::TypeMismatch { .. }));

        // Falls through to the next rule.
        let decision = decide(&[broken, client_self_access()], &ctx, &endpoint(true));
        assert_eq!(decision.outcome, DecisionOutcome::Allowed);
        assert_eq!(decision.errors.len(), 1);
    }

    #[test]
    fn erroring_deny_rule_does_not_allow() {
        let deny = rule(
            "tenant mismatch",
            Effect::Deny,
            json!({"leaf": {"attribute": "subject.tenant", "operator": "NotEquals", "resource_attribute": "resource.tenant"}}),
        );
        let ctx = RequestContext::new(attrs(json!({"id": "C1"})));
        let decision = decide(&[deny], &ctx, &endpoint(true));
        assert_eq!(decision.outcome, DecisionOutcome::Denied);

        let response = decision.to_response();
        assert!(!response.allowed);
        assert_eq!(response.error.as_deref(), Some(EVALUATION_ERROR_MARKER));
        assert!(!response.reason.contains("subject.tenant"));
    }

    #[test]
    fn deny_with_misspelt_needle_is_reported() {
        let deny = rule(
            "blocked branches",
            Effect::Deny,
            json!({"leaf": {"attribute": "subject.blocked[*]", "operator": "Contains", "resource_attribute": "path.branch_idd"}}),
        );
        let ctx = RequestContext::new(attrs(json!({"blocked": ["b1"]})))
            .with_path_params(attrs(json!({"branch_id": "b1"})));

        let decision = decide(&[deny], &ctx, &endpoint(false));
        assert_eq!(decision.errors.len(), 1);
        assert_eq!(
            decision.errors[0].error,
            EvalError::MissingAttribute {
                attribute: "path.branch_idd".into(),
                operator: "Contains",
            }
        );
        assert_eq!(
            decision.to_response().error.as_deref(),
            Some(EVALUATION_ERROR_MARKER)
        );
    }

    #[test]
    fn endpoint_default_applies_without_rules() {
        let ctx = RequestContext::default();
        let no_rules: [PolicyRule; 0] = [];
        assert_eq!(
            decide(&no_rules, &ctx, &endpoint(true)).outcome,
            DecisionOutcome::Denied
        );
        assert_eq!(
            decide(&no_rules, &ctx, &endpoint(false)).outcome,
            DecisionOutcome::Allowed
        );
    }

    #[test]
    fn response_carries_rule_identity() {
        let allow = role_check("managers", Effect::Allow, "Manager");
        let ctx = RequestContext::new(attrs(json!({"roles": [{"id": "Manager"}]})));
        let response = decide(&[allow.clone()], &ctx, &endpoint(true)).to_response();
        assert!(response.allowed);
        assert_eq!(response.policy_id, Some(allow.id));
        assert_eq!(response.policy_name.as_deref(), Some("managers"));
        assert_eq!(response.effect, Some(Effect::Allow));
        assert!(response.error.is_none());
    }

    #[test]
    fn evaluate_policy_reports_details() {
        let rule = client_self_access();
        let own = RequestContext::new(attrs(json!({"id": "C1"})))
            .with_resource(attrs(json!({"client_id": "C1"})));
        let result = evaluate_policy(&rule, &own);
        assert!(result.matched);
        assert_eq!(result.reason, "policy conditions met");

        let other = RequestContext::new(attrs(json!({"id": "C1"})))
            .with_resource(attrs(json!({"client_id": "C2"})));
        let result = evaluate_policy(&rule, &other);
        assert!(!result.matched);
        assert_eq!(result.failures.len(), 2);

        let missing = RequestContext::new(attrs(json!({"id": "C1"})));
        let result = evaluate_policy(&rule, &missing);
        assert!(!result.matched);
        assert!(result
            .error
            .as_deref()
            .is_some_and(|e| e.contains("resource.client_id")));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        /// One rule per `(is_deny, matches)` pair, keyed on `subject.flag`.
        fn flag_rules(specs: &[(bool, bool)]) -> Vec<PolicyRule> {
            specs
                .iter()
                .enumerate()
                .map(|(idx, &(is_deny, matches))| {
                    let effect = if is_deny { Effect::Deny } else { Effect::Allow };
                    rule(
                        &format!("rule {idx}"),
                        effect,
                        json!({"leaf": {"attribute": "subject.flag", "operator": "Equals", "value": matches}}),
                    )
                })
                .collect()
        }

        fn flagged() -> RequestContext {
            RequestContext::new(attrs(json!({"flag": true})))
        }

        proptest! {
            #[test]
            fn matching_deny_beats_matching_allow_in_any_order(
                specs in prop::collection::vec((any::<bool>(), any::<bool>()), 0..8)
                    .prop_map(|mut specs| {
                        specs.push((true, true));
                        specs.push((false, true));
                        specs
                    })
                    .prop_shuffle(),
                deny_unauthorized in any::<bool>(),
            ) {
                let rules = flag_rules(&specs);
                let decision = decide(&rules, &flagged(), &endpoint(deny_unauthorized));
                prop_assert_eq!(decision.outcome, DecisionOutcome::Denied);
                prop_assert_eq!(decision.matched_rule.map(|r| r.effect), Some(Effect::Deny));
                prop_assert!(decision.errors.is_empty());
            }

            #[test]
            fn unmatched_rules_fall_back_to_endpoint_default(
                effects in prop::collection::vec(any::<bool>(), 0..8),
                deny_unauthorized in any::<bool>(),
            ) {
                let specs: Vec<(bool, bool)> = effects.into_iter().map(|is_deny| (is_deny, false)).collect();
                let decision = decide(&flag_rules(&specs), &flagged(), &endpoint(deny_unauthorized));
                let expected = if deny_unauthorized {
                    DecisionOutcome::Denied
                } else {
                    DecisionOutcome::Allowed
                };
                prop_assert_eq!(decision.outcome, expected);
                prop_assert!(decision.matched_rule.is_none());
            }
        }
    }
}

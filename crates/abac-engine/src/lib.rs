//! # abac-engine
//!
//! Attribute-based access control for HTTP endpoints. Policies are
//! declarative condition trees stored as JSON; this crate parses and
//! validates them, resolves attribute paths against a request, evaluates the
//! trees, and combines the results with deny-overrides.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use abac_engine::{loader, PolicyEngine, ValidationConfig};
//!
//! let bundle = loader::load_bundle("policies.yaml", &ValidationConfig::default()).unwrap();
//! let engine = PolicyEngine::new(bundle);
//! let request = serde_json::from_str(r#"{"method": "GET", "path": "/clients/{id}"}"#).unwrap();
//! let response = engine.authorize(serde_json::Map::new(), &request);
//! println!("{:?}", response);
//! ```

mod condition;
mod context;
mod decision;
mod engine;
mod evaluator;
pub mod loader;
mod operator;
mod path;
mod rule;
mod schema;
mod validator;

// Re-export primary public API at crate root.
pub use condition::{
    Comparand, ConditionLeaf, ConditionNode, LogicType, NodeLabel, NodeTrail, ParseError,
    TrailFrame,
};
pub use context::{resolve, Attributes, RequestContext, Resolved};
pub use decision::{
    decide, evaluate_policy, AuthorizationDecision, DecisionOutcome, PolicyEvaluation,
    RuleFailure, RuleRef, EVALUATION_ERROR_MARKER,
};
pub use engine::{EngineError, PolicyEngine, PolicySource};
pub use evaluator::{evaluate, explain, EvalError, Explanation};
pub use operator::{values_equal, Arity, Operands, Operator, OperatorSpec, OPERATORS};
pub use path::{AttributePath, Namespace, PathSyntaxError, Segment, Segments};
pub use rule::{Effect, PolicyDraft, PolicyPatch, PolicyRule, RuleError};
pub use schema::{
    AuthorizationRequest, AuthorizationResponse, EndPointMeta, HttpMethod, PolicyBundle,
    UnknownMethod,
};
pub use validator::{validate, ValidationConfig, ValidationError, ValidationErrorKind};

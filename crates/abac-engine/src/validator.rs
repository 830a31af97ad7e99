//! Structural validation of condition trees.
//!
//! Runs whenever a policy is created, patched, or loaded from a bundle, so
//! that an invalid tree never reaches the evaluator.

use serde::{Deserialize, Serialize};

use crate::condition::{Comparand, ConditionLeaf, ConditionNode, LogicType, NodeLabel, NodeTrail};
use crate::operator::{Arity, Operator};
use crate::path::PathSyntaxError;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

fn default_reject_unary_comparand() -> bool {
    true
}

fn default_max_depth() -> usize {
    32
}

/// Knobs for [`validate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Reject a `value`/`resource_attribute` on `IsNull`/`IsNotNull` leaves
    /// instead of ignoring it.
    #[serde(default = "default_reject_unary_comparand")]
    pub reject_unary_comparand: bool,

    /// Deepest allowed nesting; the root is depth 1.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            reject_unary_comparand: default_reject_unary_comparand(),
            max_depth: default_max_depth(),
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A structurally invalid tree, with the route to the offending node.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{trail}{kind}")]
pub struct ValidationError {
    pub trail: NodeTrail,
    pub kind: ValidationErrorKind,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationErrorKind {
    #[error("leaf node{node} is missing required 'attribute'")]
    MissingAttribute { node: NodeLabel },

    #[error(
        "leaf node{node} (attribute '{attribute}', operator '{operator}') requires either 'value' or 'resource_attribute'"
    )]
    MissingComparand {
        node: NodeLabel,
        attribute: String,
        operator: Operator,
    },

    #[error(
        "leaf node{node} (attribute '{attribute}', operator '{operator}') does not take 'value' or 'resource_attribute'"
    )]
    UnexpectedComparand {
        node: NodeLabel,
        attribute: String,
        operator: Operator,
    },

    #[error("leaf node{node} has invalid '{field}' ('{path}'): {reason}")]
    InvalidPath {
        node: NodeLabel,
        field: &'static str,
        path: String,
        reason: PathSyntaxError,
    },

    #[error("branch node{node} has 'logic_type' {logic_type} but no 'children'")]
    EmptyBranch {
        node: NodeLabel,
        logic_type: LogicType,
    },

    #[error("node{node} is nested deeper than the maximum of {max_depth} levels")]
    TooDeep { node: NodeLabel, max_depth: usize },
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Check `node` and all of its descendants, depth-first in pre-order.
///
/// The first violation wins; its [`ValidationError::trail`] names every
/// enclosing child position (1-based) and the description of each parent.
pub fn validate(node: &ConditionNode, config: &ValidationConfig) -> Result<(), ValidationError> {
    let mut trail = NodeTrail::default();
    check_node(node, config, 1, &mut trail)
}

fn check_node(
    node: &ConditionNode,
    config: &ValidationConfig,
    depth: usize,
    trail: &mut NodeTrail,
) -> Result<(), ValidationError> {
    if depth > config.max_depth {
        return Err(fail(
            trail,
            ValidationErrorKind::TooDeep {
                node: node.label(),
                max_depth: config.max_depth,
            },
        ));
    }

    match node {
        ConditionNode::Leaf { leaf, .. } => {
            check_leaf(leaf, node.label(), config).map_err(|kind| fail(trail, kind))
        }
        ConditionNode::Branch {
            logic_type,
            children,
            ..
        } => {
            if children.is_empty() {
                return Err(fail(
                    trail,
                    ValidationErrorKind::EmptyBranch {
                        node: node.label(),
                        logic_type: *logic_type,
                    },
                ));
            }
            for (idx, child) in children.iter().enumerate() {
                trail.push(idx + 1, node.label());
                check_node(child, config, depth + 1, trail)?;
                trail.pop();
            }
            Ok(())
        }
    }
}

fn fail(trail: &NodeTrail, kind: ValidationErrorKind) -> ValidationError {
    ValidationError {
        trail: trail.clone(),
        kind,
    }
}

fn check_leaf(
    leaf: &ConditionLeaf,
    node: NodeLabel,
    config: &ValidationConfig,
) -> Result<(), ValidationErrorKind> {
    if leaf.attribute.is_empty() {
        return Err(ValidationErrorKind::MissingAttribute { node });
    }

    match (leaf.operator.arity(), &leaf.comparand) {
        (Arity::Binary, Comparand::None) => {
            return Err(ValidationErrorKind::MissingComparand {
                node,
                attribute: leaf.attribute.to_string(),
                operator: leaf.operator,
            });
        }
        (Arity::Unary, Comparand::Static(_) | Comparand::Dynamic(_))
            if config.reject_unary_comparand =>
        {
            return Err(ValidationErrorKind::UnexpectedComparand {
                node,
                attribute: leaf.attribute.to_string(),
                operator: leaf.operator,
            });
        }
        _ => {}
    }

    if let Err(reason) = leaf.attribute.check() {
        return Err(ValidationErrorKind::InvalidPath {
            node,
            field: "attribute",
            path: leaf.attribute.to_string(),
            reason,
        });
    }
    if let Comparand::Dynamic(path) = &leaf.comparand {
        if let Err(reason) = path.check() {
            return Err(ValidationErrorKind::InvalidPath {
                node,
                field: "resource_attribute",
                path: path.to_string(),
                reason,
            });
        }
    }
    Ok(())
}

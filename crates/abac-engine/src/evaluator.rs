//! Condition tree evaluation.
//!
//! [`evaluate`] is the hot path used by the decision point. [`explain`] runs
//! the same walk but also records which conditions failed, for policy
//! authors debugging a rule.

use std::borrow::Cow;

use tracing::trace;

use crate::condition::{Comparand, ConditionLeaf, ConditionNode, LogicType};
use crate::context::{resolve, RequestContext, Resolved};
use crate::operator::{Arity, Operands};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A condition that could not be decided for the given request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EvalError {
    #[error("attribute '{attribute}' is absent and cannot be compared with {operator}")]
    MissingAttribute {
        attribute: String,
        operator: &'static str,
    },

    #[error("{operator} expects '{attribute}' to be an {expected}, found {found}")]
    TypeMismatch {
        attribute: String,
        operator: &'static str,
        expected: &'static str,
        found: &'static str,
    },

    #[error("{operator} on '{attribute}' has no comparand")]
    MissingComparand {
        attribute: String,
        operator: &'static str,
    },
}

// ---------------------------------------------------------------------------
// Explanation
// ---------------------------------------------------------------------------

/// Outcome of [`explain`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Explanation {
    pub matched: bool,
    /// One line per failed condition, indented by nesting depth. Empty when
    /// the tree matched.
    pub failures: Vec<String>,
}

impl Explanation {
    /// A one-paragraph summary suitable for a response `reason` field.
    pub fn reason(&self) -> String {
        if self.matched {
            return "all conditions matched".to_string();
        }
        if self.failures.is_empty() {
            return "conditions not met".to_string();
        }
        let lines: Vec<&str> = self.failures.iter().map(|line| line.trim()).collect();
        format!("conditions not met: {}", lines.join("; "))
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Evaluate a validated tree against `ctx`.
///
/// AND stops at the first child that is `false`, OR at the first that is
/// `true`. An error from a child that is reached ends the walk. A branch with
/// no children is `false`.
pub fn evaluate(node: &ConditionNode, ctx: &RequestContext) -> Result<bool, EvalError> {
    eval_node(node, ctx, 0, None)
}

/// Evaluate like [`evaluate`], collecting a line for every failed condition.
pub fn explain(node: &ConditionNode, ctx: &RequestContext) -> Result<Explanation, EvalError> {
    let mut failures = Vec::new();
    let matched = eval_node(node, ctx, 0, Some(&mut failures))?;
    if matched {
        failures.clear();
    }
    Ok(Explanation { matched, failures })
}

fn eval_node(
    node: &ConditionNode,
    ctx: &RequestContext,
    depth: usize,
    notes: Option<&mut Vec<String>>,
) -> Result<bool, EvalError> {
    match node {
        ConditionNode::Leaf { leaf, .. } => eval_leaf(leaf, node, ctx, depth, notes),
        ConditionNode::Branch {
            logic_type,
            children,
            ..
        } => {
            if children.is_empty() {
                if let Some(notes) = notes {
                    notes.push(format!(
                        "{}{} group{} has no conditions",
                        indent(depth),
                        logic_type,
                        node.label()
                    ));
                }
                return Ok(false);
            }

            // Children write into a scratch list so an OR that eventually
            // matches leaves no failure lines behind.
            let mut scratch = notes.is_some().then(Vec::new);
            let matched = match logic_type {
                LogicType::And => {
                    let mut all = true;
                    for child in children {
                        if !eval_node(child, ctx, depth + 1, scratch.as_mut())? {
                            all = false;
                            break;
                        }
                    }
                    all
                }
                LogicType::Or => {
                    let mut any = false;
                    for child in children {
                        if eval_node(child, ctx, depth + 1, scratch.as_mut())? {
                            any = true;
                            break;
                        }
                    }
                    any
                }
            };

            if let (Some(notes), Some(scratch)) = (notes, scratch) {
                if !matched {
                    notes.push(format!(
                        "{}{} group{} did not match",
                        indent(depth),
                        logic_type,
                        node.label()
                    ));
                    notes.extend(scratch);
                }
            }
            Ok(matched)
        }
    }
}

fn eval_leaf(
    leaf: &ConditionLeaf,
    node: &ConditionNode,
    ctx: &RequestContext,
    depth: usize,
    notes: Option<&mut Vec<String>>,
) -> Result<bool, EvalError> {
    let value = resolve(&leaf.attribute, ctx);
    let (comparand_path, comparand) = match &leaf.comparand {
        Comparand::None => (None, None),
        Comparand::Static(literal) => (None, Some(Resolved::Value(Cow::Borrowed(literal)))),
        Comparand::Dynamic(path) => (Some(path), Some(resolve(path, ctx))),
    };

    let operands = Operands {
        attribute: &leaf.attribute,
        value: &value,
        comparand_path,
        comparand: comparand.as_ref(),
    };
    let matched = leaf.operator.apply(&operands)?;
    trace!(
        attribute = %leaf.attribute,
        operator = %leaf.operator,
        matched,
        "condition evaluated"
    );

    if let (false, Some(notes)) = (matched, notes) {
        let spec = leaf.operator.spec();
        let mut line = format!(
            "{}{} {} failed{}: value {}, expected {}",
            indent(depth),
            leaf.attribute,
            spec.name,
            node.label(),
            value,
            spec.expectation,
        );
        if spec.arity == Arity::Binary {
            match (comparand_path, &comparand) {
                (Some(path), Some(resolved)) => line.push_str(&format!(" {path} ({resolved})")),
                (None, Some(resolved)) => line.push_str(&format!(" {resolved}")),
                _ => {}
            }
        }
        if let Some(text) = leaf.description.as_deref().filter(|d| !d.is_empty()) {
            line.push_str(&format!(" [{text}]"));
        }
        notes.push(line);
    }
    Ok(matched)
}

fn indent(depth: usize) -> String {
    "  ".repeat(depth)
}

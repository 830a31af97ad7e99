//! Condition trees: the data model of a policy's `conditions` field.
//!
//! A [`ConditionNode`] is either a leaf (one attribute check) or a branch
//! combining children with AND/OR. The wire format stores both shapes in a
//! single JSON object with optional fields; [`ConditionNode::parse`] maps that
//! object onto the enum and reports shapes the enum cannot represent as a
//! [`ParseError`]. Representable but invalid trees are left to
//! [`crate::validator::validate`].

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::operator::Operator;
use crate::path::AttributePath;

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

/// How a branch combines its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogicType {
    #[serde(rename = "AND")]
    And,
    #[serde(rename = "OR")]
    Or,
}

impl LogicType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::And => "AND",
            Self::Or => "OR",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "AND" => Some(Self::And),
            "OR" => Some(Self::Or),
            _ => None,
        }
    }
}

impl fmt::Display for LogicType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a leaf's attribute is compared against.
#[derive(Debug, Clone, PartialEq)]
pub enum Comparand {
    /// No comparand; only valid for unary operators.
    None,
    /// A literal JSON value (`"value"` on the wire). `null` is a valid literal.
    Static(Value),
    /// Another attribute of the request (`"resource_attribute"` on the wire).
    Dynamic(AttributePath),
}

impl Comparand {
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

/// A single attribute check.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionLeaf {
    pub attribute: AttributePath,
    pub operator: Operator,
    pub comparand: Comparand,
    pub description: Option<String>,
}

impl ConditionLeaf {
    pub fn new(attribute: impl Into<AttributePath>, operator: Operator, comparand: Comparand) -> Self {
        Self {
            attribute: attribute.into(),
            operator,
            comparand,
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A node of a condition tree.
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionNode {
    Leaf {
        leaf: ConditionLeaf,
        description: Option<String>,
    },
    Branch {
        logic_type: LogicType,
        children: Vec<ConditionNode>,
        description: Option<String>,
    },
}

impl ConditionNode {
    pub fn leaf(leaf: ConditionLeaf) -> Self {
        Self::Leaf {
            leaf,
            description: None,
        }
    }

    pub fn branch(logic_type: LogicType, children: Vec<ConditionNode>) -> Self {
        Self::Branch {
            logic_type,
            children,
            description: None,
        }
    }

    pub fn all(children: Vec<ConditionNode>) -> Self {
        Self::branch(LogicType::And, children)
    }

    pub fn any(children: Vec<ConditionNode>) -> Self {
        Self::branch(LogicType::Or, children)
    }

    pub fn with_description(mut self, text: impl Into<String>) -> Self {
        match &mut self {
            Self::Leaf { description, .. } | Self::Branch { description, .. } => {
                *description = Some(text.into());
            }
        }
        self
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Self::Leaf { .. })
    }

    pub fn is_branch(&self) -> bool {
        matches!(self, Self::Branch { .. })
    }

    pub fn description(&self) -> Option<&str> {
        match self {
            Self::Leaf { description, .. } | Self::Branch { description, .. } => {
                description.as_deref()
            }
        }
    }

    /// Diagnostic label for this node: ` ('description')`, or empty.
    pub fn label(&self) -> NodeLabel {
        NodeLabel::new(self.description())
    }

    /// Parse the JSON wire format.
    pub fn parse(json: &str) -> Result<Self, ParseError> {
        let wire: WireNode =
            serde_json::from_str(json).map_err(|err| ParseError::Json(err.to_string()))?;
        decode(wire, &mut NodeTrail::default())
    }

    /// Parse an already-decoded JSON value.
    pub fn from_value(value: Value) -> Result<Self, ParseError> {
        let wire: WireNode =
            serde_json::from_value(value).map_err(|err| ParseError::Json(err.to_string()))?;
        decode(wire, &mut NodeTrail::default())
    }

    /// Render the JSON wire format. Descriptions and literal values are kept
    /// exactly as parsed.
    pub fn to_json(&self) -> Value {
        let mut object = Map::new();
        if let Some(description) = self.description() {
            object.insert("description".into(), Value::String(description.to_string()));
        }
        match self {
            Self::Leaf { leaf, .. } => {
                object.insert("leaf".into(), leaf_to_json(leaf));
            }
            Self::Branch {
                logic_type,
                children,
                ..
            } => {
                object.insert("logic_type".into(), Value::String(logic_type.to_string()));
                object.insert(
                    "children".into(),
                    Value::Array(children.iter().map(Self::to_json).collect()),
                );
            }
        }
        Value::Object(object)
    }
}

fn leaf_to_json(leaf: &ConditionLeaf) -> Value {
    let mut object = Map::new();
    object.insert("attribute".into(), Value::String(leaf.attribute.to_string()));
    object.insert("operator".into(), Value::String(leaf.operator.to_string()));
    if let Some(description) = &leaf.description {
        object.insert("description".into(), Value::String(description.clone()));
    }
    match &leaf.comparand {
        Comparand::None => {}
        Comparand::Static(value) => {
            object.insert("value".into(), value.clone());
        }
        Comparand::Dynamic(path) => {
            object.insert("resource_attribute".into(), Value::String(path.to_string()));
        }
    }
    Value::Object(object)
}

impl Serialize for ConditionNode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ConditionNode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = WireNode::deserialize(deserializer)?;
        decode(wire, &mut NodeTrail::default()).map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Diagnostics context
// ---------------------------------------------------------------------------

/// A node's description formatted for error messages: ` ('text')`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeLabel(Option<String>);

impl NodeLabel {
    pub fn new(description: Option<&str>) -> Self {
        Self(description.filter(|d| !d.is_empty()).map(str::to_string))
    }
}

impl fmt::Display for NodeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(text) => write!(f, " ('{text}')"),
            None => Ok(()),
        }
    }
}

/// One step from a branch into one of its children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrailFrame {
    /// 1-based child position.
    pub index: usize,
    pub parent: NodeLabel,
}

/// The route from the root to the node an error refers to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeTrail(Vec<TrailFrame>);

impl NodeTrail {
    pub fn frames(&self) -> &[TrailFrame] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn push(&mut self, index: usize, parent: NodeLabel) {
        self.0.push(TrailFrame { index, parent });
    }

    pub(crate) fn pop(&mut self) {
        self.0.pop();
    }
}

impl fmt::Display for NodeTrail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for frame in &self.0 {
            write!(f, "invalid child node #{} within node{}: ", frame.index, frame.parent)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Parse errors
// ---------------------------------------------------------------------------

/// A condition document that does not describe a leaf or a branch.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("malformed condition JSON: {0}")]
    Json(String),

    #[error("{trail}leaf node{node} has unknown 'operator' '{operator}'")]
    UnknownOperator {
        trail: NodeTrail,
        node: NodeLabel,
        operator: String,
    },

    #[error("{trail}leaf node{node} (attribute '{attribute}') is missing required 'operator'")]
    MissingOperator {
        trail: NodeTrail,
        node: NodeLabel,
        attribute: String,
    },

    #[error("{trail}branch node{node} has invalid 'logic_type': '{logic_type}' (must be AND or OR)")]
    UnknownLogicType {
        trail: NodeTrail,
        node: NodeLabel,
        logic_type: String,
    },

    #[error("{trail}node{node} is incorrectly structured as both leaf and branch")]
    LeafAndBranch { trail: NodeTrail, node: NodeLabel },

    #[error("{trail}node{node} has 'children' but no 'logic_type'")]
    MissingLogicType { trail: NodeTrail, node: NodeLabel },

    #[error("{trail}node{node} is empty and invalid (must be leaf or branch)")]
    EmptyNode { trail: NodeTrail, node: NodeLabel },

    #[error(
        "{trail}leaf node{node} (attribute '{attribute}') cannot have both 'value' and 'resource_attribute' defined"
    )]
    ConflictingComparands {
        trail: NodeTrail,
        node: NodeLabel,
        attribute: String,
    },
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct WireNode {
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    logic_type: Option<String>,
    #[serde(default)]
    children: Option<Vec<WireNode>>,
    #[serde(default)]
    leaf: Option<WireLeaf>,
}

#[derive(Debug, Deserialize)]
struct WireLeaf {
    #[serde(default)]
    attribute: String,
    #[serde(default)]
    operator: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default, deserialize_with = "present_value")]
    value: Option<Value>,
    #[serde(default)]
    resource_attribute: Option<String>,
}

/// Keeps an explicit `"value": null` distinct from a missing `value`.
fn present_value<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

fn decode(wire: WireNode, trail: &mut NodeTrail) -> Result<ConditionNode, ParseError> {
    let node = NodeLabel::new(wire.description.as_deref());
    let logic_type = wire.logic_type.filter(|name| !name.is_empty());

    if let Some(leaf) = wire.leaf {
        if logic_type.is_some() || wire.children.is_some() {
            return Err(ParseError::LeafAndBranch {
                trail: trail.clone(),
                node,
            });
        }
        let leaf = decode_leaf(leaf, trail, &node)?;
        return Ok(ConditionNode::Leaf {
            leaf,
            description: wire.description,
        });
    }

    let children = wire.children.unwrap_or_default();
    let Some(name) = logic_type else {
        return Err(if children.is_empty() {
            ParseError::EmptyNode {
                trail: trail.clone(),
                node,
            }
        } else {
            ParseError::MissingLogicType {
                trail: trail.clone(),
                node,
            }
        });
    };
    let logic_type = LogicType::from_name(&name).ok_or_else(|| ParseError::UnknownLogicType {
        trail: trail.clone(),
        node: node.clone(),
        logic_type: name.clone(),
    })?;

    let mut decoded = Vec::with_capacity(children.len());
    for (idx, child) in children.into_iter().enumerate() {
        trail.push(idx + 1, node.clone());
        let child = decode(child, trail)?;
        trail.pop();
        decoded.push(child);
    }

    Ok(ConditionNode::Branch {
        logic_type,
        children: decoded,
        description: wire.description,
    })
}

fn decode_leaf(
    wire: WireLeaf,
    trail: &NodeTrail,
    node: &NodeLabel,
) -> Result<ConditionLeaf, ParseError> {
    if wire.operator.is_empty() {
        return Err(ParseError::MissingOperator {
            trail: trail.clone(),
            node: node.clone(),
            attribute: wire.attribute,
        });
    }
    let operator = Operator::from_name(&wire.operator).ok_or_else(|| ParseError::UnknownOperator {
        trail: trail.clone(),
        node: node.clone(),
        operator: wire.operator.clone(),
    })?;

    let dynamic = wire.resource_attribute.filter(|path| !path.is_empty());
    let comparand = match (wire.value, dynamic) {
        (Some(_), Some(_)) => {
            return Err(ParseError::ConflictingComparands {
                trail: trail.clone(),
                node: node.clone(),
                attribute: wire.attribute,
            })
        }
        (Some(value), None) => Comparand::Static(value),
        (None, Some(path)) => Comparand::Dynamic(AttributePath::new(path)),
        (None, None) => Comparand::None,
    };

    Ok(ConditionLeaf {
        attribute: AttributePath::new(wire.attribute),
        operator,
        comparand,
        description: wire.description,
    })
}

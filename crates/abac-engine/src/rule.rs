//! Policy rules and their create/update lifecycle.
//!
//! A rule only comes into existence through [`PolicyDraft::into_rule`] or
//! [`PolicyRule::apply_patch`], both of which parse and validate the
//! condition tree. Evaluation never mutates a rule.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::condition::{ConditionNode, ParseError};
use crate::validator::{validate, ValidationConfig, ValidationError};

/// Shortest and longest accepted rule name, in characters.
pub const NAME_LENGTH: std::ops::RangeInclusive<usize> = 3..=100;

/// What a matching rule does to the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Effect {
    Allow,
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

/// A named condition tree attached to one endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyRule {
    pub id: Uuid,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub effect: Effect,
    pub end_point_id: Uuid,
    pub conditions: ConditionNode,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RuleError {
    #[error("policy name must be between 3 and 100 characters (got {0})")]
    InvalidName(usize),

    #[error("policy '{name}' has missing or null conditions")]
    MissingConditions { name: String },

    #[error("failed to parse conditions for policy '{name}': {source}")]
    Parse {
        name: String,
        #[source]
        source: ParseError,
    },

    #[error("invalid conditions structure for policy '{name}': {source}")]
    Invalid {
        name: String,
        #[source]
        source: ValidationError,
    },
}

impl PolicyRule {
    /// Re-check a rule that was deserialized directly, e.g. from a bundle.
    pub fn check(&self, config: &ValidationConfig) -> Result<(), RuleError> {
        check_name(&self.name)?;
        validate(&self.conditions, config).map_err(|source| RuleError::Invalid {
            name: self.name.clone(),
            source,
        })
    }

    /// Produce an updated copy of this rule. Fields absent from the patch
    /// are kept; new conditions are parsed and validated before use.
    pub fn apply_patch(
        &self,
        patch: PolicyPatch,
        config: &ValidationConfig,
    ) -> Result<PolicyRule, RuleError> {
        let name = match patch.name {
            Some(name) => {
                check_name(&name)?;
                name
            }
            None => self.name.clone(),
        };
        let conditions = match patch.conditions {
            Some(raw) => build_conditions(&name, raw, config)?,
            None => self.conditions.clone(),
        };
        Ok(PolicyRule {
            id: self.id,
            name,
            description: patch.description.or_else(|| self.description.clone()),
            effect: patch.effect.unwrap_or(self.effect),
            end_point_id: patch.end_point_id.unwrap_or(self.end_point_id),
            conditions,
        })
    }
}

/// Input for creating a rule; `conditions` is the raw wire JSON.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PolicyDraft {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub effect: Effect,
    pub end_point_id: Uuid,
    #[serde(default)]
    pub conditions: Value,
}

impl PolicyDraft {
    /// Validate the draft and assign it a fresh id.
    pub fn into_rule(self, config: &ValidationConfig) -> Result<PolicyRule, RuleError> {
        check_name(&self.name)?;
        let conditions = build_conditions(&self.name, self.conditions, config)?;
        Ok(PolicyRule {
            id: Uuid::new_v4(),
            name: self.name,
            description: self.description,
            effect: self.effect,
            end_point_id: self.end_point_id,
            conditions,
        })
    }
}

/// Partial update for an existing rule.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PolicyPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub effect: Option<Effect>,
    #[serde(default)]
    pub end_point_id: Option<Uuid>,
    #[serde(default)]
    pub conditions: Option<Value>,
}

fn check_name(name: &str) -> Result<(), RuleError> {
    let len = name.chars().count();
    if NAME_LENGTH.contains(&len) {
        Ok(())
    } else {
        Err(RuleError::InvalidName(len))
    }
}

fn build_conditions(
    name: &str,
    raw: Value,
    config: &ValidationConfig,
) -> Result<ConditionNode, RuleError> {
    if raw.is_null() {
        return Err(RuleError::MissingConditions {
            name: name.to_string(),
        });
    }
    let node = ConditionNode::from_value(raw).map_err(|source| RuleError::Parse {
        name: name.to_string(),
        source,
    })?;
    validate(&node, config).map_err(|source| RuleError::Invalid {
        name: name.to_string(),
        source,
    })?;
    Ok(node)
}

//! Comparison operators.
//!
//! Operators live in a static registry, [`OPERATORS`]. Each entry carries the
//! wire name, the arity the validator enforces, and the predicate the
//! evaluator runs. Adding an operator means adding an [`Operator`] variant and
//! one table row; neither the validator nor the evaluator needs to change.

use std::fmt;

use serde_json::{Number, Value};
use uuid::Uuid;

use crate::context::Resolved;
use crate::evaluator::EvalError;
use crate::path::AttributePath;

// ---------------------------------------------------------------------------
// Operator
// ---------------------------------------------------------------------------

/// A comparison a condition leaf applies to its attribute.
///
/// Discriminants index into [`OPERATORS`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Equals = 0,
    NotEquals = 1,
    IsNull = 2,
    IsNotNull = 3,
    Contains = 4,
}

/// Whether an operator takes a comparand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// Reads only the leaf's attribute.
    Unary,
    /// Compares the attribute against exactly one comparand.
    Binary,
}

impl Operator {
    /// Look up an operator by its wire name (`"Equals"`, `"IsNull"`, ...).
    pub fn from_name(name: &str) -> Option<Self> {
        OPERATORS
            .iter()
            .find(|spec| spec.name == name)
            .map(|spec| spec.operator)
    }

    pub fn spec(self) -> &'static OperatorSpec {
        &OPERATORS[self as usize]
    }

    pub fn name(self) -> &'static str {
        self.spec().name
    }

    pub fn arity(self) -> Arity {
        self.spec().arity
    }

    /// Run this operator's predicate.
    pub fn apply(self, operands: &Operands<'_>) -> Result<bool, EvalError> {
        (self.spec().predicate)(operands)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Inputs handed to an operator predicate.
#[derive(Debug, Clone, Copy)]
pub struct Operands<'a> {
    /// The leaf's primary attribute path, for error reporting.
    pub attribute: &'a AttributePath,
    /// What the primary attribute resolved to.
    pub value: &'a Resolved<'a>,
    /// The dynamic comparand's path, when the comparand is an attribute.
    pub comparand_path: Option<&'a AttributePath>,
    /// The resolved comparand; `None` when the leaf has no comparand.
    pub comparand: Option<&'a Resolved<'a>>,
}

pub type Predicate = fn(&Operands<'_>) -> Result<bool, EvalError>;

/// One row of the operator registry.
pub struct OperatorSpec {
    pub operator: Operator,
    /// Name used in the policy wire format.
    pub name: &'static str,
    pub arity: Arity,
    /// Expectation phrase used in explanations, e.g. "to equal".
    pub expectation: &'static str,
    pub predicate: Predicate,
}

impl fmt::Debug for OperatorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperatorSpec")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish()
    }
}

/// The built-in operators, ordered by [`Operator`] discriminant.
pub static OPERATORS: &[OperatorSpec] = &[
    OperatorSpec {
        operator: Operator::Equals,
        name: "Equals",
        arity: Arity::Binary,
        expectation: "to equal",
        predicate: equals,
    },
    OperatorSpec {
        operator: Operator::NotEquals,
        name: "NotEquals",
        arity: Arity::Binary,
        expectation: "to differ from",
        predicate: not_equals,
    },
    OperatorSpec {
        operator: Operator::IsNull,
        name: "IsNull",
        arity: Arity::Unary,
        expectation: "to be null or absent",
        predicate: is_null,
    },
    OperatorSpec {
        operator: Operator::IsNotNull,
        name: "IsNotNull",
        arity: Arity::Unary,
        expectation: "to be present and not null",
        predicate: is_not_null,
    },
    OperatorSpec {
        operator: Operator::Contains,
        name: "Contains",
        arity: Arity::Binary,
        expectation: "to contain",
        predicate: contains,
    },
];

// ---------------------------------------------------------------------------
// Predicates
// ---------------------------------------------------------------------------

fn equals(ops: &Operands<'_>) -> Result<bool, EvalError> {
    let (left, right) = both_present(ops, Operator::Equals)?;
    Ok(values_equal(left, right))
}

fn not_equals(ops: &Operands<'_>) -> Result<bool, EvalError> {
    let (left, right) = both_present(ops, Operator::NotEquals)?;
    Ok(!values_equal(left, right))
}

fn is_null(ops: &Operands<'_>) -> Result<bool, EvalError> {
    Ok(ops.value.is_null())
}

fn is_not_null(ops: &Operands<'_>) -> Result<bool, EvalError> {
    Ok(!ops.value.is_null())
}

/// An absent list is an ordinary `false`; an absent needle is an error.
fn contains(ops: &Operands<'_>) -> Result<bool, EvalError> {
    let haystack = match ops.value {
        Resolved::Absent => return Ok(false),
        Resolved::Value(value) => match value.as_ref() {
            Value::Array(items) => items,
            other => {
                return Err(EvalError::TypeMismatch {
                    attribute: ops.attribute.to_string(),
                    operator: Operator::Contains.name(),
                    expected: "array",
                    found: json_type_name(other),
                })
            }
        },
    };
    let needle = comparand(ops, Operator::Contains)?
        .as_value()
        .ok_or_else(|| missing_comparand_value(ops, Operator::Contains))?;
    Ok(haystack.iter().any(|item| values_equal(item, needle)))
}

fn comparand<'r, 'a>(
    ops: &'r Operands<'a>,
    operator: Operator,
) -> Result<&'a Resolved<'a>, EvalError> {
    ops.comparand.ok_or_else(|| EvalError::MissingComparand {
        attribute: ops.attribute.to_string(),
        operator: operator.name(),
    })
}

fn both_present<'a>(
    ops: &Operands<'a>,
    operator: Operator,
) -> Result<(&'a Value, &'a Value), EvalError> {
    let left = ops.value.as_value().ok_or_else(|| EvalError::MissingAttribute {
        attribute: ops.attribute.to_string(),
        operator: operator.name(),
    })?;
    let right = comparand(ops, operator)?
        .as_value()
        .ok_or_else(|| missing_comparand_value(ops, operator))?;
    Ok((left, right))
}

/// The comparand resolved to nothing; blame its path when it has one.
fn missing_comparand_value(ops: &Operands<'_>, operator: Operator) -> EvalError {
    EvalError::MissingAttribute {
        attribute: ops
            .comparand_path
            .map(ToString::to_string)
            .unwrap_or_else(|| ops.attribute.to_string()),
        operator: operator.name(),
    }
}

// ---------------------------------------------------------------------------
// Equality
// ---------------------------------------------------------------------------

/// Structural JSON equality.
///
/// Numbers compare by value (`1 == 1.0`) and strings that both parse as UUIDs
/// compare as UUIDs, so hex case and hyphenation do not matter. Lists and
/// maps compare element-wise.
pub fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => numbers_equal(a, b),
        (Value::String(a), Value::String(b)) => a == b || uuids_equal(a, b),
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a
                    .iter()
                    .all(|(key, x)| b.get(key).is_some_and(|y| values_equal(x, y)))
        }
        _ => left == right,
    }
}

fn numbers_equal(a: &Number, b: &Number) -> bool {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return x == y;
    }
    if let (Some(x), Some(y)) = (a.as_u64(), b.as_u64()) {
        return x == y;
    }
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

fn uuids_equal(a: &str, b: &str) -> bool {
    match (Uuid::parse_str(a), Uuid::parse_str(b)) {
        (Ok(x), Ok(y)) => x == y,
        _ => false,
    }
}

/// JSON type name used in type-mismatch diagnostics.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::borrow::Cow;

    fn present(value: Value) -> Resolved<'static> {
        Resolved::Value(Cow::Owned(value))
    }

    fn run(
        operator: Operator,
        value: &Resolved<'_>,
        comparand: Option<&Resolved<'_>>,
    ) -> Result<bool, EvalError> {
        let attribute = AttributePath::new("subject.attr");
        let ops = Operands {
            attribute: &attribute,
            value,
            comparand_path: None,
            comparand,
        };
        operator.apply(&ops)
    }

    #[test]
    fn registry_order_matches_discriminants() {
        for (idx, spec) in OPERATORS.iter().enumerate() {
            assert_eq!(spec.operator as usize, idx, "{} out of place", spec.name);
            assert_eq!(Operator::from_name(spec.name), Some(spec.operator));
        }
    }

    #[test]
    fn names_and_arity() {
        assert_eq!(Operator::from_name("Equals"), Some(Operator::Equals));
        assert_eq!(Operator::from_name("equals"), None);
        assert_eq!(Operator::from_name("GreaterThan"), None);
        assert_eq!(Operator::IsNull.arity(), Arity::Unary);
        assert_eq!(Operator::IsNotNull.arity(), Arity::Unary);
        assert_eq!(Operator::Contains.arity(), Arity::Binary);
        assert_eq!(Operator::NotEquals.to_string(), "NotEquals");
    }

    #[test]
    fn equals_is_structural() {
        let a = present(json!({"x": [1, "b"]}));
        let b = present(json!({"x": [1.0, "b"]}));
        let c = present(json!({"x": [1, "c"]}));
        assert_eq!(run(Operator::Equals, &a, Some(&b)), Ok(true));
        assert_eq!(run(Operator::Equals, &a, Some(&c)), Ok(false));
        assert_eq!(run(Operator::NotEquals, &a, Some(&c)), Ok(true));
    }

    #[test]
    fn equals_normalises_uuids() {
        let lower = present(json!("6f1c2a1e-8b0d-4c3a-9f5e-2d7b8c9a0e11"));
        let upper = present(json!("6F1C2A1E-8B0D-4C3A-9F5E-2D7B8C9A0E11"));
        assert_eq!(run(Operator::Equals, &lower, Some(&upper)), Ok(true));
        assert!(!values_equal(&json!("ABC"), &json!("abc")));
    }

    #[test]
    fn null_is_not_absent_for_equality() {
        let null = present(Value::Null);
        assert_eq!(run(Operator::Equals, &null, Some(&null)), Ok(true));
        assert!(matches!(
            run(Operator::Equals, &Resolved::Absent, Some(&null)),
            Err(EvalError::MissingAttribute { .. })
        ));
        assert!(matches!(
            run(Operator::NotEquals, &null, Some(&Resolved::Absent)),
            Err(EvalError::MissingAttribute { .. })
        ));
    }

    #[test]
    fn is_null_covers_absent_and_null() {
        assert_eq!(run(Operator::IsNull, &Resolved::Absent, None), Ok(true));
        assert_eq!(run(Operator::IsNull, &present(Value::Null), None), Ok(true));
        assert_eq!(run(Operator::IsNull, &present(json!("")), None), Ok(false));
        assert_eq!(run(Operator::IsNotNull, &present(json!(0)), None), Ok(true));
        assert_eq!(run(Operator::IsNotNull, &Resolved::Absent, None), Ok(false));
    }

    #[test]
    fn contains_semantics() {
        let roles = present(json!(["A", "B"]));
        assert_eq!(run(Operator::Contains, &roles, Some(&present(json!("B")))), Ok(true));
        assert_eq!(run(Operator::Contains, &roles, Some(&present(json!("C")))), Ok(false));
        assert_eq!(
            run(Operator::Contains, &Resolved::Absent, Some(&present(json!("B")))),
            Ok(false)
        );
        assert_eq!(
            run(Operator::Contains, &roles, Some(&Resolved::Absent)),
            Err(EvalError::MissingAttribute {
                attribute: "subject.attr".into(),
                operator: "Contains",
            })
        );
    }

    #[test]
    fn contains_rejects_scalars() {
        let err = run(
            Operator::Contains,
            &present(json!("acme")),
            Some(&present(json!("a"))),
        )
        .unwrap_err();
        assert_eq!(
            err,
            EvalError::TypeMismatch {
                attribute: "subject.attr".into(),
                operator: "Contains",
                expected: "array",
                found: "string",
            }
        );
    }

    #[test]
    fn binary_operator_without_comparand_errors() {
        assert!(matches!(
            run(Operator::Equals, &present(json!(1)), None),
            Err(EvalError::MissingComparand { .. })
        ));
    }

    #[test]
    fn number_equality_across_representations() {
        assert!(values_equal(&json!(3), &json!(3.0)));
        assert!(values_equal(&json!(u64::MAX), &json!(u64::MAX)));
        assert!(!values_equal(&json!(-1), &json!(u64::MAX)));
        assert!(!values_equal(&json!(1), &json!("1")));
    }
}

use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::path::{AttributePath, Namespace, Segment, Segments};
use crate::schema::AuthorizationRequest;

/// An untyped, string-keyed attribute map as supplied by the caller.
pub type Attributes = serde_json::Map<String, Value>;

// ---------------------------------------------------------------------------
// RequestContext
// ---------------------------------------------------------------------------

/// Everything a condition tree may read while it is evaluated.
///
/// Each field backs one [`Namespace`]. Missing maps behave exactly like empty
/// ones: every path into them resolves to [`Resolved::Absent`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestContext {
    #[serde(default)]
    pub subject: Attributes,
    #[serde(default)]
    pub resource: Attributes,
    #[serde(default)]
    pub path: Attributes,
    #[serde(default)]
    pub body: Attributes,
    #[serde(default)]
    pub query: Attributes,
    #[serde(default)]
    pub header: Attributes,
}

impl RequestContext {
    /// Start a context from already-authenticated subject claims.
    pub fn new(subject: Attributes) -> Self {
        Self {
            subject,
            ..Self::default()
        }
    }

    /// Assemble a context from subject claims and an inbound request.
    pub fn from_request(subject: Attributes, request: &AuthorizationRequest) -> Self {
        let take = |map: &Option<Attributes>| map.clone().unwrap_or_default();
        Self {
            subject,
            resource: take(&request.resource),
            path: take(&request.path_params),
            body: take(&request.body),
            query: take(&request.query),
            header: take(&request.headers),
        }
    }

    pub fn with_resource(mut self, resource: Attributes) -> Self {
        self.resource = resource;
        self
    }

    pub fn with_path_params(mut self, path: Attributes) -> Self {
        self.path = path;
        self
    }

    pub fn with_body(mut self, body: Attributes) -> Self {
        self.body = body;
        self
    }

    pub fn with_query(mut self, query: Attributes) -> Self {
        self.query = query;
        self
    }

    pub fn with_headers(mut self, header: Attributes) -> Self {
        self.header = header;
        self
    }

    /// The map backing `namespace`.
    pub fn attributes(&self, namespace: Namespace) -> &Attributes {
        match namespace {
            Namespace::Subject => &self.subject,
            Namespace::Resource => &self.resource,
            Namespace::Path => &self.path,
            Namespace::Body => &self.body,
            Namespace::Query => &self.query,
            Namespace::Header => &self.header,
        }
    }

    /// Shorthand for [`resolve`].
    pub fn resolve(&self, path: &AttributePath) -> Resolved<'_> {
        resolve(path, self)
    }
}

// ---------------------------------------------------------------------------
// Resolved
// ---------------------------------------------------------------------------

/// Outcome of resolving an attribute path.
///
/// `Absent` (no such attribute) is distinct from `Value(null)` (the attribute
/// exists and is JSON null).
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved<'a> {
    Value(Cow<'a, Value>),
    Absent,
}

impl<'a> Resolved<'a> {
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    /// `true` for `Absent` and for `Value(null)`.
    pub fn is_null(&self) -> bool {
        match self {
            Self::Absent => true,
            Self::Value(value) => value.is_null(),
        }
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Value(value) => Some(value.as_ref()),
            Self::Absent => None,
        }
    }

    pub fn into_value(self) -> Option<Value> {
        match self {
            Self::Value(value) => Some(value.into_owned()),
            Self::Absent => None,
        }
    }
}

/// Longest rendering of a value used in explanations before it is elided.
const DISPLAY_LIMIT: usize = 100;

impl fmt::Display for Resolved<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absent => f.write_str("<absent>"),
            Self::Value(value) => {
                let rendered = value.to_string();
                if rendered.len() <= DISPLAY_LIMIT {
                    f.write_str(&rendered)
                } else {
                    let cut = (0..=DISPLAY_LIMIT)
                        .rev()
                        .find(|idx| rendered.is_char_boundary(*idx))
                        .unwrap_or(0);
                    write!(f, "{}...", &rendered[..cut])
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Resolve `path` against `ctx`.
///
/// The first key under `header.` matches header names case-insensitively.
///
/// Missing keys at any depth, a path with an unknown namespace, or a wildcard
/// applied to something other than a list all resolve to
/// [`Resolved::Absent`]; resolution itself never fails. A wildcard yields a
/// JSON array of every element's resolved remainder, skipping elements where
/// the remainder is absent.
pub fn resolve<'a>(path: &AttributePath, ctx: &'a RequestContext) -> Resolved<'a> {
    let Some(namespace) = path.namespace() else {
        return Resolved::Absent;
    };
    let root = ctx.attributes(namespace);
    let mut segments = path.segments();
    let first = match segments.next() {
        Some(Ok(Segment::Key(key))) => match namespace {
            Namespace::Header => header(root, key),
            _ => root.get(key),
        },
        _ => None,
    };
    match first {
        Some(value) => descend(value, segments),
        None => Resolved::Absent,
    }
}

/// Header names are case-insensitive; an exact match wins over a folded one.
fn header<'a>(headers: &'a Attributes, name: &str) -> Option<&'a Value> {
    headers.get(name).or_else(|| {
        headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    })
}

fn descend<'a>(current: &'a Value, mut segments: Segments<'_>) -> Resolved<'a> {
    let segment = match segments.next() {
        None => return Resolved::Value(Cow::Borrowed(current)),
        Some(Ok(segment)) => segment,
        Some(Err(_)) => return Resolved::Absent,
    };

    match segment {
        Segment::Key(key) => {
            let next = match current {
                Value::Object(map) => map.get(key),
                Value::Array(items) => list_index(key).and_then(|idx| items.get(idx)),
                _ => None,
            };
            match next {
                Some(value) => descend(value, segments),
                None => Resolved::Absent,
            }
        }
        Segment::Wildcard => {
            let Value::Array(items) = current else {
                return Resolved::Absent;
            };
            let collected = items
                .iter()
                .filter_map(|item| descend(item, segments.clone()).into_value())
                .collect();
            Resolved::Value(Cow::Owned(Value::Array(collected)))
        }
    }
}

fn list_index(key: &str) -> Option<usize> {
    if key.is_empty() || !key.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    key.parse().ok()
}

//! Attribute paths such as `subject.roles[*].id`.
//!
//! A path is a namespace (`subject`, `resource`, `path`, `body`, `query`,
//! `header`) followed by a dotted suffix. Suffix segments are either map keys
//! (which also index lists when they are non-negative integers) or the `[*]`
//! wildcard, which fans out over every element of a list.
//!
//! The raw text is kept verbatim so that stored policies round-trip
//! unchanged; segments are produced lazily by [`Segments`].

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Namespace
// ---------------------------------------------------------------------------

/// The request-context map an attribute path reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    /// Claims of the authenticated caller.
    Subject,
    /// Snapshot of the resource being acted upon.
    Resource,
    /// URL path parameters.
    Path,
    /// Decoded request body.
    Body,
    /// URL query parameters.
    Query,
    /// Request headers.
    Header,
}

impl Namespace {
    /// Every recognised namespace, in the order used for diagnostics.
    pub const ALL: [Namespace; 6] = [
        Namespace::Subject,
        Namespace::Resource,
        Namespace::Path,
        Namespace::Body,
        Namespace::Query,
        Namespace::Header,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Subject => "subject",
            Self::Resource => "resource",
            Self::Path => "path",
            Self::Body => "body",
            Self::Query => "query",
            Self::Header => "header",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|ns| ns.as_str() == name)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Syntax errors
// ---------------------------------------------------------------------------

/// Why an attribute path could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathSyntaxError {
    #[error("path is empty")]
    Empty,

    #[error(
        "must start with one of 'subject.', 'resource.', 'path.', 'body.', 'query.' or 'header.'"
    )]
    UnknownNamespace,

    #[error("path contains an empty segment")]
    EmptySegment,

    #[error("unclosed '[' in path")]
    UnclosedBracket,

    #[error("unsupported selector '[{0}]' (only '[*]' is allowed)")]
    UnsupportedSelector(String),

    #[error("unexpected character '{0}' after ']'")]
    UnexpectedCharacter(char),

    #[error("path must name an attribute before '[*]'")]
    LeadingWildcard,
}

// ---------------------------------------------------------------------------
// AttributePath
// ---------------------------------------------------------------------------

/// A namespaced attribute path, stored exactly as written in the policy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttributePath(String);

impl AttributePath {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Split at the first `.` into a recognised namespace and the remainder.
    pub fn split(&self) -> Option<(Namespace, &str)> {
        let (head, rest) = self.0.split_once('.')?;
        Namespace::from_name(head).map(|ns| (ns, rest))
    }

    pub fn namespace(&self) -> Option<Namespace> {
        self.split().map(|(ns, _)| ns)
    }

    /// Lazily iterate over the segments after the namespace.
    ///
    /// A path without a recognised namespace yields a single
    /// [`PathSyntaxError::UnknownNamespace`] item.
    pub fn segments(&self) -> Segments<'_> {
        match self.split() {
            Some((_, rest)) => Segments::new(rest),
            None => Segments::failed(PathSyntaxError::UnknownNamespace),
        }
    }

    /// Walk the whole path once, returning the namespace if it is well formed.
    pub fn check(&self) -> Result<Namespace, PathSyntaxError> {
        if self.0.is_empty() {
            return Err(PathSyntaxError::Empty);
        }
        let namespace = self
            .namespace()
            .ok_or(PathSyntaxError::UnknownNamespace)?;
        for (idx, segment) in self.segments().enumerate() {
            if segment? == Segment::Wildcard && idx == 0 {
                return Err(PathSyntaxError::LeadingWildcard);
            }
        }
        Ok(namespace)
    }
}

impl fmt::Display for AttributePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AttributePath {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for AttributePath {
    fn from(value: String) -> Self {
        Self(value)
    }
}

// ---------------------------------------------------------------------------
// Segments
// ---------------------------------------------------------------------------

/// One step of an attribute path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment<'a> {
    /// A map key, or a list position when the value is a list and the key is
    /// a non-negative integer.
    Key(&'a str),
    /// `[*]`: continue with every element of the current list.
    Wildcard,
}

/// Lazy iterator over the segments of a path suffix.
///
/// Cheap to clone; the resolver clones it to restart the remaining suffix for
/// each element when it fans out over a wildcard.
#[derive(Debug, Clone)]
pub struct Segments<'a> {
    rest: &'a str,
    /// A separator was consumed, so another segment must follow.
    expect_more: bool,
    error: Option<PathSyntaxError>,
    done: bool,
}

impl<'a> Segments<'a> {
    fn new(rest: &'a str) -> Self {
        Self {
            rest,
            expect_more: true,
            error: None,
            done: false,
        }
    }

    fn failed(error: PathSyntaxError) -> Self {
        Self {
            rest: "",
            expect_more: false,
            error: Some(error),
            done: false,
        }
    }

    fn fail(&mut self, error: PathSyntaxError) -> Option<Result<Segment<'a>, PathSyntaxError>> {
        self.done = true;
        Some(Err(error))
    }

    /// After a segment, the remainder must be empty, a `.` separator, or
    /// another bracket group.
    fn consume_separator(&mut self) -> Result<(), PathSyntaxError> {
        if let Some(after) = self.rest.strip_prefix('.') {
            self.rest = after;
            self.expect_more = true;
            return Ok(());
        }
        self.expect_more = false;
        match self.rest.chars().next() {
            None | Some('[') => Ok(()),
            Some(other) => Err(PathSyntaxError::UnexpectedCharacter(other)),
        }
    }
}

impl<'a> Iterator for Segments<'a> {
    type Item = Result<Segment<'a>, PathSyntaxError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if let Some(error) = self.error.take() {
            return self.fail(error);
        }
        if self.rest.is_empty() {
            if self.expect_more {
                return self.fail(PathSyntaxError::EmptySegment);
            }
            self.done = true;
            return None;
        }

        if let Some(inner_start) = self.rest.strip_prefix('[') {
            let Some(close) = inner_start.find(']') else {
                return self.fail(PathSyntaxError::UnclosedBracket);
            };
            let selector = &inner_start[..close];
            if selector != "*" {
                return self.fail(PathSyntaxError::UnsupportedSelector(selector.to_string()));
            }
            self.rest = &inner_start[close + 1..];
            if let Err(err) = self.consume_separator() {
                return self.fail(err);
            }
            return Some(Ok(Segment::Wildcard));
        }

        let end = self
            .rest
            .find(|c: char| c == '.' || c == '[')
            .unwrap_or(self.rest.len());
        let key = &self.rest[..end];
        if key.is_empty() {
            return self.fail(PathSyntaxError::EmptySegment);
        }
        self.rest = &self.rest[end..];
        if let Err(err) = self.consume_separator() {
            return self.fail(err);
        }
        Some(Ok(Segment::Key(key)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segments(raw: &str) -> Result<Vec<Segment<'_>>, PathSyntaxError> {
        let (_, rest) = raw.split_once('.').expect("test paths carry a namespace");
        Segments::new(rest).collect()
    }

    #[test]
    fn namespace_is_split_at_first_dot() {
        let path = AttributePath::new("subject.roles[*].id");
        assert_eq!(path.namespace(), Some(Namespace::Subject));
        assert_eq!(path.split().map(|(_, rest)| rest), Some("roles[*].id"));
    }

    #[test]
    fn all_six_namespaces_are_recognised() {
        for ns in Namespace::ALL {
            let path = AttributePath::new(format!("{ns}.id"));
            assert_eq!(path.check(), Ok(ns));
        }
    }

    #[test]
    fn unknown_namespace_is_rejected() {
        let path = AttributePath::new("session.id");
        assert_eq!(path.namespace(), None);
        assert_eq!(path.check(), Err(PathSyntaxError::UnknownNamespace));
        assert_eq!(
            AttributePath::new("subject").check(),
            Err(PathSyntaxError::UnknownNamespace)
        );
    }

    #[test]
    fn plain_dotted_path() {
        assert_eq!(
            segments("resource.owner.company_id").unwrap(),
            vec![Segment::Key("owner"), Segment::Key("company_id")]
        );
    }

    #[test]
    fn wildcard_segments() {
        assert_eq!(
            segments("subject.roles[*].id").unwrap(),
            vec![Segment::Key("roles"), Segment::Wildcard, Segment::Key("id")]
        );
        assert_eq!(
            segments("subject.branches[*]").unwrap(),
            vec![Segment::Key("branches"), Segment::Wildcard]
        );
        assert_eq!(
            segments("body.grid[*][*]").unwrap(),
            vec![Segment::Key("grid"), Segment::Wildcard, Segment::Wildcard]
        );
    }

    #[test]
    fn numeric_segments_are_plain_keys() {
        assert_eq!(
            segments("subject.roles.0.id").unwrap(),
            vec![Segment::Key("roles"), Segment::Key("0"), Segment::Key("id")]
        );
    }

    #[test]
    fn malformed_paths() {
        assert_eq!(segments("subject."), Err(PathSyntaxError::EmptySegment));
        assert_eq!(segments("subject.a..b"), Err(PathSyntaxError::EmptySegment));
        assert_eq!(segments("subject.a."), Err(PathSyntaxError::EmptySegment));
        assert_eq!(segments("subject.roles[*"), Err(PathSyntaxError::UnclosedBracket));
        assert_eq!(
            segments("subject.roles[0]"),
            Err(PathSyntaxError::UnsupportedSelector("0".into()))
        );
        assert_eq!(
            segments("subject.roles[*]id"),
            Err(PathSyntaxError::UnexpectedCharacter('i'))
        );
    }

    #[test]
    fn wildcard_needs_a_key_before_it() {
        assert_eq!(
            AttributePath::new("subject.[*]").check(),
            Err(PathSyntaxError::LeadingWildcard)
        );
        assert_eq!(
            AttributePath::new("resource.[*].id").check(),
            Err(PathSyntaxError::LeadingWildcard)
        );
        assert_eq!(AttributePath::new("subject.roles[*]").check(), Ok(Namespace::Subject));
    }

    #[test]
    fn iteration_stops_after_an_error() {
        let path = AttributePath::new("subject.a..b");
        let items: Vec<_> = path.segments().collect();
        assert_eq!(items.len(), 2);
        assert!(items[1].is_err());
    }

    #[test]
    fn segments_iterator_is_restartable() {
        let path = AttributePath::new("subject.roles[*].id");
        let mut iter = path.segments();
        assert_eq!(iter.next(), Some(Ok(Segment::Key("roles"))));
        let checkpoint = iter.clone();
        assert_eq!(iter.count(), 2);
        assert_eq!(checkpoint.count(), 2);
    }

    #[test]
    fn serde_is_transparent() {
        let path: AttributePath = serde_json::from_str("\"query.page\"").unwrap();
        assert_eq!(path.as_str(), "query.page");
        assert_eq!(serde_json::to_string(&path).unwrap(), "\"query.page\"");
    }
}

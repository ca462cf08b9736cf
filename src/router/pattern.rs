//! Path patterns with named parameters.
//!
//! A pattern is a `/`-rooted path made of literal text and `:name`
//! placeholders:
//!
//! ```text
//! /echo/:id
//! /services/:service/instances/:instance
//! ```
//!
//! A placeholder matches one non-empty segment and never spans `/`.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use regex::Regex;
use rustc_hash::FxHashMap;

use crate::error::{Error, Result};

// ============================================================================
// PathParams
// ============================================================================

/// Named parameters extracted from a matched path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathParams {
    values: FxHashMap<String, String>,
}

impl PathParams {
    /// Creates an empty parameter map.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value of a parameter.
    #[inline]
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Sets a parameter, returning the previous value.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.values.insert(name.into(), value.into())
    }

    /// Returns the number of parameters.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if there are no parameters.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterates over `(name, value)` pairs in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K, V> FromIterator<(K, V)> for PathParams
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

// ============================================================================
// Segment
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

// ============================================================================
// RoutePattern
// ============================================================================

/// A compiled path pattern.
#[derive(Debug, Clone)]
pub struct RoutePattern {
    source: String,
    segments: Vec<Segment>,
    regex: Regex,
}

impl RoutePattern {
    /// Compiles a pattern.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRoute`] if the pattern does not start with
    /// `/`, has a placeholder without a name, a name starting with a digit,
    /// or the same name twice.
    pub fn parse(pattern: &str) -> Result<Self> {
        if !pattern.starts_with('/') {
            return Err(Error::invalid_route(pattern, "must start with '/'"));
        }

        let segments = tokenize(pattern)?;

        let mut source = String::with_capacity(pattern.len() + 16);
        source.push('^');
        for segment in &segments {
            match segment {
                Segment::Literal(text) => source.push_str(&regex::escape(text)),
                Segment::Param(name) => {
                    source.push_str("(?P<");
                    source.push_str(name);
                    source.push_str(">[^/]+)");
                }
            }
        }
        source.push('$');

        let regex = Regex::new(&source).map_err(|e| Error::invalid_route(pattern, e.to_string()))?;

        Ok(Self {
            source: pattern.to_string(),
            segments,
            regex,
        })
    }

    /// Returns the pattern text.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Returns the placeholder names in declaration order.
    pub fn param_names(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Param(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Matches a concrete path, returning its parameters.
    ///
    /// A trailing query string or fragment is ignored. Parameter values
    /// are percent-decoded.
    #[must_use]
    pub fn matches(&self, path: &str) -> Option<PathParams> {
        let path = strip_query(path);
        let captures = self.regex.captures(path)?;

        let mut params = PathParams::new();
        for name in self.param_names() {
            let raw = captures.name(name)?.as_str();
            let value = urlencoding::decode(raw).ok()?;
            params.insert(name, value.into_owned());
        }
        Some(params)
    }

    /// Builds the concrete path for a set of parameters.
    ///
    /// Returns `None` if a placeholder has no value or an empty one.
    #[must_use]
    pub fn reverse(&self, params: &PathParams) -> Option<String> {
        let mut path = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => path.push_str(text),
                Segment::Param(name) => {
                    let value = params.get(name).filter(|v| !v.is_empty())?;
                    path.push_str(&urlencoding::encode(value));
                }
            }
        }
        Some(path)
    }
}

impl fmt::Display for RoutePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn strip_query(path: &str) -> &str {
    path.find(['?', '#']).map_or(path, |end| &path[..end])
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn tokenize(pattern: &str) -> Result<Vec<Segment>> {
    let mut segments = Vec::new();
    let mut names: Vec<&str> = Vec::new();
    let mut rest = pattern;

    while let Some(colon) = rest.find(':') {
        if colon > 0 {
            segments.push(Segment::Literal(rest[..colon].to_string()));
        }

        let after = &rest[colon + 1..];
        let len = after.find(|c: char| !is_name_char(c)).unwrap_or(after.len());
        let name = &after[..len];

        if name.is_empty() {
            return Err(Error::invalid_route(pattern, "placeholder without a name"));
        }
        if name.starts_with(|c: char| c.is_ascii_digit()) {
            return Err(Error::invalid_route(
                pattern,
                format!("placeholder '{name}' starts with a digit"),
            ));
        }
        if names.contains(&name) {
            return Err(Error::invalid_route(
                pattern,
                format!("duplicate placeholder '{name}'"),
            ));
        }

        names.push(name);
        segments.push(Segment::Param(name.to_string()));
        rest = &after[len..];
    }

    if !rest.is_empty() {
        segments.push(Segment::Literal(rest.to_string()));
    }
    Ok(segments)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    #[test]
    fn test_literal_pattern() {
        let pattern = RoutePattern::parse("/services/health").expect("valid");
        assert!(pattern.matches("/services/health").expect("match").is_empty());
        assert!(pattern.matches("/services/health/x").is_none());
        assert!(pattern.matches("/services").is_none());
    }

    #[test]
    fn test_named_parameters() {
        let pattern = RoutePattern::parse("/users/:user/files/:file").expect("valid");
        let params = pattern.matches("/users/ann/files/notes.txt").expect("match");

        assert_eq!(params.get("user"), Some("ann"));
        assert_eq!(params.get("file"), Some("notes.txt"));
        assert_eq!(pattern.param_names().collect::<Vec<_>>(), vec!["user", "file"]);
    }

    #[test]
    fn test_parameter_never_spans_slash() {
        let pattern = RoutePattern::parse("/echo/:id").expect("valid");
        assert!(pattern.matches("/echo/a/b").is_none());
        assert!(pattern.matches("/echo/").is_none());
    }

    #[test]
    fn test_query_string_ignored() {
        let pattern = RoutePattern::parse("/echo/:id").expect("valid");
        let params = pattern.matches("/echo/42?trace=1#frag").expect("match");
        assert_eq!(params.get("id"), Some("42"));
    }

    #[test]
    fn test_values_are_percent_decoded() {
        let pattern = RoutePattern::parse("/files/:name").expect("valid");
        let params = pattern.matches("/files/a%20b%2Fc").expect("match");
        assert_eq!(params.get("name"), Some("a b/c"));
    }

    #[test]
    fn test_regex_metacharacters_are_literal() {
        let pattern = RoutePattern::parse("/v1.0/(x)/:id").expect("valid");
        assert!(pattern.matches("/v1.0/(x)/7").is_some());
        assert!(pattern.matches("/v1x0/(x)/7").is_none());
    }

    #[test]
    fn test_reverse() {
        let pattern = RoutePattern::parse("/echo/:id").expect("valid");
        let params: PathParams = [("id", "a b")].into_iter().collect();
        assert_eq!(pattern.reverse(&params).as_deref(), Some("/echo/a%20b"));
        assert!(pattern.reverse(&PathParams::new()).is_none());
    }

    #[test]
    fn test_invalid_patterns() {
        for bad in ["echo/:id", "/echo/:", "/a/:x/b/:x", "/a/:1st"] {
            let err = RoutePattern::parse(bad).unwrap_err();
            assert!(matches!(err, Error::InvalidRoute { .. }), "{bad} accepted");
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn prop_reversed_path_matches_back(value in "[^\\x00]{1,24}") {
            let pattern = RoutePattern::parse("/echo/:id/tail").expect("valid");
            let params: PathParams = [("id", value.clone())].into_iter().collect();

            let path = pattern.reverse(&params).expect("reverse");
            let matched = pattern.matches(&path).expect("match");
            prop_assert_eq!(matched.get("id"), Some(value.as_str()));
        }

        #[test]
        fn prop_extra_segments_never_match(a in "[a-z0-9]{1,8}", b in "[a-z0-9]{1,8}") {
            let pattern = RoutePattern::parse("/echo/:id").expect("valid");
            let path = format!("/echo/{a}/{b}");
            prop_assert!(pattern.matches(&path).is_none());
        }
    }
}

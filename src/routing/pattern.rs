//! # Path Pattern Module
//!
//! Compiles route-table path templates into anchored regular expressions.
//!
//! ## Pattern syntax
//!
//! - Literal segments match themselves exactly (`/api/courses/list`).
//! - `*` occupies a whole segment and matches exactly one non-empty segment
//!   (`/api/courses/*/preview` matches `/api/courses/42/preview` but not
//!   `/api/courses/42/extra/preview`).
//! - `**` as the final segment matches one or more remaining segments
//!   (`/api/files/**`).
//!
//! Every pattern is anchored at both ends, so `/api/courses/list` never matches
//! `/api/courses/list/extra`. A wildcard glued to other characters (`/img*`) is rejected
//! when the pattern is compiled.

use regex::Regex;
use std::fmt;

use crate::core::error::{GatewayError, GatewayResult};

/// A compiled, immutable path matcher
#[derive(Clone)]
pub struct PathPattern {
    source: String,
    regex: Regex,
}

impl PathPattern {
    /// Compile a path template
    pub fn compile(pattern: &str) -> GatewayResult<Self> {
        let rest = pattern.strip_prefix('/').ok_or_else(|| {
            GatewayError::config(format!("Pattern '{}' must start with '/'", pattern))
        })?;

        let segments: Vec<&str> = rest.split('/').collect();
        let last = segments.len() - 1;
        let mut expression = String::from("^");

        for (index, segment) in segments.iter().enumerate() {
            expression.push('/');
            match *segment {
                "" => {
                    return Err(GatewayError::config(format!(
                        "Pattern '{}' contains an empty segment",
                        pattern
                    )))
                }
                "*" => expression.push_str("[^/]+"),
                "**" if index == last => expression.push_str(".+"),
                "**" => {
                    return Err(GatewayError::config(format!(
                        "Pattern '{}': '**' is only allowed as the last segment",
                        pattern
                    )))
                }
                literal if literal.contains('*') => {
                    return Err(GatewayError::config(format!(
                        "Pattern '{}': wildcard must occupy a whole segment",
                        pattern
                    )))
                }
                literal => expression.push_str(&regex::escape(literal)),
            }
        }

        expression.push('$');

        let regex = Regex::new(&expression).map_err(|e| {
            GatewayError::config(format!("Pattern '{}' failed to compile: {}", pattern, e))
        })?;

        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    /// Whether the whole path matches this pattern
    pub fn matches(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }

    /// The template this pattern was compiled from
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl fmt::Debug for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PathPattern").field(&self.source).finish()
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_pattern_is_anchored() {
        let pattern = PathPattern::compile("/api/courses/list").unwrap();
        assert!(pattern.matches("/api/courses/list"));
        assert!(!pattern.matches("/api/courses/list/extra"));
        assert!(!pattern.matches("/prefix/api/courses/list"));
        assert!(!pattern.matches("/api/courses/lis"));
    }

    #[test]
    fn test_literal_characters_are_escaped() {
        let pattern = PathPattern::compile("/api/v1.0/items").unwrap();
        assert!(pattern.matches("/api/v1.0/items"));
        assert!(!pattern.matches("/api/v1x0/items"));
    }

    #[test]
    fn test_single_wildcard_does_not_cross_segments() {
        let pattern = PathPattern::compile("/api/courses/*/preview").unwrap();
        assert!(pattern.matches("/api/courses/42/preview"));
        assert!(!pattern.matches("/api/courses/42/extra/preview"));
        assert!(!pattern.matches("/api/courses//preview"));
        assert!(!pattern.matches("/api/courses/preview"));
    }

    #[test]
    fn test_trailing_wildcard_segment() {
        let pattern = PathPattern::compile("/api/courses/*").unwrap();
        assert!(pattern.matches("/api/courses/42"));
        assert!(!pattern.matches("/api/courses/42/lessons"));
        assert!(!pattern.matches("/api/courses/"));
    }

    #[test]
    fn test_double_wildcard_matches_remainder() {
        let pattern = PathPattern::compile("/api/files/**").unwrap();
        assert!(pattern.matches("/api/files/a"));
        assert!(pattern.matches("/api/files/a/b/c"));
        assert!(!pattern.matches("/api/files"));
        assert!(!pattern.matches("/api/files/"));
    }

    #[test]
    fn test_invalid_patterns_are_rejected() {
        assert!(PathPattern::compile("api/courses").is_err());
        assert!(PathPattern::compile("/api//courses").is_err());
        assert!(PathPattern::compile("/api/courses/").is_err());
        assert!(PathPattern::compile("/api/img*").is_err());
        assert!(PathPattern::compile("/api/**/tail").is_err());
    }

    #[test]
    fn test_matching_is_deterministic() {
        let pattern = PathPattern::compile("/api/courses/*").unwrap();
        let first: Vec<bool> = ["/api/courses/1", "/api/courses/1/2"]
            .iter()
            .map(|p| pattern.matches(p))
            .collect();
        for _ in 0..10 {
            let again: Vec<bool> = ["/api/courses/1", "/api/courses/1/2"]
                .iter()
                .map(|p| pattern.matches(p))
                .collect();
            assert_eq!(first, again);
        }
    }
}

//! Subject syntax.
//!
//! A subject accepted from outside the bus is one to ten dot-separated
//! alphanumeric segments. Wildcards (`*`, `>`), the reserved `$` prefix,
//! empty segments, and any other separator are rejected.
//!
//! Handlers bind to literal bus subjects, checked with [`check_literal`]:
//! any non-empty, wildcard-free tokens, so `user-service.get` is fine.
//!
//! # Example
//!
//! ```
//! use hermes_core::subject::{is_valid, namespaced};
//!
//! assert!(is_valid("orders.create"));
//! assert!(!is_valid("orders.*"));
//! assert_eq!(namespaced("chat.room", Some("team1")), "chat.room.team1");
//! ```

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

/// Maximum number of segments in a subject.
pub const MAX_SEGMENTS: usize = 10;

static SUBJECT_PATTERN: OnceLock<Option<Regex>> = OnceLock::new();

fn pattern() -> Option<&'static Regex> {
    SUBJECT_PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z0-9]+(\.[A-Za-z0-9]+){0,9}$").ok())
        .as_ref()
}

/// Returns `true` when `subject` satisfies the gateway subject syntax.
pub fn is_valid(subject: &str) -> bool {
    match pattern() {
        Some(regex) => regex.is_match(subject),
        None => fallback_is_valid(subject),
    }
}

// Same rule as the pattern, used only if the regex failed to build.
fn fallback_is_valid(subject: &str) -> bool {
    let segments: Vec<&str> = subject.split('.').collect();
    segments.len() <= MAX_SEGMENTS
        && segments
            .iter()
            .all(|s| !s.is_empty() && s.bytes().all(|b| b.is_ascii_alphanumeric()))
}

/// Checks that `subject` is a literal bus subject: dot-separated non-empty
/// tokens without whitespace, wildcards or a leading `$`.
pub fn check_literal(subject: &str) -> Result<(), SubjectError> {
    let literal = !subject.starts_with('$')
        && subject.split('.').all(|token| {
            !token.is_empty() && token != "*" && token != ">" && !token.chars().any(char::is_whitespace)
        });
    if literal {
        Ok(())
    } else {
        Err(SubjectError {
            subject: subject.to_string(),
        })
    }
}

/// Builds the subscription key for a subject, appending `.{namespace}` when set.
pub fn namespaced(subject: &str, namespace: Option<&str>) -> String {
    match namespace {
        Some(ns) if !ns.is_empty() => format!("{subject}.{ns}"),
        _ => subject.to_string(),
    }
}

/// Rejected subject.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid subject '{subject}'")]
pub struct SubjectError {
    subject: String,
}

impl SubjectError {
    /// The subject that failed validation.
    pub fn subject(&self) -> &str {
        &self.subject
    }
}

/// A subject that passed [`is_valid`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Subject(String);

impl Subject {
    /// Parses and validates a subject.
    pub fn parse(subject: impl Into<String>) -> Result<Self, SubjectError> {
        let subject = subject.into();
        if is_valid(&subject) {
            Ok(Self(subject))
        } else {
            Err(SubjectError { subject })
        }
    }

    /// Returns the subject text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Number of dot-separated segments.
    pub fn segments(&self) -> usize {
        self.0.split('.').count()
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Subject {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for Subject {
    type Error = SubjectError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

//! Procedure path validation
//!
//! Paths are dot-joined identifiers addressing a procedure within the
//! contract tree (e.g. `user.get`, `stream.chat`). Validation is total and
//! collects every violation instead of stopping at the first one, so a
//! caller sees the complete picture in one error.
//!
//! # Example
//! ```rust,ignore
//! use nexus_rpc_client::path::{validate_path, validate_path_with, PathRules};
//!
//! validate_path("user.get")?;
//!
//! let rules = PathRules::new().with_max_segments(2);
//! validate_path_with("a.b.c", &rules).unwrap_err();
//! ```

use crate::error::ClientError;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tracing::trace;

/// Allowed path characters: letters, digits, underscores and dots.
fn charset() -> &'static regex::Regex {
    static CHARSET: OnceLock<regex::Regex> = OnceLock::new();
    CHARSET.get_or_init(|| {
        regex::Regex::new(r"^[A-Za-z0-9_.]+$").expect("path charset pattern is a valid literal")
    })
}

/// A single path validation violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathIssue {
    /// Machine-readable violation code (e.g. "empty", "consecutive_dots")
    pub code: String,
    /// Human-readable description of the violation
    pub message: String,
}

impl PathIssue {
    /// Create a new issue with code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Optional rule set applied on top of the syntactic checks.
///
/// The syntactic checks (non-empty, no leading/trailing dot, no consecutive
/// dots, restricted charset) always run; these rules add bounds on length,
/// segment count and path prefixes.
#[derive(Debug, Clone, Default)]
pub struct PathRules {
    /// Maximum total length in bytes
    pub max_length: Option<usize>,
    /// Minimum number of dot-separated segments
    pub min_segments: Option<usize>,
    /// Maximum number of dot-separated segments
    pub max_segments: Option<usize>,
    /// When non-empty, the path must start with one of these prefixes
    pub allowed_prefixes: Vec<String>,
    /// The path must not start with any of these prefixes
    pub disallowed_prefixes: Vec<String>,
}

impl PathRules {
    /// Create an empty rule set (syntactic checks only).
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound the total path length.
    #[must_use = "This method returns a new PathRules and does not modify self"]
    pub fn with_max_length(mut self, max: usize) -> Self {
        self.max_length = Some(max);
        self
    }

    /// Require at least `min` dot-separated segments.
    #[must_use = "This method returns a new PathRules and does not modify self"]
    pub fn with_min_segments(mut self, min: usize) -> Self {
        self.min_segments = Some(min);
        self
    }

    /// Allow at most `max` dot-separated segments.
    #[must_use = "This method returns a new PathRules and does not modify self"]
    pub fn with_max_segments(mut self, max: usize) -> Self {
        self.max_segments = Some(max);
        self
    }

    /// Restrict paths to those starting with one of the given prefixes.
    #[must_use = "This method returns a new PathRules and does not modify self"]
    pub fn with_allowed_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.allowed_prefixes.push(prefix.into());
        self
    }

    /// Reject paths starting with the given prefix.
    #[must_use = "This method returns a new PathRules and does not modify self"]
    pub fn with_disallowed_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.disallowed_prefixes.push(prefix.into());
        self
    }
}

/// Validate a procedure path against the syntactic rules only.
///
/// Returns `Ok(())` for a well-formed path or a
/// [`ClientError::Validation`] whose issue list is never empty.
pub fn validate_path(path: &str) -> Result<(), ClientError> {
    static EMPTY_RULES: OnceLock<PathRules> = OnceLock::new();
    validate_path_with(path, EMPTY_RULES.get_or_init(PathRules::new))
}

/// Validate a procedure path against the syntactic rules plus `rules`.
pub fn validate_path_with(path: &str, rules: &PathRules) -> Result<(), ClientError> {
    let mut issues = Vec::new();

    if path.is_empty() {
        issues.push(PathIssue::new("empty", "Path must not be empty"));
    } else {
        if path.starts_with('.') {
            issues.push(PathIssue::new(
                "leading_dot",
                "Path must not start with '.'",
            ));
        }
        if path.ends_with('.') {
            issues.push(PathIssue::new("trailing_dot", "Path must not end with '.'"));
        }
        if path.contains("..") {
            issues.push(PathIssue::new(
                "consecutive_dots",
                "Path must not contain consecutive dots",
            ));
        }
        if !charset().is_match(path) {
            issues.push(PathIssue::new(
                "invalid_characters",
                "Path may only contain letters, digits, '_' and '.'",
            ));
        }
    }

    if let Some(max) = rules.max_length
        && path.len() > max
    {
        issues.push(PathIssue::new(
            "max_length",
            format!("Path must be at most {} characters", max),
        ));
    }

    let segments = path.split('.').filter(|s| !s.is_empty()).count();
    if let Some(min) = rules.min_segments
        && segments < min
    {
        issues.push(PathIssue::new(
            "min_segments",
            format!("Path must have at least {} segments", min),
        ));
    }
    if let Some(max) = rules.max_segments
        && segments > max
    {
        issues.push(PathIssue::new(
            "max_segments",
            format!("Path must have at most {} segments", max),
        ));
    }

    if !rules.allowed_prefixes.is_empty()
        && !rules.allowed_prefixes.iter().any(|p| path.starts_with(p))
    {
        issues.push(PathIssue::new(
            "prefix_not_allowed",
            format!(
                "Path must start with one of: {}",
                rules.allowed_prefixes.join(", ")
            ),
        ));
    }
    if let Some(denied) = rules
        .disallowed_prefixes
        .iter()
        .find(|p| path.starts_with(p.as_str()))
    {
        issues.push(PathIssue::new(
            "prefix_disallowed",
            format!("Path must not start with '{}'", denied),
        ));
    }

    if issues.is_empty() {
        Ok(())
    } else {
        trace!(path = %path, issue_count = issues.len(), "Path validation failed");
        Err(ClientError::Validation {
            path: path.to_string(),
            issues,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

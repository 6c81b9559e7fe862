//! Field-level validation errors shared by onboarding input and invoice sources.
use std::fmt;
use thiserror::Error;

/// Classification of validation issues.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationKind {
    Missing,
    InvalidFormat,
    OutOfRange,
    Mismatch,
    NotAllowed,
}

impl ValidationKind {
    fn from_rule(rule: &str) -> Self {
        match rule {
            "non_empty" => ValidationKind::Missing,
            _ => ValidationKind::InvalidFormat,
        }
    }
}

/// Single validation issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub field: String,
    pub kind: ValidationKind,
    pub message: String,
    pub line_item_index: Option<usize>,
}

impl ValidationIssue {
    pub fn new(field: impl Into<String>, kind: ValidationKind, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            kind,
            message: message.into(),
            line_item_index: None,
        }
    }

    pub fn missing(field: impl Into<String>) -> Self {
        Self::new(field, ValidationKind::Missing, "is required")
    }

    pub fn at_line(mut self, index: usize) -> Self {
        self.line_item_index = Some(index);
        self
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line_item_index {
            Some(idx) => write!(f, "line {} {} {}", idx + 1, self.field, self.message),
            None => write!(f, "{} {}", self.field, self.message),
        }
    }
}

/// Structured validation error carrying every issue found.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationError {
    pub fn new(issues: Vec<ValidationIssue>) -> Self {
        Self { issues }
    }

    pub fn single(issue: ValidationIssue) -> Self {
        Self {
            issues: vec![issue],
        }
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.issues.iter().any(|issue| issue.field == field)
    }

    /// `Ok(())` when `issues` is empty.
    pub fn check(issues: Vec<ValidationIssue>) -> Result<(), ValidationError> {
        if issues.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::new(issues))
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("validation failed: ")?;
        for (idx, issue) in self.issues.iter().enumerate() {
            if idx > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{issue}")?;
        }
        Ok(())
    }
}

/// Output of `#[derive(Validate)]`.
impl From<Vec<(&'static str, &'static str, String)>> for ValidationError {
    fn from(raw: Vec<(&'static str, &'static str, String)>) -> Self {
        ValidationError::new(
            raw.into_iter()
                .map(|(field, rule, message)| {
                    ValidationIssue::new(field, ValidationKind::from_rule(rule), message)
                })
                .collect(),
        )
    }
}

//! Classification of authority replies and the persisted invoice status.
use crate::api::{ValidationMessage, ValidationResults};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

const DUPLICATE_CODE: &str = "Invoice-Errors";
const DUPLICATE_CATEGORY: &str = "Duplicate-Invoice";

/// Outcome of the authority's validation, after the duplicate filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ValidationStatus {
    Pass,
    Warning,
    Failed,
}

impl ValidationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationStatus::Pass => "PASS",
            ValidationStatus::Warning => "WARNING",
            ValidationStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which submission endpoint an invoice went to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointKind {
    Clearance,
    Reporting,
}

impl EndpointKind {
    pub fn for_simplified(simplified: bool) -> Self {
        if simplified {
            EndpointKind::Reporting
        } else {
            EndpointKind::Clearance
        }
    }

    /// Word used in status strings and history entries.
    pub fn accepted_word(&self) -> &'static str {
        match self {
            EndpointKind::Clearance => "CLEARED",
            EndpointKind::Reporting => "REPORTED",
        }
    }
}

fn is_duplicate(message: &ValidationMessage) -> bool {
    message.code() == Some(DUPLICATE_CODE) && message.category() == Some(DUPLICATE_CATEGORY)
}

/// Drops `Invoice-Errors`/`Duplicate-Invoice` entries.
pub fn filter_duplicates(errors: &[ValidationMessage]) -> Vec<ValidationMessage> {
    errors
        .iter()
        .filter(|message| !is_duplicate(message))
        .cloned()
        .collect()
}

/// FAILED if any non-duplicate error remains, else WARNING if any warning,
/// else PASS.
pub fn classify(errors: &[ValidationMessage], warnings: &[ValidationMessage]) -> ValidationStatus {
    if errors.iter().any(|message| !is_duplicate(message)) {
        ValidationStatus::Failed
    } else if !warnings.is_empty() {
        ValidationStatus::Warning
    } else {
        ValidationStatus::Pass
    }
}

pub fn classify_results(results: &ValidationResults) -> ValidationStatus {
    classify(results.error_messages(), results.warning_messages())
}

/// Status persisted on an invoice record.
///
/// The text form is what the ERP side displays and matches on.
///
/// # Examples
/// ```rust
/// use fatoora_relay_core::status::{EndpointKind, SubmissionStatus, ValidationStatus};
///
/// let status = SubmissionStatus::from_outcome(EndpointKind::Clearance, ValidationStatus::Warning);
/// assert_eq!(status.to_string(), "CLEARED WITH WARNINGS");
/// assert!(status.is_accepted());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum SubmissionStatus {
    #[default]
    NotSubmitted,
    Cleared,
    Reported,
    ClearedWithWarnings,
    ReportedWithWarnings,
    Failed,
    Error(String),
}

impl SubmissionStatus {
    pub fn from_outcome(endpoint: EndpointKind, status: ValidationStatus) -> Self {
        match (endpoint, status) {
            (_, ValidationStatus::Failed) => SubmissionStatus::Failed,
            (EndpointKind::Clearance, ValidationStatus::Pass) => SubmissionStatus::Cleared,
            (EndpointKind::Reporting, ValidationStatus::Pass) => SubmissionStatus::Reported,
            (EndpointKind::Clearance, ValidationStatus::Warning) => {
                SubmissionStatus::ClearedWithWarnings
            }
            (EndpointKind::Reporting, ValidationStatus::Warning) => {
                SubmissionStatus::ReportedWithWarnings
            }
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        SubmissionStatus::Error(message.into())
    }

    /// Accepted by the authority, with or without warnings.
    pub fn is_accepted(&self) -> bool {
        matches!(
            self,
            SubmissionStatus::Cleared
                | SubmissionStatus::Reported
                | SubmissionStatus::ClearedWithWarnings
                | SubmissionStatus::ReportedWithWarnings
        )
    }

    pub fn is_error(&self) -> bool {
        matches!(self, SubmissionStatus::Error(_))
    }

    /// Eligible for the background sweep.
    pub fn is_pending(&self) -> bool {
        matches!(self, SubmissionStatus::NotSubmitted | SubmissionStatus::Error(_))
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmissionStatus::NotSubmitted => f.write_str("NOT SUBMITTED"),
            SubmissionStatus::Cleared => f.write_str("CLEARED"),
            SubmissionStatus::Reported => f.write_str("REPORTED"),
            SubmissionStatus::ClearedWithWarnings => f.write_str("CLEARED WITH WARNINGS"),
            SubmissionStatus::ReportedWithWarnings => f.write_str("REPORTED WITH WARNINGS"),
            SubmissionStatus::Failed => f.write_str("FAILED"),
            SubmissionStatus::Error(message) => write!(f, "Error: {message}"),
        }
    }
}

impl FromStr for SubmissionStatus {
    type Err = std::convert::Infallible;

    /// Unknown text is kept as an `Error` status, so nothing read back from
    /// storage is lost.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Ok(match trimmed.to_ascii_uppercase().as_str() {
            "" | "NOT SUBMITTED" => SubmissionStatus::NotSubmitted,
            "CLEARED" => SubmissionStatus::Cleared,
            "REPORTED" => SubmissionStatus::Reported,
            "CLEARED WITH WARNINGS" => SubmissionStatus::ClearedWithWarnings,
            "REPORTED WITH WARNINGS" => SubmissionStatus::ReportedWithWarnings,
            "FAILED" => SubmissionStatus::Failed,
            upper if upper.starts_with("ERROR") => {
                let rest = trimmed["error".len()..].trim_start_matches(':').trim();
                SubmissionStatus::Error(rest.to_string())
            }
            _ => SubmissionStatus::Error(trimmed.to_string()),
        })
    }
}

impl Serialize for SubmissionStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SubmissionStatus {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(raw.parse().unwrap_or_default())
    }
}

//! The human-readable status text stored on each invoice.
//!
//! The text has this layout:
//!
//! ```text
//! {HEADLINE}
//! Status Code: {http status}
//! ZATCA Response: {json}
//! ```
//!
//! The JSON is kept on one line so single-line consumers can still find it.
//! [`parse`] extracts it as follows:
//!
//! 1. Find the `ZATCA Response:` anchor.
//! 2. Skip optional whitespace.
//! 3. Expect `{`.
//! 4. Scan braces until they balance, skipping string literals and escapes.
use crate::api::ValidationResponse;
use crate::status::{classify_results, ValidationStatus};
use thiserror::Error;

pub const ANCHOR: &str = "ZATCA Response:";
pub const NOT_SUBMITTED: &str = "NOT SUBMITTED";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResponseTextError {
    #[error("status text has no 'ZATCA Response:' marker")]
    MissingAnchor,
    #[error("no JSON object follows 'ZATCA Response:'")]
    MissingOpenBrace,
    #[error("JSON object after 'ZATCA Response:' is not closed")]
    Truncated,
    #[error("embedded response is not valid JSON: {0}")]
    InvalidJson(String),
}

/// Parsed form of a persisted status text.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusText {
    NotSubmitted,
    /// Text starting with `Error`, kept verbatim.
    Error(String),
    Response(ValidationResponse),
}

/// Renders the full status text for an authority reply.
pub fn compose(headline: &str, http_status: u16, body: &str) -> String {
    let single_line: String = body.chars().filter(|c| *c != '\r' && *c != '\n').collect();
    format!("{headline}\nStatus Code: {http_status}\n{ANCHOR} {single_line}")
}

fn is_error_text(text: &str) -> bool {
    text.get(..5)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("error"))
}

/// Slice of `text` holding the embedded JSON object.
pub fn extract_json(text: &str) -> Result<&str, ResponseTextError> {
    let anchor = text.find(ANCHOR).ok_or(ResponseTextError::MissingAnchor)?;
    let rest = &text[anchor + ANCHOR.len()..];
    let offset = rest.len() - rest.trim_start().len();
    let rest = &rest[offset..];
    if !rest.starts_with('{') {
        return Err(ResponseTextError::MissingOpenBrace);
    }

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (idx, byte) in rest.bytes().enumerate() {
        if in_string {
            match byte {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(&rest[..=idx]);
                }
            }
            _ => {}
        }
    }
    Err(ResponseTextError::Truncated)
}

pub fn parse(text: &str) -> Result<StatusText, ResponseTextError> {
    let trimmed = text.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case(NOT_SUBMITTED) {
        return Ok(StatusText::NotSubmitted);
    }
    if is_error_text(trimmed) {
        return Ok(StatusText::Error(trimmed.to_string()));
    }
    let json = extract_json(text)?;
    serde_json::from_str::<ValidationResponse>(json)
        .map(StatusText::Response)
        .map_err(|e| ResponseTextError::InvalidJson(e.to_string()))
}

/// PASS/WARNING/FAILED badge for a status text. Sentinels and unreadable
/// text count as FAILED.
pub fn badge(text: &str) -> ValidationStatus {
    match parse(text) {
        Ok(StatusText::Response(response)) => classify_results(response.validation_results()),
        Ok(StatusText::NotSubmitted) | Ok(StatusText::Error(_)) | Err(_) => {
            ValidationStatus::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = "{\r\n  \"validationResults\": {\"status\": \"WARNING\",\r\n  \"warningMessages\": [{\"code\": \"W1\", \"message\": \"a } in text\"}],\r\n  \"errorMessages\": [{\"code\": \"Invoice-Errors\", \"category\": \"Duplicate-Invoice\", \"message\": \"dup\"}]},\r\n  \"clearanceStatus\": \"CLEARED\"\r\n}";

    #[test]
    fn compose_keeps_json_on_one_line() {
        let text = compose("CLEARED WITH WARNINGS", 202, BODY);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "CLEARED WITH WARNINGS");
        assert_eq!(lines[1], "Status Code: 202");
        assert!(lines[2].starts_with("ZATCA Response: {"));
    }

    #[test]
    fn round_trips_through_parser() {
        let text = compose("CLEARED WITH WARNINGS", 202, BODY);
        match parse(&text).unwrap() {
            StatusText::Response(response) => {
                assert_eq!(response.clearance_status(), Some("CLEARED"));
                assert_eq!(response.validation_results().warning_messages().len(), 1);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(badge(&text), ValidationStatus::Warning);
    }

    #[test]
    fn null_error_list_keeps_the_warning_badge() {
        let text = "CLEARED WITH WARNINGS\nStatus Code: 202\nZATCA Response: {\"validationResults\":{\"status\":\"WARNING\",\"warningMessages\":[{\"code\":\"W1\",\"message\":\"m\"}],\"errorMessages\":null}}";
        assert!(matches!(parse(text), Ok(StatusText::Response(_))));
        assert_eq!(badge(text), ValidationStatus::Warning);
    }

    #[test]
    fn braces_inside_strings_do_not_end_the_scan() {
        let text = "x ZATCA Response: {\"a\": \"}\\\"{\", \"b\": {\"c\": 1}} trailing";
        assert_eq!(
            extract_json(text).unwrap(),
            "{\"a\": \"}\\\"{\", \"b\": {\"c\": 1}}"
        );
    }

    #[test]
    fn sentinels() {
        assert_eq!(parse("NOT SUBMITTED").unwrap(), StatusText::NotSubmitted);
        assert_eq!(
            parse("error: timed out").unwrap(),
            StatusText::Error("error: timed out".into())
        );
        assert_eq!(badge("NOT SUBMITTED"), ValidationStatus::Failed);
        assert_eq!(badge("Error: 503"), ValidationStatus::Failed);
    }

    #[test]
    fn malformed_inputs_have_distinct_errors() {
        assert_eq!(parse("CLEARED"), Err(ResponseTextError::MissingAnchor));
        assert_eq!(
            parse("SUCCESS\nZATCA Response: none"),
            Err(ResponseTextError::MissingOpenBrace)
        );
        assert_eq!(
            parse("SUCCESS\nZATCA Response: {\"validationResults\": {\"status\": \"PASS\""),
            Err(ResponseTextError::Truncated)
        );
        assert!(matches!(
            parse("SUCCESS\nZATCA Response: {validationResults}"),
            Err(ResponseTextError::InvalidJson(_))
        ));
        assert_eq!(badge("garbage"), ValidationStatus::Failed);
    }
}

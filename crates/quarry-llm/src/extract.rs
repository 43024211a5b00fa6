//! Strict parsing of model output.
//!
//! Models habitually wrap JSON in markdown fences even when told not to.
//! [`extract_json_block`] peels one fence if present; parsing is otherwise
//! strict, and parse failures bubble up so the adapter can issue its one
//! stricter reprompt.

use regex::Regex;
use serde::de::DeserializeOwned;
use std::sync::OnceLock;

fn fence_regex() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| {
        // ```json ... ``` or bare ``` ... ```; the body is group 1
        Regex::new(r"(?s)```(?:json)?\s*(.*?)```").unwrap_or_else(|_| unreachable!())
    })
}

/// Return the JSON payload of a response: the body of the first markdown
/// fence if one exists, otherwise the trimmed response itself.
#[must_use]
pub fn extract_json_block(text: &str) -> &str {
    if let Some(captures) = fence_regex().captures(text) {
        if let Some(body) = captures.get(1) {
            return body.as_str().trim();
        }
    }
    text.trim()
}

/// Parse a model response as `T`, unwrapping one markdown fence first.
pub fn parse_json_response<T: DeserializeOwned>(text: &str) -> Result<T, serde_json::Error> {
    serde_json::from_str(extract_json_block(text))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Payload {
        queries: Vec<String>,
    }

    #[test]
    fn bare_json_parses() {
        let parsed: Payload = parse_json_response(r#"{"queries": ["SELECT 1"]}"#).unwrap();
        assert_eq!(parsed.queries, vec!["SELECT 1"]);
    }

    #[test]
    fn json_fence_is_unwrapped() {
        let text = "Here you go:\n```json\n{\"queries\": [\"SELECT 1\"]}\n```\nanything else";
        let parsed: Payload = parse_json_response(text).unwrap();
        assert_eq!(parsed.queries, vec!["SELECT 1"]);
    }

    #[test]
    fn anonymous_fence_is_unwrapped() {
        let text = "```\n{\"queries\": []}\n```";
        let parsed: Payload = parse_json_response(text).unwrap();
        assert!(parsed.queries.is_empty());
    }

    #[test]
    fn whitespace_is_tolerated() {
        let parsed: Payload = parse_json_response("  \n {\"queries\": []} \n ").unwrap();
        assert!(parsed.queries.is_empty());
    }

    #[test]
    fn prose_without_json_fails() {
        let result: Result<Payload, _> = parse_json_response("I could not generate queries.");
        assert!(result.is_err());
    }

    #[test]
    fn schema_mismatch_fails() {
        let result: Result<Payload, _> = parse_json_response(r#"{"sql": "SELECT 1"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn only_the_first_fence_counts() {
        let text = "```json\n{\"queries\": [\"SELECT 1\"]}\n```\n```json\n{\"queries\": []}\n```";
        let parsed: Payload = parse_json_response(text).unwrap();
        assert_eq!(parsed.queries.len(), 1);
    }
}

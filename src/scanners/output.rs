//! Tolerant parsing of scanner process output.
//!
//! Tool output is often polluted with progress lines, warnings, and ANSI
//! escapes. These helpers strip terminal control sequences, extract the first
//! balanced JSON object by brace counting, and split NDJSON streams while
//! skipping non-JSON lines.

use regex::Regex;
use serde::de::DeserializeOwned;
use std::sync::OnceLock;

fn ansi_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\x1b\[[0-9;?]*[A-Za-z]").expect("valid ANSI pattern"))
}

/// Removes ANSI escape sequences from tool output.
pub fn strip_ansi(raw: &str) -> String {
    ansi_pattern().replace_all(raw, "").into_owned()
}

/// Extracts the first balanced JSON object from mixed output.
///
/// Brace counting respects string literals and escapes, so log lines before,
/// after, or around the object are ignored.
pub fn first_json_object(raw: &str) -> Option<&str> {
    let bytes = raw.as_bytes();
    let start = raw.find('{')?;

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&raw[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Extracts the first balanced JSON array from mixed output.
pub fn first_json_array(raw: &str) -> Option<&str> {
    let bytes = raw.as_bytes();
    let start = raw.find('[')?;

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'[' if !in_string => depth += 1,
            b']' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&raw[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Strips ANSI noise and deserializes the first balanced JSON object.
pub fn parse_first_json<T: DeserializeOwned>(raw: &str) -> Result<T, String> {
    let clean = strip_ansi(raw);
    let object = first_json_object(&clean).ok_or_else(|| "no JSON object in output".to_string())?;
    serde_json::from_str(object).map_err(|e| format!("malformed JSON object: {e}"))
}

/// Splits NDJSON output into values, skipping lines that are not JSON.
pub fn ndjson_values(raw: &str) -> Vec<serde_json::Value> {
    let clean = strip_ansi(raw);
    clean
        .lines()
        .filter_map(|line| {
            let trimmed = line.trim();
            if !trimmed.starts_with('{') {
                return None;
            }
            serde_json::from_str(trimmed).ok()
        })
        .collect()
}

/// Pulls the first token that looks like a semantic version out of a
/// `tool --version` banner.
pub fn version_token(raw: &str) -> Option<String> {
    let clean = strip_ansi(raw);
    clean
        .split_whitespace()
        .map(|token| token.trim_start_matches('v'))
        .find(|token| {
            let mut chars = token.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_digit()) && token.contains('.')
        })
        .map(|token| token.trim_end_matches(',').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_ansi_sequences() {
        let raw = "\x1b[32mINFO\x1b[0m scanning";
        assert_eq!(strip_ansi(raw), "INFO scanning");
    }

    #[test]
    fn extracts_object_surrounded_by_logs() {
        let raw = "INFO starting\n{\"matches\": [{\"id\": \"x\"}]}\nINFO done";
        let object = first_json_object(raw).unwrap();
        assert_eq!(object, "{\"matches\": [{\"id\": \"x\"}]}");
    }

    #[test]
    fn brace_counting_ignores_braces_in_strings() {
        let raw = "{\"msg\": \"a } inside\", \"n\": 1} trailing";
        let object = first_json_object(raw).unwrap();
        assert_eq!(object, "{\"msg\": \"a } inside\", \"n\": 1}");
    }

    #[test]
    fn brace_counting_handles_escaped_quotes() {
        let raw = "{\"msg\": \"quote \\\" then }\", \"n\": 2}";
        let object = first_json_object(raw).unwrap();
        assert_eq!(object, raw);
    }

    #[test]
    fn unbalanced_output_yields_none() {
        assert!(first_json_object("{\"never\": \"closed\"").is_none());
        assert!(first_json_object("no json at all").is_none());
    }

    #[test]
    fn extracts_array_with_nested_brackets() {
        let raw = "scanning...\n[{\"tags\": [\"a\", \"b\"]}, {\"tags\": []}]\ndone";
        let array = first_json_array(raw).unwrap();
        assert_eq!(array, "[{\"tags\": [\"a\", \"b\"]}, {\"tags\": []}]");
    }

    #[test]
    fn ndjson_skips_log_lines() {
        let raw = "starting up\n{\"a\":1}\nWARN slow\n{\"b\":2}\n";
        let values = ndjson_values(raw);
        assert_eq!(values.len(), 2);
        assert_eq!(values[0]["a"], 1);
        assert_eq!(values[1]["b"], 2);
    }

    #[test]
    fn version_token_from_banners() {
        assert_eq!(
            version_token("trivy version 0.52.1"),
            Some("0.52.1".to_string())
        );
        assert_eq!(version_token("grype v0.79.0"), Some("0.79.0".to_string()));
        assert_eq!(version_token("no digits here"), None);
    }
}

//! Pulls the single JSON object out of a model completion.
//!
//! Completions may be wrapped in code fences or surrounded by prose. The first
//! brace-balanced object is located by depth scanning (braces inside string
//! values do not count). Trailing prose is ignored; a second complete
//! top-level object is rejected.

use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("No JSON found in LLM response")]
    NoJsonFound,

    #[error("LLM response contains more than one top-level JSON object")]
    MultipleObjects,

    #[error("Invalid JSON in LLM response: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

/// Removes every ``` fence marker, including a `json` language tag after it.
pub fn strip_code_fences(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(pos) = rest.find("```") {
        out.push_str(&rest[..pos]);
        rest = &rest[pos + 3..];
        if rest.get(..4).is_some_and(|tag| tag.eq_ignore_ascii_case("json")) {
            rest = &rest[4..];
        }
    }
    out.push_str(rest);
    out.trim().to_string()
}

/// Byte range of the first brace-balanced `{...}` span starting at or after `from`.
fn find_object_span(text: &str, from: usize) -> Option<(usize, usize)> {
    let bytes = text.as_bytes();
    let start = from + text[from..].find('{')?;

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some((start, start + offset + 1));
                }
            }
            _ => {}
        }
    }
    None
}

/// Extracts and parses the one JSON object in a completion.
pub fn extract_json_object(response: &str) -> Result<Map<String, Value>, ParseError> {
    let clean = strip_code_fences(response);
    let (start, end) = find_object_span(&clean, 0).ok_or(ParseError::NoJsonFound)?;

    let value: Value = serde_json::from_str(&clean[start..end])?;

    if let Some((next_start, next_end)) = find_object_span(&clean, end) {
        if serde_json::from_str::<Value>(&clean[next_start..next_end]).is_ok() {
            return Err(ParseError::MultipleObjects);
        }
    }

    match value {
        Value::Object(map) => Ok(map),
        _ => Err(ParseError::NoJsonFound),
    }
}

/// A string field, or `default` when missing, non-string, or blank.
pub fn string_field(map: &Map<String, Value>, key: &str, default: &str) -> String {
    map.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(default)
        .to_string()
}

/// String items of an array field; anything else yields an empty list.
pub fn string_list(map: &Map<String, Value>, key: &str) -> Vec<String> {
    map.get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

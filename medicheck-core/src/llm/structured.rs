//! Recovering a JSON object from a model reply

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

use crate::error::{MedicheckError, Result};

static CODE_FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```(?:json|JSON)?\s*\n?([\s\S]*?)\n?```").unwrap());

static TRAILING_COMMA_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",(\s*[}\]])").unwrap());

/// Parse the first JSON object in `raw`.
///
/// Tries the reply as-is, then the contents of a code fence, then the first
/// balanced `{...}` span, dropping trailing commas at the last stage.
pub fn parse_json_value(raw: &str) -> Result<Value> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(MedicheckError::MalformedOutput("empty reply".to_string()));
    }

    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(trimmed) {
        return Ok(value);
    }

    let unfenced = strip_code_fences(trimmed);
    let candidate = extract_object(unfenced).ok_or_else(|| {
        MedicheckError::MalformedOutput(format!("no JSON object in reply: {}", preview(trimmed)))
    })?;

    serde_json::from_str(candidate)
        .or_else(|_| serde_json::from_str(&TRAILING_COMMA_RE.replace_all(candidate, "$1")))
        .map_err(|e| MedicheckError::MalformedOutput(format!("invalid JSON ({}): {}", e, preview(candidate))))
}

fn strip_code_fences(input: &str) -> &str {
    CODE_FENCE_RE
        .captures(input)
        .and_then(|caps| caps.get(1))
        .map_or(input, |m| m.as_str())
}

/// First balanced `{...}` span, honoring string literals
fn extract_object(input: &str) -> Option<&str> {
    let start = input.find('{')?;
    let substring = &input[start..];
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, c) in substring.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&substring[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

fn preview(text: &str) -> String {
    let mut out: String = text.chars().take(120).collect();
    if text.chars().count() > 120 {
        out.push_str("...");
    }
    out
}

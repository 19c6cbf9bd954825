//! Tolerant JSON extraction for LLM replies.
//!
//! Models routinely wrap their JSON in prose or ```` ```json ```` fences.
//! These helpers pull a single top-level object or array out of a reply and
//! parse it strictly; anything else is a [`LlmError::Parse`].

use serde_json::Value;

use crate::error::{LlmError, Result};

/// Strip markdown code-fence markers, keeping the fenced body.
fn strip_fences(text: &str) -> String {
    let trimmed = text.trim();
    if !trimmed.contains("```") {
        return trimmed.to_string();
    }
    trimmed
        .lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn extract_delimited(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    if end <= start {
        return None;
    }
    Some(&text[start..=end])
}

/// Extract a single top-level JSON object from a reply, tolerating prose and
/// code fences around it.
pub fn extract_json_object(reply: &str) -> Result<Value> {
    let cleaned = strip_fences(reply);
    let candidate = extract_delimited(&cleaned, '{', '}')
        .ok_or_else(|| LlmError::Parse("no JSON object found in reply".to_string()))?;
    let value: Value = serde_json::from_str(candidate)
        .map_err(|e| LlmError::Parse(format!("invalid JSON object: {e}")))?;
    if !value.is_object() {
        return Err(LlmError::Parse("top-level value is not an object".to_string()));
    }
    Ok(value)
}

/// Extract a single top-level JSON array from a reply, tolerating prose and
/// code fences around it.
pub fn extract_json_array(reply: &str) -> Result<Value> {
    let cleaned = strip_fences(reply);
    let candidate = extract_delimited(&cleaned, '[', ']')
        .ok_or_else(|| LlmError::Parse("no JSON array found in reply".to_string()))?;
    let value: Value = serde_json::from_str(candidate)
        .map_err(|e| LlmError::Parse(format!("invalid JSON array: {e}")))?;
    if !value.is_array() {
        return Err(LlmError::Parse("top-level value is not an array".to_string()));
    }
    Ok(value)
}

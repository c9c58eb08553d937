//! Extraction of fenced action blocks from assistant text.

use serde_json::{Map, Value};

/// Info string that marks a fenced block as an action block.
pub const ACTION_FENCE_TAG: &str = "erpnext_ai_action";

const FENCE: &str = "```";

/// Assistant text split into what the user sees and the actions it carries.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParsedReply {
    pub cleaned_text: String,
    /// Action objects in source order.
    pub actions: Vec<Map<String, Value>>,
}

/// Strip every well-formed action block out of `text`.
///
/// A block counts only when its info string is exactly [`ACTION_FENCE_TAG`]
/// and its body parses as one JSON object. Fences count only at the start of
/// a line, so backticks inside prose or JSON strings are plain text. Anything
/// else, including an unclosed fence, stays in the visible text verbatim.
/// When nothing is stripped the input comes back untouched.
#[must_use]
pub fn parse_actions(text: &str) -> ParsedReply {
    let mut cleaned = String::with_capacity(text.len());
    let mut actions = Vec::new();
    let mut cursor = 0;

    while let Some(open) = next_fence(text, cursor) {
        let info_start = open + FENCE.len();
        let info_end = text[info_start..]
            .find('\n')
            .map_or(text.len(), |i| info_start + i);
        let body_start = (info_end + 1).min(text.len());

        let Some(close) = next_fence(text, body_start) else {
            break;
        };
        let block_end = close + FENCE.len();

        let is_action = text[info_start..info_end].trim() == ACTION_FENCE_TAG;
        let parsed = if is_action { parse_object(&text[body_start..close]) } else { None };

        cleaned.push_str(&text[cursor..open]);
        match parsed {
            Some(obj) => actions.push(obj),
            None => cleaned.push_str(&text[open..block_end]),
        }
        cursor = block_end;
    }

    if actions.is_empty() {
        return ParsedReply { cleaned_text: text.to_string(), actions };
    }
    cleaned.push_str(&text[cursor..]);
    ParsedReply { cleaned_text: cleaned.trim().to_string(), actions }
}

/// Position of the next fence at or after `from` that opens its line,
/// ignoring indentation.
fn next_fence(text: &str, from: usize) -> Option<usize> {
    let mut pos = from;
    while let Some(offset) = text[pos..].find(FENCE) {
        let at = pos + offset;
        let line_start = text[..at].rfind('\n').map_or(0, |i| i + 1);
        if text[line_start..at].trim().is_empty() {
            return Some(at);
        }
        pos = at + FENCE.len();
    }
    None
}

fn parse_object(body: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(body.trim()) {
        Ok(Value::Object(obj)) => Some(obj),
        _ => None,
    }
}

#[cfg(test)]
#[path = "parse_test.rs"]
mod tests;

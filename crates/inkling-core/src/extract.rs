//! Best-effort structured extraction from model output.
//!
//! Models are asked for bare JSON but routinely wrap it in prose or a
//! Markdown fence, or cut it off. Extraction is tolerant and all-or-nothing:
//!
//! 1. Trim the text. Empty text yields nothing.
//! 2. Prefer the inner content of the first fenced block: a
//!    `` ```json `` fence first, then any `` ``` `` fence.
//! 3. Slice from the first `{` to the last `}` of that candidate.
//! 4. Parse the slice as strict JSON.
//!
//! Every function here is a pure function of its input, so re-running
//! extraction on the same text always yields the same result. The rest of
//! the system never performs string surgery on model output itself.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

const FENCE: &str = "```";
const JSON_FENCE: &str = "```json";

/// Inner content of the first fenced block, trimmed.
///
/// A `` ```json `` fence takes precedence over a bare one. An unclosed
/// fence does not count.
pub fn fenced_block(text: &str) -> Option<&str> {
    block_after(text, JSON_FENCE).or_else(|| block_after(text, FENCE))
}

fn block_after<'a>(text: &'a str, opener: &str) -> Option<&'a str> {
    let start = text.find(opener)? + opener.len();
    let rest = &text[start..];
    let end = rest.find(FENCE)?;
    Some(rest[..end].trim())
}

/// Text that extraction will search for an object span: the fenced block
/// if there is one, otherwise the whole trimmed text.
pub fn candidate_text(text: &str) -> &str {
    let trimmed = text.trim();
    fenced_block(trimmed).unwrap_or(trimmed)
}

/// The span from the first `{` to the last `}`, inclusive.
///
/// Returns `None` when either brace is missing or they are out of order.
/// Braces are not balanced-checked; a bad span simply fails to parse.
pub fn object_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if start < end {
        Some(&text[start..=end])
    } else {
        None
    }
}

/// Extracts the embedded JSON value from model output, if any.
pub fn extract_json(text: &str) -> Option<Value> {
    if text.trim().is_empty() {
        return None;
    }
    let span = object_span(candidate_text(text))?;
    serde_json::from_str(span).ok()
}

/// Reads an extracted object as `T`, or `None` when it does not fit.
pub fn typed_view<T: DeserializeOwned>(value: &Value) -> Option<T> {
    T::deserialize(value).ok()
}

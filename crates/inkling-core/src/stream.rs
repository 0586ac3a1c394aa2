//! Line-tagged stream protocol.
//!
//! The completion transport delivers text lines, each prefixed by a
//! single-character tag and a colon:
//!
//! | Prefix | Meaning | [`StreamChunk`] variant |
//! |--------|---------|-------------------------|
//! | `0:` | text delta (JSON string literal) | [`StreamChunk::TextDelta`] |
//! | `3:` | error notice (JSON value) | [`StreamChunk::ErrorNotice`] |
//! | `f:` | stream metadata, ignored | [`StreamChunk::Metadata`] |
//! | other | opaque text, appended verbatim | [`StreamChunk::Unknown`] |
//!
//! [`LineSplitter`] turns raw transport payloads into complete lines,
//! carrying partial lines (and split UTF-8 sequences) across payloads.
//! The `encode_*` functions produce the same protocol on the server side.

pub const TEXT_TAG: &str = "0:";
pub const ERROR_TAG: &str = "3:";
pub const METADATA_TAG: &str = "f:";

/// One decoded transport line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamChunk {
    /// Decoded text to append to the accumulated buffer.
    TextDelta(String),
    /// A provider warning or error. Never appended, never fatal.
    ErrorNotice(String),
    /// Protocol metadata.
    Metadata,
    /// A line in a format the decoder does not recognise.
    Unknown(String),
}

impl StreamChunk {
    /// Decodes a single line. Returns `None` for blank lines.
    ///
    /// Leading and trailing whitespace is trimmed before the tag is read.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        if line.starts_with(METADATA_TAG) {
            return Some(StreamChunk::Metadata);
        }
        if let Some(payload) = line.strip_prefix(TEXT_TAG) {
            return Some(StreamChunk::TextDelta(decode_text_delta(payload)));
        }
        if let Some(payload) = line.strip_prefix(ERROR_TAG) {
            return Some(StreamChunk::ErrorNotice(decode_error_notice(payload)));
        }
        Some(StreamChunk::Unknown(line.to_string()))
    }
}

/// Decodes a `0:` payload as a JSON string literal, falling back to
/// [`unescape_lenient`] when it is not one.
pub fn decode_text_delta(payload: &str) -> String {
    match serde_json::from_str::<String>(payload) {
        Ok(text) => text,
        Err(_) => unescape_lenient(payload),
    }
}

/// Manual fallback for malformed deltas.
///
/// Strips one leading and one trailing double quote, then resolves the
/// escapes `\n`, `\"` and `\\` in a single left-to-right pass. Any other
/// backslash sequence is kept as written.
pub fn unescape_lenient(payload: &str) -> String {
    let body = payload.strip_prefix('"').unwrap_or(payload);
    let body = body.strip_suffix('"').unwrap_or(body);

    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some('n') => {
                out.push('\n');
                chars.next();
            }
            Some('"') => {
                out.push('"');
                chars.next();
            }
            Some('\\') => {
                out.push('\\');
                chars.next();
            }
            _ => out.push('\\'),
        }
    }
    out
}

fn decode_error_notice(payload: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(payload) {
        Ok(serde_json::Value::String(s)) => s,
        Ok(other) => other.to_string(),
        Err(_) => payload.to_string(),
    }
}

/// Splits a byte stream on `\n`, buffering the incomplete tail.
///
/// `\n` never occurs inside a multi-byte UTF-8 sequence, so every emitted
/// line is complete; only the buffered tail can be mid-character.
#[derive(Debug, Default)]
pub struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `bytes` and returns every line completed by them, in order.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);

        let Some(last_newline) = self.pending.iter().rposition(|&b| b == b'\n') else {
            return Vec::new();
        };

        let rest = self.pending.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.pending, rest);

        complete[..complete.len() - 1]
            .split(|&b| b == b'\n')
            .map(decode_line)
            .collect()
    }

    /// Flushes the buffered tail as a final line, if any.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let tail = std::mem::take(&mut self.pending);
        Some(decode_line(&tail))
    }

    /// True when a partial line is buffered.
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

/// Encodes a text delta as a `0:` line, newline-terminated.
pub fn encode_text_delta(text: &str) -> String {
    format!("{}{}\n", TEXT_TAG, serde_json::Value::String(text.to_string()))
}

/// Encodes an error notice as a `3:` line, newline-terminated.
pub fn encode_error(message: &str) -> String {
    format!(
        "{}{}\n",
        ERROR_TAG,
        serde_json::Value::String(message.to_string())
    )
}

/// Encodes stream metadata as an `f:` line, newline-terminated.
pub fn encode_metadata(value: &serde_json::Value) -> String {
    format!("{}{}\n", METADATA_TAG, value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_text_delta_json_literal() {
        assert_eq!(
            StreamChunk::parse(r#"0:"line one\nline \"two\"""#),
            Some(StreamChunk::TextDelta("line one\nline \"two\"".to_string()))
        );
    }

    #[test]
    fn test_parse_text_delta_unicode_escape() {
        assert_eq!(
            StreamChunk::parse(r#"0:"雨夜""#),
            Some(StreamChunk::TextDelta("雨夜".to_string()))
        );
    }

    #[test]
    fn test_parse_malformed_delta_falls_back() {
        // Unterminated literal: not valid JSON.
        assert_eq!(
            StreamChunk::parse(r#"0:"say \"hi\"\nand \\ more"#),
            Some(StreamChunk::TextDelta("say \"hi\"\nand \\ more".to_string()))
        );
    }

    #[test]
    fn test_parse_non_string_delta_falls_back() {
        assert_eq!(
            StreamChunk::parse("0:42"),
            Some(StreamChunk::TextDelta("42".to_string()))
        );
    }

    #[test]
    fn test_unescape_lenient_keeps_unknown_escapes() {
        assert_eq!(unescape_lenient(r#""tab\there""#), r"tab\there");
        assert_eq!(unescape_lenient(r"\\n"), r"\n");
    }

    #[test]
    fn test_parse_error_metadata_and_unknown() {
        assert_eq!(
            StreamChunk::parse(r#"3:"rate limited""#),
            Some(StreamChunk::ErrorNotice("rate limited".to_string()))
        );
        assert_eq!(
            StreamChunk::parse(r#"3:{"code":429}"#),
            Some(StreamChunk::ErrorNotice(r#"{"code":429}"#.to_string()))
        );
        assert_eq!(
            StreamChunk::parse(r#"f:{"messageId":"m1"}"#),
            Some(StreamChunk::Metadata)
        );
        assert_eq!(
            StreamChunk::parse("  plain text  "),
            Some(StreamChunk::Unknown("plain text".to_string()))
        );
        assert_eq!(StreamChunk::parse("   "), None);
    }

    #[test]
    fn test_line_splitter_carries_partial_lines() {
        let mut splitter = LineSplitter::new();
        assert_eq!(splitter.push(b"0:\"ab"), Vec::<String>::new());
        assert!(splitter.has_pending());
        assert_eq!(
            splitter.push(b"c\"\n0:\"d\"\r\n3:"),
            vec!["0:\"abc\"".to_string(), "0:\"d\"".to_string()]
        );
        assert_eq!(splitter.finish(), Some("3:".to_string()));
        assert_eq!(splitter.finish(), None);
    }

    #[test]
    fn test_line_splitter_joins_split_utf8() {
        let bytes = "0:\"雨\"\n".as_bytes();
        let mut splitter = LineSplitter::new();
        // Split inside the three-byte character.
        assert!(splitter.push(&bytes[..4]).is_empty());
        assert_eq!(splitter.push(&bytes[4..]), vec!["0:\"雨\"".to_string()]);
    }

    #[test]
    fn test_line_splitter_empty_lines() {
        let mut splitter = LineSplitter::new();
        assert_eq!(
            splitter.push(b"\n\n0:\"x\"\n"),
            vec!["".to_string(), "".to_string(), "0:\"x\"".to_string()]
        );
    }

    #[test]
    fn test_encoders_decode_back() {
        let line = encode_text_delta("a \"quoted\"\nline");
        assert!(line.ends_with('\n'));
        assert_eq!(
            StreamChunk::parse(&line),
            Some(StreamChunk::TextDelta("a \"quoted\"\nline".to_string()))
        );
        assert_eq!(
            StreamChunk::parse(&encode_error("boom")),
            Some(StreamChunk::ErrorNotice("boom".to_string()))
        );
        assert_eq!(
            StreamChunk::parse(&encode_metadata(&serde_json::json!({"messageId": "x"}))),
            Some(StreamChunk::Metadata)
        );
    }
}

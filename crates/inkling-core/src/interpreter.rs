//! Stream interpreter: from transport bytes to text and a structured result.
//!
//! # State machine
//!
//! ```text
//! Idle ──first bytes/chunk──▶ Streaming ──finish()──▶ Parsed | Degraded
//! ```
//!
//! While streaming, every line is applied strictly in arrival order:
//! text deltas and unrecognised lines grow the accumulated text, error
//! notices are recorded, metadata is dropped. [`StreamInterpreter::finish`]
//! runs extraction exactly once over the accumulated text. Any JSON object
//! found reaches `Parsed` and is kept verbatim; the typed view `T` is a
//! lenient best-effort reading of it and may be absent even when parsed.
//! `Degraded` is a valid end state: the raw text is kept so the caller
//! always has something to show, and a history record is still produced.
//!
//! Extraction never runs mid-stream. A strict JSON parse is all-or-nothing,
//! so parsing a prefix would only ever fail.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::extract::{extract_json, typed_view};
use crate::models::NewHistoryRecord;
use crate::stream::{LineSplitter, StreamChunk};

/// Lifecycle of one interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpreterState {
    Idle,
    Streaming,
    Parsed,
    Degraded,
}

impl InterpreterState {
    pub fn is_terminal(self) -> bool {
        matches!(self, InterpreterState::Parsed | InterpreterState::Degraded)
    }
}

/// Interprets one analysis stream into a result of type `T`.
///
/// Each request owns its own interpreter; nothing is shared between them.
#[derive(Debug)]
pub struct StreamInterpreter<T> {
    state: InterpreterState,
    text: String,
    splitter: LineSplitter,
    notices: Vec<String>,
    value: Option<Value>,
    result: Option<T>,
    saved: bool,
}

impl<T> Default for StreamInterpreter<T> {
    fn default() -> Self {
        Self {
            state: InterpreterState::Idle,
            text: String::new(),
            splitter: LineSplitter::new(),
            notices: Vec::new(),
            value: None,
            result: None,
            saved: false,
        }
    }
}

impl<T> StreamInterpreter<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> InterpreterState {
        self.state
    }

    /// The accumulated text, for progressive display.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Error notices received so far, in arrival order.
    pub fn notices(&self) -> &[String] {
        &self.notices
    }

    /// The extracted JSON object. `Some` exactly in [`InterpreterState::Parsed`].
    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    /// Typed view of [`value`](Self::value), when it reads as `T`.
    pub fn result(&self) -> Option<&T> {
        self.result.as_ref()
    }

    /// Records a notice that did not come from the stream itself, such as
    /// a transport failure mid-stream.
    pub fn record_notice(&mut self, notice: impl Into<String>) {
        self.notices.push(notice.into());
    }

    /// Feeds a raw transport payload. Returns `true` if the visible text
    /// changed.
    ///
    /// Payloads arriving after [`finish`](Self::finish) are ignored.
    pub fn feed(&mut self, bytes: &[u8]) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.state = InterpreterState::Streaming;

        let mut changed = false;
        for line in self.splitter.push(bytes) {
            changed |= self.apply_line(&line);
        }
        changed
    }

    /// Applies one already-split transport line.
    pub fn apply_line(&mut self, line: &str) -> bool {
        match StreamChunk::parse(line) {
            Some(chunk) => self.apply(chunk),
            None => false,
        }
    }

    /// Applies one decoded chunk. Returns `true` if the visible text changed.
    pub fn apply(&mut self, chunk: StreamChunk) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.state = InterpreterState::Streaming;

        match chunk {
            StreamChunk::TextDelta(delta) => {
                self.text.push_str(&delta);
                !delta.is_empty()
            }
            StreamChunk::Unknown(line) => {
                self.text.push_str(&line);
                true
            }
            StreamChunk::ErrorNotice(notice) => {
                self.notices.push(notice);
                false
            }
            StreamChunk::Metadata => false,
        }
    }

    /// Marks the history save as attempted and reports whether this call
    /// was the first attempt.
    fn claim_save(&mut self) -> bool {
        if self.saved || !self.state.is_terminal() || self.text.trim().is_empty() {
            return false;
        }
        self.saved = true;
        true
    }

    /// True once a history record has been claimed (or was restored).
    pub fn is_saved(&self) -> bool {
        self.saved
    }
}

impl<T: DeserializeOwned> StreamInterpreter<T> {
    /// Re-opens a previously saved run from its raw text for display.
    ///
    /// Extraction is re-run over `raw_text`, so the state matches what the
    /// original run reached. The save guard is set, so a reopened run never
    /// produces a second history record.
    pub fn reopen(raw_text: String) -> Self {
        let mut interpreter = Self {
            text: raw_text,
            saved: true,
            ..Self::default()
        };
        interpreter.extract();
        interpreter
    }

    /// Ends the stream and runs extraction once.
    ///
    /// Any buffered partial line is applied first. Calling `finish` again
    /// returns the existing terminal state without re-extracting.
    pub fn finish(&mut self) -> InterpreterState {
        if self.state.is_terminal() {
            return self.state;
        }

        if let Some(tail) = self.splitter.finish() {
            self.apply_line(&tail);
        }

        self.extract();
        self.state
    }

    fn extract(&mut self) {
        self.value = extract_json(&self.text);
        self.result = self.value.as_ref().and_then(typed_view);
        self.state = if self.value.is_some() {
            InterpreterState::Parsed
        } else {
            InterpreterState::Degraded
        };
    }
}

impl<T: Serialize + Default> StreamInterpreter<T> {
    /// Produces the history record for this run, at most once.
    ///
    /// Returns `None` before the stream has finished, when the run is
    /// already saved, or when no text was received at all. A parsed run
    /// stores the extracted JSON verbatim. A degraded run is stored with
    /// the default (empty) result shape. Both keep the raw text.
    pub fn take_history_record(
        &mut self,
        fragment_ids: Vec<String>,
        target_fragment_id: Option<String>,
    ) -> serde_json::Result<Option<NewHistoryRecord>> {
        if !self.claim_save() {
            return Ok(None);
        }

        let result = match &self.value {
            Some(value) => value.clone(),
            None => serde_json::to_value(T::default())?,
        };

        Ok(Some(NewHistoryRecord {
            fragment_ids,
            target_fragment_id,
            result,
            raw_text: Some(self.text.clone()),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AnalysisResult, RelationAnalysisResult};
    use crate::stream::encode_text_delta;

    fn feed_all(interp: &mut StreamInterpreter<AnalysisResult>, lines: &[&str]) {
        for line in lines {
            interp.feed(format!("{}\n", line).as_bytes());
        }
    }

    #[test]
    fn test_starts_idle_and_streams_on_first_bytes() {
        let mut interp = StreamInterpreter::<AnalysisResult>::new();
        assert_eq!(interp.state(), InterpreterState::Idle);
        interp.feed(b"0:\"he");
        assert_eq!(interp.state(), InterpreterState::Streaming);
        assert_eq!(interp.text(), "");
    }

    #[test]
    fn test_text_is_concatenation_of_deltas() {
        let deltas = ["{\"sugg", "estions\":", "[\"a\\nb\"]", "}"];
        let mut interp = StreamInterpreter::<AnalysisResult>::new();
        for d in deltas {
            interp.feed(encode_text_delta(d).as_bytes());
        }
        assert_eq!(interp.text(), deltas.concat());
        assert_eq!(interp.finish(), InterpreterState::Parsed);
        assert_eq!(interp.result().unwrap().suggestions, vec!["a\nb"]);
    }

    #[test]
    fn test_metadata_never_reaches_text() {
        let mut interp = StreamInterpreter::<AnalysisResult>::new();
        feed_all(
            &mut interp,
            &[r#"f:{"messageId":"m1"}"#, r#"0:"hello""#, r#"f:{"x":1}"#],
        );
        assert_eq!(interp.text(), "hello");
    }

    #[test]
    fn test_error_notice_between_deltas_is_not_appended() {
        let mut interp = StreamInterpreter::<AnalysisResult>::new();
        feed_all(
            &mut interp,
            &[r#"0:"first ""#, r#"3:"rate limited""#, r#"0:"second""#],
        );
        assert_eq!(interp.text(), "first second");
        assert_eq!(interp.notices().to_vec(), vec!["rate limited".to_string()]);
        assert_eq!(interp.state(), InterpreterState::Streaming);
    }

    #[test]
    fn test_unknown_lines_append_verbatim() {
        let mut interp = StreamInterpreter::<AnalysisResult>::new();
        feed_all(&mut interp, &["legacy", r#"0:" text""#]);
        assert_eq!(interp.text(), "legacy text");
    }

    #[test]
    fn test_chunks_split_mid_line_apply_in_order() {
        let mut interp = StreamInterpreter::<AnalysisResult>::new();
        interp.feed(b"0:\"ab");
        interp.feed(b"c\"\n0:");
        interp.feed(b"\"def\"\n");
        assert_eq!(interp.text(), "abcdef");
    }

    #[test]
    fn test_finish_applies_unterminated_last_line() {
        let mut interp = StreamInterpreter::<AnalysisResult>::new();
        interp.feed(b"0:\"{\\\"suggestions\\\":[]}\"");
        assert_eq!(interp.text(), "");
        assert_eq!(interp.finish(), InterpreterState::Parsed);
        assert_eq!(interp.text(), "{\"suggestions\":[]}");
    }

    #[test]
    fn test_unbalanced_json_degrades_and_keeps_text() {
        let mut interp = StreamInterpreter::<AnalysisResult>::new();
        feed_all(&mut interp, &[r#"0:"{\"groups\":[""#]);
        assert_eq!(interp.finish(), InterpreterState::Degraded);
        assert_eq!(interp.text(), "{\"groups\":[");
        assert!(interp.result().is_none());
    }

    #[test]
    fn test_empty_stream_degrades() {
        let mut interp = StreamInterpreter::<AnalysisResult>::new();
        assert_eq!(interp.finish(), InterpreterState::Degraded);
        assert_eq!(interp.take_history_record(vec![], None).unwrap(), None);
    }

    #[test]
    fn test_finish_is_once_only_and_ignores_late_bytes() {
        let mut interp = StreamInterpreter::<AnalysisResult>::new();
        feed_all(&mut interp, &[r#"0:"{\"suggestions\":[\"x\"]}""#]);
        assert_eq!(interp.finish(), InterpreterState::Parsed);
        assert!(!interp.feed(b"0:\"more\"\n"));
        assert_eq!(interp.finish(), InterpreterState::Parsed);
        assert_eq!(interp.text(), "{\"suggestions\":[\"x\"]}");
    }

    #[test]
    fn test_history_record_claimed_once() {
        let mut interp = StreamInterpreter::<AnalysisResult>::new();
        feed_all(&mut interp, &[r#"0:"{\"suggestions\":[\"x\"]}""#]);

        // Not yet finished.
        assert_eq!(interp.take_history_record(vec![], None).unwrap(), None);

        interp.finish();
        let record = interp
            .take_history_record(vec!["a".into()], Some("a".into()))
            .unwrap()
            .unwrap();
        assert_eq!(record.result["suggestions"][0], "x");
        assert_eq!(record.raw_text.as_deref(), Some("{\"suggestions\":[\"x\"]}"));
        assert!(interp.is_saved());
        assert_eq!(interp.take_history_record(vec![], None).unwrap(), None);
    }

    #[test]
    fn test_degraded_history_uses_empty_shape() {
        let mut interp = StreamInterpreter::<AnalysisResult>::new();
        feed_all(&mut interp, &[r#"0:"I could not produce JSON.""#]);
        assert_eq!(interp.finish(), InterpreterState::Degraded);
        let record = interp.take_history_record(vec![], None).unwrap().unwrap();
        assert_eq!(
            record.result,
            serde_json::json!({"groups": [], "suggestions": []})
        );
        assert_eq!(record.raw_text.as_deref(), Some("I could not produce JSON."));
    }

    #[test]
    fn test_reopened_run_is_never_saved_again() {
        let mut interp = StreamInterpreter::<RelationAnalysisResult>::reopen(
            "Here: {\"relations\":[]}".to_string(),
        );
        assert_eq!(interp.state(), InterpreterState::Parsed);
        assert!(interp.is_saved());
        assert_eq!(interp.take_history_record(vec![], None).unwrap(), None);

        let degraded = StreamInterpreter::<AnalysisResult>::reopen("raw".to_string());
        assert_eq!(degraded.state(), InterpreterState::Degraded);
        assert!(degraded.value().is_none());
    }

    #[test]
    fn test_null_sections_still_parse() {
        let mut interp = StreamInterpreter::<AnalysisResult>::new();
        feed_all(
            &mut interp,
            &[r#"0:"{\"groups\":[{\"label\":\"sea\",\"fragmentIds\":[\"a\"]}],\"suggestions\":null}""#],
        );
        assert_eq!(interp.finish(), InterpreterState::Parsed);
        let result = interp.result().unwrap();
        assert_eq!(result.groups[0].label, "sea");
        assert!(result.suggestions.is_empty());

        let record = interp.take_history_record(vec!["a".into()], None).unwrap().unwrap();
        assert_eq!(record.result["suggestions"], serde_json::Value::Null);
        assert_eq!(record.result["groups"][0]["label"], "sea");
    }

    #[test]
    fn test_float_heat_score_still_parses() {
        let mut interp = StreamInterpreter::<RelationAnalysisResult>::new();
        interp.feed(
            encode_text_delta(r#"{"themes":[{"name":"loss","level":"primary","heat_score":3.0}]}"#)
                .as_bytes(),
        );
        assert_eq!(interp.finish(), InterpreterState::Parsed);
        assert_eq!(interp.result().unwrap().themes[0].heat_score, 3);

        let record = interp.take_history_record(vec![], None).unwrap().unwrap();
        assert_eq!(record.result["themes"][0]["heat_score"], 3.0);
    }

    #[test]
    fn test_unknown_enum_values_are_stored_verbatim() {
        let answer = r#"{"relations":[{"source_fragment_id":"a","target_fragment_id":"b","relation_type":"mirror","strength":0.5}],"themes":[{"name":"x","level":"core"}]}"#;
        let mut interp = StreamInterpreter::<RelationAnalysisResult>::new();
        interp.feed(encode_text_delta(answer).as_bytes());
        assert_eq!(interp.finish(), InterpreterState::Parsed);
        assert_eq!(
            interp.result().unwrap().relations[0].relation_type,
            crate::models::RelationType::Unknown
        );

        let record = interp.take_history_record(vec![], None).unwrap().unwrap();
        assert_eq!(record.result["relations"][0]["relation_type"], "mirror");
        assert_eq!(record.result["themes"][0]["level"], "core");
        assert_eq!(record.result, serde_json::from_str::<serde_json::Value>(answer).unwrap());
    }

    #[test]
    fn test_mistyped_object_is_parsed_without_typed_view() {
        let mut interp = StreamInterpreter::<AnalysisResult>::new();
        feed_all(&mut interp, &[r#"0:"{\"groups\":\"none\"}""#]);
        assert_eq!(interp.finish(), InterpreterState::Parsed);
        assert!(interp.result().is_none());
        assert_eq!(interp.value().unwrap()["groups"], "none");

        let record = interp.take_history_record(vec![], None).unwrap().unwrap();
        assert_eq!(record.result, serde_json::json!({"groups": "none"}));
    }
}

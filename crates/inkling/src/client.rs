//! HTTP client for a running Inkling server.
//!
//! [`AnalysisClient`] is constructed explicitly and passed wherever it is
//! needed. Analysis calls return an [`AnalysisSession`] that owns the
//! response body and one [`StreamInterpreter`]; the caller drives it with
//! [`AnalysisSession::next_update`], which suspends until the transport
//! delivers more bytes.
//!
//! ```rust,no_run
//! # async fn demo(client: inkling::client::AnalysisClient) -> anyhow::Result<()> {
//! let mut session = client.analyze_relations(vec!["a".into(), "b".into()]).await?;
//! while let Some(text) = session.next_update().await {
//!     println!("{} chars so far", text.len());
//! }
//! session.finish();
//! session.save_history().await?;
//! # Ok(())
//! # }
//! ```

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use inkling_core::interpreter::{InterpreterState, StreamInterpreter};
use inkling_core::models::{
    AnalysisMode, AnalysisResult, Fragment, HistoryRecord, NewHistoryRecord, NewSuggestion,
    RelationAnalysisResult,
};
use inkling_core::shape::{timeline_coverage, ShapeCheck, ShapeWarning};

use crate::config::ClientConfig;

#[derive(Debug, Error)]
pub enum ClientError {
    /// The request never produced a response (connect, TLS, timeout).
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The server answered with a non-2xx status.
    #[error("{code} ({status}): {message}")]
    Rejected {
        status: u16,
        code: String,
        message: String,
    },

    /// A stream response ended before any bytes arrived.
    #[error("analysis stream ended without a body")]
    MissingBody,

    #[error("failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Health {
    pub status: String,
    pub version: String,
}

/// A structured result the client knows how to interpret and persist.
pub trait AnalysisOutput: DeserializeOwned + Serialize + Default + ShapeCheck + Send {
    const MODE: AnalysisMode;

    /// Shape warnings for a parsed result over `fragment_count` fragments.
    fn shape_report(&self, _fragment_count: usize) -> Vec<ShapeWarning> {
        self.shape_warnings()
    }

    /// Suggestions to store as pending after the history record is saved.
    fn pending_suggestions(&self) -> Vec<NewSuggestion> {
        Vec::new()
    }
}

impl AnalysisOutput for AnalysisResult {
    const MODE: AnalysisMode = AnalysisMode::Simple;
}

impl AnalysisOutput for RelationAnalysisResult {
    const MODE: AnalysisMode = AnalysisMode::Relation;

    fn shape_report(&self, fragment_count: usize) -> Vec<ShapeWarning> {
        let mut warnings = self.shape_warnings();
        warnings.extend(timeline_coverage(self, fragment_count));
        warnings
    }

    fn pending_suggestions(&self) -> Vec<NewSuggestion> {
        self.new_suggestions()
    }
}

#[derive(Serialize)]
struct AnalyzeBody<'a> {
    fragments: &'a [Fragment],
    #[serde(rename = "targetFragment", skip_serializing_if = "Option::is_none")]
    target_fragment: Option<&'a Fragment>,
}

#[derive(Serialize)]
struct RelationAnalyzeBody<'a> {
    fragment_ids: &'a [String],
    analysis_depth: &'a str,
}

#[derive(Serialize)]
struct SuggestionsBody<'a> {
    suggestions: &'a [NewSuggestion],
}

#[derive(Deserialize)]
struct SavedBody {
    saved: usize,
}

#[derive(Serialize)]
struct NewFragmentBody<'a> {
    content: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    story_id: Option<&'a str>,
}

/// Client for one server, optionally authenticated with a bearer token.
#[derive(Debug, Clone)]
pub struct AnalysisClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl AnalysisClient {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self, ClientError> {
        Self::new(config.base_url.clone(), config.token.clone())
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self.http.request(method, format!("{}{}", self.base_url, path));
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response, ClientError> {
        let resp = builder.send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let text = resp.text().await.unwrap_or_default();
        let (code, message) = match serde_json::from_str::<ErrorBody>(&text) {
            Ok(body) => (body.error.code, body.error.message),
            Err(_) => ("http_error".to_string(), text),
        };
        Err(ClientError::Rejected {
            status: status.as_u16(),
            code,
            message,
        })
    }

    pub async fn health(&self) -> Result<Health, ClientError> {
        let resp = self.send(self.request(reqwest::Method::GET, "/health")).await?;
        Ok(resp.json().await?)
    }

    pub async fn list_fragments(&self) -> Result<Vec<Fragment>, ClientError> {
        let resp = self
            .send(self.request(reqwest::Method::GET, "/api/fragments"))
            .await?;
        Ok(resp.json().await?)
    }

    pub async fn create_fragment(
        &self,
        content: &str,
        story_id: Option<&str>,
    ) -> Result<Fragment, ClientError> {
        let body = NewFragmentBody { content, story_id };
        let resp = self
            .send(self.request(reqwest::Method::POST, "/api/fragments").json(&body))
            .await?;
        Ok(resp.json().await?)
    }

    /// Opens a simple analysis over inline fragments.
    pub async fn analyze(
        &self,
        fragments: Vec<Fragment>,
        target: Option<Fragment>,
    ) -> Result<AnalysisSession<AnalysisResult>, ClientError> {
        let body = AnalyzeBody {
            fragments: &fragments,
            target_fragment: target.as_ref(),
        };
        let builder = self.request(reqwest::Method::POST, "/api/analyze").json(&body);
        let fragment_ids = fragments.iter().map(|f| f.id.clone()).collect();
        let target_id = target.map(|t| t.id);
        self.open_session(builder, fragment_ids, target_id).await
    }

    /// Opens a relation analysis over stored fragments.
    pub async fn analyze_relations(
        &self,
        fragment_ids: Vec<String>,
    ) -> Result<AnalysisSession<RelationAnalysisResult>, ClientError> {
        let body = RelationAnalyzeBody {
            fragment_ids: &fragment_ids,
            analysis_depth: "basic",
        };
        let builder = self
            .request(reqwest::Method::POST, "/api/relations/analyze")
            .json(&body);
        self.open_session(builder, fragment_ids, None).await
    }

    /// Sends the request and waits for the first body chunk, so transport
    /// failures surface here rather than as a half-built session.
    async fn open_session<T: AnalysisOutput>(
        &self,
        builder: reqwest::RequestBuilder,
        fragment_ids: Vec<String>,
        target_fragment_id: Option<String>,
    ) -> Result<AnalysisSession<T>, ClientError> {
        let resp = self.send(builder).await?;
        let mut body = resp.bytes_stream().boxed();
        let first = match body.next().await {
            Some(Ok(bytes)) => bytes,
            Some(Err(e)) => return Err(ClientError::Transport(e)),
            None => return Err(ClientError::MissingBody),
        };
        debug!(mode = T::MODE.as_str(), "analysis stream opened");

        Ok(AnalysisSession {
            client: self.clone(),
            body,
            pending: Some(first),
            ended: false,
            interpreter: StreamInterpreter::new(),
            fragment_ids,
            target_fragment_id,
        })
    }

    pub async fn save_history(&self, record: &NewHistoryRecord) -> Result<HistoryRecord, ClientError> {
        let resp = self
            .send(self.request(reqwest::Method::POST, "/api/history").json(record))
            .await?;
        Ok(resp.json().await?)
    }

    pub async fn list_history(&self, limit: i64) -> Result<Vec<HistoryRecord>, ClientError> {
        let resp = self
            .send(
                self.request(reqwest::Method::GET, "/api/history")
                    .query(&[("limit", limit)]),
            )
            .await?;
        Ok(resp.json().await?)
    }

    pub async fn get_history(&self, id: &str) -> Result<HistoryRecord, ClientError> {
        let resp = self
            .send(self.request(reqwest::Method::GET, &format!("/api/history/{}", id)))
            .await?;
        Ok(resp.json().await?)
    }

    pub async fn delete_history(&self, id: &str) -> Result<(), ClientError> {
        self.send(self.request(reqwest::Method::DELETE, &format!("/api/history/{}", id)))
            .await?;
        Ok(())
    }

    /// Stores suggestions as pending. Returns how many were new.
    pub async fn save_suggestions(&self, suggestions: &[NewSuggestion]) -> Result<usize, ClientError> {
        let body = SuggestionsBody { suggestions };
        let resp = self
            .send(
                self.request(reqwest::Method::POST, "/api/relations/suggestions")
                    .json(&body),
            )
            .await?;
        Ok(resp.json::<SavedBody>().await?.saved)
    }
}

/// One in-flight analysis: the response body plus its interpreter.
///
/// Dropping the session aborts the underlying request. Nothing is persisted
/// until [`save_history`](Self::save_history) is called after the stream
/// has finished.
pub struct AnalysisSession<T> {
    client: AnalysisClient,
    body: BoxStream<'static, reqwest::Result<Bytes>>,
    pending: Option<Bytes>,
    ended: bool,
    interpreter: StreamInterpreter<T>,
    fragment_ids: Vec<String>,
    target_fragment_id: Option<String>,
}

impl<T: AnalysisOutput> AnalysisSession<T> {
    /// Waits for the next change to the visible text and returns it.
    ///
    /// Returns `None` once the transport is exhausted. A transport error
    /// mid-stream also ends the stream; it is kept as a notice and the text
    /// received so far stays available.
    pub async fn next_update(&mut self) -> Option<&str> {
        while !self.ended {
            let next = match self.pending.take() {
                Some(bytes) => Some(Ok(bytes)),
                None => self.body.next().await,
            };
            match next {
                Some(Ok(bytes)) => {
                    if self.interpreter.feed(&bytes) {
                        return Some(self.interpreter.text());
                    }
                }
                Some(Err(e)) => {
                    warn!(error = %e, "analysis stream interrupted");
                    self.interpreter.record_notice(format!("transport error: {}", e));
                    self.ended = true;
                }
                None => self.ended = true,
            }
        }
        None
    }

    /// Ends the stream and runs extraction once.
    pub fn finish(&mut self) -> InterpreterState {
        self.ended = true;
        let state = self.interpreter.finish();

        for notice in self.interpreter.notices() {
            warn!(notice = %notice, "error notice in analysis stream");
        }
        match (self.interpreter.value(), self.interpreter.result()) {
            (Some(_), Some(result)) => {
                for warning in result.shape_report(self.fragment_ids.len()) {
                    warn!(warning = %warning, "analysis result shape");
                }
            }
            (Some(_), None) => warn!(
                mode = T::MODE.as_str(),
                "result JSON does not match the expected shape, keeping it as is"
            ),
            (None, _) => warn!(
                chars = self.interpreter.text().len(),
                "no structured result found, keeping raw text"
            ),
        }
        state
    }

    pub fn interpreter(&self) -> &StreamInterpreter<T> {
        &self.interpreter
    }

    pub fn text(&self) -> &str {
        self.interpreter.text()
    }

    /// The extracted JSON, exactly as the model produced it.
    pub fn value(&self) -> Option<&serde_json::Value> {
        self.interpreter.value()
    }

    pub fn result(&self) -> Option<&T> {
        self.interpreter.result()
    }

    /// Posts the history record for this run, at most once.
    ///
    /// Relation results additionally store their suggestions as pending.
    /// Returns `None` if the stream has not finished, was already saved, or
    /// produced no text. Once the history record is stored, a failure to
    /// store suggestions is logged and the record is still returned.
    pub async fn save_history(&mut self) -> Result<Option<HistoryRecord>, ClientError> {
        let record = self
            .interpreter
            .take_history_record(self.fragment_ids.clone(), self.target_fragment_id.clone())?;
        let Some(record) = record else {
            return Ok(None);
        };

        let stored = self.client.save_history(&record).await?;
        debug!(history_id = %stored.id, "history saved");

        let suggestions = self
            .interpreter
            .result()
            .map(|r| r.pending_suggestions())
            .unwrap_or_default();
        if !suggestions.is_empty() {
            match self.client.save_suggestions(&suggestions).await {
                Ok(saved) => debug!(saved, offered = suggestions.len(), "suggestions saved"),
                Err(e) => warn!(
                    history_id = %stored.id,
                    offered = suggestions.len(),
                    error = %e,
                    "history saved but suggestions were not"
                ),
            }
        }

        Ok(Some(stored))
    }
}

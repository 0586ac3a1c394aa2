//! Completion service boundary.
//!
//! A [`CompletionProvider`] turns a [`CompletionRequest`] into a stream of
//! plain text deltas. Providers must fail from [`CompletionProvider::stream`]
//! itself (before any delta) when the upstream rejects the request, so the
//! server can answer with an error status instead of a half-open stream.
//!
//! Two implementations:
//!
//! - [`OpenAiCompatibleProvider`] sends `POST {base_url}/chat/completions` with
//!   `stream: true`, decoding the server-sent events body.
//! - [`ScriptedProvider`] replays a fixed script, for tests and offline
//!   demos.

use std::collections::VecDeque;
use std::sync::Mutex;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use serde::Deserialize;
use tracing::debug;

use inkling_core::models::AnalysisPrompt;
use inkling_core::stream::LineSplitter;

use crate::config::CompletionConfig;

/// One completion call: prompts plus sampling parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    pub model: String,
    pub temperature: f32,
}

impl CompletionRequest {
    pub fn new(prompt: AnalysisPrompt, model: impl Into<String>, temperature: f32) -> Self {
        Self {
            system: prompt.system,
            user: prompt.user,
            model: model.into(),
            temperature,
        }
    }
}

/// Text deltas in arrival order. An `Err` item ends the stream.
pub type DeltaStream = BoxStream<'static, Result<String>>;

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Opens a streaming completion.
    async fn stream(&self, request: CompletionRequest) -> Result<DeltaStream>;
}

// ============ OpenAI-compatible SSE client ============

#[derive(Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct ChatChoice {
    #[serde(default)]
    delta: ChatDelta,
}

/// `reasoning_content` deltas from thinking models are not part of the
/// answer and are dropped by not being declared here.
#[derive(Deserialize, Default)]
struct ChatDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, PartialEq)]
enum SseEvent {
    Delta(String),
    Done,
}

/// Decodes one SSE line. Comments, blank lines, and non-`data` fields
/// yield `None`.
fn parse_sse_line(line: &str) -> Result<Option<SseEvent>> {
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(None);
    };
    let data = data.trim();
    if data.is_empty() {
        return Ok(None);
    }
    if data == "[DONE]" {
        return Ok(Some(SseEvent::Done));
    }

    let chunk: ChatChunk =
        serde_json::from_str(data).with_context(|| format!("malformed SSE payload: {}", data))?;
    if let Some(err) = chunk.error {
        bail!("completion service error: {}", err);
    }
    let text: String = chunk
        .choices
        .into_iter()
        .filter_map(|c| c.delta.content)
        .collect();
    Ok(Some(SseEvent::Delta(text)))
}

struct SseState {
    body: BoxStream<'static, reqwest::Result<Bytes>>,
    splitter: LineSplitter,
    queue: VecDeque<String>,
    failure: Option<anyhow::Error>,
    done: bool,
}

impl SseState {
    /// Returns `false` once the stream must stop reading.
    fn absorb(&mut self, line: &str) -> bool {
        match parse_sse_line(line) {
            Ok(Some(SseEvent::Delta(text))) => {
                if !text.is_empty() {
                    self.queue.push_back(text);
                }
                true
            }
            Ok(Some(SseEvent::Done)) => false,
            Ok(None) => true,
            Err(e) => {
                self.failure = Some(e);
                false
            }
        }
    }
}

fn sse_deltas(body: BoxStream<'static, reqwest::Result<Bytes>>) -> DeltaStream {
    let state = SseState {
        body,
        splitter: LineSplitter::new(),
        queue: VecDeque::new(),
        failure: None,
        done: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(delta) = st.queue.pop_front() {
                return Some((Ok(delta), st));
            }
            if let Some(err) = st.failure.take() {
                st.done = true;
                return Some((Err(err), st));
            }
            if st.done {
                return None;
            }

            match st.body.next().await {
                Some(Ok(bytes)) => {
                    for line in st.splitter.push(&bytes) {
                        if !st.absorb(&line) {
                            st.done = true;
                            break;
                        }
                    }
                }
                Some(Err(e)) => {
                    st.failure = Some(anyhow!(e).context("completion stream interrupted"));
                }
                None => {
                    if let Some(tail) = st.splitter.finish() {
                        st.absorb(&tail);
                    }
                    st.done = true;
                }
            }
        }
    })
    .boxed()
}

/// Streams chat completions from any OpenAI-compatible endpoint.
pub struct OpenAiCompatibleProvider {
    http: reqwest::Client,
    base_url: String,
    api_key_env: String,
    api_key: Option<String>,
}

impl OpenAiCompatibleProvider {
    /// Builds the provider. A missing API key is not an error here; calls
    /// fail until it is set.
    ///
    /// Only connecting and silence between reads are bounded. A long
    /// answer that keeps streaming is never cut off.
    pub fn from_config(config: &CompletionConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .read_timeout(config.idle_timeout())
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key_env: config.api_key_env.clone(),
            api_key: std::env::var(&config.api_key_env).ok(),
        })
    }
}

#[async_trait]
impl CompletionProvider for OpenAiCompatibleProvider {
    async fn stream(&self, request: CompletionRequest) -> Result<DeltaStream> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow!("{} is not set", self.api_key_env))?;

        let url = format!("{}/chat/completions", self.base_url);
        let body = serde_json::json!({
            "model": request.model,
            "temperature": request.temperature,
            "stream": true,
            "messages": [
                {"role": "system", "content": request.system},
                {"role": "user", "content": request.user},
            ],
        });

        debug!(model = %request.model, temperature = request.temperature, "opening completion stream");
        let resp = self
            .http
            .post(&url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", url))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            bail!("completion service returned {}: {}", status, text);
        }

        Ok(sse_deltas(resp.bytes_stream().boxed()))
    }
}

// ============ Scripted provider ============

/// One step of a [`ScriptedProvider`] script.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Delta(String),
    Fail(String),
}

/// Replays a fixed script and records every request it receives.
#[derive(Default)]
pub struct ScriptedProvider {
    steps: Vec<ScriptStep>,
    reject: Option<String>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedProvider {
    /// Streams `deltas` in order.
    pub fn new<I, S>(deltas: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            steps: deltas
                .into_iter()
                .map(|d| ScriptStep::Delta(d.into()))
                .collect(),
            ..Default::default()
        }
    }

    pub fn from_steps(steps: Vec<ScriptStep>) -> Self {
        Self {
            steps,
            ..Default::default()
        }
    }

    /// A provider whose every call fails before the first delta.
    pub fn rejecting(message: impl Into<String>) -> Self {
        Self {
            reject: Some(message.into()),
            ..Default::default()
        }
    }

    /// Requests received so far, oldest first.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    async fn stream(&self, request: CompletionRequest) -> Result<DeltaStream> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }
        if let Some(message) = &self.reject {
            bail!("{}", message);
        }

        let items: Vec<Result<String>> = self
            .steps
            .iter()
            .map(|step| match step {
                ScriptStep::Delta(text) => Ok(text.clone()),
                ScriptStep::Fail(message) => Err(anyhow!("{}", message)),
            })
            .collect();
        Ok(stream::iter(items)
            .scan(false, |failed, item| {
                let next = if *failed {
                    None
                } else {
                    *failed = item.is_err();
                    Some(item)
                };
                futures::future::ready(next)
            })
            .boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn body_of(chunks: &[&'static str]) -> BoxStream<'static, reqwest::Result<Bytes>> {
        stream::iter(
            chunks
                .iter()
                .map(|c| Ok(Bytes::from_static(c.as_bytes())))
                .collect::<Vec<_>>(),
        )
        .boxed()
    }

    async fn collect(stream: DeltaStream) -> Vec<std::result::Result<String, String>> {
        stream
            .map(|item| item.map_err(|e| e.to_string()))
            .collect()
            .await
    }

    #[test]
    fn test_parse_sse_line_variants() {
        assert_eq!(parse_sse_line(": keep-alive").unwrap(), None);
        assert_eq!(parse_sse_line("event: message").unwrap(), None);
        assert_eq!(
            parse_sse_line("data: [DONE]").unwrap(),
            Some(SseEvent::Done)
        );
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"reasoning_content":"hmm"}}]}"#)
                .unwrap(),
            Some(SseEvent::Delta(String::new()))
        );
        assert!(parse_sse_line(r#"data: {"error":{"message":"quota"}}"#).is_err());
    }

    #[tokio::test]
    async fn test_sse_deltas_across_split_chunks() {
        let body = body_of(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"{\\\"sugg\"}}]}\n\ndata: {\"choi",
            "ces\":[{\"delta\":{\"content\":\"estions\\\":[]}\"}}]}\n\n",
            "data: [DONE]\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"ignored\"}}]}\n\n",
        ]);
        let out = collect(sse_deltas(body)).await;
        assert_eq!(
            out,
            vec![Ok("{\"sugg".to_string()), Ok("estions\":[]}".to_string())]
        );
    }

    #[tokio::test]
    async fn test_sse_deltas_surface_error_after_pending_text() {
        let body = body_of(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"partial\"}}]}\n",
            "data: not json\n",
        ]);
        let out = collect(sse_deltas(body)).await;
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], Ok("partial".to_string()));
        assert!(out[1].is_err());
    }

    #[tokio::test]
    async fn test_scripted_provider_stops_after_failure() {
        let provider = ScriptedProvider::from_steps(vec![
            ScriptStep::Delta("a".into()),
            ScriptStep::Fail("dropped".into()),
            ScriptStep::Delta("never".into()),
        ]);
        let request = CompletionRequest {
            system: "s".into(),
            user: "u".into(),
            model: "m".into(),
            temperature: 0.6,
        };
        let out = collect(provider.stream(request.clone()).await.unwrap()).await;
        assert_eq!(out, vec![Ok("a".to_string()), Err("dropped".to_string())]);
        assert_eq!(provider.requests(), vec![request]);
    }

    /// Serves `/chat/completions` with one SSE delta per entry of `gaps`,
    /// each sent after sleeping that long, then `[DONE]`.
    async fn slow_upstream(gaps: Vec<Duration>) -> String {
        use axum::{body::Body, routing::post, Router};

        let app = Router::new().route(
            "/chat/completions",
            post(move || {
                let gaps = gaps.clone();
                async move {
                    let events = stream::iter(gaps.into_iter().enumerate())
                        .then(|(i, gap)| async move {
                            tokio::time::sleep(gap).await;
                            Ok::<_, std::convert::Infallible>(Bytes::from(format!(
                                "data: {{\"choices\":[{{\"delta\":{{\"content\":\"d{}\"}}}}]}}\n\n",
                                i
                            )))
                        })
                        .chain(stream::once(async {
                            Ok(Bytes::from_static(b"data: [DONE]\n\n"))
                        }));
                    Body::from_stream(events)
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });
        format!("http://{}", addr)
    }

    fn provider_for(base_url: String) -> OpenAiCompatibleProvider {
        let config = CompletionConfig {
            base_url,
            connect_timeout_secs: 1,
            idle_timeout_secs: 1,
            ..Default::default()
        };
        let mut provider = OpenAiCompatibleProvider::from_config(&config).unwrap();
        provider.api_key = Some("test-key".into());
        provider
    }

    fn request() -> CompletionRequest {
        CompletionRequest {
            system: "s".into(),
            user: "u".into(),
            model: "m".into(),
            temperature: 0.6,
        }
    }

    #[tokio::test]
    async fn test_long_stream_outlives_idle_timeout() {
        // Five deltas 400ms apart: 2s in total, never 1s of silence.
        let base = slow_upstream(vec![Duration::from_millis(400); 5]).await;
        let provider = provider_for(base);
        let out = collect(provider.stream(request()).await.unwrap()).await;
        assert_eq!(
            out,
            (0..5).map(|i| Ok(format!("d{}", i))).collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn test_silent_stream_fails_after_idle_timeout() {
        let base = slow_upstream(vec![Duration::ZERO, Duration::from_secs(3)]).await;
        let provider = provider_for(base);
        let out = collect(provider.stream(request()).await.unwrap()).await;
        assert_eq!(out[0], Ok("d0".to_string()));
        assert_eq!(out.len(), 2);
        assert!(out[1].as_ref().unwrap_err().contains("interrupted"));
    }

    #[tokio::test]
    async fn test_rejecting_provider_fails_before_stream() {
        let provider = ScriptedProvider::rejecting("401 unauthorized");
        let request = CompletionRequest {
            system: String::new(),
            user: String::new(),
            model: "m".into(),
            temperature: 0.8,
        };
        assert!(provider.stream(request).await.is_err());
    }
}

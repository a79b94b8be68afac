use std::time::Duration;

use anyhow::{anyhow, Result};
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::tui::AppEvent;

pub const BASE_URL: &str = "http://localhost:11434";

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerStatus {
    Running,
    NotRunning,
    NoModels,
}

/// Result of one probe cycle. `models` is only populated for `Running`.
#[derive(Debug, Clone)]
pub struct ProbeReport {
    pub status: ServerStatus,
    pub models: Vec<String>,
}

/// Events emitted by a streaming generation task. Each is tagged with the
/// session id it belongs to so the app can discard stale arrivals.
#[derive(Debug)]
pub enum StreamEvent {
    Fragment(String),
    Done,
    Cancelled,
    Failed(String),
}

#[derive(Serialize)]
struct GenerateRequest {
    model: String,
    prompt: String,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f64,
    top_p: f64,
}

#[derive(Deserialize)]
struct GenerateChunk {
    response: Option<String>,
    // Present on the final chunk; end-of-body already terminates the stream.
    #[serde(default)]
    #[allow(dead_code)]
    done: bool,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<Value>,
}

enum Finished {
    Complete,
    Cancelled,
}

#[derive(Clone)]
pub struct OllamaClient {
    client: Client,
    base_url: String,
}

impl OllamaClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.to_string(),
        }
    }

    /// One availability probe. Never fails: every transport problem maps to
    /// `NotRunning`. The listing call is only attempted once the version
    /// endpoint answered within the 2s timeout.
    pub async fn probe(&self) -> ProbeReport {
        if !self.check_version().await {
            return ProbeReport {
                status: ServerStatus::NotRunning,
                models: Vec::new(),
            };
        }

        match self.list_models().await {
            Ok(models) if models.is_empty() => ProbeReport {
                status: ServerStatus::NoModels,
                models,
            },
            Ok(models) => ProbeReport {
                status: ServerStatus::Running,
                models,
            },
            Err(err) => {
                tracing::debug!("model listing failed: {err}");
                ProbeReport {
                    status: ServerStatus::NotRunning,
                    models: Vec::new(),
                }
            }
        }
    }

    async fn check_version(&self) -> bool {
        let url = format!("{}/api/version", self.base_url);
        match self.client.get(&url).timeout(PROBE_TIMEOUT).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    pub async fn list_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/api/tags", self.base_url);

        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(anyhow!("Failed to list models: {}", response.status()));
        }

        let tags: TagsResponse = response.json().await?;
        Ok(extract_model_names(&tags.models))
    }

    /// Stream one generation into the app event channel. Every outcome is
    /// reported as a terminal `StreamEvent`; the task itself never fails.
    pub async fn generate(
        &self,
        model: String,
        prompt: String,
        session: u64,
        tx: UnboundedSender<AppEvent>,
        cancel: CancellationToken,
    ) {
        let event = match self.run_generate(&model, &prompt, session, &tx, &cancel).await {
            Ok(Finished::Complete) => StreamEvent::Done,
            Ok(Finished::Cancelled) => StreamEvent::Cancelled,
            Err(err) => StreamEvent::Failed(err.to_string()),
        };
        let _ = tx.send(AppEvent::Stream { session, event });
    }

    async fn run_generate(
        &self,
        model: &str,
        prompt: &str,
        session: u64,
        tx: &UnboundedSender<AppEvent>,
        cancel: &CancellationToken,
    ) -> Result<Finished> {
        let url = format!("{}/api/generate", self.base_url);

        let request = GenerateRequest {
            model: model.to_string(),
            prompt: prompt.to_string(),
            stream: true,
            options: GenerateOptions {
                temperature: 0.7,
                top_p: 0.95,
            },
        };

        let response = tokio::select! {
            _ = cancel.cancelled() => return Ok(Finished::Cancelled),
            response = self.client.post(&url).json(&request).send() => response?,
        };

        if !response.status().is_success() {
            return Err(anyhow!(
                "Ollama request failed with status: {}. Make sure Ollama is running with: ollama serve",
                response.status()
            ));
        }

        let mut stream = response.bytes_stream();
        let mut buffer = String::new();

        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => return Ok(Finished::Cancelled),
                chunk = stream.next() => chunk,
            };

            match chunk {
                Some(Ok(bytes)) => {
                    buffer.push_str(&String::from_utf8_lossy(&bytes));
                    while let Some(pos) = buffer.find('\n') {
                        let line: String = buffer.drain(..=pos).collect();
                        send_fragment(&line, session, tx);
                    }
                }
                Some(Err(err)) => return Err(err.into()),
                None => break,
            }
        }

        // A final object without a trailing newline still carries a fragment.
        let rest = std::mem::take(&mut buffer);
        send_fragment(&rest, session, tx);

        Ok(Finished::Complete)
    }
}

/// Parse one NDJSON line and forward its `response` fragment, if any. A
/// malformed line is logged and skipped; it must not end the stream.
fn send_fragment(line: &str, session: u64, tx: &UnboundedSender<AppEvent>) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }

    match serde_json::from_str::<GenerateChunk>(line) {
        Ok(chunk) => {
            if let Some(text) = chunk.response {
                let _ = tx.send(AppEvent::Stream {
                    session,
                    event: StreamEvent::Fragment(text),
                });
            }
        }
        Err(err) => tracing::debug!("skipping malformed stream line: {err} - line: {line}"),
    }
}

/// The tags endpoint may list models as bare name strings or as objects with
/// a `name` field. Anything else is skipped.
fn extract_model_names(entries: &[Value]) -> Vec<String> {
    entries
        .iter()
        .filter_map(|entry| match entry {
            Value::String(name) => Some(name.clone()),
            Value::Object(fields) => fields
                .get("name")
                .and_then(Value::as_str)
                .map(str::to_string),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc;

    #[test]
    fn extracts_bare_string_names() {
        let entries = vec![json!("a"), json!("b")];
        assert_eq!(extract_model_names(&entries), vec!["a", "b"]);
    }

    #[test]
    fn extracts_object_names() {
        let entries = vec![json!({"name": "mistral", "size": 7}), json!("phi3")];
        assert_eq!(extract_model_names(&entries), vec!["mistral", "phi3"]);
    }

    #[test]
    fn skips_malformed_entries() {
        let entries = vec![
            json!(42),
            json!({"model": "no name field"}),
            json!({"name": 9}),
            json!("kept"),
        ];
        assert_eq!(extract_model_names(&entries), vec!["kept"]);
    }

    #[test]
    fn absent_models_field_parses_to_empty_list() {
        let tags: TagsResponse = serde_json::from_str("{}").expect("parses");
        assert!(tags.models.is_empty());
    }

    #[tokio::test]
    async fn unreachable_server_probes_as_not_running() {
        // Nothing listens on the discard port; the probe must swallow the
        // failure instead of surfacing it.
        let client = OllamaClient::new("http://127.0.0.1:9");
        let report = client.probe().await;
        assert_eq!(report.status, ServerStatus::NotRunning);
        assert!(report.models.is_empty());
    }

    #[test]
    fn chunk_with_response_yields_fragment() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        send_fragment(r#"{"response":"Hello","done":false}"#, 7, &tx);

        match rx.try_recv() {
            Ok(AppEvent::Stream {
                session,
                event: StreamEvent::Fragment(text),
            }) => {
                assert_eq!(session, 7);
                assert_eq!(text, "Hello");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn chunk_without_response_is_ignored() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        send_fragment(r#"{"done":true,"eval_count":12}"#, 1, &tx);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn malformed_line_is_skipped() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        send_fragment("{not json at all", 1, &tx);
        send_fragment("", 1, &tx);
        assert!(rx.try_recv().is_err());
    }
}

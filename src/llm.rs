//! Streaming chat-completion client.
//!
//! Sends the two-section release-notes prompt and exposes the assistant's
//! delta-content fragments as a chunked byte stream. SSE framing (`data: `
//! lines, partial lines carried across network chunks, the `[DONE]`
//! sentinel) is handled here so downstream consumers only see text.

use anyhow::{Context, Result};
use bytes::Bytes;
use futures_util::StreamExt;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::demux::Utf8Assembler;

const COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Diffs are truncated before prompting; model context is not the place to
/// spend an entire monorepo patch.
const DIFF_CHAR_LIMIT: usize = 2000;

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Truncate a diff to the prompt budget, cutting on a char boundary and
/// marking the cut.
pub fn truncate_diff(diff: &str) -> String {
    match diff.char_indices().nth(DIFF_CHAR_LIMIT) {
        Some((idx, _)) => format!("{}\n...[truncated]", &diff[..idx]),
        None => diff.to_string(),
    }
}

/// Build the system prompt asking for the two tag-delimited sections.
pub fn build_prompt(diff: &str) -> String {
    format!(
        "You are a release-notes generator.\n\
         1) Produce a concise **Developer Note** summarizing what and why the change:\n\
         <developer>YOUR DEVELOPER NOTE HERE</developer>\n\
         2) Then produce a user-friendly **Marketing Note**:\n\
         <marketing>YOUR MARKETING NOTE HERE</marketing>\n\
         —\n\
         Here is the Git diff:\n{}",
        truncate_diff(diff)
    )
}

/// Accumulates raw SSE bytes and yields complete `data:` payloads.
/// A line split across network chunks is carried until its newline arrives,
/// and a multi-byte character split at a chunk boundary is reassembled
/// before any line is inspected.
pub struct SseLineBuffer {
    utf8: Utf8Assembler,
    partial: String,
}

impl SseLineBuffer {
    pub fn new() -> Self {
        Self {
            utf8: Utf8Assembler::new(),
            partial: String::new(),
        }
    }

    /// Feed one network chunk; returns the `data:` payloads completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.utf8.push(chunk, &mut self.partial);
        let mut out = Vec::new();
        while let Some(nl) = self.partial.find('\n') {
            let line: String = self.partial.drain(..=nl).collect();
            let line = line.trim_end();
            // Skip blank separators and SSE comments.
            if line.is_empty() || line.starts_with(':') {
                continue;
            }
            if let Some(data) = line.strip_prefix("data: ") {
                out.push(data.to_string());
            }
        }
        out
    }
}

impl Default for SseLineBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Pull the assistant text delta out of one streamed completion event.
pub fn delta_content(data: &str) -> Option<String> {
    let event: Value = serde_json::from_str(data).ok()?;
    event
        .get("choices")?
        .get(0)?
        .get("delta")?
        .get("content")?
        .as_str()
        .map(str::to_string)
}

/// Client for the completion service.
pub struct CompletionClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

impl CompletionClient {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            model,
        }
    }

    /// Start a streaming completion for the given diff. The returned stream
    /// yields the assistant's text fragments as bytes, in arrival order;
    /// a transport failure mid-stream surfaces as an `Err` item.
    pub async fn stream_notes(
        &self,
        diff: &str,
    ) -> Result<ReceiverStream<anyhow::Result<Bytes>>> {
        let body = json!({
            "model": self.model,
            "stream": true,
            "messages": [{ "role": "system", "content": build_prompt(diff) }],
        });

        let resp = self
            .http
            .post(COMPLETIONS_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .context("Failed to send completion request")?
            .error_for_status()
            .context("Completion service returned error status")?;

        info!(model = %self.model, "completion stream opened");

        let (tx, rx) = mpsc::channel::<anyhow::Result<Bytes>>(32);
        let mut upstream = resp.bytes_stream();

        tokio::spawn(async move {
            let mut lines = SseLineBuffer::new();
            while let Some(next) = upstream.next().await {
                let chunk = match next {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        warn!("completion stream broke: {e}");
                        let _ = tx
                            .send(Err(anyhow::Error::new(e).context("completion stream failed")))
                            .await;
                        return;
                    }
                };
                for data in lines.push(&chunk) {
                    if data == "[DONE]" {
                        debug!("completion stream [DONE]");
                        return;
                    }
                    if let Some(text) = delta_content(&data) {
                        if tx.send(Ok(Bytes::from(text))).await.is_err() {
                            // Consumer stopped reading; nothing left to do.
                            return;
                        }
                    }
                }
            }
        });

        Ok(ReceiverStream::new(rx))
    }
}
